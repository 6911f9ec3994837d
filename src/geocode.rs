//! Display names for pins.
//!
//! A pin's label normally comes from reverse geocoding, which lives outside
//! this crate. `PlaceNamer` is the seam for such a service; `CoordinateNamer`
//! is the offline fallback that labels a pin by its hemisphere-qualified
//! coordinates.

use anyhow::{Result, bail};

/// Turns a coordinate into a human-readable place name
pub trait PlaceNamer {
    fn place_name(&self, latitude: f64, longitude: f64) -> Result<String>;
}

/// Names a place after its coordinates, e.g. `42.3933°N 71.0625°W`
pub struct CoordinateNamer;

impl PlaceNamer for CoordinateNamer {
    fn place_name(&self, latitude: f64, longitude: f64) -> Result<String> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            bail!("Coordinates out of range: {latitude}, {longitude}");
        }

        let ns = if latitude >= 0.0 { 'N' } else { 'S' };
        let ew = if longitude >= 0.0 { 'E' } else { 'W' };
        Ok(format!(
            "{:.4}°{ns} {:.4}°{ew}",
            latitude.abs(),
            longitude.abs()
        ))
    }
}

/// Name for a new pin: the user's choice if given, otherwise the namer's
pub fn pin_name(
    namer: &dyn PlaceNamer,
    given: Option<&str>,
    latitude: f64,
    longitude: f64,
) -> Result<String> {
    match given.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => Ok(name.to_string()),
        None => namer.place_name(latitude, longitude),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_names() {
        let namer = CoordinateNamer;
        assert_eq!(
            namer.place_name(42.393337, -71.062508).unwrap(),
            "42.3933°N 71.0625°W"
        );
        assert_eq!(namer.place_name(-33.8688, 151.2093).unwrap(), "33.8688°S 151.2093°E");
        assert!(namer.place_name(91.0, 0.0).is_err());
    }

    #[test]
    fn test_pin_name_prefers_given() {
        let namer = CoordinateNamer;
        assert_eq!(pin_name(&namer, Some(" Boston "), 1.0, 2.0).unwrap(), "Boston");
        assert_eq!(pin_name(&namer, Some("  "), 1.0, 2.0).unwrap(), "1.0000°N 2.0000°E");
        assert_eq!(pin_name(&namer, None, 0.0, -0.5).unwrap(), "0.0000°N 0.5000°W");
    }
}
