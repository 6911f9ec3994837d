//! Local pin and photo storage for pinsnap.
//!
//! Pins, photo records and the last map view are kept in a single YAML index;
//! downloaded image bytes live next to it, one file per photo. The
//! `PinStore` trait is the contract the collection manager depends on, and
//! `FileStore` is the on-disk implementation.
//!
//! Every mutation is written to disk before the in-memory copy is replaced,
//! so a failed write never leaves the store believing it succeeded.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Photos per collection when nothing else is configured (3 columns x 7 rows)
pub const DEFAULT_COLLECTION_SIZE: u32 = 21;

/// Surrogate key of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(Uuid);

impl PinId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PinId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a photo; download completions are matched on this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(Uuid);

impl PhotoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PhotoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user-placed map marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub id: PinId,
    pub latitude: f64,
    pub longitude: f64,
    /// Display label, usually from reverse geocoding
    pub name: String,
    /// Page of search results the current collection came from (starts at 1)
    pub page: u32,
    /// How many photos one collection holds; also the API page size
    pub collection_size: u32,
}

impl Pin {
    pub fn new(latitude: f64, longitude: f64, name: &str, collection_size: u32) -> Self {
        Self {
            id: PinId::new(),
            latitude,
            longitude,
            name: name.to_string(),
            page: 1,
            collection_size,
        }
    }
}

/// One image of a pin's collection. `bytes` is `None` until downloaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: PhotoId,
    pub pin_id: PinId,
    pub url: String,
    /// Insertion order across the whole store
    pub seq: u64,
    pub bytes: Option<Arc<[u8]>>,
}

impl Photo {
    pub fn is_resolved(&self) -> bool {
        self.bytes.is_some()
    }
}

/// Center and span of the map the last time it was shown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub latitude: f64,
    pub longitude: f64,
    pub span_latitude: f64,
    pub span_longitude: f64,
}

/// Storage contract used by the collection manager.
///
/// Calls are synchronous; implementations serialize their own writes.
pub trait PinStore: Send + Sync {
    /// Lookup by exact coordinates, kept for callers that only know a location
    fn find_pin(&self, latitude: f64, longitude: f64) -> Result<Option<Pin>>;
    fn get_pin(&self, id: PinId) -> Result<Option<Pin>>;
    fn list_pins(&self) -> Result<Vec<Pin>>;
    fn create_pin(
        &self,
        latitude: f64,
        longitude: f64,
        name: &str,
        collection_size: u32,
    ) -> Result<Pin>;
    fn update_pin_cursor(&self, pin: PinId, page: u32) -> Result<()>;

    /// Photos of a pin: resolved ones first, then in insertion order
    fn list_photos(&self, pin: PinId) -> Result<Vec<Photo>>;
    /// Creates an unresolved placeholder
    fn create_photo(&self, pin: PinId, url: &str) -> Result<Photo>;
    fn set_photo_bytes(&self, photo: PhotoId, bytes: &[u8]) -> Result<()>;
    fn delete_photo(&self, photo: PhotoId) -> Result<()>;
    fn delete_all_photos(&self, pin: PinId) -> Result<()>;

    fn map_view(&self) -> Result<Option<MapView>>;
    fn save_map_view(&self, view: MapView) -> Result<()>;
}

/// Photo metadata as written to the index
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhotoRecord {
    id: PhotoId,
    pin_id: PinId,
    url: String,
    seq: u64,
    /// File name of the downloaded bytes inside the blob directory
    blob: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    next_seq: u64,
    pins: Vec<Pin>,
    photos: Vec<PhotoRecord>,
    map_view: Option<MapView>,
}

/// YAML index plus a directory of image files
pub struct FileStore {
    index_path: PathBuf,
    blob_dir: PathBuf,
    data: Mutex<StoreData>,
}

impl FileStore {
    /// Opens the store, starting empty if the index file doesn't exist yet
    pub fn open(index_path: &Path, blob_dir: &Path) -> Result<Self> {
        let data = if index_path.exists() {
            let yaml = fs::read_to_string(index_path).with_context(|| {
                format!("Failed to read pin store from {}", index_path.display())
            })?;
            serde_yaml::from_str(&yaml).with_context(|| {
                format!("Failed to parse pin store from {}", index_path.display())
            })?
        } else {
            StoreData::default()
        };

        Ok(Self {
            index_path: index_path.to_path_buf(),
            blob_dir: blob_dir.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreData>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("Pin store lock poisoned"))
    }

    /// Writes `next` to disk and only then makes it the live state
    fn commit(&self, guard: &mut MutexGuard<'_, StoreData>, next: StoreData) -> Result<()> {
        save_index(&self.index_path, &next)?;
        **guard = next;
        Ok(())
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.blob_dir.join(name)
    }

    fn remove_blob(&self, name: &str) {
        match fs::remove_file(self.blob_path(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove image file {name}: {e}"),
        }
    }

    fn load_photo(&self, record: &PhotoRecord) -> Result<Photo> {
        let bytes = match &record.blob {
            Some(name) => match fs::read(self.blob_path(name)) {
                Ok(bytes) => Some(Arc::from(bytes)),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Image file for photo {} is missing, treating as not downloaded", record.id);
                    None
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to read image file for photo {}", record.id)
                    });
                }
            },
            None => None,
        };

        Ok(Photo {
            id: record.id,
            pin_id: record.pin_id,
            url: record.url.clone(),
            seq: record.seq,
            bytes,
        })
    }
}

fn save_index(path: &Path, data: &StoreData) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for {}", path.display()))?;
        }
    }

    let yaml = serde_yaml::to_string(data).context("Failed to serialize pin store to YAML")?;
    write_atomic(path, yaml.as_bytes())
        .with_context(|| format!("Failed to write pin store to {}", path.display()))
}

/// Writes through a temp file and renames it into place
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

impl PinStore for FileStore {
    fn find_pin(&self, latitude: f64, longitude: f64) -> Result<Option<Pin>> {
        let data = self.lock()?;
        Ok(data
            .pins
            .iter()
            .find(|p| p.latitude == latitude && p.longitude == longitude)
            .cloned())
    }

    fn get_pin(&self, id: PinId) -> Result<Option<Pin>> {
        let data = self.lock()?;
        Ok(data.pins.iter().find(|p| p.id == id).cloned())
    }

    fn list_pins(&self) -> Result<Vec<Pin>> {
        Ok(self.lock()?.pins.clone())
    }

    fn create_pin(
        &self,
        latitude: f64,
        longitude: f64,
        name: &str,
        collection_size: u32,
    ) -> Result<Pin> {
        let mut guard = self.lock()?;
        let pin = Pin::new(latitude, longitude, name, collection_size);

        let mut next = guard.clone();
        next.pins.push(pin.clone());
        self.commit(&mut guard, next)?;

        debug!("Created pin {} at {latitude}, {longitude}", pin.id);
        Ok(pin)
    }

    fn update_pin_cursor(&self, pin: PinId, page: u32) -> Result<()> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let Some(record) = next.pins.iter_mut().find(|p| p.id == pin) else {
            bail!("Pin {pin} not found");
        };
        record.page = page;
        self.commit(&mut guard, next)
    }

    fn list_photos(&self, pin: PinId) -> Result<Vec<Photo>> {
        let mut records: Vec<PhotoRecord> = {
            let data = self.lock()?;
            data.photos
                .iter()
                .filter(|r| r.pin_id == pin)
                .cloned()
                .collect()
        };
        records.sort_by_key(|r| (r.blob.is_none(), r.seq));

        records.iter().map(|r| self.load_photo(r)).collect()
    }

    fn create_photo(&self, pin: PinId, url: &str) -> Result<Photo> {
        let mut guard = self.lock()?;
        if !guard.pins.iter().any(|p| p.id == pin) {
            bail!("Pin {pin} not found");
        }

        let record = PhotoRecord {
            id: PhotoId::new(),
            pin_id: pin,
            url: url.to_string(),
            seq: guard.next_seq,
            blob: None,
        };

        let mut next = guard.clone();
        next.next_seq += 1;
        next.photos.push(record.clone());
        self.commit(&mut guard, next)?;

        Ok(Photo {
            id: record.id,
            pin_id: pin,
            url: record.url,
            seq: record.seq,
            bytes: None,
        })
    }

    fn set_photo_bytes(&self, photo: PhotoId, bytes: &[u8]) -> Result<()> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let Some(record) = next.photos.iter_mut().find(|r| r.id == photo) else {
            bail!("Photo {photo} not found");
        };

        let name = format!("{photo}.jpg");
        fs::create_dir_all(&self.blob_dir).with_context(|| {
            format!("Failed to create image directory {}", self.blob_dir.display())
        })?;
        write_atomic(&self.blob_path(&name), bytes)
            .with_context(|| format!("Failed to write image file for photo {photo}"))?;
        record.blob = Some(name.clone());

        if let Err(e) = self.commit(&mut guard, next) {
            self.remove_blob(&name);
            return Err(e);
        }
        Ok(())
    }

    fn delete_photo(&self, photo: PhotoId) -> Result<()> {
        let mut guard = self.lock()?;
        let Some(position) = guard.photos.iter().position(|r| r.id == photo) else {
            debug!("Photo {photo} already deleted");
            return Ok(());
        };

        let mut next = guard.clone();
        let removed = next.photos.remove(position);
        self.commit(&mut guard, next)?;

        if let Some(name) = removed.blob {
            self.remove_blob(&name);
        }
        Ok(())
    }

    fn delete_all_photos(&self, pin: PinId) -> Result<()> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let (removed, kept): (Vec<_>, Vec<_>) =
            next.photos.into_iter().partition(|r| r.pin_id == pin);
        next.photos = kept;
        self.commit(&mut guard, next)?;

        debug!("Deleted {} photos of pin {pin}", removed.len());
        for name in removed.iter().filter_map(|r| r.blob.as_deref()) {
            self.remove_blob(name);
        }
        Ok(())
    }

    fn map_view(&self) -> Result<Option<MapView>> {
        Ok(self.lock()?.map_view)
    }

    fn save_map_view(&self, view: MapView) -> Result<()> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        next.map_view = Some(view);
        self.commit(&mut guard, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn open_store(dir: &TempDir) -> Result<FileStore> {
        FileStore::open(&dir.path().join("pins.yaml"), &dir.path().join("photos"))
    }

    #[test]
    fn test_open_nonexistent_creates_empty() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = open_store(&temp_dir)?;

        assert!(store.list_pins()?.is_empty());
        assert!(store.map_view()?.is_none());
        Ok(())
    }

    #[test]
    fn test_create_and_find_pin() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = open_store(&temp_dir)?;

        let pin = store.create_pin(42.3933, -71.0625, "Boston, United States", 21)?;
        assert_eq!(pin.page, 1);
        assert_eq!(pin.collection_size, 21);

        let found = store.find_pin(42.3933, -71.0625)?.unwrap();
        assert_eq!(found.id, pin.id);
        assert!(store.find_pin(42.3933, -71.0626)?.is_none());
        assert_eq!(store.get_pin(pin.id)?.unwrap().name, "Boston, United States");
        Ok(())
    }

    #[test]
    fn test_pins_at_same_location_get_distinct_ids() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = open_store(&temp_dir)?;

        let first = store.create_pin(1.0, 2.0, "first", 21)?;
        let second = store.create_pin(1.0, 2.0, "second", 21)?;

        assert_ne!(first.id, second.id);
        assert_eq!(store.find_pin(1.0, 2.0)?.unwrap().id, first.id);
        Ok(())
    }

    #[test]
    fn test_cursor_survives_reopen() -> Result<()> {
        let temp_dir = tempdir()?;
        let pin = {
            let store = open_store(&temp_dir)?;
            let pin = store.create_pin(10.0, 20.0, "somewhere", 21)?;
            store.update_pin_cursor(pin.id, 4)?;
            pin
        };

        let reopened = open_store(&temp_dir)?;
        assert_eq!(reopened.get_pin(pin.id)?.unwrap().page, 4);
        Ok(())
    }

    #[test]
    fn test_photo_bytes_round_trip() -> Result<()> {
        let temp_dir = tempdir()?;
        let (pin, photo) = {
            let store = open_store(&temp_dir)?;
            let pin = store.create_pin(10.0, 20.0, "somewhere", 21)?;
            let photo = store.create_photo(pin.id, "https://example.com/a.jpg")?;
            assert!(!photo.is_resolved());
            store.set_photo_bytes(photo.id, b"jpeg bytes")?;
            (pin, photo)
        };

        let reopened = open_store(&temp_dir)?;
        let photos = reopened.list_photos(pin.id)?;
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].id, photo.id);
        assert_eq!(photos[0].bytes.as_deref(), Some(&b"jpeg bytes"[..]));
        Ok(())
    }

    #[test]
    fn test_list_photos_puts_resolved_first() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = open_store(&temp_dir)?;
        let pin = store.create_pin(10.0, 20.0, "somewhere", 21)?;

        let a = store.create_photo(pin.id, "https://example.com/a.jpg")?;
        let b = store.create_photo(pin.id, "https://example.com/b.jpg")?;
        let c = store.create_photo(pin.id, "https://example.com/c.jpg")?;
        store.set_photo_bytes(c.id, b"c")?;

        let order: Vec<PhotoId> = store.list_photos(pin.id)?.iter().map(|p| p.id).collect();
        assert_eq!(order, vec![c.id, a.id, b.id]);
        Ok(())
    }

    #[test]
    fn test_delete_photos() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = open_store(&temp_dir)?;
        let pin = store.create_pin(10.0, 20.0, "here", 21)?;
        let other = store.create_pin(11.0, 21.0, "there", 21)?;

        let a = store.create_photo(pin.id, "https://example.com/a.jpg")?;
        let b = store.create_photo(pin.id, "https://example.com/b.jpg")?;
        let kept = store.create_photo(other.id, "https://example.com/c.jpg")?;
        store.set_photo_bytes(a.id, b"a")?;
        store.set_photo_bytes(b.id, b"b")?;

        store.delete_photo(a.id)?;
        assert!(!temp_dir.path().join("photos").join(format!("{}.jpg", a.id)).exists());
        assert_eq!(store.list_photos(pin.id)?.len(), 1);

        // deleting twice is harmless
        store.delete_photo(a.id)?;

        store.delete_all_photos(pin.id)?;
        assert!(store.list_photos(pin.id)?.is_empty());
        assert!(!temp_dir.path().join("photos").join(format!("{}.jpg", b.id)).exists());
        assert_eq!(store.list_photos(other.id)?[0].id, kept.id);
        Ok(())
    }

    #[test]
    fn test_missing_image_file_reads_as_unresolved() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = open_store(&temp_dir)?;
        let pin = store.create_pin(10.0, 20.0, "here", 21)?;
        let photo = store.create_photo(pin.id, "https://example.com/a.jpg")?;
        store.set_photo_bytes(photo.id, b"a")?;

        fs::remove_file(temp_dir.path().join("photos").join(format!("{}.jpg", photo.id)))?;

        let photos = store.list_photos(pin.id)?;
        assert!(!photos[0].is_resolved());
        Ok(())
    }

    #[test]
    fn test_unknown_records_are_rejected() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = open_store(&temp_dir)?;

        assert!(store.create_photo(PinId::new(), "https://example.com/a.jpg").is_err());
        assert!(store.set_photo_bytes(PhotoId::new(), b"a").is_err());
        assert!(store.update_pin_cursor(PinId::new(), 2).is_err());
        Ok(())
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() -> Result<()> {
        let temp_dir = tempdir()?;
        let blocked = temp_dir.path().join("blocked");
        let store = FileStore::open(&blocked.join("pins.yaml"), &temp_dir.path().join("photos"))?;

        // A plain file where the index directory should be makes every write fail
        fs::write(&blocked, "not a directory")?;

        assert!(store.create_pin(1.0, 2.0, "nowhere", 21).is_err());
        assert!(store.list_pins()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_map_view_round_trip() -> Result<()> {
        let temp_dir = tempdir()?;
        let view = MapView {
            latitude: 42.39,
            longitude: -71.06,
            span_latitude: 0.5,
            span_longitude: 0.75,
        };
        open_store(&temp_dir)?.save_map_view(view)?;

        assert_eq!(open_store(&temp_dir)?.map_view()?, Some(view));
        Ok(())
    }
}
