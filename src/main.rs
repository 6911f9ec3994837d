use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::warn;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pinsnap::config::Config;
use pinsnap::flickr::FlickrClient;
use pinsnap::geocode::{CoordinateNamer, pin_name};
use pinsnap::manager::{CollectionManager, ManagerSettings};
use pinsnap::presenter::{CollectionAdapter, CollectionSnapshot, UserAction};
use pinsnap::store::{FileStore, MapView, Pin, PinStore};

#[derive(Parser)]
#[command(author, version, about = "Keep a page of Flickr photos for every map pin")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize with a default config file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Drop a pin at a location
    DropPin {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        /// Display name (derived from the coordinates when omitted)
        #[arg(long)]
        name: Option<String>,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// List pins and their collections
    Pins {
        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Load a pin's photo collection, fetching it if needed
    Album {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        /// Replace the collection with the next page of results
        #[arg(long)]
        new_collection: bool,

        /// Discard the photo at this position (repeatable)
        #[arg(long, value_name = "INDEX")]
        discard: Vec<usize>,

        /// Seconds to wait for downloads before giving up
        #[arg(long, default_value_t = 60)]
        timeout: u64,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Show or store the last map view
    MapView {
        /// Center and span to store
        #[arg(
            long,
            num_args = 4,
            value_names = ["LAT", "LON", "SPAN_LAT", "SPAN_LON"],
            allow_negative_numbers = true
        )]
        set: Option<Vec<f64>>,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { force, config } => init_config(config, *force),
        Commands::DropPin {
            lat,
            lon,
            name,
            config,
        } => {
            let config_data = load_config(config)?;
            let store = open_store(&config_data)?;

            if let Some(existing) = store.find_pin(*lat, *lon)? {
                println!("Pin already exists: {}", describe_pin(&existing));
                return Ok(());
            }

            let name = pin_name(&CoordinateNamer, name.as_deref(), *lat, *lon)?;
            let pin = store.create_pin(*lat, *lon, &name, config_data.per_page)?;
            println!("Dropped pin {}", describe_pin(&pin));
            Ok(())
        }
        Commands::Pins { config } => {
            let config_data = load_config(config)?;
            let store = open_store(&config_data)?;
            let pins = store.list_pins()?;

            println!("{} pins", pins.len());
            for pin in pins {
                let photos = store.list_photos(pin.id)?;
                let resolved = photos.iter().filter(|p| p.is_resolved()).count();
                println!(
                    "  {} | page {} | {resolved}/{} photos downloaded",
                    describe_pin(&pin),
                    pin.page,
                    photos.len()
                );
            }
            Ok(())
        }
        Commands::Album {
            lat,
            lon,
            new_collection,
            discard,
            timeout,
            config,
        } => {
            let config_data = load_config(config)?;
            run_album(&config_data, *lat, *lon, *new_collection, discard, *timeout).await
        }
        Commands::MapView { set, config } => {
            let config_data = load_config(config)?;
            let store = open_store(&config_data)?;

            if let Some(values) = set {
                let view = MapView {
                    latitude: values[0],
                    longitude: values[1],
                    span_latitude: values[2],
                    span_longitude: values[3],
                };
                store.save_map_view(view)?;
                println!("Saved map view");
            }

            match store.map_view()? {
                Some(view) => println!(
                    "Map view: center {}, {} span {} x {}",
                    view.latitude, view.longitude, view.span_latitude, view.span_longitude
                ),
                None => println!("No map view saved"),
            }
            Ok(())
        }
    }
}

async fn run_album(
    config: &Config,
    lat: f64,
    lon: f64,
    new_collection: bool,
    discard: &[usize],
    timeout: u64,
) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    let api = Arc::new(FlickrClient::new(
        &config.api_base_url,
        &config.api_key,
        config.radius_km,
        config.safe_search,
    ));
    let name = pin_name(&CoordinateNamer, None, lat, lon)?;

    let mut manager =
        CollectionManager::for_location(api, store, lat, lon, &name, ManagerSettings::from(config))?;
    let mut adapter = CollectionAdapter::new(&manager);

    println!("Loading photos for {}", describe_pin(manager.pin()));
    manager.load()?;
    settle(&mut manager, timeout).await?;

    // Highest index first so earlier positions stay valid
    let mut indices = discard.to_vec();
    indices.sort_unstable_by(|a, b| b.cmp(a));
    indices.dedup();
    for index in indices {
        if !adapter.dispatch(UserAction::Discard(index), &mut manager)? {
            println!("No photo at position {index}");
        }
    }

    if new_collection {
        if adapter.dispatch(UserAction::NewCollection, &mut manager)? {
            println!("Fetching page {}", manager.pin().page);
            settle(&mut manager, timeout).await?;
        } else {
            println!("New collection is not available right now");
        }
    }

    print_summary(&adapter.current());
    Ok(())
}

async fn settle<A, S>(manager: &mut CollectionManager<A, S>, timeout: u64) -> Result<()>
where
    A: pinsnap::flickr::PhotoApi,
    S: PinStore,
{
    match tokio::time::timeout(Duration::from_secs(timeout), manager.settle()).await {
        Ok(result) => result.context("Failed to update photo collection"),
        Err(_) => {
            warn!("Gave up waiting for downloads after {timeout}s");
            Ok(())
        }
    }
}

fn print_summary(snapshot: &CollectionSnapshot) {
    if snapshot.no_images_found {
        println!("No images found");
        return;
    }

    println!(
        "{}/{} photos downloaded ({} rows)",
        snapshot.resolved_count(),
        snapshot.cells.len(),
        snapshot.rows()
    );
    for cell in &snapshot.cells {
        match &cell.bytes {
            Some(bytes) => println!("  [{}] {} ({} bytes)", cell.index, cell.id, bytes.len()),
            None => println!("  [{}] {} (not downloaded)", cell.index, cell.id),
        }
    }
    if snapshot.new_collection_enabled {
        println!("Run again with --new-collection for the next page");
    }
}

fn describe_pin(pin: &Pin) -> String {
    format!("{} ({}, {})", pin.name, pin.latitude, pin.longitude)
}

fn open_store(config: &Config) -> Result<FileStore> {
    let data_file = PathBuf::from(&config.data_file);
    FileStore::open(&data_file, &PathBuf::from(&config.blob_dir))
        .with_context(|| format!("Failed to open pin store at {}", data_file.display()))
}

fn init_config(config_path_opt: &Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = Config::get_config_path(config_path_opt);

    if config_path.exists() && !force {
        println!("Config file already exists at {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    println!("Created config file at {}", config_path.display());
    Ok(())
}

fn load_config(config_path_opt: &Option<PathBuf>) -> Result<Config> {
    let config_path = Config::get_config_path(config_path_opt);

    if !config_path.exists() {
        anyhow::bail!(
            "Config file not found at {}. Run 'pinsnap init' to create one.",
            config_path.display()
        );
    }

    Config::load_from_file(&config_path)
}
