use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::flickr::DEFAULT_BASE_URL;
use crate::store::DEFAULT_COLLECTION_SIZE;

/// When the "new collection" action becomes available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NewCollectionPolicy {
    /// Only once the collection is idle (every download settled)
    #[default]
    OnResolved,
    /// Also while bytes of a stored collection are still being restored
    OnLoad,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub api_key: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Photos per collection, which is also the search page size
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_radius_km")]
    pub radius_km: u32,
    #[serde(default = "default_safe_search")]
    pub safe_search: u8,
    pub data_file: String,
    pub blob_dir: String,
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    #[serde(default)]
    pub new_collection_policy: NewCollectionPolicy,
}

fn default_api_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_per_page() -> u32 {
    DEFAULT_COLLECTION_SIZE
}

fn default_radius_km() -> u32 {
    2
}

fn default_safe_search() -> u8 {
    1
}

fn default_max_concurrent_downloads() -> usize {
    8
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: "your-flickr-api-key".to_string(),
            api_base_url: default_api_base_url(),
            per_page: default_per_page(),
            radius_km: default_radius_km(),
            safe_search: default_safe_search(),
            data_file: "data/pins.yaml".to_string(),
            blob_dir: "data/photos".to_string(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            new_collection_policy: NewCollectionPolicy::default(),
        }
    }
}

impl Config {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        if config.per_page == 0 {
            anyhow::bail!("per_page must be at least 1 in {}", path.display());
        }

        Ok(config)
    }

    pub fn get_config_path(config_arg: &Option<PathBuf>) -> PathBuf {
        config_arg
            .clone()
            .unwrap_or_else(|| PathBuf::from("pinsnap.yaml"))
    }
}
