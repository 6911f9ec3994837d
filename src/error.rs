//! Error types for pinsnap.
//!
//! Remote failures are recovered inside the collection manager; only
//! persistence failures escape it. Values are `Clone` so they can ride
//! inside `SyncEvent`s between download tasks and the manager.

use thiserror::Error;

use crate::store::PhotoId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhotoError {
    /// Transport failure or non-success HTTP status
    #[error("Network error: {0}")]
    Network(String),

    /// The photo API answered with an error payload instead of photos
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Malformed API response: {0}")]
    MalformedResponse(String),

    /// The pin store could not read or write
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Photo not found in collection: {0}")]
    UnknownPhoto(PhotoId),
}

impl PhotoError {
    /// Wraps a store failure, keeping its whole context chain
    pub fn persistence(err: anyhow::Error) -> Self {
        PhotoError::Persistence(format!("{err:#}"))
    }
}

impl From<reqwest::Error> for PhotoError {
    fn from(err: reqwest::Error) -> Self {
        PhotoError::Network(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PhotoError>;
