//! # pinsnap
//!
//! Keeps a page of geotagged Flickr photos for every map pin.
//!
//! Given a pin, pinsnap searches Flickr for photos taken near it, stores a
//! placeholder for every result, downloads the images concurrently and
//! persists them so the collection survives restarts. A collection can be
//! pruned photo by photo or replaced wholesale with the next page of results.
//!
//! ## Layout
//!
//! - [`flickr`]: search and download client behind the [`flickr::PhotoApi`] trait
//! - [`store`]: pins, photo records and image bytes on disk
//! - [`manager`]: the per-pin synchronization state machine
//! - [`presenter`]: snapshots and user actions for a grid front end
//! - [`geocode`]: pin display names
//! - [`mock`]: scripted photo API for tests and offline runs

pub mod config;
pub mod error;
pub mod flickr;
pub mod geocode;
pub mod manager;
pub mod mock;
pub mod presenter;
pub mod store;
