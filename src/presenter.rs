//! Renderable view of a photo collection.
//!
//! The collection manager publishes a `CollectionSnapshot` after every change.
//! `CollectionAdapter` watches those snapshots for a grid-style front end and
//! turns positional user actions back into identity-based manager calls, so a
//! tap on a cell always hits the photo that cell was showing.

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Result;
use crate::flickr::PhotoApi;
use crate::manager::{CollectionManager, SyncState};
use crate::store::{PhotoId, PinStore};

/// Cells per row of the collection grid
pub const GRID_COLUMNS: usize = 3;

/// One grid cell
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoCell {
    pub index: usize,
    pub id: PhotoId,
    pub has_bytes: bool,
    pub bytes: Option<Arc<[u8]>>,
}

/// Everything a front end needs to draw one collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionSnapshot {
    /// Increases with every published change
    pub revision: u64,
    pub cells: Vec<PhotoCell>,
    pub state: SyncState,
    pub new_collection_enabled: bool,
    pub no_images_found: bool,
    pub fully_resolved: bool,
}

impl CollectionSnapshot {
    pub fn resolved_count(&self) -> usize {
        self.cells.iter().filter(|c| c.has_bytes).count()
    }

    /// Rows needed to lay the cells out `GRID_COLUMNS` wide
    pub fn rows(&self) -> usize {
        self.cells.len().div_ceil(GRID_COLUMNS)
    }
}

/// Something the user did to the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Tapped the cell at this index
    Discard(usize),
    NewCollection,
}

/// Watches a manager's snapshots and forwards user actions to it
pub struct CollectionAdapter {
    snapshots: watch::Receiver<CollectionSnapshot>,
}

impl CollectionAdapter {
    pub fn new<A: PhotoApi, S: PinStore>(manager: &CollectionManager<A, S>) -> Self {
        Self {
            snapshots: manager.subscribe(),
        }
    }

    /// Latest snapshot, marking it as seen
    pub fn current(&mut self) -> CollectionSnapshot {
        self.snapshots.borrow_and_update().clone()
    }

    /// Whether a snapshot arrived since the last `current` or `changed`
    pub fn has_changed(&self) -> bool {
        self.snapshots.has_changed().unwrap_or(false)
    }

    /// Waits for the next snapshot. Returns false once the manager is gone.
    pub async fn changed(&mut self) -> bool {
        self.snapshots.changed().await.is_ok()
    }

    /// Applies a user action. Returns false when the action was not allowed:
    /// the index is out of range, or "new collection" is currently disabled.
    pub fn dispatch<A: PhotoApi, S: PinStore>(
        &mut self,
        action: UserAction,
        manager: &mut CollectionManager<A, S>,
    ) -> Result<bool> {
        let snapshot = self.current();
        match action {
            UserAction::Discard(index) => {
                let Some(cell) = snapshot.cells.get(index) else {
                    return Ok(false);
                };
                manager.discard_photo(cell.id)?;
                Ok(true)
            }
            UserAction::NewCollection => {
                if !snapshot.new_collection_enabled {
                    return Ok(false);
                }
                manager.request_new_collection()?;
                Ok(true)
            }
        }
    }
}
