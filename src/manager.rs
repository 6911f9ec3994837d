//! Photo collection synchronization for a single pin.
//!
//! `CollectionManager` owns the in-memory photo list of one pin and drives it
//! through three phases:
//!
//! - **Idle**: nothing in flight; the list is empty or every download settled.
//! - **Searching**: one page search has been issued for the pin's page cursor.
//! - **Resolving**: placeholders exist and their downloads are outstanding.
//!
//! Network work runs on spawned tasks. Each task reports back through a
//! channel as a [`SyncEvent`], and events are applied one at a time by
//! [`CollectionManager::handle_event`] (or [`CollectionManager::settle`]) on the
//! task that owns the manager. Every search or restore starts a new
//! generation; events carrying an older generation are dropped, which is how a
//! new collection invalidates downloads still in flight.

use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, watch};

use crate::config::{Config, NewCollectionPolicy};
use crate::error::{PhotoError, Result};
use crate::flickr::{PhotoApi, PhotoRef, SearchQuery, max_upload_date_now};
use crate::presenter::{CollectionSnapshot, PhotoCell};
use crate::store::{DEFAULT_COLLECTION_SIZE, Photo, PhotoId, Pin, PinStore};

/// Completion of a network task, tagged with the generation that issued it
#[derive(Debug)]
pub enum SyncEvent {
    SearchFinished {
        generation: u64,
        page: u32,
        result: Result<Vec<PhotoRef>>,
    },
    PhotoFetched {
        generation: u64,
        photo: PhotoId,
        result: Result<Vec<u8>>,
    },
}

impl SyncEvent {
    pub fn generation(&self) -> u64 {
        match self {
            SyncEvent::SearchFinished { generation, .. } => *generation,
            SyncEvent::PhotoFetched { generation, .. } => *generation,
        }
    }
}

/// Externally visible phase of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    SearchInFlight { generation: u64, page: u32 },
    ResolvingBatch { generation: u64, pending: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOrigin {
    /// Placeholders created from a search response
    Search,
    /// Unresolved placeholders found in the store on load
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Searching { generation: u64, page: u32 },
    Resolving { generation: u64, origin: BatchOrigin },
}

/// Tunables of a collection manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Photos per collection for newly created pins
    pub collection_size: u32,
    pub max_concurrent_downloads: usize,
    pub new_collection_policy: NewCollectionPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            collection_size: DEFAULT_COLLECTION_SIZE,
            max_concurrent_downloads: 8,
            new_collection_policy: NewCollectionPolicy::OnResolved,
        }
    }
}

impl From<&Config> for ManagerSettings {
    fn from(config: &Config) -> Self {
        Self {
            collection_size: config.per_page,
            max_concurrent_downloads: config.max_concurrent_downloads.max(1),
            new_collection_policy: config.new_collection_policy,
        }
    }
}

/// Owns and synchronizes the photo collection of one pin
pub struct CollectionManager<A: PhotoApi, S: PinStore> {
    api: Arc<A>,
    store: Arc<S>,
    settings: ManagerSettings,
    pin: Pin,
    photos: Vec<Photo>,
    phase: Phase,
    generation: u64,
    /// Placeholders of the current batch whose download hasn't settled
    pending: HashSet<PhotoId>,
    loaded: bool,
    no_images_found: bool,
    last_error: Option<PhotoError>,
    downloads: Arc<Semaphore>,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    events_rx: mpsc::UnboundedReceiver<SyncEvent>,
    snapshots: watch::Sender<CollectionSnapshot>,
    revision: u64,
}

impl<A: PhotoApi, S: PinStore> CollectionManager<A, S> {
    /// Creates a manager for an existing pin. Nothing is read until [`load`](Self::load).
    pub fn new(api: Arc<A>, store: Arc<S>, pin: Pin, settings: ManagerSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(CollectionSnapshot::default());
        let downloads = Arc::new(Semaphore::new(settings.max_concurrent_downloads.max(1)));

        Self {
            api,
            store,
            settings,
            pin,
            photos: Vec::new(),
            phase: Phase::Idle,
            generation: 0,
            pending: HashSet::new(),
            loaded: false,
            no_images_found: false,
            last_error: None,
            downloads,
            events_tx,
            events_rx,
            snapshots,
            revision: 0,
        }
    }

    /// Manager for the pin at exactly these coordinates, creating the pin if needed
    pub fn for_location(
        api: Arc<A>,
        store: Arc<S>,
        latitude: f64,
        longitude: f64,
        name: &str,
        settings: ManagerSettings,
    ) -> Result<Self> {
        let pin = match store
            .find_pin(latitude, longitude)
            .map_err(PhotoError::persistence)?
        {
            Some(pin) => pin,
            None => store
                .create_pin(latitude, longitude, name, settings.collection_size)
                .map_err(PhotoError::persistence)?,
        };
        Ok(Self::new(api, store, pin, settings))
    }

    pub fn pin(&self) -> &Pin {
        &self.pin
    }

    /// Current photos in display order
    pub fn photos(&self) -> &[Photo] {
        &self.photos
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SyncState {
        match self.phase {
            Phase::Idle => SyncState::Idle,
            Phase::Searching { generation, page } => SyncState::SearchInFlight { generation, page },
            Phase::Resolving { generation, .. } => SyncState::ResolvingBatch {
                generation,
                pending: self.pending.len(),
            },
        }
    }

    pub fn is_busy(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// The pin has photos and every one of them has its bytes.
    ///
    /// An empty collection is never fully resolved.
    pub fn is_fully_resolved(&self) -> bool {
        !self.photos.is_empty() && self.photos.iter().all(Photo::is_resolved)
    }

    /// Last search came back empty or with an API error
    pub fn no_images_found(&self) -> bool {
        self.no_images_found
    }

    /// Most recent remote failure, kept for diagnostics only
    pub fn last_error(&self) -> Option<&PhotoError> {
        self.last_error.as_ref()
    }

    /// Whether the "new collection" affordance should be offered
    pub fn can_request_new_collection(&self) -> bool {
        match self.phase {
            Phase::Idle => self.loaded,
            Phase::Searching { .. } => false,
            Phase::Resolving { origin, .. } => {
                origin == BatchOrigin::Restore
                    && self.settings.new_collection_policy == NewCollectionPolicy::OnLoad
            }
        }
    }

    /// Receiver that sees a new snapshot after every list change
    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> CollectionSnapshot {
        CollectionSnapshot {
            revision: self.revision,
            cells: self
                .photos
                .iter()
                .enumerate()
                .map(|(index, photo)| PhotoCell {
                    index,
                    id: photo.id,
                    has_bytes: photo.is_resolved(),
                    bytes: photo.bytes.clone(),
                })
                .collect(),
            state: self.state(),
            new_collection_enabled: self.can_request_new_collection(),
            no_images_found: self.no_images_found,
            fully_resolved: self.is_fully_resolved(),
        }
    }

    /// Shows the stored collection, or searches for one if the pin has none.
    ///
    /// Stored placeholders that never got their bytes are downloaded again.
    /// Spawns onto the current Tokio runtime, so it must be called from
    /// within one.
    pub fn load(&mut self) -> Result<()> {
        let mut photos = self
            .store
            .list_photos(self.pin.id)
            .map_err(PhotoError::persistence)?;
        // Display positions follow creation order in every session
        photos.sort_by_key(|p| p.seq);

        self.loaded = true;
        self.no_images_found = false;
        self.photos = photos;

        if self.photos.is_empty() {
            debug!("Pin {} has no stored photos, searching page {}", self.pin.id, self.pin.page);
            self.start_search();
        } else {
            let unresolved: Vec<(PhotoId, String)> = self
                .photos
                .iter()
                .filter(|p| !p.is_resolved())
                .map(|p| (p.id, p.url.clone()))
                .collect();
            info!(
                "Loaded {} stored photos for pin {} ({} still to download)",
                self.photos.len(),
                self.pin.id,
                unresolved.len()
            );

            if unresolved.is_empty() {
                self.phase = Phase::Idle;
                self.pending.clear();
            } else {
                self.generation += 1;
                self.start_downloads(self.generation, BatchOrigin::Restore, unresolved);
            }
        }

        self.publish();
        Ok(())
    }

    /// Throws away the current collection and searches the next page.
    ///
    /// Downloads still running for the old collection are invalidated.
    /// Like [`load`](Self::load), it needs a Tokio runtime.
    pub fn request_new_collection(&mut self) -> Result<()> {
        let next_page = self.pin.page.saturating_add(1);
        info!(
            "New collection for pin {}: page {} -> {}",
            self.pin.id, self.pin.page, next_page
        );

        self.store
            .delete_all_photos(self.pin.id)
            .map_err(PhotoError::persistence)?;
        self.photos.clear();
        self.pending.clear();
        self.no_images_found = false;

        if let Err(e) = self.store.update_pin_cursor(self.pin.id, next_page) {
            error!("Failed to advance page cursor of pin {}: {e:#}", self.pin.id);
            self.phase = Phase::Idle;
            self.publish();
            return Err(PhotoError::persistence(e));
        }
        self.pin.page = next_page;
        self.loaded = true;

        self.start_search();
        self.publish();
        Ok(())
    }

    /// Removes one photo, whether or not its bytes arrived
    pub fn discard_photo(&mut self, id: PhotoId) -> Result<()> {
        let Some(position) = self.photos.iter().position(|p| p.id == id) else {
            return Err(PhotoError::UnknownPhoto(id));
        };

        self.store
            .delete_photo(id)
            .map_err(PhotoError::persistence)?;
        self.photos.remove(position);
        debug!("Discarded photo {id} of pin {}", self.pin.id);

        if self.pending.remove(&id) && self.pending.is_empty() {
            self.finish_batch();
        }

        self.publish();
        Ok(())
    }

    /// Waits for the next completion from a network task
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events_rx.recv().await
    }

    /// Applies every completion that has already arrived, without waiting.
    /// Returns how many were applied.
    pub fn pump(&mut self) -> Result<usize> {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Applies completions until the collection is idle again
    pub async fn settle(&mut self) -> Result<()> {
        while self.is_busy() {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle_event(event)?;
        }
        Ok(())
    }

    /// Applies one completion. Stale completions are ignored.
    ///
    /// Only store failures are returned; remote failures are absorbed here.
    pub fn handle_event(&mut self, event: SyncEvent) -> Result<()> {
        if event.generation() != self.generation {
            debug!(
                "Dropping completion from generation {} (current {})",
                event.generation(),
                self.generation
            );
            return Ok(());
        }

        match event {
            SyncEvent::SearchFinished { page, result, .. } => self.on_search_finished(page, result),
            SyncEvent::PhotoFetched { photo, result, .. } => self.on_photo_fetched(photo, result),
        }
    }

    fn start_search(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let query = SearchQuery {
            latitude: self.pin.latitude,
            longitude: self.pin.longitude,
            max_upload_date: max_upload_date_now(),
            page: self.pin.page,
            per_page: self.pin.collection_size,
        };

        self.phase = Phase::Searching {
            generation,
            page: query.page,
        };
        self.pending.clear();

        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = api.search_photos(&query).await;
            // the manager may have been dropped meanwhile
            let _ = events.send(SyncEvent::SearchFinished {
                generation,
                page: query.page,
                result,
            });
        });
    }

    fn start_downloads(
        &mut self,
        generation: u64,
        origin: BatchOrigin,
        targets: Vec<(PhotoId, String)>,
    ) {
        if targets.is_empty() {
            self.phase = Phase::Idle;
            self.pending.clear();
            return;
        }

        self.pending = targets.iter().map(|(id, _)| *id).collect();
        self.phase = Phase::Resolving { generation, origin };

        for (photo, url) in targets {
            let api = Arc::clone(&self.api);
            let events = self.events_tx.clone();
            let downloads = Arc::clone(&self.downloads);

            tokio::spawn(async move {
                let result = match downloads.acquire_owned().await {
                    Ok(_permit) => api.fetch_photo_bytes(&url).await,
                    Err(_) => Err(PhotoError::Network("download limiter closed".to_string())),
                };
                let _ = events.send(SyncEvent::PhotoFetched {
                    generation,
                    photo,
                    result,
                });
            });
        }
    }

    fn on_search_finished(&mut self, page: u32, result: Result<Vec<PhotoRef>>) -> Result<()> {
        if !matches!(self.phase, Phase::Searching { .. }) {
            debug!("Ignoring search result for page {page}, no search in flight");
            return Ok(());
        }

        let refs = match result {
            Ok(refs) => refs,
            Err(PhotoError::Api { code, message }) => {
                warn!(
                    "Photo search for pin {} failed with API error {code}: {message}",
                    self.pin.id
                );
                self.last_error = Some(PhotoError::Api { code, message });
                self.no_images_found = true;
                self.finish_batch();
                self.publish();
                return Ok(());
            }
            Err(e) => {
                warn!("Photo search for pin {} failed: {e}", self.pin.id);
                self.last_error = Some(e);
                self.finish_batch();
                self.publish();
                return Ok(());
            }
        };

        if refs.is_empty() {
            info!("No photos found near pin {} on page {page}", self.pin.id);
            self.no_images_found = true;
            self.finish_batch();
            self.publish();
            return Ok(());
        }

        let mut targets = Vec::with_capacity(refs.len());
        for photo_ref in &refs {
            let url = photo_ref.download_url();
            match self.store.create_photo(self.pin.id, &url) {
                Ok(photo) => {
                    targets.push((photo.id, url));
                    self.photos.push(photo);
                }
                Err(e) => {
                    error!("Failed to store placeholder for pin {}: {e:#}", self.pin.id);
                    self.finish_batch();
                    self.publish();
                    return Err(PhotoError::persistence(e));
                }
            }
        }

        info!(
            "Found {} photos near pin {} on page {page}, downloading",
            targets.len(),
            self.pin.id
        );
        self.start_downloads(self.generation, BatchOrigin::Search, targets);
        self.publish();
        Ok(())
    }

    fn on_photo_fetched(&mut self, photo: PhotoId, result: Result<Vec<u8>>) -> Result<()> {
        if !self.pending.remove(&photo) {
            debug!("Ignoring download of photo {photo}, no longer pending");
            return Ok(());
        }

        let outcome = match result {
            Ok(bytes) => match self.store.set_photo_bytes(photo, &bytes) {
                Ok(()) => {
                    if let Some(entry) = self.photos.iter_mut().find(|p| p.id == photo) {
                        entry.bytes = Some(Arc::from(bytes));
                    }
                    Ok(())
                }
                Err(e) => {
                    error!("Failed to store bytes of photo {photo}: {e:#}");
                    Err(PhotoError::persistence(e))
                }
            },
            Err(e) => {
                warn!("Failed to download photo {photo}: {e}");
                self.last_error = Some(e);
                Ok(())
            }
        };

        if self.pending.is_empty() {
            self.finish_batch();
        }
        self.publish();
        outcome
    }

    fn finish_batch(&mut self) {
        if self.phase != Phase::Idle {
            let resolved = self.photos.iter().filter(|p| p.is_resolved()).count();
            info!(
                "Collection of pin {} settled: {resolved}/{} photos downloaded",
                self.pin.id,
                self.photos.len()
            );
        }
        self.phase = Phase::Idle;
        self.pending.clear();
    }

    fn publish(&mut self) {
        self.revision += 1;
        let snapshot = self.snapshot();
        self.snapshots.send_replace(snapshot);
    }
}
