use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{PhotoError, Result};
use crate::flickr::{PhotoApi, PhotoRef, SearchQuery};

/// What the mock answers for a search
#[derive(Debug, Clone)]
pub enum MockSearch {
    /// Pages of results; page `n` holds `counts[n - 1]` photos, later pages are empty
    Pages(Vec<usize>),
    ApiError(i64, String),
    Offline,
}

/// In-memory photo API for tests and offline runs.
///
/// Search results are synthesized per page, photo bytes are derived from the
/// URL, and every call is recorded.
pub struct MockPhotoApi {
    search: Mutex<MockSearch>,
    failing_urls: Mutex<HashSet<String>>,
    searches: Mutex<Vec<SearchQuery>>,
    fetches: Mutex<Vec<String>>,
}

impl MockPhotoApi {
    pub fn new(search: MockSearch) -> Self {
        Self {
            search: Mutex::new(search),
            failing_urls: Mutex::new(HashSet::new()),
            searches: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Every page returns `count` photos
    pub fn with_photos(count: usize) -> Self {
        Self::new(MockSearch::Pages(vec![count; 64]))
    }

    pub fn set_search(&self, search: MockSearch) {
        *self.search.lock().unwrap() = search;
    }

    /// Downloads of `url` fail with a network error
    pub fn fail_url(&self, url: &str) {
        self.failing_urls.lock().unwrap().insert(url.to_string());
    }

    pub fn searches(&self) -> Vec<SearchQuery> {
        self.searches.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    /// Bytes the mock serves for `url`
    pub fn bytes_for(url: &str) -> Vec<u8> {
        format!("image:{url}").into_bytes()
    }

    /// Photo reference number `index` of `page`
    pub fn photo_ref(page: u32, index: usize) -> PhotoRef {
        PhotoRef {
            farm: 1,
            server: format!("{page}"),
            id: format!("p{page}-{index}"),
            secret: "secret".to_string(),
        }
    }
}

#[async_trait]
impl PhotoApi for MockPhotoApi {
    async fn search_photos(&self, query: &SearchQuery) -> Result<Vec<PhotoRef>> {
        self.searches.lock().unwrap().push(query.clone());
        let search = self.search.lock().unwrap().clone();

        match search {
            MockSearch::Pages(counts) => {
                let count = counts
                    .get(query.page.saturating_sub(1) as usize)
                    .copied()
                    .unwrap_or(0)
                    .min(query.per_page as usize);
                Ok((0..count).map(|i| Self::photo_ref(query.page, i)).collect())
            }
            MockSearch::ApiError(code, message) => Err(PhotoError::Api { code, message }),
            MockSearch::Offline => Err(PhotoError::Network("mock network is offline".to_string())),
        }
    }

    async fn fetch_photo_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.lock().unwrap().push(url.to_string());
        if self.failing_urls.lock().unwrap().contains(url) {
            return Err(PhotoError::Network(format!("mock download failed for {url}")));
        }
        Ok(Self::bytes_for(url))
    }
}
