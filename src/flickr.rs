//! Flickr photo search client.
//!
//! Two remote operations: search for photos near a coordinate (one page at a
//! time) and download the bytes of a single photo. Neither touches local
//! state; the collection manager decides what to do with the results.

use async_trait::async_trait;
use chrono::{Days, Local, Months, NaiveDate};
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{PhotoError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.flickr.com/services/rest/";
const SEARCH_METHOD: &str = "flickr.photos.search";

/// The four fields needed to build a download URL for a search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRef {
    pub farm: u32,
    pub server: String,
    pub id: String,
    pub secret: String,
}

impl PhotoRef {
    /// Static image URL of this photo
    pub fn download_url(&self) -> String {
        format!(
            "https://farm{}.staticflickr.com/{}/{}_{}.jpg",
            self.farm, self.server, self.id, self.secret
        )
    }
}

/// Parameters of one search page
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub latitude: f64,
    pub longitude: f64,
    /// `YYYY-MM-DD`, see [`max_upload_date`]
    pub max_upload_date: String,
    pub page: u32,
    pub per_page: u32,
}

/// Remote photo source consumed by the collection manager
#[async_trait]
pub trait PhotoApi: Send + Sync + 'static {
    /// One page of photos near a location. Zero results is an empty list, not an error.
    async fn search_photos(&self, query: &SearchQuery) -> Result<Vec<PhotoRef>>;

    /// Raw bytes behind a photo URL
    async fn fetch_photo_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// Upper bound on upload date for searches made on `today`: one calendar
/// month back, then one day forward.
///
/// Month subtraction clamps to the end of shorter months, so 2023-03-31
/// gives 2023-02-28 and then 2023-03-01.
pub fn max_upload_date(today: NaiveDate) -> String {
    let month_back = today.checked_sub_months(Months::new(1)).unwrap_or(today);
    let bound = month_back.checked_add_days(Days::new(1)).unwrap_or(month_back);
    bound.format("%Y-%m-%d").to_string()
}

/// [`max_upload_date`] for the local calendar date
pub fn max_upload_date_now() -> String {
    max_upload_date(Local::now().date_naive())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Failure { code: i64, message: String },
    Success { photos: PhotoPage },
}

#[derive(Debug, Deserialize)]
struct PhotoPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    pages: Option<u32>,
    #[serde(default)]
    photo: Vec<RawPhoto>,
}

#[derive(Debug, Deserialize)]
struct RawPhoto {
    farm: Option<u32>,
    server: Option<String>,
    id: Option<String>,
    secret: Option<String>,
}

impl RawPhoto {
    fn into_ref(self) -> Option<PhotoRef> {
        Some(PhotoRef {
            farm: self.farm?,
            server: self.server?,
            id: self.id?,
            secret: self.secret?,
        })
    }
}

/// Turns a search response body into photo references
fn parse_search_response(body: &str) -> Result<Vec<PhotoRef>> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| PhotoError::MalformedResponse(e.to_string()))?;

    match response {
        SearchResponse::Failure { code, message } => Err(PhotoError::Api { code, message }),
        SearchResponse::Success { photos } => {
            debug!(
                "Search returned page {:?} of {:?} with {} photos",
                photos.page,
                photos.pages,
                photos.photo.len()
            );
            let total = photos.photo.len();
            let refs: Vec<PhotoRef> = photos
                .photo
                .into_iter()
                .filter_map(RawPhoto::into_ref)
                .collect();
            if refs.len() < total {
                warn!("Skipped {} search results missing URL fields", total - refs.len());
            }
            Ok(refs)
        }
    }
}

/// HTTP client for the Flickr REST API
#[derive(Clone)]
pub struct FlickrClient {
    client: Client,
    base_url: String,
    api_key: String,
    radius_km: u32,
    safe_search: u8,
}

impl FlickrClient {
    pub fn new(base_url: &str, api_key: &str, radius_km: u32, safe_search: u8) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            radius_km,
            safe_search,
        }
    }

    /// Fully resolved search URL for a query
    pub fn search_url(&self, query: &SearchQuery) -> Result<Url> {
        Url::parse_with_params(
            &self.base_url,
            &[
                ("method", SEARCH_METHOD.to_string()),
                ("api_key", self.api_key.clone()),
                ("lat", query.latitude.to_string()),
                ("lon", query.longitude.to_string()),
                ("max_upload_date", query.max_upload_date.clone()),
                ("format", "json".to_string()),
                ("per_page", query.per_page.to_string()),
                ("page", query.page.to_string()),
                ("safe_search", self.safe_search.to_string()),
                ("radius", self.radius_km.to_string()),
                ("nojsoncallback", "1".to_string()),
            ],
        )
        .map_err(|e| PhotoError::Network(format!("Invalid API base URL {}: {e}", self.base_url)))
    }
}

#[async_trait]
impl PhotoApi for FlickrClient {
    async fn search_photos(&self, query: &SearchQuery) -> Result<Vec<PhotoRef>> {
        let url = self.search_url(query)?;
        debug!(
            "Searching photos near {}, {} (page {})",
            query.latitude, query.longitude, query.page
        );

        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_search_response(&body)
    }

    async fn fetch_photo_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}
