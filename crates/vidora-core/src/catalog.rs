//! Content API records
//!
//! The playback core only needs a video's id, title, thumbnail and a
//! playable URL. [`ContentApi`] is the seam to the remote catalog.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::{Error, Result};

/// Path of the video collection relative to the API base
pub const VIDEOS_ENDPOINT: &str = "content/videos/";

/// A video as served by the content API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub dislikes: u64,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub video_file: Option<String>,
    #[serde(default)]
    pub hls_playlist: Option<String>,
    #[serde(default)]
    pub created_at: Option<NaiveDate>,
}

impl VideoRecord {
    /// Identifier used for progress records
    pub fn video_id(&self) -> String {
        self.id.to_string()
    }

    /// Streamable URL: the HLS playlist when present, else the uploaded file
    pub fn playable_url(&self, static_base: Option<&str>) -> Result<String> {
        let path = self
            .hls_playlist
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(self.video_file.as_deref().filter(|p| !p.is_empty()))
            .ok_or_else(|| Error::ContentApi(format!("video {} has no playable source", self.id)))?;
        resolve(path, static_base)
    }

    /// Thumbnail URL, or an empty string when the record has none
    pub fn thumbnail_url(&self, static_base: Option<&str>) -> String {
        self.thumbnail
            .as_deref()
            .and_then(|t| resolve(t, static_base).ok())
            .unwrap_or_default()
    }

    /// Published within the last 30 days of `today`
    pub fn is_new(&self, today: NaiveDate) -> bool {
        self.created_at
            .is_some_and(|created| (today - created).num_days() <= 30)
    }

    pub fn is_popular(&self) -> bool {
        self.views >= 10
    }
}

/// Resolve a possibly relative media path against the static base URL
fn resolve(path: &str, static_base: Option<&str>) -> Result<String> {
    if let Ok(absolute) = Url::parse(path) {
        return Ok(absolute.to_string());
    }
    let base = static_base.ok_or_else(|| {
        Error::InvalidConfig(format!("relative media path {} needs a static base URL", path))
    })?;
    let base = Url::parse(base)?;
    Ok(base.join(path)?.to_string())
}

/// Source of video records
#[async_trait]
pub trait ContentApi: Send + Sync {
    async fn fetch_videos(&self) -> Result<Vec<VideoRecord>>;

    async fn fetch_video(&self, id: u64) -> Result<VideoRecord>;
}

/// Fixed, in-memory catalog
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    videos: Vec<VideoRecord>,
}

impl StaticCatalog {
    pub fn new(videos: Vec<VideoRecord>) -> Self {
        Self { videos }
    }

    /// Load a JSON array of video records
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::new(serde_json::from_str(&raw)?))
    }
}

#[async_trait]
impl ContentApi for StaticCatalog {
    async fn fetch_videos(&self) -> Result<Vec<VideoRecord>> {
        Ok(self.videos.clone())
    }

    async fn fetch_video(&self, id: u64) -> Result<VideoRecord> {
        self.videos
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| Error::ContentApi(format!("video {} not found", id)))
    }
}

#[cfg(feature = "http")]
pub use http::HttpContentApi;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use reqwest::{Client, StatusCode};
    use std::time::Duration;
    use tracing::{debug, instrument};

    /// REST client for the content API
    pub struct HttpContentApi {
        client: Client,
        api_base: Url,
        token: Option<String>,
    }

    impl HttpContentApi {
        pub fn new(api_base: &str, token: Option<String>) -> Result<Self> {
            let mut api_base = Url::parse(api_base)?;
            if !api_base.path().ends_with('/') {
                let path = format!("{}/", api_base.path());
                api_base.set_path(&path);
            }
            let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
            Ok(Self {
                client,
                api_base,
                token,
            })
        }

        /// Collection endpoint
        pub fn videos_url(&self) -> Result<Url> {
            Ok(self.api_base.join(VIDEOS_ENDPOINT)?)
        }

        fn request(&self, url: Url) -> reqwest::RequestBuilder {
            let request = self.client.get(url);
            match &self.token {
                Some(token) => request.header("Authorization", format!("Token {}", token)),
                None => request,
            }
        }
    }

    #[async_trait]
    impl ContentApi for HttpContentApi {
        #[instrument(skip(self))]
        async fn fetch_videos(&self) -> Result<Vec<VideoRecord>> {
            let url = self.videos_url()?;
            let videos: Vec<VideoRecord> = self
                .request(url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            debug!(count = videos.len(), "Fetched video catalog");
            Ok(videos)
        }

        #[instrument(skip(self))]
        async fn fetch_video(&self, id: u64) -> Result<VideoRecord> {
            let url = self.videos_url()?.join(&format!("{}/", id))?;
            let response = self.request(url).send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(Error::ContentApi(format!("video {} not found", id)));
            }
            Ok(response.error_for_status()?.json().await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"id": 1, "title": "Ocean", "description": "Waves", "created_at": "2026-10-01",
         "url": "https://example.test", "likes": 3, "dislikes": 0, "views": 12,
         "video_file": "/media/videos/ocean.mp4",
         "hls_playlist": "/media/videos/ocean/index.m3u8",
         "thumbnail": "/media/thumbs/ocean.jpg", "category": "nature"},
        {"id": 2, "title": "City", "views": 1,
         "video_file": "https://cdn.test/city.mp4"}
    ]"#;

    fn sample() -> Vec<VideoRecord> {
        serde_json::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_deserialize_api_records() {
        let videos = sample();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].category.as_deref(), Some("nature"));
        assert_eq!(videos[1].thumbnail, None);
        assert_eq!(videos[0].video_id(), "1");
    }

    #[test]
    fn test_playable_url_prefers_playlist() {
        let videos = sample();
        let base = Some("https://static.test");
        assert_eq!(
            videos[0].playable_url(base).unwrap(),
            "https://static.test/media/videos/ocean/index.m3u8"
        );
        assert_eq!(videos[1].playable_url(None).unwrap(), "https://cdn.test/city.mp4");
        assert_eq!(videos[0].thumbnail_url(base), "https://static.test/media/thumbs/ocean.jpg");
        assert_eq!(videos[1].thumbnail_url(base), "");
    }

    #[test]
    fn test_relative_path_without_base_is_config_error() {
        let videos = sample();
        assert!(matches!(videos[0].playable_url(None), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_record_without_source() {
        let video: VideoRecord = serde_json::from_str(r#"{"id": 9, "title": "Empty"}"#).unwrap();
        assert!(matches!(video.playable_url(None), Err(Error::ContentApi(_))));
    }

    #[test]
    fn test_new_and_popular() {
        let videos = sample();
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert!(videos[0].is_new(today));
        assert!(videos[0].is_popular());
        assert!(!videos[1].is_new(today));
        assert!(!videos[1].is_popular());
    }

    #[test]
    fn test_static_catalog_lookup() {
        let catalog = StaticCatalog::new(sample());
        let videos = tokio_test::block_on(catalog.fetch_videos());
        assert_eq!(tokio_test::assert_ok!(videos).len(), 2);
        let city = tokio_test::block_on(catalog.fetch_video(2));
        assert_eq!(tokio_test::assert_ok!(city).title, "City");
        let missing = tokio_test::block_on(catalog.fetch_video(99));
        assert!(matches!(tokio_test::assert_err!(missing), Error::ContentApi(_)));
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_client_normalizes_base() {
        let api = HttpContentApi::new("https://api.test/api", Some("abc".into())).unwrap();
        assert_eq!(
            api.videos_url().unwrap().as_str(),
            "https://api.test/api/content/videos/"
        );
    }
}
