//! services/api/src/adapters/metadata.rs
//!
//! Book metadata lookup against the Google Books volumes API.

use async_trait::async_trait;
use reading_tracker_core::domain::BookSuggestion;
use reading_tracker_core::ports::{MetadataLookup, PortError, PortResult};
use serde::Deserialize;
use tracing::debug;

#[derive(Clone)]
pub struct GoogleBooksLookup {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GoogleBooksLookup {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

//=========================================================================================
// Wire Format
//=========================================================================================

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    id: String,
    volume_info: VolumeInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    image_links: Option<ImageLinks>,
    page_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ImageLinks {
    thumbnail: Option<String>,
}

impl Volume {
    fn into_suggestion(self) -> BookSuggestion {
        let info = self.volume_info;
        BookSuggestion {
            id: self.id,
            title: info.title,
            author: info.authors.into_iter().next(),
            cover_url: info
                .image_links
                .and_then(|links| links.thumbnail)
                .map(|url| secure_cover_url(&url)),
            genre: info.categories.into_iter().next(),
            page_count: info.page_count.filter(|pages| *pages > 0),
        }
    }
}

/// Covers are always served over https.
fn secure_cover_url(url: &str) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}

//=========================================================================================
// `MetadataLookup` Trait Implementation
//=========================================================================================

#[async_trait]
impl MetadataLookup for GoogleBooksLookup {
    async fn search(&self, query: &str, max_results: usize) -> PortResult<Vec<BookSuggestion>> {
        let max_results = max_results.to_string();
        let mut params = vec![("q", query), ("maxResults", max_results.as_str())];
        if let Some(key) = &self.api_key {
            params.push(("key", key.as_str()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await
            .map_err(|e| PortError::Unavailable(format!("Metadata lookup failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortError::Unavailable(format!("Metadata lookup returned {}", status)));
        }
        let volumes: VolumesResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("Unreadable metadata response: {}", e)))?;

        debug!("Metadata lookup for '{}' returned {} volumes", query, volumes.items.len());
        Ok(volumes.items.into_iter().map(Volume::into_suggestion).collect())
    }
}
