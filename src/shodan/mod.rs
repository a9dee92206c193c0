// Shodan REST API access: the search trait the collector drives and its
// reqwest-backed implementation

pub mod types;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ExposureError, Result};
pub use types::{Asn, FacetBucket, Match, MatchRow, SearchResponse, Vulns};

pub const API_BASE: &str = "https://api.shodan.io";

/// Matches returned per page by `/shodan/host/search`.
pub const PAGE_SIZE: usize = 100;

/// A facet request such as `port:10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetSpec {
    pub field: String,
    pub limit: usize,
}

impl FacetSpec {
    pub fn new(field: impl Into<String>, limit: usize) -> Self {
        Self { field: field.into(), limit }
    }
}

impl fmt::Display for FacetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.limit)
    }
}

pub fn facet_param(facets: &[FacetSpec]) -> String {
    facets
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
pub trait HostSearch: Send + Sync {
    /// One page (1-based) of matches for `query`.
    async fn search(&self, query: &str, page: u32) -> Result<SearchResponse>;

    /// Total and facet counts for `query`, without matches.
    async fn count(&self, query: &str, facets: &[FacetSpec]) -> Result<SearchResponse>;
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: String,
}

pub struct ShodanClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ShodanClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("exposure-scope/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
        })
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<SearchResponse> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }

        Ok(response.json::<SearchResponse>().await?)
    }
}

/// Build an `Api` error from a failed response, preferring the
/// `{"error": "..."}` message the API sends.
pub fn api_error(status: u16, body: &str) -> ExposureError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "no response body".to_string()
            } else {
                trimmed.to_string()
            }
        });
    ExposureError::Api { status, message }
}

#[async_trait]
impl HostSearch for ShodanClient {
    async fn search(&self, query: &str, page: u32) -> Result<SearchResponse> {
        debug!(query, page, "GET /shodan/host/search");
        self.get(
            "/shodan/host/search",
            &[("query", query.to_string()), ("page", page.to_string())],
        )
        .await
    }

    async fn count(&self, query: &str, facets: &[FacetSpec]) -> Result<SearchResponse> {
        debug!(query, facets = %facet_param(facets), "GET /shodan/host/count");
        let mut params = vec![("query", query.to_string())];
        if !facets.is_empty() {
            params.push(("facets", facet_param(facets)));
        }
        self.get("/shodan/host/count", &params).await
    }
}
