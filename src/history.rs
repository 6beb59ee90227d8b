//! Client for the historical query service.
//!
//! The engine only needs [`HistorySource`]; [`HistoryClient`] is the HTTP
//! implementation used in production.

use std::future::Future;

use tracing::{debug, info};

use crate::Result;
use crate::config::HistoryConfig;
use crate::error::MeridianError;
use crate::models::{HistoryPage, HistoryRequest};

/// Something that can answer historical bar queries.
pub trait HistorySource: Clone + Send + Sync + 'static {
    /// Loads one page of bars.
    ///
    /// # Errors
    ///
    /// Returns a [`MeridianError`] if the query cannot be completed.
    fn fetch(&self, request: HistoryRequest) -> impl Future<Output = Result<HistoryPage>> + Send;
}

/// HTTP client for the historical query service.
#[derive(Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    url: String,
    api_token: Option<String>,
}

impl HistoryClient {
    /// Builds a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MeridianError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &HistoryConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
            api_token: config.api_token.clone(),
        })
    }
}

impl HistorySource for HistoryClient {
    async fn fetch(&self, request: HistoryRequest) -> Result<HistoryPage> {
        debug!(topic = %request.topic, end = ?request.end, "Querying history");

        let mut builder = self.http.get(&self.url).query(&request.query_pairs());
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?.error_for_status()?;
        let page: HistoryPage = response.json().await?;

        if !page.success {
            return Err(MeridianError::History(
                page.error
                    .unwrap_or_else(|| "service reported failure".to_string()),
            ));
        }

        info!(
            topic = %request.topic,
            bars = page.data.len(),
            total = page.total,
            "History loaded"
        );
        Ok(page)
    }
}
