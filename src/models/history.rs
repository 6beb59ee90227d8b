//! Historical query service request and response models.

use serde::Deserialize;

use super::{Bar, Topic};

/// Parameters of one historical bar query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub topic: Topic,
    pub limit: u32,
    /// Inclusive upper bound on bar timestamps; `None` loads the most recent.
    pub end: Option<String>,
}

impl HistoryRequest {
    pub fn latest(topic: Topic, limit: u32) -> Self {
        Self {
            topic,
            limit,
            end: None,
        }
    }

    pub fn ending_at(topic: Topic, limit: u32, end: impl Into<String>) -> Self {
        Self {
            topic,
            limit,
            end: Some(end.into()),
        }
    }

    /// Query-string pairs in the order the service expects them.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("symbol", self.topic.instrument().to_string()),
            ("timeframe", self.topic.granularity().to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(end) = &self.end {
            pairs.push(("end", end.clone()));
        }
        pairs
    }
}

/// One page of bars returned by the historical query service.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Bar>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
    /// Failure description sent alongside `success: false`.
    #[serde(default, alias = "message")]
    pub error: Option<String>,
}
