//! Trade log channel models.

use serde::Deserialize;

/// One event emitted during a period.
///
/// There is no synthetic id: two entries are the same entry when timestamp,
/// category and message all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    #[serde(alias = "type")]
    pub category: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(
        timestamp: impl Into<String>,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            category: category.into(),
            message: message.into(),
        }
    }
}
