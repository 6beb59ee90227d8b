//! Exactly-once merging of incremental trade log batches.

use std::collections::HashSet;

use crate::models::LogEntry;

/// Appends the entries of `incoming` not already present in `existing`.
///
/// Identity is the full `(timestamp, category, message)` triple. Existing
/// entries keep their positions; new entries follow in arrival order, and an
/// entry repeated within `incoming` is appended once.
pub fn merge(existing: &[LogEntry], incoming: &[LogEntry]) -> Vec<LogEntry> {
    let mut seen: HashSet<&LogEntry> = existing.iter().collect();
    let mut merged = existing.to_vec();

    for entry in incoming {
        if seen.insert(entry) {
            merged.push(entry.clone());
        }
    }

    merged
}
