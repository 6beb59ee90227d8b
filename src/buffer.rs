//! Coalescing buffer between the push channel and the render cadence.
//!
//! Ticks are keyed by topic with last-value-wins semantics. Bar and log
//! updates are applied to the snapshot immediately, so the buffer only
//! needs to remember that their topic has something new to show.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use tracing::debug;

use crate::models::{Tick, Topic};

/// Everything that accumulated since the previous flush.
#[derive(Debug, Default, PartialEq)]
pub struct Flushed {
    /// One coalesced tick per topic.
    pub ticks: BTreeMap<Topic, Tick>,
    /// Topics whose snapshot changed without a tick.
    pub touched: BTreeSet<Topic>,
}

impl Flushed {
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty() && self.touched.is_empty()
    }
}

/// Pending updates awaiting the next flush.
#[derive(Debug, Default)]
pub struct UpdateBuffer {
    pending: Flushed,
    coalesced: u64,
}

impl UpdateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `tick` for `topic`, replacing any tick not yet flushed.
    ///
    /// Errored ticks are dropped and leave the buffer untouched.
    pub fn ingest(&mut self, topic: Topic, tick: Tick) {
        if tick.is_errored() {
            debug!(%topic, timestamp = tick.timestamp, "Dropping errored tick");
            return;
        }

        if self.pending.ticks.insert(topic, tick).is_some() {
            self.coalesced += 1;
        }
    }

    /// Marks `topic` as changed by a bar or log update.
    pub fn touch(&mut self, topic: Topic) {
        self.pending.touched.insert(topic);
    }

    /// Drops anything pending for a topic that is no longer watched.
    pub fn discard(&mut self, topic: &Topic) {
        self.pending.ticks.remove(topic);
        self.pending.touched.remove(topic);
    }

    /// Drains the buffer. Returns `None` when there is nothing to deliver.
    pub fn flush(&mut self) -> Option<Flushed> {
        if self.pending.is_empty() {
            return None;
        }
        Some(mem::take(&mut self.pending))
    }

    /// Number of ticks overwritten before they could be flushed.
    pub fn coalesced_count(&self) -> u64 {
        self.coalesced
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
