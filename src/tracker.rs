//! Bar lifecycle tracking and period rollover detection.
//!
//! [`transition`] is the pure state machine for a single topic;
//! [`BarTracker`] keeps one [`PeriodState`] per topic and feeds it bars in
//! delivery order.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{Bar, Topic};

/// Lifecycle of the current aggregation period for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PeriodState {
    /// No bar has been seen yet.
    #[default]
    NoBar,
    /// The period starting at `timestamp` is still accumulating.
    Forming { timestamp: String },
    /// The period starting at `timestamp` was reported complete and the next
    /// one has not started yet.
    Settled { timestamp: String },
}

impl PeriodState {
    /// Period-start timestamp of the last bar seen.
    pub fn timestamp(&self) -> Option<&str> {
        match self {
            PeriodState::NoBar => None,
            PeriodState::Forming { timestamp } | PeriodState::Settled { timestamp } => {
                Some(timestamp)
            }
        }
    }

    fn after(bar: &Bar) -> Self {
        let timestamp = bar.timestamp.clone();
        if bar.forming {
            PeriodState::Forming { timestamp }
        } else {
            PeriodState::Settled { timestamp }
        }
    }
}

/// Emitted by [`transition`], in the order they must be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodEvent {
    /// First bar for the topic. Nothing to roll over.
    Bootstrapped { timestamp: String },
    /// A new period started. Emitted before the new bar is applied.
    RolledOver { previous: String, current: String },
    /// The bar updates the period already being tracked.
    Updated { timestamp: String },
}

/// Computes the next state and the events for one incoming bar.
pub fn transition(state: &PeriodState, bar: &Bar) -> (PeriodState, Vec<PeriodEvent>) {
    let event = match state.timestamp() {
        None => PeriodEvent::Bootstrapped {
            timestamp: bar.timestamp.clone(),
        },
        Some(previous) if previous == bar.timestamp => PeriodEvent::Updated {
            timestamp: bar.timestamp.clone(),
        },
        Some(previous) => PeriodEvent::RolledOver {
            previous: previous.to_string(),
            current: bar.timestamp.clone(),
        },
    };

    (PeriodState::after(bar), vec![event])
}

/// Per-topic bar lifecycle state.
#[derive(Debug, Default)]
pub struct BarTracker {
    states: HashMap<Topic, PeriodState>,
}

impl BarTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `bar` for `topic` and returns the resulting period events.
    pub fn observe(&mut self, topic: &Topic, bar: &Bar) -> Vec<PeriodEvent> {
        let state = self.states.entry(topic.clone()).or_default();
        let (next, events) = transition(state, bar);
        if let Some(PeriodEvent::RolledOver { previous, current }) = events.first() {
            debug!(%topic, previous, current, "Period rolled over");
        }
        *state = next;
        events
    }

    pub fn state(&self, topic: &Topic) -> PeriodState {
        self.states.get(topic).cloned().unwrap_or_default()
    }

    /// Drops tracking for a topic nobody watches any more.
    pub fn forget(&mut self, topic: &Topic) {
        self.states.remove(topic);
    }
}
