//! Per-topic view state.

use std::collections::BTreeSet;

use crate::mode::ViewMode;
use crate::models::{Bar, LogEntry, Tick, Topic};

/// The displayable state of one topic, handed to consumers on every flush.
///
/// Consumers receive it behind an `Arc` and must treat it as read-only; the
/// next flush delivers a fresh copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub topic: Topic,
    pub mode: ViewMode,
    /// Bars in ascending timestamp order; the last one is the current period.
    pub bars: Vec<Bar>,
    pub tick: Option<Tick>,
    /// Log entries of the current period, in arrival order.
    pub logs: Vec<LogEntry>,
}

impl ViewSnapshot {
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            mode: ViewMode::Awaiting,
            bars: Vec::new(),
            tick: None,
            logs: Vec::new(),
        }
    }

    pub fn latest_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// The bar before the current one, i.e. the last completed period.
    pub fn previous_bar(&self) -> Option<&Bar> {
        self.bars.len().checked_sub(2).map(|i| &self.bars[i])
    }

    /// Inserts `bar` in timestamp order, overwriting a bar of the same period.
    pub(crate) fn upsert_bar(&mut self, bar: Bar, cap: usize) {
        match self
            .bars
            .binary_search_by(|b| b.timestamp.as_str().cmp(&bar.timestamp))
        {
            Ok(i) => self.bars[i] = bar,
            Err(i) => self.bars.insert(i, bar),
        }
        self.truncate(cap);
    }

    /// Replaces the whole series with a fetched page.
    pub(crate) fn replace_bars(&mut self, bars: Vec<Bar>, cap: usize) {
        self.bars.clear();
        for bar in bars {
            self.upsert_bar(bar, usize::MAX);
        }
        self.truncate(cap);
    }

    /// Merges a backfill page without overwriting live values.
    ///
    /// Known periods only gain indicator fields they lack; unknown periods
    /// are inserted.
    pub(crate) fn merge_backfill(&mut self, bars: Vec<Bar>, cap: usize) {
        for bar in bars {
            match self
                .bars
                .binary_search_by(|b| b.timestamp.as_str().cmp(&bar.timestamp))
            {
                Ok(i) => self.bars[i].fill_missing_indicators(&bar),
                Err(i) => self.bars.insert(i, bar),
            }
        }
        self.truncate(cap);
    }

    pub(crate) fn truncate(&mut self, cap: usize) {
        if self.bars.len() > cap {
            let excess = self.bars.len() - cap;
            self.bars.drain(..excess);
        }
    }
}

/// Engine-side state behind one snapshot.
#[derive(Debug)]
pub(crate) struct View {
    pub snapshot: ViewSnapshot,
    /// Generation of the newest seed, latest, or historical fetch.
    pub generation: u64,
    /// Freshest pushed data, kept while historical so going live is instant.
    pub live_bar: Option<Bar>,
    pub live_tick: Option<Tick>,
    pub live_logs: Vec<LogEntry>,
    /// Periods written by pushes or backfill under the current generation.
    pub live_periods: BTreeSet<String>,
}

impl View {
    pub fn new(topic: Topic) -> Self {
        Self {
            snapshot: ViewSnapshot::new(topic),
            generation: 0,
            live_bar: None,
            live_tick: None,
            live_logs: Vec::new(),
            live_periods: BTreeSet::new(),
        }
    }

    /// Starts a new fetch generation. Older pages become stale.
    pub fn begin_generation(&mut self, generation: u64) {
        self.generation = generation;
        self.live_periods.clear();
    }

    /// Replaces the series with a fetched page, keeping the periods that
    /// pushes or a backfill wrote after the page was requested.
    ///
    /// A kept period retains its OHLC and indicators and only gains the
    /// page's indicator fields it lacks.
    pub fn replace_with_page(&mut self, bars: Vec<Bar>, cap: usize) {
        let kept: Vec<Bar> = self
            .snapshot
            .bars
            .iter()
            .filter(|b| self.live_periods.contains(&b.timestamp))
            .cloned()
            .collect();

        self.snapshot.replace_bars(bars, usize::MAX);
        for mut bar in kept {
            if let Some(fetched) = self
                .snapshot
                .bars
                .iter()
                .find(|b| b.timestamp == bar.timestamp)
            {
                bar.fill_missing_indicators(fetched);
            }
            self.snapshot.upsert_bar(bar, usize::MAX);
        }
        self.snapshot.truncate(cap);
    }

    /// Merges a backfill page and marks its periods as newer than any page
    /// still in flight.
    pub fn merge_backfill(&mut self, bars: Vec<Bar>, cap: usize) {
        self.live_periods
            .extend(bars.iter().map(|b| b.timestamp.clone()));
        self.snapshot.merge_backfill(bars, cap);
    }

    /// Copies the warm push state onto the displayed snapshot.
    pub fn restore_live(&mut self, cap: usize) {
        if let Some(bar) = &self.live_bar {
            let fresher = self
                .snapshot
                .latest_bar()
                .is_none_or(|latest| latest.timestamp <= bar.timestamp);
            if fresher {
                self.snapshot.upsert_bar(bar.clone(), cap);
            }
        }
        if self.live_tick.is_some() {
            self.snapshot.tick = self.live_tick.clone();
        }
        self.snapshot.logs = self.live_logs.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn bar(timestamp: &str, close: i64) -> Bar {
        Bar {
            instrument: None,
            granularity: None,
            timestamp: timestamp.into(),
            open: Decimal::from(close),
            high: Decimal::from(close),
            low: Decimal::from(close),
            close: Decimal::from(close),
            forming: false,
            indicators: Default::default(),
        }
    }

    fn snapshot() -> ViewSnapshot {
        ViewSnapshot::new(Topic::new("XAUUSD", "H1"))
    }

    #[test]
    fn upsert_overwrites_same_period_and_keeps_order() {
        let mut view = snapshot();
        view.upsert_bar(bar("08:00", 2), 10);
        view.upsert_bar(bar("07:00", 1), 10);
        view.upsert_bar(bar("08:00", 3), 10);

        assert_eq!(view.bars.len(), 2);
        assert_eq!(view.latest_bar().unwrap().close, Decimal::from(3));
        assert_eq!(view.previous_bar().unwrap().timestamp, "07:00");
    }

    #[test]
    fn series_is_capped_from_the_oldest_end() {
        let mut view = snapshot();
        view.replace_bars(vec![bar("09:00", 3), bar("07:00", 1), bar("08:00", 2)], 2);

        let stamps: Vec<_> = view.bars.iter().map(|b| b.timestamp.as_str()).collect();
        assert_eq!(stamps, vec!["08:00", "09:00"]);
    }

    #[test]
    fn backfill_never_overwrites_live_ohlc() {
        let mut view = snapshot();
        view.upsert_bar(bar("08:00", 5), 10);

        let mut fetched = bar("08:00", 99);
        fetched
            .indicators
            .insert("prev_close".into(), serde_json::json!(4));
        view.merge_backfill(vec![bar("07:00", 4), fetched], 10);

        assert_eq!(view.bars.len(), 2);
        let latest = view.latest_bar().unwrap();
        assert_eq!(latest.close, Decimal::from(5));
        assert_eq!(latest.indicators["prev_close"], serde_json::json!(4));
    }

    #[test]
    fn page_keeps_periods_written_after_it_was_requested() {
        let mut view = View::new(Topic::new("XAUUSD", "H1"));
        view.begin_generation(1);
        view.snapshot.upsert_bar(bar("07:00", 7), 10);
        view.live_periods.insert("07:00".into());

        let mut backfilled = bar("07:00", 99);
        backfilled
            .indicators
            .insert("atr".into(), serde_json::json!(1.5));
        view.merge_backfill(vec![backfilled], 10);

        let mut fetched = bar("07:00", 3);
        fetched
            .indicators
            .insert("rsi".into(), serde_json::json!(55));
        view.replace_with_page(vec![bar("06:00", 6), fetched], 10);

        assert_eq!(view.snapshot.bars.len(), 2);
        let kept = view.snapshot.latest_bar().unwrap();
        assert_eq!(kept.close, Decimal::from(7));
        assert_eq!(kept.indicators["atr"], serde_json::json!(1.5));
        assert_eq!(kept.indicators["rsi"], serde_json::json!(55));

        view.begin_generation(2);
        view.replace_with_page(vec![bar("07:00", 3)], 10);
        assert_eq!(view.snapshot.bars[0].close, Decimal::from(3));
    }

    #[test]
    fn restore_live_skips_older_bars() {
        let mut view = View::new(Topic::new("XAUUSD", "H1"));
        view.snapshot.replace_bars(vec![bar("09:00", 9)], 10);
        view.live_bar = Some(bar("08:00", 8));
        view.live_logs = vec![LogEntry::new("08:30", "fill", "x")];

        view.restore_live(10);

        assert_eq!(view.snapshot.bars.len(), 1);
        assert_eq!(view.snapshot.logs.len(), 1);
    }
}
