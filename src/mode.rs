//! Live/historical view mode state machine.
//!
//! The controller is a pure function of `(mode, event)`; the engine applies
//! the returned [`ModeEffect`]s. Push data can never move a view out of
//! [`ViewMode::Historical`]: only an explicit live request or a successful
//! "load most recent" fetch does that.

/// Which data a view currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    /// Nothing has been loaded yet.
    #[default]
    Awaiting,
    /// Push updates mutate the snapshot as they arrive.
    Live,
    /// The snapshot is frozen at a historical query result.
    Historical,
}

/// The kind of historical fetch a response belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchKind {
    /// Initial load when a view opens.
    Seed,
    /// "Load most recent", issued when returning to live.
    Latest,
    /// Explicit query ending at `end`.
    Historical { end: String },
    /// Supplementary fetch after a period rollover.
    Backfill,
}

/// Inputs to the mode state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeEvent {
    /// A bar arrived from the push channel.
    BarPushed,
    /// A tick or log entry arrived from the push channel.
    Push,
    /// The bar tracker detected a new period.
    RolledOver,
    /// The user asked to see data ending at `end`.
    HistoricalRequested { end: String },
    /// The user asked to return to the live view.
    LiveRequested,
    /// A fetch of the given kind completed successfully.
    Loaded(FetchKind),
    /// A fetch of the given kind failed.
    LoadFailed(FetchKind),
}

/// Actions the engine performs after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeEffect {
    /// Mutate the displayed snapshot with the pushed data.
    ApplyPush,
    /// Keep the pushed data off the displayed snapshot.
    HoldPush,
    /// Issue a fetch of the given kind.
    Fetch(FetchKind),
    /// Replace the snapshot's bar series with the fetched page.
    ReplaceBars,
    /// Merge the fetched page into the live series without overwriting it.
    MergeBackfill,
    /// Surface a retryable error to the view's consumers.
    ReportError,
}

/// Computes the next mode and the effects for one event.
pub fn transition(mode: ViewMode, event: &ModeEvent) -> (ViewMode, Vec<ModeEffect>) {
    use ModeEffect::*;
    use ViewMode::*;

    match (mode, event) {
        // The first live bar counts as the first successful load. Ticks and
        // logs alone leave an empty view waiting.
        (Awaiting, ModeEvent::BarPushed) => (Live, vec![ApplyPush]),
        (Awaiting, ModeEvent::Push) => (Awaiting, vec![HoldPush]),
        (Live, ModeEvent::BarPushed | ModeEvent::Push) => (Live, vec![ApplyPush]),
        (Historical, ModeEvent::BarPushed | ModeEvent::Push) => (Historical, vec![HoldPush]),

        (Live, ModeEvent::RolledOver) => (Live, vec![Fetch(FetchKind::Backfill)]),
        (mode, ModeEvent::RolledOver) => (mode, Vec::new()),

        (_, ModeEvent::HistoricalRequested { end }) => (
            Historical,
            vec![Fetch(FetchKind::Historical { end: end.clone() })],
        ),
        (_, ModeEvent::LiveRequested) => (Live, vec![Fetch(FetchKind::Latest)]),

        (Awaiting | Live, ModeEvent::Loaded(FetchKind::Seed)) => (Live, vec![ReplaceBars]),
        (Historical, ModeEvent::Loaded(FetchKind::Seed)) => (Historical, Vec::new()),
        (_, ModeEvent::Loaded(FetchKind::Latest)) => (Live, vec![ReplaceBars]),
        (Historical, ModeEvent::Loaded(FetchKind::Historical { .. })) => {
            (Historical, vec![ReplaceBars])
        }
        (mode, ModeEvent::Loaded(FetchKind::Historical { .. })) => (mode, Vec::new()),
        (Live, ModeEvent::Loaded(FetchKind::Backfill)) => (Live, vec![MergeBackfill]),
        (mode, ModeEvent::Loaded(FetchKind::Backfill)) => (mode, Vec::new()),

        // Backfill is best-effort; the next rollover retries it.
        (mode, ModeEvent::LoadFailed(FetchKind::Backfill)) => (mode, Vec::new()),
        (mode, ModeEvent::LoadFailed(_)) => (mode, vec![ReportError]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(mode: ViewMode, events: &[ModeEvent]) -> (ViewMode, Vec<ModeEffect>) {
        events.iter().fold((mode, Vec::new()), |(mode, mut all), e| {
            let (next, effects) = transition(mode, e);
            all.extend(effects);
            (next, all)
        })
    }

    #[test]
    fn first_successful_load_goes_live() {
        let (mode, effects) = transition(ViewMode::Awaiting, &ModeEvent::Loaded(FetchKind::Seed));
        assert_eq!(mode, ViewMode::Live);
        assert_eq!(effects, vec![ModeEffect::ReplaceBars]);

        let (mode, _) = transition(ViewMode::Awaiting, &ModeEvent::BarPushed);
        assert_eq!(mode, ViewMode::Live);
    }

    #[test]
    fn ticks_and_logs_alone_do_not_load_a_view() {
        let (mode, effects) = run(ViewMode::Awaiting, &[ModeEvent::Push, ModeEvent::Push]);
        assert_eq!(mode, ViewMode::Awaiting);
        assert_eq!(effects, vec![ModeEffect::HoldPush; 2]);

        let (mode, effects) = run(ViewMode::Awaiting, &[ModeEvent::Push, ModeEvent::BarPushed]);
        assert_eq!(mode, ViewMode::Live);
        assert_eq!(effects, vec![ModeEffect::HoldPush, ModeEffect::ApplyPush]);
    }

    #[test]
    fn push_never_leaves_historical() {
        let pushes: Vec<_> = (0..50)
            .map(|i| if i % 2 == 0 { ModeEvent::Push } else { ModeEvent::BarPushed })
            .collect();
        let (mode, effects) = run(ViewMode::Historical, &pushes);

        assert_eq!(mode, ViewMode::Historical);
        assert!(effects.iter().all(|e| *e == ModeEffect::HoldPush));
    }

    #[test]
    fn rollover_backfills_only_when_live() {
        let (_, live) = transition(ViewMode::Live, &ModeEvent::RolledOver);
        let (_, historical) = transition(ViewMode::Historical, &ModeEvent::RolledOver);

        assert_eq!(live, vec![ModeEffect::Fetch(FetchKind::Backfill)]);
        assert!(historical.is_empty());
    }

    #[test]
    fn historical_request_freezes_immediately() {
        let (mode, effects) = transition(
            ViewMode::Live,
            &ModeEvent::HistoricalRequested {
                end: "2026-01-19T00:00:00".into(),
            },
        );

        assert_eq!(mode, ViewMode::Historical);
        assert_eq!(
            effects,
            vec![ModeEffect::Fetch(FetchKind::Historical {
                end: "2026-01-19T00:00:00".into()
            })]
        );
    }

    #[test]
    fn live_request_returns_and_reloads() {
        let (mode, effects) = run(
            ViewMode::Historical,
            &[
                ModeEvent::LiveRequested,
                ModeEvent::Loaded(FetchKind::Latest),
            ],
        );

        assert_eq!(mode, ViewMode::Live);
        assert_eq!(
            effects,
            vec![
                ModeEffect::Fetch(FetchKind::Latest),
                ModeEffect::ReplaceBars
            ]
        );
    }

    #[test]
    fn late_backfill_is_ignored_in_historical() {
        let (mode, effects) = transition(
            ViewMode::Historical,
            &ModeEvent::Loaded(FetchKind::Backfill),
        );
        assert_eq!(mode, ViewMode::Historical);
        assert!(effects.is_empty());
    }

    #[test]
    fn failures_report_without_changing_mode() {
        let (mode, effects) = transition(
            ViewMode::Historical,
            &ModeEvent::LoadFailed(FetchKind::Historical { end: "x".into() }),
        );
        assert_eq!(mode, ViewMode::Historical);
        assert_eq!(effects, vec![ModeEffect::ReportError]);

        let (_, effects) = transition(ViewMode::Live, &ModeEvent::LoadFailed(FetchKind::Backfill));
        assert!(effects.is_empty());
    }
}
