//! The synchronization engine.
//!
//! One task owns every piece of mutable state: the subscription registry,
//! the update buffer, the bar tracker, and the per-topic views. It reacts to
//! four inputs (commands, channel events, fetch results, and the flush
//! timer), so no engine state is ever shared or locked.
//!
//! The synchronous `handle_*`, `flush`, and view methods are public so the
//! behavior can be driven without a socket or a timer.

mod handle;
mod view;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::buffer::UpdateBuffer;
use crate::config::AppConfig;
use crate::history::HistorySource;
use crate::merge::merge;
use crate::mode::{self, FetchKind, ModeEffect, ModeEvent, ViewMode};
use crate::models::{Bar, HistoryPage, HistoryRequest, LogEntry, ServerEvent, Topic};
use crate::registry::{ConsumerId, SubscriptionRegistry};
use crate::scheduler::PeriodicTask;
use crate::tracker::{BarTracker, PeriodEvent};
use crate::websocket::{
    ChannelConnection, ChannelEvent, ChannelPool, ConnectionState, decode_ticks,
};

pub use handle::{EngineCommand, EngineHandle, ViewEvent, ViewSubscription};
pub use view::ViewSnapshot;

use view::View;

/// Identifies one issued historical fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub topic: Topic,
    pub generation: u64,
    pub kind: FetchKind,
}

/// A completed historical fetch, tagged with the ticket it was issued under.
#[derive(Debug)]
pub struct FetchOutcome {
    pub ticket: FetchTicket,
    pub result: crate::Result<HistoryPage>,
}

/// Messages the engine posts to itself.
#[derive(Debug)]
enum EngineMessage {
    Flush,
    Fetched(FetchOutcome),
}

/// Owns and drives all synchronization state.
pub struct SyncEngine<H: HistorySource> {
    websocket_url: String,
    history_limit: u32,
    backfill_limit: u32,
    flush_interval: Duration,

    history: H,
    pool: ChannelPool,
    channel: Option<Arc<ChannelConnection>>,
    connection: ConnectionState,

    registry: SubscriptionRegistry,
    buffer: UpdateBuffer,
    tracker: BarTracker,
    views: HashMap<Topic, View>,
    consumers: HashMap<ConsumerId, mpsc::UnboundedSender<ViewEvent>>,
    next_consumer: u64,
    next_generation: u64,

    commands: mpsc::UnboundedReceiver<EngineCommand>,
    channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    inbox_tx: mpsc::UnboundedSender<EngineMessage>,
    inbox: mpsc::UnboundedReceiver<EngineMessage>,
    scheduler: Option<PeriodicTask>,
}

impl<H: HistorySource> SyncEngine<H> {
    /// Creates an engine and the handle used to command it.
    #[must_use]
    pub fn new(config: &AppConfig, history: H) -> (Self, EngineHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (channel_tx, channel_events) = mpsc::unbounded_channel();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();

        let engine = Self {
            websocket_url: config.channel.websocket_url.clone(),
            history_limit: config.history.limit,
            backfill_limit: config.history.backfill_limit,
            flush_interval: config.render.flush_interval,
            history,
            pool: ChannelPool::new(config.channel.settings(), channel_tx),
            channel: None,
            connection: ConnectionState::Disconnected,
            registry: SubscriptionRegistry::new(),
            buffer: UpdateBuffer::new(),
            tracker: BarTracker::new(),
            views: HashMap::new(),
            consumers: HashMap::new(),
            next_consumer: 0,
            next_generation: 0,
            commands,
            channel_events,
            inbox_tx,
            inbox,
            scheduler: None,
        };

        (engine, EngineHandle::new(command_tx))
    }

    /// Runs the event loop until shutdown.
    pub async fn run(mut self) {
        self.scheduler = Some(PeriodicTask::ticker(
            self.flush_interval,
            self.inbox_tx.clone(),
            || EngineMessage::Flush,
        ));
        info!(
            flush_ms = self.flush_interval.as_millis() as u64,
            "Sync engine started"
        );

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(event) = self.channel_events.recv() => self.handle_channel_event(event),
                Some(message) = self.inbox.recv() => match message {
                    EngineMessage::Flush => {
                        self.flush();
                    }
                    EngineMessage::Fetched(outcome) => {
                        self.handle_fetched(outcome);
                    }
                },
            }
        }

        self.teardown();
        info!("Sync engine stopped");
    }

    /// Stops the render scheduler and closes every channel. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.cancel();
        }
        self.channel = None;
        self.pool.close_all();
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::OpenView { topic, reply } => {
                let subscription = self.open_view(topic);
                if let Err(subscription) = reply.send(subscription) {
                    self.close_consumer(subscription.id);
                }
            }
            EngineCommand::CloseView { consumer } => self.close_consumer(consumer),
            EngineCommand::SwitchTopic { consumer, from, to } => {
                self.switch_topic(consumer, &from, to);
            }
            EngineCommand::GoLive { topic } => {
                self.go_live(&topic);
            }
            EngineCommand::LoadHistorical { topic, end } => {
                self.load_historical(&topic, end);
            }
            EngineCommand::Shutdown => {}
        }
    }

    // -- Views and consumers --

    /// Registers a new consumer and attaches it to `topic`.
    pub fn open_view(&mut self, topic: Topic) -> ViewSubscription {
        self.next_consumer += 1;
        let id = ConsumerId(self.next_consumer);
        let (tx, events) = mpsc::unbounded_channel();
        let _ = tx.send(ViewEvent::Connection(self.connection));
        self.consumers.insert(id, tx);

        self.attach(id, topic);
        ViewSubscription { id, events }
    }

    /// Detaches `consumer` from every topic and forgets it.
    pub fn close_consumer(&mut self, consumer: ConsumerId) {
        for topic in self.registry.topics_of(consumer) {
            self.detach(consumer, &topic);
        }
        self.consumers.remove(&consumer);
        debug!(%consumer, "Consumer closed");
    }

    /// Moves `consumer` from `from` to `to`, discarding `from`'s view when
    /// nobody else watches it.
    pub fn switch_topic(
        &mut self,
        consumer: ConsumerId,
        from: &Topic,
        to: Topic,
    ) -> Option<FetchTicket> {
        if *from == to {
            return None;
        }
        info!(%consumer, %from, %to, "Switching topic");
        // Attach first so the shared channel is never released in between.
        let ticket = self.attach(consumer, to);
        self.detach(consumer, from);
        ticket
    }

    /// Returns the issued seed fetch when this creates the topic's view.
    fn attach(&mut self, consumer: ConsumerId, topic: Topic) -> Option<FetchTicket> {
        if !self.registry.subscribe(&topic, consumer) {
            // Existing view: the consumer gets it on the next flush.
            self.buffer.touch(topic);
            return None;
        }

        let channel = match &self.channel {
            Some(channel) => channel.clone(),
            None => {
                let channel = self.pool.acquire(&self.websocket_url);
                self.channel = Some(channel.clone());
                channel
            }
        };
        channel.subscribe(vec![topic.clone()]);
        channel.open();

        self.views.insert(topic.clone(), View::new(topic.clone()));
        self.buffer.touch(topic.clone());
        self.issue_fetch(&topic, FetchKind::Seed)
    }

    fn detach(&mut self, consumer: ConsumerId, topic: &Topic) {
        if !self.registry.unsubscribe(topic, consumer) {
            return;
        }

        self.views.remove(topic);
        self.tracker.forget(topic);
        self.buffer.discard(topic);
        if let Some(channel) = &self.channel {
            channel.unsubscribe(vec![topic.clone()]);
        }

        if self.registry.is_empty() && self.channel.take().is_some() {
            self.pool.release(&self.websocket_url);
        }
    }

    pub fn snapshot(&self, topic: &Topic) -> Option<&ViewSnapshot> {
        self.views.get(topic).map(|v| &v.snapshot)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    // -- Mode --

    /// Explicit user action: return `topic` to live mode and reload.
    pub fn go_live(&mut self, topic: &Topic) -> Option<FetchTicket> {
        let effects = self.drive_mode(topic, &ModeEvent::LiveRequested);
        let cap = self.history_limit as usize;
        if let Some(view) = self.views.get_mut(topic) {
            view.restore_live(cap);
            self.buffer.touch(topic.clone());
        }
        self.apply_fetch_effects(topic, effects)
    }

    /// Explicit user action: freeze `topic` on bars ending at `end`.
    pub fn load_historical(&mut self, topic: &Topic, end: String) -> Option<FetchTicket> {
        let effects = self.drive_mode(topic, &ModeEvent::HistoricalRequested { end });
        if self.views.contains_key(topic) {
            self.buffer.touch(topic.clone());
        }
        self.apply_fetch_effects(topic, effects)
    }

    fn drive_mode(&mut self, topic: &Topic, event: &ModeEvent) -> Vec<ModeEffect> {
        let Some(view) = self.views.get_mut(topic) else {
            return Vec::new();
        };
        let (next, effects) = mode::transition(view.snapshot.mode, event);
        if next != view.snapshot.mode {
            info!(%topic, from = ?view.snapshot.mode, to = ?next, "View mode changed");
            view.snapshot.mode = next;
        }
        effects
    }

    fn apply_fetch_effects(&mut self, topic: &Topic, effects: Vec<ModeEffect>) -> Option<FetchTicket> {
        let mut ticket = None;
        for effect in effects {
            if let ModeEffect::Fetch(kind) = effect {
                ticket = self.issue_fetch(topic, kind);
            }
        }
        ticket
    }

    // -- Historical fetches --

    /// Spawns a historical query whose result comes back through the inbox.
    ///
    /// Seed, latest and historical fetches take a new generation and so
    /// supersede every earlier fetch for the topic. A backfill reuses the
    /// current generation, so any newer user-driven fetch invalidates it.
    /// A page that lands after pushes or a backfill under its own generation
    /// keeps those periods instead of overwriting them.
    fn issue_fetch(&mut self, topic: &Topic, kind: FetchKind) -> Option<FetchTicket> {
        let view = self.views.get_mut(topic)?;
        let generation = match kind {
            FetchKind::Backfill => view.generation,
            _ => {
                self.next_generation += 1;
                view.begin_generation(self.next_generation);
                self.next_generation
            }
        };

        let request = match &kind {
            FetchKind::Historical { end } => {
                HistoryRequest::ending_at(topic.clone(), self.history_limit, end.clone())
            }
            FetchKind::Backfill => HistoryRequest::latest(topic.clone(), self.backfill_limit),
            FetchKind::Seed | FetchKind::Latest => {
                HistoryRequest::latest(topic.clone(), self.history_limit)
            }
        };

        let ticket = FetchTicket {
            topic: topic.clone(),
            generation,
            kind,
        };
        debug!(%topic, generation, kind = ?ticket.kind, "Issuing historical fetch");

        let source = self.history.clone();
        let inbox = self.inbox_tx.clone();
        let tagged = ticket.clone();
        tokio::spawn(async move {
            let result = source.fetch(request).await;
            let _ = inbox.send(EngineMessage::Fetched(FetchOutcome {
                ticket: tagged,
                result,
            }));
        });

        Some(ticket)
    }

    /// Applies a fetch result. Returns `false` if it was stale and dropped.
    pub fn handle_fetched(&mut self, outcome: FetchOutcome) -> bool {
        let FetchOutcome { ticket, result } = outcome;
        let topic = &ticket.topic;

        let current = self.views.get(topic).map(|v| v.generation);
        if current != Some(ticket.generation) {
            debug!(
                %topic,
                generation = ticket.generation,
                current = ?current,
                "Discarding superseded fetch result"
            );
            return false;
        }

        match result {
            Ok(page) => {
                let effects = self.drive_mode(topic, &ModeEvent::Loaded(ticket.kind.clone()));
                self.apply_page(topic, page, effects);
            }
            Err(e) => {
                warn!(%topic, kind = ?ticket.kind, "Historical fetch failed: {e}");
                let effects = self.drive_mode(topic, &ModeEvent::LoadFailed(ticket.kind.clone()));
                if effects.contains(&ModeEffect::ReportError) {
                    self.notify(
                        topic,
                        ViewEvent::FetchFailed {
                            topic: topic.clone(),
                            message: e.to_string(),
                        },
                    );
                }
            }
        }
        true
    }

    fn apply_page(&mut self, topic: &Topic, page: HistoryPage, effects: Vec<ModeEffect>) {
        let cap = self.history_limit as usize;
        let Some(view) = self.views.get_mut(topic) else {
            return;
        };

        let mut changed = false;
        let mut bars = Some(page.data);
        for effect in effects {
            match effect {
                ModeEffect::ReplaceBars => {
                    view.replace_with_page(bars.take().unwrap_or_default(), cap);
                    if view.snapshot.mode == ViewMode::Live {
                        view.restore_live(cap);
                    } else {
                        view.snapshot.logs.clear();
                    }
                    changed = true;
                }
                ModeEffect::MergeBackfill => {
                    view.merge_backfill(bars.take().unwrap_or_default(), cap);
                    changed = true;
                }
                _ => {}
            }
        }

        if changed {
            self.buffer.touch(topic.clone());
        }
    }

    // -- Push channel --

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::StateChanged(state) => {
                info!(state = ?state, "Push channel state changed");
                self.connection = state;
                if state == ConnectionState::Disconnected {
                    self.registry.reset_acknowledged();
                }
                for tx in self.consumers.values() {
                    let _ = tx.send(ViewEvent::Connection(state));
                }
            }
            ChannelEvent::Subscribed(topics) => self.registry.mark_acknowledged(&topics),
            ChannelEvent::Unsubscribed(topics) => debug!(?topics, "Unsubscribe confirmed"),
            ChannelEvent::Message(event) => self.handle_server_event(event),
        }
    }

    pub fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Ticks { data } => {
                for (key, tick) in decode_ticks(data) {
                    let topics = self.registry.route_tick(&key);
                    if topics.is_empty() {
                        debug!(key, "Dropping tick for unwatched instrument");
                    }
                    for topic in topics {
                        self.buffer.ingest(topic, tick.clone());
                    }
                }
            }
            ServerEvent::CalculatedValues {
                mut data,
                is_forming,
                topic,
            } => {
                if let Some(forming) = is_forming {
                    data.forming = forming;
                }
                let explicit = match topic {
                    Some(raw) => parse_topic(&raw),
                    None => Ok(data.topic()),
                };
                if let Some(topic) = self.route(explicit, "calculated_values") {
                    self.apply_bar(&topic, data);
                }
            }
            ServerEvent::TradeLog { logs, topic } => {
                let explicit = topic.as_deref().map(parse_topic).transpose().map(Option::flatten);
                if let Some(topic) = self.route(explicit, "trade_log") {
                    self.apply_logs(&topic, &logs);
                }
            }
            ServerEvent::Error { message } => warn!(error = %message, "Server reported an error"),
            ServerEvent::Pong => debug!("Received pong"),
        }
    }

    fn route(&self, explicit: Result<Option<Topic>, ()>, kind: &str) -> Option<Topic> {
        let Ok(explicit) = explicit else {
            warn!(kind, "Dropping message with an unreadable topic");
            return None;
        };
        let routed = self.registry.route(explicit.as_ref());
        if routed.is_none() {
            warn!(kind, topic = ?explicit, "Dropping unroutable message");
        }
        routed
    }

    /// Runs rollover detection, then applies the bar if the view is live.
    fn apply_bar(&mut self, topic: &Topic, bar: Bar) {
        for event in self.tracker.observe(topic, &bar) {
            if let PeriodEvent::RolledOver { .. } = event {
                if let Some(view) = self.views.get_mut(topic) {
                    view.live_logs.clear();
                }
                let effects = self.drive_mode(topic, &ModeEvent::RolledOver);
                self.apply_fetch_effects(topic, effects);
            }
        }

        let effects = self.drive_mode(topic, &ModeEvent::BarPushed);
        let cap = self.history_limit as usize;
        let Some(view) = self.views.get_mut(topic) else {
            return;
        };
        view.live_bar = Some(bar.clone());
        if effects.contains(&ModeEffect::ApplyPush) {
            view.live_periods.insert(bar.timestamp.clone());
            view.snapshot.upsert_bar(bar, cap);
            view.snapshot.logs = view.live_logs.clone();
            if view.snapshot.tick.is_none() {
                view.snapshot.tick = view.live_tick.clone();
            }
            self.buffer.touch(topic.clone());
        }
    }

    fn apply_logs(&mut self, topic: &Topic, logs: &[LogEntry]) {
        let effects = self.drive_mode(topic, &ModeEvent::Push);
        let Some(view) = self.views.get_mut(topic) else {
            return;
        };
        view.live_logs = merge(&view.live_logs, logs);
        if effects.contains(&ModeEffect::ApplyPush) && view.snapshot.logs != view.live_logs {
            view.snapshot.logs = view.live_logs.clone();
            self.buffer.touch(topic.clone());
        }
    }

    // -- Rendering --

    /// Drains the buffer and delivers one snapshot per changed topic.
    ///
    /// Returns the number of topics delivered; zero means nothing was sent.
    pub fn flush(&mut self) -> usize {
        let Some(flushed) = self.buffer.flush() else {
            return 0;
        };

        let mut changed: BTreeSet<Topic> = flushed.touched;
        for (topic, tick) in flushed.ticks {
            let effects = self.drive_mode(&topic, &ModeEvent::Push);
            let Some(view) = self.views.get_mut(&topic) else {
                continue;
            };
            view.live_tick = Some(tick.clone());
            if effects.contains(&ModeEffect::ApplyPush) {
                view.snapshot.tick = Some(tick);
                changed.insert(topic);
            }
        }

        let mut delivered = 0;
        let mut gone = Vec::new();
        for topic in &changed {
            let Some(view) = self.views.get(topic) else {
                continue;
            };
            let snapshot = Arc::new(view.snapshot.clone());
            for consumer in self.registry.consumers(topic) {
                let sent = self
                    .consumers
                    .get(&consumer)
                    .is_some_and(|tx| tx.send(ViewEvent::Snapshot(snapshot.clone())).is_ok());
                if !sent {
                    gone.push(consumer);
                }
            }
            delivered += 1;
        }

        for consumer in gone {
            debug!(%consumer, "Consumer stopped listening");
            self.close_consumer(consumer);
        }
        delivered
    }

    fn notify(&self, topic: &Topic, event: ViewEvent) {
        for consumer in self.registry.consumers(topic) {
            if let Some(tx) = self.consumers.get(&consumer) {
                let _ = tx.send(event.clone());
            }
        }
    }
}

fn parse_topic(raw: &str) -> Result<Option<Topic>, ()> {
    raw.parse::<Topic>().map(Some).map_err(|e| {
        debug!(raw, "Unreadable topic: {e}");
    })
}
