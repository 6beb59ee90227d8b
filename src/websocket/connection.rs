//! Push-channel connection lifecycle management.
//!
//! [`ChannelConnection`] is the handle the engine talks to. `open()` spawns
//! a driver task that connects, replays every desired subscription, reads
//! messages, and reconnects after a delay whenever the socket fails, with
//! no retry limit.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tungstenite::Message as WsMessage;

use super::{WsReader, WsWriter, connect, handler, ping, send_control, subscribe, unsubscribe};
use crate::models::{ControlRequest, ServerEvent, Topic};

/// Upper bound for the exponential reconnect policy.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Socket state as seen by every other component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// How long to wait before the next connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// The same delay before every attempt.
    Fixed(Duration),
    /// Doubling delay starting at `initial`, capped at 60 seconds.
    Exponential { initial: Duration },
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Exponential { initial } => {
                let factor = 1u32 << attempt.saturating_sub(1).min(16);
                initial.saturating_mul(factor).min(MAX_BACKOFF)
            }
        }
    }
}

/// Tunables shared by every connection a pool creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    pub reconnect: ReconnectPolicy,
    pub ping_interval: Duration,
}

/// Notifications from a connection to its owner.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A subscribe request for these topics was written to the socket.
    Subscribed(Vec<Topic>),
    /// An unsubscribe request for these topics was written to the socket.
    Unsubscribed(Vec<Topic>),
    /// A decoded server event.
    Message(ServerEvent),
}

/// Commands sent from the handle to the driver task.
enum DriverCommand {
    Subscribe(Vec<Topic>),
    Unsubscribe(Vec<Topic>),
    Send(ControlRequest),
    ReconnectNow,
    /// Write everything queued before this, then close the socket.
    Shutdown,
}

/// Why the reader loop exited.
enum DisconnectReason {
    /// The connection was lost or errored.
    ConnectionError,
    /// The handle was closed or the owner stopped listening.
    Shutdown,
}

struct Driver {
    commands: mpsc::UnboundedSender<DriverCommand>,
    handle: JoinHandle<()>,
}

/// Handle to one push-channel socket.
pub struct ChannelConnection {
    url: String,
    settings: ChannelSettings,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    /// Incremented on every `open()`/`close()`; a driver only publishes state
    /// while its own epoch is current.
    epoch: Arc<AtomicU64>,
    desired: Mutex<BTreeSet<Topic>>,
    driver: Mutex<Option<Driver>>,
}

impl ChannelConnection {
    /// Creates a closed connection. Nothing happens until [`open`](Self::open).
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        settings: ChannelSettings,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: url.into(),
            settings,
            events,
            state: Arc::new(state),
            epoch: Arc::new(AtomicU64::new(0)),
            desired: Mutex::new(BTreeSet::new()),
            driver: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Topics that will be replayed on the next successful connect.
    pub fn desired_topics(&self) -> Vec<Topic> {
        self.desired.lock().iter().cloned().collect()
    }

    /// Starts connecting unless a driver is already running.
    ///
    /// While a driver is waiting out its reconnect delay, `open()` cuts the
    /// wait short. While an attempt is in flight it does nothing.
    pub fn open(&self) {
        let mut driver = self.driver.lock();

        if let Some(running) = driver.as_ref()
            && !running.handle.is_finished()
        {
            if self.state() == ConnectionState::Disconnected {
                let _ = running.commands.send(DriverCommand::ReconnectNow);
            } else {
                debug!(url = %self.url, "Connection attempt already in flight");
            }
            return;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = DriverTask {
            url: self.url.clone(),
            settings: self.settings,
            events: self.events.clone(),
            state: self.state.clone(),
            epoch: self.epoch.clone(),
            my_epoch: epoch,
            commands: command_rx,
            desired: self.desired.lock().clone(),
        };
        task.publish(ConnectionState::Connecting);

        let handle = tokio::spawn(task.run());
        *driver = Some(Driver { commands, handle });
    }

    /// Adds topics to the desired set, sending the request if connected.
    pub fn subscribe(&self, topics: Vec<Topic>) {
        self.desired.lock().extend(topics.iter().cloned());
        self.command(DriverCommand::Subscribe(topics));
    }

    /// Removes topics from the desired set, sending the request if connected.
    pub fn unsubscribe(&self, topics: Vec<Topic>) {
        {
            let mut desired = self.desired.lock();
            for topic in &topics {
                desired.remove(topic);
            }
        }
        self.command(DriverCommand::Unsubscribe(topics));
    }

    /// Sends a control message. Dropped with a warning unless connected.
    pub fn send(&self, request: ControlRequest) {
        if self.state() != ConnectionState::Connected {
            warn!(url = %self.url, action = ?request.action, "Not connected, dropping message");
            return;
        }
        self.command(DriverCommand::Send(request));
    }

    /// Stops the driver and drops the socket. Safe to call repeatedly.
    ///
    /// A connected driver first writes the requests already queued, such as
    /// a final unsubscribe, and then closes the socket. Any other driver is
    /// stopped at once.
    pub fn close(&self) {
        let Some(driver) = self.driver.lock().take() else {
            return;
        };
        if self.state() == ConnectionState::Connected {
            if driver.commands.send(DriverCommand::Shutdown).is_err() {
                driver.handle.abort();
            }
        } else {
            driver.handle.abort();
        }

        self.epoch.fetch_add(1, Ordering::SeqCst);
        let changed = self.state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        });
        if changed {
            let _ = self
                .events
                .send(ChannelEvent::StateChanged(ConnectionState::Disconnected));
        }
        info!(url = %self.url, "Push channel closed");
    }

    fn command(&self, command: DriverCommand) {
        if let Some(driver) = self.driver.lock().as_ref() {
            let _ = driver.commands.send(command);
        }
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.handle.abort();
        }
    }
}

/// State owned by the spawned driver.
struct DriverTask {
    url: String,
    settings: ChannelSettings,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    epoch: Arc<AtomicU64>,
    my_epoch: u64,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    desired: BTreeSet<Topic>,
}

impl DriverTask {
    /// Runs the connection loop until the handle closes it.
    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            if self.is_stale() {
                return;
            }
            self.publish(ConnectionState::Connecting);
            info!(url = %self.url, attempt, "Connecting to push channel");

            match connect(&self.url).await {
                Ok((mut write, read)) => {
                    attempt = 0;
                    self.publish(ConnectionState::Connected);

                    if let Err(e) = self.replay(&mut write).await {
                        warn!("Replaying subscriptions failed: {e}");
                    } else if let DisconnectReason::Shutdown = self.read_loop(write, read).await {
                        info!(url = %self.url, "Push channel driver shutting down");
                        return;
                    }
                }
                Err(e) => {
                    error!(url = %self.url, "Connection failed: {e}");
                }
            }

            self.publish(ConnectionState::Disconnected);
            attempt = attempt.saturating_add(1);
            let delay = self.settings.reconnect.delay(attempt);
            info!(delay_ms = delay.as_millis() as u64, "Connection lost, waiting to reconnect");

            if let DisconnectReason::Shutdown = self.wait(delay).await {
                return;
            }
        }
    }

    /// Pings and resubscribes every desired topic on a fresh socket.
    async fn replay(&mut self, write: &mut WsWriter) -> crate::Result<()> {
        ping(write).await?;

        if !self.desired.is_empty() {
            let topics: Vec<Topic> = self.desired.iter().cloned().collect();
            subscribe(write, &topics).await?;
            self.emit(ChannelEvent::Subscribed(topics));
        }

        Ok(())
    }

    /// Reads messages and serves commands until the socket fails or the
    /// handle goes away.
    async fn read_loop(&mut self, mut write: WsWriter, mut read: WsReader) -> DisconnectReason {
        let mut keepalive = tokio::time::interval(self.settings.ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            match handler::parse_server_event(&text) {
                                Ok(event) => {
                                    if !self.emit(ChannelEvent::Message(event)) {
                                        return DisconnectReason::Shutdown;
                                    }
                                }
                                Err(e) => warn!("Dropping unreadable message: {e}"),
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            warn!(?frame, "Server closed the push channel");
                            return DisconnectReason::ConnectionError;
                        }
                        Some(Ok(_)) => {} // Binary/Ping/Pong frames
                        Some(Err(e)) => {
                            warn!("WebSocket error: {e}");
                            return DisconnectReason::ConnectionError;
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return DisconnectReason::ConnectionError;
                        }
                    }
                }

                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        return DisconnectReason::Shutdown;
                    };
                    if let DriverCommand::Shutdown = cmd {
                        if let Err(e) = write.close().await {
                            debug!("Closing push channel socket failed: {e}");
                        }
                        return DisconnectReason::Shutdown;
                    }
                    if let Err(e) = self.execute(&mut write, cmd).await {
                        warn!("Write to push channel failed: {e}");
                        return DisconnectReason::ConnectionError;
                    }
                }

                _ = keepalive.tick() => {
                    if let Err(e) = ping(&mut write).await {
                        warn!("Ping failed: {e}");
                        return DisconnectReason::ConnectionError;
                    }
                }
            }
        }
    }

    async fn execute(&mut self, write: &mut WsWriter, cmd: DriverCommand) -> crate::Result<()> {
        match cmd {
            DriverCommand::Subscribe(topics) => {
                self.desired.extend(topics.iter().cloned());
                subscribe(write, &topics).await?;
                self.emit(ChannelEvent::Subscribed(topics));
            }
            DriverCommand::Unsubscribe(topics) => {
                for topic in &topics {
                    self.desired.remove(topic);
                }
                unsubscribe(write, &topics).await?;
                self.emit(ChannelEvent::Unsubscribed(topics));
            }
            DriverCommand::Send(request) => send_control(write, &request).await?,
            DriverCommand::ReconnectNow | DriverCommand::Shutdown => {}
        }
        Ok(())
    }

    /// Sleeps out the reconnect delay while still tracking subscription
    /// changes, so the next replay is current.
    async fn wait(&mut self, delay: Duration) -> DisconnectReason {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return DisconnectReason::ConnectionError,
                cmd = self.commands.recv() => match cmd {
                    Some(DriverCommand::Subscribe(topics)) => self.desired.extend(topics),
                    Some(DriverCommand::Unsubscribe(topics)) => {
                        for topic in &topics {
                            self.desired.remove(topic);
                        }
                    }
                    Some(DriverCommand::Send(request)) => {
                        debug!(action = ?request.action, "Dropping message while disconnected");
                    }
                    Some(DriverCommand::ReconnectNow) => {
                        return DisconnectReason::ConnectionError;
                    }
                    Some(DriverCommand::Shutdown) | None => return DisconnectReason::Shutdown,
                },
            }
        }
    }

    /// Publishes a state change if this driver is still the current one.
    fn publish(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != self.my_epoch || *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            debug!(url = %self.url, state = ?next, "Connection state changed");
            self.emit(ChannelEvent::StateChanged(next));
        }
    }

    /// Forwards an event to the owner. Returns `false` once nobody listens.
    ///
    /// A driver draining after `close()` forwards nothing.
    fn emit(&self, event: ChannelEvent) -> bool {
        if self.is_stale() {
            return true;
        }
        self.events.send(event).is_ok()
    }

    /// Whether the handle has moved on to a newer driver or closed.
    fn is_stale(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != self.my_epoch
    }
}
