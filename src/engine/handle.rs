//! Commands into the engine task and events out of it.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::view::ViewSnapshot;
use crate::error::MeridianError;
use crate::models::Topic;
use crate::registry::ConsumerId;
use crate::websocket::ConnectionState;
use crate::Result;

/// What a consumer receives from the engine.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    /// The topic's state after a flush.
    Snapshot(Arc<ViewSnapshot>),
    /// The push channel changed state.
    Connection(ConnectionState),
    /// A historical fetch failed; the snapshot is unchanged and the request
    /// may be retried.
    FetchFailed { topic: Topic, message: String },
}

/// A consumer's registration and its event stream.
#[derive(Debug)]
pub struct ViewSubscription {
    pub id: ConsumerId,
    pub events: mpsc::UnboundedReceiver<ViewEvent>,
}

/// Requests handled by the engine loop.
#[derive(Debug)]
pub enum EngineCommand {
    OpenView {
        topic: Topic,
        reply: oneshot::Sender<ViewSubscription>,
    },
    CloseView {
        consumer: ConsumerId,
    },
    SwitchTopic {
        consumer: ConsumerId,
        from: Topic,
        to: Topic,
    },
    GoLive {
        topic: Topic,
    },
    LoadHistorical {
        topic: Topic,
        end: String,
    },
    Shutdown,
}

/// Cloneable front end to a running [`SyncEngine`](super::SyncEngine).
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { commands }
    }

    /// Opens a view on `topic` for a new consumer.
    ///
    /// # Errors
    ///
    /// Returns [`MeridianError::EngineClosed`] if the engine has stopped.
    pub async fn open_view(&self, topic: Topic) -> Result<ViewSubscription> {
        let (reply, response) = oneshot::channel();
        self.send(EngineCommand::OpenView { topic, reply })?;
        response.await.map_err(|_| MeridianError::EngineClosed)
    }

    /// Detaches a consumer from every topic it watches.
    ///
    /// # Errors
    ///
    /// Returns [`MeridianError::EngineClosed`] if the engine has stopped.
    pub fn close_view(&self, consumer: ConsumerId) -> Result<()> {
        self.send(EngineCommand::CloseView { consumer })
    }

    /// Moves a consumer from one topic to another.
    ///
    /// # Errors
    ///
    /// Returns [`MeridianError::EngineClosed`] if the engine has stopped.
    pub fn switch_topic(&self, consumer: ConsumerId, from: Topic, to: Topic) -> Result<()> {
        self.send(EngineCommand::SwitchTopic { consumer, from, to })
    }

    /// Returns a view to live mode and reloads its most recent bars.
    ///
    /// # Errors
    ///
    /// Returns [`MeridianError::EngineClosed`] if the engine has stopped.
    pub fn go_live(&self, topic: Topic) -> Result<()> {
        self.send(EngineCommand::GoLive { topic })
    }

    /// Freezes a view on the bars ending at `end`.
    ///
    /// # Errors
    ///
    /// Returns [`MeridianError::EngineClosed`] if the engine has stopped.
    pub fn load_historical(&self, topic: Topic, end: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::LoadHistorical {
            topic,
            end: end.into(),
        })
    }

    /// Stops the engine loop. Further commands fail with `EngineClosed`.
    pub fn shutdown(&self) {
        let _ = self.commands.send(EngineCommand::Shutdown);
    }

    fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| MeridianError::EngineClosed)
    }
}
