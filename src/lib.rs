//! Real-time market-data synchronization engine.
//!
//! Keeps per-topic views of bars, ticks, and trade logs in step with a
//! push channel and a historical query service. Pushes are coalesced and
//! delivered to consumers as immutable snapshots at a fixed render cadence.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod merge;
pub mod mode;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod tracker;
pub mod websocket;

pub use engine::{EngineHandle, SyncEngine, ViewEvent, ViewSnapshot};
pub use error::{MeridianError, Result};
