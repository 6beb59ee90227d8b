//! Cancellable fixed-cadence task.
//!
//! The render cadence is configuration: the engine spawns one
//! [`PeriodicTask`] that posts a flush message every interval, and the task
//! stops when cancelled, when dropped, or when its receiver goes away.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A spawned task that runs a callback at a fixed interval.
#[derive(Debug)]
pub struct PeriodicTask {
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawns `on_tick` every `period`, starting one period from now.
    ///
    /// The task ends on its own once `on_tick` returns `false`.
    pub fn spawn<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // Slow consumers get fewer flushes, not a burst of catch-up ones.
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                interval.tick().await;
                if !on_tick() {
                    break;
                }
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Spawns a task that sends `make()` down `tx` every `period`.
    pub fn ticker<T, F>(period: Duration, tx: mpsc::UnboundedSender<T>, make: F) -> Self
    where
        T: Send + 'static,
        F: Fn() -> T + Send + 'static,
    {
        Self::spawn(period, move || tx.send(make()).is_ok())
    }

    /// Stops the task. Returns `true` only for the call that stopped it.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                debug!("Periodic task cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
