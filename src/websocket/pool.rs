//! Shared push-channel connections keyed by URL.
//!
//! Every view that needs a channel leases it from the pool. The first lease
//! creates the connection; releasing the last lease closes it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::connection::{ChannelConnection, ChannelEvent, ChannelSettings};

struct PoolEntry {
    connection: Arc<ChannelConnection>,
    leases: usize,
}

/// Reference-counted registry of open channels.
pub struct ChannelPool {
    settings: ChannelSettings,
    events: mpsc::UnboundedSender<ChannelEvent>,
    channels: HashMap<String, PoolEntry>,
}

impl ChannelPool {
    /// Creates an empty pool whose connections report to `events`.
    #[must_use]
    pub fn new(settings: ChannelSettings, events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            settings,
            events,
            channels: HashMap::new(),
        }
    }

    /// Returns the shared connection for `url`, creating it on first use.
    ///
    /// The connection is not opened here; the caller decides when.
    pub fn acquire(&mut self, url: &str) -> Arc<ChannelConnection> {
        let entry = self.channels.entry(url.to_string()).or_insert_with(|| {
            info!(url, "Creating push channel");
            PoolEntry {
                connection: Arc::new(ChannelConnection::new(
                    url,
                    self.settings,
                    self.events.clone(),
                )),
                leases: 0,
            }
        });
        entry.leases += 1;
        debug!(url, leases = entry.leases, "Push channel leased");

        entry.connection.clone()
    }

    /// Gives back one lease. Returns `true` if this closed the connection.
    pub fn release(&mut self, url: &str) -> bool {
        let Some(entry) = self.channels.get_mut(url) else {
            return false;
        };

        entry.leases = entry.leases.saturating_sub(1);
        if entry.leases > 0 {
            return false;
        }

        if let Some(entry) = self.channels.remove(url) {
            entry.connection.close();
        }
        info!(url, "Last lease released, push channel closed");
        true
    }

    pub fn leases(&self, url: &str) -> usize {
        self.channels.get(url).map_or(0, |e| e.leases)
    }

    /// Closes every connection regardless of outstanding leases.
    pub fn close_all(&mut self) {
        for (_, entry) in self.channels.drain() {
            entry.connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::websocket::connection::ReconnectPolicy;

    fn pool() -> ChannelPool {
        let (tx, _rx) = mpsc::unbounded_channel();
        ChannelPool::new(
            ChannelSettings {
                reconnect: ReconnectPolicy::Fixed(Duration::from_secs(3)),
                ping_interval: Duration::from_secs(30),
            },
            tx,
        )
    }

    #[test]
    fn same_url_shares_one_connection() {
        let mut pool = pool();

        let a = pool.acquire("ws://feed/ws");
        let b = pool.acquire("ws://feed/ws");
        let other = pool.acquire("ws://other/ws");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(pool.leases("ws://feed/ws"), 2);
    }

    #[test]
    fn closes_only_when_last_lease_is_released() {
        let mut pool = pool();
        pool.acquire("ws://feed/ws");
        pool.acquire("ws://feed/ws");

        assert!(!pool.release("ws://feed/ws"));
        assert!(pool.release("ws://feed/ws"));
        assert!(!pool.release("ws://feed/ws"));
        assert_eq!(pool.leases("ws://feed/ws"), 0);
    }

    #[test]
    fn reacquire_after_close_creates_a_fresh_connection() {
        let mut pool = pool();
        let first = pool.acquire("ws://feed/ws");
        pool.release("ws://feed/ws");

        let second = pool.acquire("ws://feed/ws");
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
