//! Live streaming-connection registry with idle eviction.
//!
//! Every open stream response registers here; each delivered chunk
//! refreshes the record. A periodic sweep cancels connections whose last
//! byte is older than the idle timeout — cancelling the token tears down
//! the reader and its prefetches at the next block boundary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::ConnectionStats;

pub struct ConnectionRecord {
    started_at_unix: u64,
    last_byte_at: tokio::time::Instant,
    bytes_served: u64,
    cancel: CancellationToken,
}

pub struct ConnectionTracker {
    connections: DashMap<(i64, SocketAddr), ConnectionRecord>,
    idle_timeout: Duration,
}

impl ConnectionTracker {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            idle_timeout,
        }
    }

    /// Track a new streaming connection. The returned token is cancelled
    /// when the sweep decides the connection is idle.
    pub fn register(&self, chat_id: i64, remote: SocketAddr) -> CancellationToken {
        let cancel = CancellationToken::new();
        let started_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.connections.insert(
            (chat_id, remote),
            ConnectionRecord {
                started_at_unix,
                last_byte_at: tokio::time::Instant::now(),
                bytes_served: 0,
                cancel: cancel.clone(),
            },
        );
        debug!(chat_id, %remote, "stream connection opened");
        cancel
    }

    /// Refresh the record after delivering `n` bytes.
    pub fn record_bytes(&self, chat_id: i64, remote: SocketAddr, n: u64) {
        if let Some(mut record) = self.connections.get_mut(&(chat_id, remote)) {
            record.last_byte_at = tokio::time::Instant::now();
            record.bytes_served += n;
        }
    }

    pub fn deregister(&self, chat_id: i64, remote: SocketAddr) {
        if self.connections.remove(&(chat_id, remote)).is_some() {
            debug!(chat_id, %remote, "stream connection closed");
        }
    }

    /// Cancel and drop every connection idle longer than the timeout.
    /// Returns how many were evicted.
    pub fn sweep_idle(&self) -> usize {
        let mut evicted = 0;
        self.connections.retain(|(chat_id, remote), record| {
            if record.last_byte_at.elapsed() > self.idle_timeout {
                record.cancel.cancel();
                info!(chat_id = *chat_id, remote = %remote, "evicting idle stream connection");
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Aggregated stats for one chat.
    pub fn stats(&self, chat_id: i64) -> ConnectionStats {
        let mut stats = ConnectionStats::default();
        for entry in self.connections.iter() {
            let (id, _) = entry.key();
            if *id != chat_id {
                continue;
            }
            stats.active_connections += 1;
            stats.bytes_served += entry.bytes_served;
            stats.oldest_started_at = Some(
                stats
                    .oldest_started_at
                    .map_or(entry.started_at_unix, |oldest| {
                        oldest.min(entry.started_at_unix)
                    }),
            );
        }
        stats
    }

    /// Periodic sweep; runs until the process exits.
    pub fn spawn_cleanup(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_idle();
            }
        })
    }
}
