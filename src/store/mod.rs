//! Stream store module
//!
//! The Publisher/Subscriber Adapter: a narrow key/value + pub/sub interface
//! that isolates the stream registry from the concrete backing store. The
//! production implementation is Redis; an in-memory implementation backs the
//! integration tests.

pub mod in_memory;
pub mod redis;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppResult;

pub use self::in_memory::InMemoryStreamStore;
pub use self::redis::RedisStreamStore;

/// A live pub/sub subscription.
///
/// Push-based delivery from the store is bridged into a bounded queue the
/// consumer pulls from. The pump task awaits when the queue is full rather
/// than dropping messages. Dropping the subscription aborts the pump, which
/// unsubscribes from the channel.
pub struct Subscription {
    rx: mpsc::Receiver<String>,
    pump: JoinHandle<()>,
}

impl Subscription {
    /// Wrap a receiver and its pump task
    pub(crate) fn new(rx: mpsc::Receiver<String>, pump: JoinHandle<()>) -> Self {
        Self { rx, pump }
    }

    /// Receive the next message published on the channel, in publish order.
    ///
    /// Returns `None` when the subscription has been closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Explicitly tear down the subscription
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Key/value + pub/sub contract required by the stream registry.
///
/// Every operation may fail with a connectivity error; the registry treats
/// failure as "durability unavailable" and keeps serving the live connection.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Fan a message out to current subscribers of `channel`. No persistence.
    async fn publish(&self, channel: &str, message: &str) -> AppResult<()>;

    /// Set a key, optionally with an expiry in seconds
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> AppResult<()>;

    /// Get a key; `None` means missing or expired
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Atomically increment a counter, returning the new value.
    ///
    /// Creates the key without an expiry; pair with [`expire`](Self::expire)
    /// when the counter belongs to a TTL-bounded record.
    async fn incr(&self, key: &str, delta: i64) -> AppResult<i64>;

    /// Set or refresh a key's expiry in seconds
    async fn expire(&self, key: &str, ttl_seconds: u64) -> AppResult<()>;

    /// Subscribe to `channel`.
    ///
    /// The subscription is established before this returns: every message
    /// published after a successful call is delivered, in publish order.
    async fn subscribe(&self, channel: &str) -> AppResult<Subscription>;
}
