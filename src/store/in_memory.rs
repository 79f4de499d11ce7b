//! In-memory stream store implementation
//!
//! Implements the same key/value + pub/sub contract as the Redis store with
//! a `HashMap` and `tokio::sync::broadcast` channels. Used by integration
//! tests, eliminating the need for a real Redis instance.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::AppResult;

use super::{StreamStore, Subscription};

/// Entry in the in-memory store with expiration
struct StoreEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() > exp)
            .unwrap_or(false)
    }
}

/// In-memory key/value + pub/sub store
///
/// # Thread Safety
///
/// Uses `RwLock` for the key space (concurrent reads) and a `Mutex` for the
/// channel registry. Locks are never held across await points.
pub struct InMemoryStreamStore {
    data: RwLock<HashMap<String, StoreEntry>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    subscription_capacity: usize,
}

impl InMemoryStreamStore {
    /// Create a new empty store
    pub fn new(subscription_capacity: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            subscription_capacity,
        }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }

    /// Clear all entries (useful for test isolation)
    pub fn clear(&self) {
        self.data.write().unwrap().clear();
        self.channels.lock().unwrap().clear();
    }
}

impl Default for InMemoryStreamStore {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl StreamStore for InMemoryStreamStore {
    async fn publish(&self, channel: &str, message: &str) -> AppResult<()> {
        // No subscribers is fine: publish implies no persistence
        let _ = self.sender_for(channel).send(message.to_string());
        Ok(())
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> AppResult<()> {
        let expires_at = ttl_seconds.map(|ttl| Instant::now() + Duration::from_secs(ttl));
        let mut data = self.data.write().unwrap();
        data.insert(
            key.to_string(),
            StoreEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let data = self.data.read().unwrap();
        match data.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn incr(&self, key: &str, delta: i64) -> AppResult<i64> {
        let mut data = self.data.write().unwrap();

        let current: i64 = data
            .get(key)
            .filter(|e| !e.is_expired())
            .and_then(|e| e.value.parse().ok())
            .unwrap_or(0);

        let new_value = current + delta;
        data.insert(
            key.to_string(),
            StoreEntry {
                value: new_value.to_string(),
                expires_at: None,
            },
        );

        Ok(new_value)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> AppResult<()> {
        let mut data = self.data.write().unwrap();
        if let Some(entry) = data.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> AppResult<Subscription> {
        // Subscribing to the broadcast sender happens here, before any
        // subsequent publish, matching the Redis ordering guarantee
        let mut broadcast_rx = self.sender_for(channel).subscribe();

        let (tx, rx) = mpsc::channel(self.subscription_capacity);
        let pump = tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx, pump))
    }
}
