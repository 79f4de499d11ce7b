//! Redis stream store implementation
//!
//! Key/value operations and `PUBLISH` go through a shared
//! `ConnectionManager`. Subscriptions each get a dedicated connection: a
//! subscribed Redis connection is blocked for message delivery and cannot
//! serve other commands.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::error::AppResult;

use super::{StreamStore, Subscription};

/// Redis-backed key/value + pub/sub store
pub struct RedisStreamStore {
    client: redis::Client,
    conn: redis::aio::ConnectionManager,
    subscription_capacity: usize,
}

impl RedisStreamStore {
    /// Connect to Redis.
    ///
    /// Builds the process-scoped `ConnectionManager` used for all key/value
    /// and publish traffic. Call once at startup and share the handle.
    pub async fn connect(redis_url: &str, subscription_capacity: usize) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            subscription_capacity,
        })
    }
}

#[async_trait]
impl StreamStore for RedisStreamStore {
    #[instrument(skip(self, message), fields(channel = %channel))]
    async fn publish(&self, channel: &str, message: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, message).await?;
        Ok(())
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> AppResult<()> {
        let mut conn = self.conn.clone();
        match ttl_seconds {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn incr(&self, key: &str, delta: i64) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: bool = conn.expire(key, ttl_seconds as i64).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(channel = %channel))]
    async fn subscribe(&self, channel: &str) -> AppResult<Subscription> {
        // Dedicated connection per subscription
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();

        // SUBSCRIBE completes before we return, so nothing published after
        // this call can be missed
        pubsub.subscribe(channel).await?;
        debug!("Subscribed to channel");

        let (tx, rx) = mpsc::channel(self.subscription_capacity);
        let channel_name = channel.to_string();

        let pump = tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(channel = %channel_name, error = %e, "Dropping unreadable pub/sub payload");
                        continue;
                    }
                };
                // Bounded queue: await on a full queue rather than dropping
                if tx.send(payload).await.is_err() {
                    // Consumer went away
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, pump))
    }
}
