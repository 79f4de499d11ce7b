//! Restream - resumable chat stream engine
//!
//! This library turns a single request/response AI completion into a
//! durable, replayable, cross-reload stream of incremental text. A
//! generation is recorded chunk by chunk in a key/value + pub/sub store and
//! fanned out over SSE; a client that disconnects mid-generation reattaches
//! through the resume endpoint without losing or duplicating tokens.

pub mod client;
pub mod config;
pub mod docs;
pub mod error;
pub mod registry;
pub mod routes;
pub mod source;
pub mod sse;
pub mod store;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

pub use crate::client::{ChatClient, ChatStatus, MemoryPointerStore, PointerStore, StreamPointer};
pub use crate::config::Config;
pub use crate::registry::{StreamRegistry, StreamStatus};
pub use crate::source::{OpenAiSource, TokenSource};
pub use crate::store::{InMemoryStreamStore, RedisStreamStore, StreamStore};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    /// Backing store; `None` runs the server without durability
    pub store: Option<Arc<dyn StreamStore>>,
    /// Stream registry over the store
    pub registry: StreamRegistry,
    /// Generation backend
    pub token_source: Arc<dyn TokenSource>,
    pub http_client: reqwest::Client,
    pub start_time: Instant,
}

impl AppState {
    /// Create a new application state.
    ///
    /// An unreachable Redis is downgraded to a warning: the server starts in
    /// non-durable passthrough mode rather than refusing to serve.
    pub async fn new(config: Config) -> Result<Self> {
        // HTTP client with connection pooling, shared by the token source
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .timeout(std::time::Duration::from_secs(300))
            .build()?;

        let store: Option<Arc<dyn StreamStore>> = match &config.redis_url {
            Some(url) => {
                match RedisStreamStore::connect(url, config.subscription_capacity).await {
                    Ok(store) => {
                        info!("Connected to Redis, stream durability enabled");
                        Some(Arc::new(store))
                    }
                    Err(e) => {
                        warn!(error = %e, "Redis unreachable, running without stream durability");
                        None
                    }
                }
            }
            None => {
                info!("No REDIS_URL configured, running without stream durability");
                None
            }
        };

        let registry = StreamRegistry::new(store.clone(), config.stream_ttl_seconds);
        let token_source: Arc<dyn TokenSource> =
            Arc::new(OpenAiSource::new(http_client.clone(), &config));

        Ok(Self {
            config,
            store,
            registry,
            token_source,
            http_client,
            start_time: Instant::now(),
        })
    }

    /// Create application state for testing with injected store and source
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_for_testing(
        config: Config,
        store: Option<Arc<dyn StreamStore>>,
        token_source: Arc<dyn TokenSource>,
    ) -> Self {
        let registry = StreamRegistry::new(store.clone(), config.stream_ttl_seconds);
        Self {
            config,
            store,
            registry,
            token_source,
            http_client: reqwest::Client::new(),
            start_time: Instant::now(),
        }
    }
}
