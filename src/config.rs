//! Configuration management for Restream
//!
//! Configuration is loaded from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Redis connection URL; `None` disables stream durability entirely
    /// (streams still serve live, but nothing is resumable)
    pub redis_url: Option<String>,

    /// OpenAI-compatible API URL for the token source
    pub openai_api_url: String,
    /// API key for the token source (required unless a custom source is injected)
    pub openai_api_key: Option<String>,
    /// Model requested from the token source
    pub openai_model: String,

    /// TTL for a stream's durable record (in seconds). This is the resume
    /// window: once it elapses, a resume request gets 204.
    pub stream_ttl_seconds: u64,

    /// Capacity of the bounded queue between the pub/sub pump and consumers
    pub subscription_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("RESTREAM_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("RESTREAM_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid RESTREAM_PORT")?,

            // Unset or empty REDIS_URL means "run without durability"
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),

            openai_api_url: env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),

            stream_ttl_seconds: env::var("STREAM_TTL_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("Invalid STREAM_TTL_SECONDS")?,

            subscription_capacity: env::var("SUBSCRIPTION_CAPACITY")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .context("Invalid SUBSCRIPTION_CAPACITY")?,
        })
    }
}
