//! Redis implementation of the telemetry store
//!
//! Each topic owns a sorted set `{prefix}:{safe_topic}:messages` whose
//! members are JSON-encoded samples scored by ingestion timestamp. Members
//! carry a per-topic write sequence so that, within one timestamp, the later
//! write ranks highest. The latest value is the highest-ranked member.

use crate::error::Result;
use crate::keyspace::{decode_member, encode_member, KeySpace};
use crate::traits::{TelemetrySample, TelemetryStore};
use anyhow::Context;
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default number of messages retained per topic
pub const DEFAULT_HISTORY_LEN: usize = 100;

/// Redis connection pool configuration
#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    /// Redis URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_connections: 16,
            connection_timeout: 5,
        }
    }
}

impl RedisPoolConfig {
    /// Create config from URL with default pool settings
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Redis asynchronous client with connection pooling
pub struct RedisClient {
    pool: Pool<RedisConnectionManager>,
    url: String,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("url", &self.url)
            .field("pool_state", &self.pool.state())
            .finish()
    }
}

impl RedisClient {
    /// Create a new client with default pool settings
    pub async fn new(url: &str) -> Result<Self> {
        Self::with_config(RedisPoolConfig::from_url(url)).await
    }

    /// Create a new client and verify the server answers PING
    pub async fn with_config(config: RedisPoolConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .context("Failed to create Redis connection manager")?;

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_secs(config.connection_timeout))
            .build(manager)
            .await
            .context("Failed to build Redis connection pool")?;

        {
            let mut conn = pool
                .get()
                .await
                .context("Failed to get connection from pool for testing")?;
            let _: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .context("Failed to ping Redis server")?;
        }

        Ok(Self {
            pool,
            url: config.url,
        })
    }

    /// Get a connection from the pool
    pub async fn get_connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        Ok(self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?)
    }

    /// PUBLISH operation
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        let mut conn = self.get_connection().await?;
        let receivers: u32 = conn
            .publish(channel, message)
            .await
            .with_context(|| format!("Failed to PUBLISH to channel: {}", channel))?;
        Ok(receivers)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Redis-backed telemetry store
pub struct RedisStore {
    client: Arc<RedisClient>,
    keyspace: KeySpace,
    history_len: usize,
}

impl RedisStore {
    /// Create new Redis store from URL with the default key space
    pub async fn new(url: &str) -> Result<Self> {
        Ok(Self::from_client(
            Arc::new(RedisClient::new(url).await?),
            KeySpace::default(),
            DEFAULT_HISTORY_LEN,
        ))
    }

    /// Create from existing client
    pub fn from_client(client: Arc<RedisClient>, keyspace: KeySpace, history_len: usize) -> Self {
        Self {
            client,
            keyspace,
            history_len: history_len.max(1),
        }
    }

    pub fn client(&self) -> &Arc<RedisClient> {
        &self.client
    }
}

#[async_trait]
impl TelemetryStore for RedisStore {
    async fn latest_value(&self, topic: &str) -> Result<Option<Value>> {
        let key = self.keyspace.messages_key(topic);
        let mut conn = self.client.get_connection().await?;

        let members: Vec<String> = conn
            .zrevrange(&key, 0, 0)
            .await
            .with_context(|| format!("Failed to ZREVRANGE key: {}", key))?;

        match members.first() {
            Some(raw) => {
                let sample: TelemetrySample = serde_json::from_str(decode_member(raw))?;
                Ok(Some(sample.value))
            },
            None => Ok(None),
        }
    }

    async fn record(&self, sample: TelemetrySample) -> Result<()> {
        let key = self.keyspace.messages_key(&sample.topic);
        let seq_key = self.keyspace.sequence_key(&sample.topic);
        let payload = serde_json::to_string(&sample)?;
        let mut conn = self.client.get_connection().await?;

        let seq: u64 = conn
            .incr(&seq_key, 1)
            .await
            .with_context(|| format!("Failed to INCR key: {}", seq_key))?;
        let member = encode_member(seq, &payload);

        let _: i64 = conn
            .zadd(&key, member, sample.timestamp_ms)
            .await
            .with_context(|| format!("Failed to ZADD key: {}", key))?;

        // Keep only the newest `history_len` members
        let stop = -(self.history_len as isize) - 1;
        let trimmed: i64 = conn
            .zremrangebyrank(&key, 0, stop)
            .await
            .with_context(|| format!("Failed to trim key: {}", key))?;

        debug!("Telemetry {} stored (trimmed {})", key, trimmed);
        Ok(())
    }
}
