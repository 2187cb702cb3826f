//! Telemetry Store Abstraction
//!
//! Provides the latest-value lookup the rule engine reads from, plus the
//! ingestion path that writes into it.
//!
//! # Key Components
//!
//! - **TelemetryStore trait**: `latest_value(topic)` / `record(sample)`
//! - **KeySpace**: topic sanitising and Redis key naming
//! - **Ingestor**: validates `{value, immediate}` payloads and signals
//!   immediate evaluation requests

pub mod error;

pub mod ingest;

pub mod keyspace;

pub mod memory_impl;

#[cfg(feature = "redis-backend")]
pub mod redis_impl;

pub mod time;

pub mod traits;

// Re-exports
pub use error::{Result, StoreError};
pub use ingest::{IngestOutcome, Ingestor, TelemetryMessage, TelemetryPayload};
pub use keyspace::{safe_topic_id, KeySpace};
pub use memory_impl::{MemoryStats, MemoryStore};
pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};
pub use traits::{TelemetrySample, TelemetryStore};

#[cfg(feature = "redis-backend")]
pub use redis_impl::{RedisClient, RedisPoolConfig, RedisStore};
