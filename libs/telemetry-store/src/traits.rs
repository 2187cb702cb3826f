//! Trait definitions for the telemetry store abstraction

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One ingested telemetry reading together with its transport metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Hierarchical topic the reading arrived on (e.g. `sensors/12458/temperature`)
    pub topic: String,
    /// Reading value, any JSON scalar or structure
    pub value: Value,
    /// Whether rules referencing this topic should run outside interval gating
    #[serde(default)]
    pub immediate: bool,
    /// Transport quality-of-service level
    #[serde(default)]
    pub qos: u8,
    /// Transport retained flag
    #[serde(default)]
    pub retain: bool,
    /// Ingestion time, Unix milliseconds
    pub timestamp_ms: i64,
}

/// Latest-value telemetry storage
///
/// Implementations:
/// - `RedisStore`: production Redis backend (timestamp-ordered sorted set)
/// - `MemoryStore`: in-memory backend for testing and embedded use
///
/// Only "most recent write wins" ordering is guaranteed.
#[async_trait]
pub trait TelemetryStore: Send + Sync + 'static {
    /// Most recently ingested value for `topic`, or `None` if nothing has arrived
    async fn latest_value(&self, topic: &str) -> Result<Option<Value>>;

    /// Store a sample
    async fn record(&self, sample: TelemetrySample) -> Result<()>;
}
