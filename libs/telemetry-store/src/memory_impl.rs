//! In-memory telemetry store
//!
//! Uses DashMap for lock-free concurrent access. Keeps only the newest sample
//! per topic. Perfect for testing and embedded scenarios.

use crate::error::Result;
use crate::traits::{TelemetrySample, TelemetryStore};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// In-memory store with concurrent access support
pub struct MemoryStore {
    latest: Arc<DashMap<String, TelemetrySample>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(DashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Convenience setter used by tests and fixtures
    pub fn insert(&self, topic: &str, value: Value, timestamp_ms: i64) {
        self.apply(TelemetrySample {
            topic: topic.to_string(),
            value,
            immediate: false,
            qos: 0,
            retain: false,
            timestamp_ms,
        });
    }

    /// Latest full sample for a topic (value plus metadata)
    pub fn latest_sample(&self, topic: &str) -> Option<TelemetrySample> {
        self.latest.get(topic).map(|s| s.clone())
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        self.latest.clear();
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            topic_count: self.latest.len(),
            write_count: self.writes.load(Ordering::Relaxed),
        }
    }

    fn apply(&self, sample: TelemetrySample) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        match self.latest.entry(sample.topic.clone()) {
            Entry::Occupied(mut entry) => {
                // Equal timestamps: the later write wins
                if sample.timestamp_ms >= entry.get().timestamp_ms {
                    entry.insert(sample);
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(sample);
            },
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about memory store usage
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub topic_count: usize,
    pub write_count: u64,
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn latest_value(&self, topic: &str) -> Result<Option<Value>> {
        Ok(self.latest.get(topic).map(|s| s.value.clone()))
    }

    async fn record(&self, sample: TelemetrySample) -> Result<()> {
        self.apply(sample);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_latest_value_absent() {
        let store = MemoryStore::new();
        assert_eq!(store.latest_value("nothing/here").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_newer_sample_wins() {
        let store = MemoryStore::new();
        store.insert("t", json!(20), 1_000);
        store.insert("t", json!(35), 2_000);

        assert_eq!(store.latest_value("t").await.unwrap(), Some(json!(35)));
    }

    #[tokio::test]
    async fn test_older_sample_ignored() {
        let store = MemoryStore::new();
        store.insert("t", json!(35), 2_000);
        store.insert("t", json!(20), 1_000);

        assert_eq!(store.latest_value("t").await.unwrap(), Some(json!(35)));
        assert_eq!(store.stats().write_count, 2);
        assert_eq!(store.stats().topic_count, 1);
    }

    #[tokio::test]
    async fn test_record_keeps_metadata() {
        let store = MemoryStore::new();
        store
            .record(TelemetrySample {
                topic: "door/1".to_string(),
                value: json!("open"),
                immediate: true,
                qos: 1,
                retain: true,
                timestamp_ms: 5,
            })
            .await
            .unwrap();

        let sample = store.latest_sample("door/1").unwrap();
        assert!(sample.immediate);
        assert_eq!(sample.qos, 1);
        assert!(sample.retain);

        store.clear();
        assert!(store.latest_sample("door/1").is_none());
    }
}
