//! Telemetry ingestion
//!
//! Transports hand raw message bodies to the [`Ingestor`], which validates the
//! `{value, immediate}` payload, stamps it with the ingestion time, writes it
//! into the store, and forwards the topic to the immediate-evaluation channel
//! when the producer asked for it.

use crate::error::{Result, StoreError};
use crate::time::{SystemTimeProvider, TimeProvider};
use crate::traits::{TelemetrySample, TelemetryStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Message body as published by devices: `{"value": ..., "immediate": bool}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub value: Value,
    pub immediate: bool,
}

impl TelemetryPayload {
    /// Parse and validate a raw JSON body
    ///
    /// Both `value` and `immediate` are required; `immediate` must be a boolean.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let raw: Value = serde_json::from_slice(body)
            .map_err(|e| StoreError::InvalidPayload(format!("invalid JSON: {}", e)))?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> Result<Self> {
        let Value::Object(mut map) = raw else {
            return Err(StoreError::InvalidPayload(
                "expected a JSON object with 'value' and 'immediate'".to_string(),
            ));
        };

        let value = map
            .remove("value")
            .ok_or_else(|| StoreError::InvalidPayload("missing 'value' field".to_string()))?;
        let immediate = match map.remove("immediate") {
            Some(Value::Bool(b)) => b,
            Some(other) => {
                return Err(StoreError::InvalidPayload(format!(
                    "'immediate' must be a boolean, got {}",
                    other
                )))
            },
            None => {
                return Err(StoreError::InvalidPayload(
                    "missing 'immediate' field".to_string(),
                ))
            },
        };

        Ok(Self { value, immediate })
    }
}

/// Payload plus transport metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    pub payload: Value,
}

/// Result of ingesting a single message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub topic: String,
    pub immediate: bool,
    /// Whether the topic reached the immediate-evaluation channel
    pub scheduled: bool,
}

/// Writes validated telemetry into a store
pub struct Ingestor {
    store: Arc<dyn TelemetryStore>,
    immediate_tx: Option<mpsc::Sender<String>>,
    time: Arc<dyn TimeProvider>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            store,
            immediate_tx: None,
            time: Arc::new(SystemTimeProvider),
        }
    }

    /// Forward topics of `immediate = true` messages to this channel
    pub fn with_immediate_channel(mut self, tx: mpsc::Sender<String>) -> Self {
        self.immediate_tx = Some(tx);
        self
    }

    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Ingest a raw message body received on `topic`
    pub async fn ingest(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        body: &[u8],
    ) -> Result<IngestOutcome> {
        let payload = TelemetryPayload::parse(body)?;
        self.store_payload(topic, qos, retain, payload).await
    }

    /// Ingest an already-decoded message
    pub async fn ingest_message(&self, message: TelemetryMessage) -> Result<IngestOutcome> {
        let payload = TelemetryPayload::from_value(message.payload)?;
        self.store_payload(&message.topic, message.qos, message.retain, payload)
            .await
    }

    async fn store_payload(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: TelemetryPayload,
    ) -> Result<IngestOutcome> {
        if topic.is_empty() {
            return Err(StoreError::InvalidPayload("empty topic".to_string()));
        }

        let immediate = payload.immediate;
        self.store
            .record(TelemetrySample {
                topic: topic.to_string(),
                value: payload.value,
                immediate,
                qos,
                retain,
                timestamp_ms: self.time.now_millis(),
            })
            .await?;
        debug!("Stored telemetry for {}", topic);

        let scheduled = if immediate {
            self.signal_immediate(topic)
        } else {
            false
        };

        Ok(IngestOutcome {
            topic: topic.to_string(),
            immediate,
            scheduled,
        })
    }

    fn signal_immediate(&self, topic: &str) -> bool {
        let Some(tx) = &self.immediate_tx else {
            debug!("Immediate flag on {} ignored: no evaluation channel", topic);
            return false;
        };

        match tx.try_send(topic.to_string()) {
            Ok(()) => {
                info!("Immediate evaluation requested for {}", topic);
                true
            },
            Err(e) => {
                warn!("Immediate evaluation for {} dropped: {}", topic, e);
                false
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::memory_impl::MemoryStore;
    use crate::time::FixedTimeProvider;
    use serde_json::json;

    #[test]
    fn test_parse_valid_payload() {
        let payload = TelemetryPayload::parse(br#"{"value": 21.5, "immediate": false}"#).unwrap();
        assert_eq!(payload.value, json!(21.5));
        assert!(!payload.immediate);
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let err = TelemetryPayload::parse(br#"{"value": 1}"#).unwrap_err();
        assert!(err.to_string().contains("immediate"));

        let err = TelemetryPayload::parse(br#"{"immediate": true}"#).unwrap_err();
        assert!(err.to_string().contains("value"));
    }

    #[test]
    fn test_parse_rejects_non_object_and_bad_json() {
        assert!(matches!(
            TelemetryPayload::parse(b"[1, 2]"),
            Err(StoreError::InvalidPayload(_))
        ));
        assert!(matches!(
            TelemetryPayload::parse(b"{oops"),
            Err(StoreError::InvalidPayload(_))
        ));
        assert!(matches!(
            TelemetryPayload::parse(br#"{"value": 1, "immediate": "yes"}"#),
            Err(StoreError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_ingest_writes_store() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(store.clone())
            .with_time_provider(Arc::new(FixedTimeProvider::new(1_700_000_000_000)));

        let outcome = ingestor
            .ingest(
                "sensors/1/temp",
                1,
                false,
                br#"{"value": 35, "immediate": false}"#,
            )
            .await
            .unwrap();

        assert!(!outcome.immediate);
        assert!(!outcome.scheduled);
        let sample = store.latest_sample("sensors/1/temp").unwrap();
        assert_eq!(sample.value, json!(35));
        assert_eq!(sample.timestamp_ms, 1_700_000_000_000);
        assert_eq!(sample.qos, 1);
    }

    #[tokio::test]
    async fn test_ingest_immediate_signals_channel() {
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::channel(4);
        let ingestor = Ingestor::new(store).with_immediate_channel(tx);

        let outcome = ingestor
            .ingest_message(TelemetryMessage {
                topic: "door/front".to_string(),
                qos: 0,
                retain: true,
                payload: json!({"value": "open", "immediate": true}),
            })
            .await
            .unwrap();

        assert!(outcome.scheduled);
        assert_eq!(rx.recv().await.unwrap(), "door/front");
    }

    #[tokio::test]
    async fn test_ingest_rejects_empty_topic() {
        let ingestor = Ingestor::new(Arc::new(MemoryStore::new()));
        let err = ingestor
            .ingest("", 0, false, br#"{"value": 1, "immediate": false}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPayload(_)));
    }
}
