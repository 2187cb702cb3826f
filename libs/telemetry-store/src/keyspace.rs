//! Topic key space
//!
//! Telemetry topics are MQTT-style paths (`site/sensor/+/temp`). Storage keys
//! must not contain path separators or wildcard characters, so topics are
//! sanitised before being used as key segments.

/// Default key prefix for telemetry message sets
pub const DEFAULT_TELEMETRY_PREFIX: &str = "telemetry";

/// Convert a topic into a storage-safe identifier
///
/// `/` and `.` become `_`, `#` becomes `hash`, `+` becomes `plus`.
pub fn safe_topic_id(topic: &str) -> String {
    let mut out = String::with_capacity(topic.len());
    for ch in topic.chars() {
        match ch {
            '/' | '.' => out.push('_'),
            '#' => out.push_str("hash"),
            '+' => out.push_str("plus"),
            other => out.push(other),
        }
    }
    out
}

/// Key naming for telemetry storage
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Sorted set holding the message history of a topic: `{prefix}:{safe_topic}:messages`
    pub fn messages_key(&self, topic: &str) -> String {
        format!("{}:{}:messages", self.prefix, safe_topic_id(topic))
    }

    /// Write counter of a topic: `{prefix}:{safe_topic}:seq`
    pub fn sequence_key(&self, topic: &str) -> String {
        format!("{}:{}:seq", self.prefix, safe_topic_id(topic))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Prefix a sorted-set member with its zero-padded write sequence
///
/// Members with equal scores sort by bytes, so the padded sequence makes the
/// later write rank higher within the same timestamp.
pub fn encode_member(seq: u64, payload: &str) -> String {
    format!("{:020}|{}", seq, payload)
}

/// Strip the write sequence from a stored member
pub fn decode_member(member: &str) -> &str {
    match member.split_once('|') {
        Some((seq, payload)) if seq.len() == 20 && seq.bytes().all(|b| b.is_ascii_digit()) => {
            payload
        },
        _ => member,
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_TELEMETRY_PREFIX)
    }
}
