//! Rule Engine Error Types

use thiserror::Error;

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;

/// Rule engine errors
#[derive(Debug, Error)]
pub enum RuleError {
    /// Rule not found
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// Invalid rule format
    #[error("Invalid rule format: {0}")]
    InvalidFormat(String),

    /// Rule graph failed validation
    #[error("Invalid rule graph '{rule_id}': {reason}")]
    InvalidGraph { rule_id: String, reason: String },

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Telemetry store error
    #[error("Telemetry store error: {0}")]
    StoreError(String),
}

impl RuleError {
    pub(crate) fn invalid_graph(rule_id: &str, reason: impl Into<String>) -> Self {
        RuleError::InvalidGraph {
            rule_id: rule_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for RuleError {
    fn from(err: sqlx::Error) -> Self {
        RuleError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(err: serde_json::Error) -> Self {
        RuleError::SerializationError(err.to_string())
    }
}

impl From<telemetry_store::StoreError> for RuleError {
    fn from(err: telemetry_store::StoreError) -> Self {
        RuleError::StoreError(err.to_string())
    }
}
