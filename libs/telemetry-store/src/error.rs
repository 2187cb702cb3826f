//! Error types for telemetry-store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::ConnectionError(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_invalid_payload_error() {
        let err = StoreError::InvalidPayload("missing 'immediate'".to_string());
        assert_eq!(err.to_string(), "Invalid payload: missing 'immediate'");
    }

    #[test]
    fn test_from_serde_error() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: StoreError = serde_err.into();
        assert!(matches!(err, StoreError::SerializationError(_)));
    }

    #[test]
    fn test_from_anyhow_error() {
        let anyhow_err = anyhow::anyhow!("pool exhausted");
        let err: StoreError = anyhow_err.into();
        assert!(matches!(err, StoreError::Other(_)));
        assert!(err.to_string().contains("pool exhausted"));
    }
}
