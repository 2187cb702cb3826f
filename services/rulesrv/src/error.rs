use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use telemetry_rules::RuleError;
use telemetry_store::StoreError;
use thiserror::Error;

/// Result type for rulesrv
pub type Result<T> = std::result::Result<T, RulesrvError>;

/// Errors that can occur in rulesrv
#[derive(Error, Debug)]
pub enum RulesrvError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Telemetry store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for RulesrvError {
    fn from(err: figment::Error) -> Self {
        RulesrvError::ConfigError(err.to_string())
    }
}

impl RulesrvError {
    fn status_code(&self) -> StatusCode {
        match self {
            RulesrvError::RuleNotFound(_) | RulesrvError::Rule(RuleError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            },
            RulesrvError::InvalidRequest(_)
            | RulesrvError::Rule(RuleError::InvalidFormat(_))
            | RulesrvError::Rule(RuleError::InvalidGraph { .. })
            | RulesrvError::Store(StoreError::InvalidPayload(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RulesrvError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "status": "error",
            "error": self.to_string(),
            "code": status.as_u16()
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RulesrvError::RuleNotFound("r1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RulesrvError::Store(StoreError::InvalidPayload("missing 'value' field".into()))
                .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RulesrvError::Rule(RuleError::DatabaseError("locked".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_into_response_status() {
        let resp = RulesrvError::InvalidRequest("bad topic".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
