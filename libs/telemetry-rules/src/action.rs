//! Action requests and typed actions
//!
//! PUBLISH nodes emit an opaque [`ActionRequest`]. Executors decode it into
//! the closed [`Action`] set; unknown action names are a distinct error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const ACTION_EMAIL: &str = "email";
pub const ACTION_ADD_TODO: &str = "add_todo";

/// Payload handed to the action dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub action_data: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, action_data: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            action_data,
        }
    }
}

/// Action decoding and execution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("Unknown action type: {0}")]
    UnknownAction(String),

    #[error("Action '{action}' requires field '{field}'")]
    MissingField { action: String, field: String },

    #[error("Action execution failed: {0}")]
    Execution(String),
}

/// Recognised actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Email { to: String, body: String },
    AddTodo { body: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Email { .. } => ACTION_EMAIL,
            Action::AddTodo { .. } => ACTION_ADD_TODO,
        }
    }
}

impl TryFrom<&ActionRequest> for Action {
    type Error = ActionError;

    fn try_from(request: &ActionRequest) -> Result<Self, Self::Error> {
        let field = |name: &str| -> Result<String, ActionError> {
            match request.action_data.get(name) {
                Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(ActionError::MissingField {
                    action: request.action.clone(),
                    field: name.to_string(),
                }),
            }
        };

        match request.action.as_str() {
            ACTION_EMAIL => Ok(Action::Email {
                to: field("to")?,
                body: field("body")?,
            }),
            ACTION_ADD_TODO => Ok(Action::AddTodo {
                body: field("body")?,
            }),
            other => Err(ActionError::UnknownAction(other.to_string())),
        }
    }
}

/// Performs decoded actions
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    async fn handle(&self, action: &Action) -> Result<(), ActionError>;
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> ActionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decode_email() {
        let req = request(json!({
            "action": "email",
            "action_data": {"to": "ops@example.com", "body": "Temperature high"}
        }));
        assert_eq!(
            Action::try_from(&req).unwrap(),
            Action::Email {
                to: "ops@example.com".to_string(),
                body: "Temperature high".to_string()
            }
        );
    }

    #[test]
    fn test_decode_add_todo() {
        let req = request(json!({"action": "add_todo", "action_data": {"body": "Check pump"}}));
        let action = Action::try_from(&req).unwrap();
        assert_eq!(action.name(), "add_todo");
    }

    #[test]
    fn test_missing_fields() {
        let req = request(json!({"action": "email", "action_data": {"body": "x"}}));
        assert_eq!(
            Action::try_from(&req),
            Err(ActionError::MissingField {
                action: "email".to_string(),
                field: "to".to_string()
            })
        );

        let req = request(json!({"action": "add_todo"}));
        assert!(matches!(
            Action::try_from(&req),
            Err(ActionError::MissingField { .. })
        ));
    }

    #[test]
    fn test_unknown_action() {
        let req = request(json!({"action": "call", "action_data": {"to": "+100"}}));
        assert_eq!(
            Action::try_from(&req),
            Err(ActionError::UnknownAction("call".to_string()))
        );
    }

    #[test]
    fn test_action_serialises_tagged() {
        let action = Action::AddTodo {
            body: "x".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"action": "add_todo", "body": "x"})
        );
    }
}
