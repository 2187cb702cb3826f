//! Action handlers for the in-process queue

use async_trait::async_trait;
use telemetry_rules::{Action, ActionError, ActionHandler};
use tracing::info;

/// Records each action in the service log instead of delivering it
#[derive(Debug, Default, Clone)]
pub struct LogActionHandler;

#[async_trait]
impl ActionHandler for LogActionHandler {
    async fn handle(&self, action: &Action) -> Result<(), ActionError> {
        match action {
            Action::Email { to, body } => {
                info!(action = "email", %to, "Email: {}", body);
            },
            Action::AddTodo { body } => {
                info!(action = "add_todo", "Todo: {}", body);
            },
        }
        Ok(())
    }
}
