//! Redis action queue dispatcher

use async_trait::async_trait;
use std::sync::Arc;
use telemetry_rules::{ActionDispatcher, ActionRequest, DispatchOutcome};
use telemetry_store::RedisClient;
use tracing::{debug, warn};

/// Publishes each request as JSON on a Redis channel
pub struct RedisQueueDispatcher {
    client: Arc<RedisClient>,
    channel: String,
}

impl RedisQueueDispatcher {
    pub fn new(client: Arc<RedisClient>, channel: impl Into<String>) -> Self {
        Self {
            client,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl ActionDispatcher for RedisQueueDispatcher {
    async fn dispatch(&self, request: ActionRequest) -> DispatchOutcome {
        let message = match serde_json::to_string(&request) {
            Ok(message) => message,
            Err(e) => return DispatchOutcome::Rejected(format!("encode failed: {}", e)),
        };

        match self.client.publish(&self.channel, &message).await {
            Ok(receivers) => {
                if receivers == 0 {
                    // Accepted: the queue owns delivery, subscribers may attach later
                    warn!(
                        "Action '{}' published to '{}' with no subscribers",
                        request.action, self.channel
                    );
                } else {
                    debug!(
                        "Action '{}' published to '{}' ({} receivers)",
                        request.action, self.channel, receivers
                    );
                }
                DispatchOutcome::Accepted
            },
            Err(e) => DispatchOutcome::Rejected(e.to_string()),
        }
    }
}
