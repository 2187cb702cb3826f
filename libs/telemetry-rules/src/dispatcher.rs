//! Action dispatch boundary
//!
//! The engine hands each PUBLISH request to an [`ActionDispatcher`] and only
//! learns whether it was accepted. Delivery and retries belong to the
//! dispatcher and its transport.

use crate::action::{Action, ActionHandler, ActionRequest};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Dispatcher verdict for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Accepted,
    Rejected(String),
}

impl DispatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchOutcome::Accepted)
    }
}

#[async_trait]
pub trait ActionDispatcher: Send + Sync + 'static {
    async fn dispatch(&self, request: ActionRequest) -> DispatchOutcome;
}

// ============================================================================
// In-process channel dispatcher
// ============================================================================

/// Queues requests on a bounded `mpsc` channel drained by an [`ActionWorker`]
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<ActionRequest>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiving half for its worker
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ActionRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ActionDispatcher for ChannelDispatcher {
    async fn dispatch(&self, request: ActionRequest) -> DispatchOutcome {
        let action = request.action.clone();
        match self.tx.send(request).await {
            Ok(()) => {
                debug!("Action '{}' queued", action);
                DispatchOutcome::Accepted
            },
            Err(_) => DispatchOutcome::Rejected("action queue closed".to_string()),
        }
    }
}

/// Worker statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub handled: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Drains a [`ChannelDispatcher`] queue, decoding and executing actions
pub struct ActionWorker {
    rx: mpsc::Receiver<ActionRequest>,
    handler: Arc<dyn ActionHandler>,
}

impl ActionWorker {
    pub fn new(rx: mpsc::Receiver<ActionRequest>, handler: Arc<dyn ActionHandler>) -> Self {
        Self { rx, handler }
    }

    /// Run until every sender is dropped
    pub async fn run(mut self) -> WorkerStats {
        info!("Action worker started");
        let mut stats = WorkerStats::default();

        while let Some(request) = self.rx.recv().await {
            let action = match Action::try_from(&request) {
                Ok(action) => action,
                Err(e) => {
                    warn!("Action rejected: {}", e);
                    stats.rejected += 1;
                    continue;
                },
            };

            match self.handler.handle(&action).await {
                Ok(()) => stats.handled += 1,
                Err(e) => {
                    error!("Action '{}' failed: {}", action.name(), e);
                    stats.failed += 1;
                },
            }
        }

        info!(
            "Action worker stopped: {} handled, {} rejected, {} failed",
            stats.handled, stats.rejected, stats.failed
        );
        stats
    }
}

// ============================================================================
// Recording dispatcher
// ============================================================================

/// Keeps every request in memory; can be switched to reject
///
/// Only tests construct it; the service wires Redis or the channel worker.
#[derive(Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<ActionRequest>>,
    reject: AtomicBool,
    calls: AtomicU64,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher that rejects every request
    pub fn rejecting() -> Self {
        let dispatcher = Self::default();
        dispatcher.reject.store(true, Ordering::SeqCst);
        dispatcher
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Accepted requests, in dispatch order
    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of dispatch calls, accepted or not
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: ActionRequest) -> DispatchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return DispatchOutcome::Rejected("dispatcher rejecting requests".to_string());
        }
        match self.requests.lock() {
            Ok(mut requests) => {
                requests.push(request);
                DispatchOutcome::Accepted
            },
            Err(_) => DispatchOutcome::Rejected("recorder lock poisoned".to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::action::ActionError;
    use serde_json::{json, Map, Value};

    fn request(action: &str, data: Value) -> ActionRequest {
        let Value::Object(map) = data else {
            return ActionRequest::new(action, Map::new());
        };
        ActionRequest::new(action, map)
    }

    #[derive(Default)]
    struct CollectingHandler {
        seen: Mutex<Vec<Action>>,
    }

    #[async_trait]
    impl ActionHandler for CollectingHandler {
        async fn handle(&self, action: &Action) -> Result<(), ActionError> {
            if let Action::AddTodo { body } = action {
                if body == "explode" {
                    return Err(ActionError::Execution("boom".to_string()));
                }
            }
            self.seen.lock().unwrap().push(action.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_channel_dispatcher_feeds_worker() {
        let (dispatcher, rx) = ChannelDispatcher::new(8);
        let handler = Arc::new(CollectingHandler::default());
        let worker = tokio::spawn(ActionWorker::new(rx, handler.clone()).run());

        let outcome = dispatcher
            .dispatch(request("email", json!({"to": "a@b.c", "body": "hi"})))
            .await;
        assert!(outcome.is_accepted());
        dispatcher
            .dispatch(request("call", json!({"to": "+1"})))
            .await;
        dispatcher
            .dispatch(request("add_todo", json!({"body": "explode"})))
            .await;
        drop(dispatcher);

        let stats = worker.await.unwrap();
        assert_eq!(
            stats,
            WorkerStats {
                handled: 1,
                rejected: 1,
                failed: 1
            }
        );
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_dispatcher_rejects_when_closed() {
        let (dispatcher, rx) = ChannelDispatcher::new(1);
        drop(rx);

        let outcome = dispatcher
            .dispatch(request("add_todo", json!({"body": "x"})))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Rejected("action queue closed".to_string())
        );
    }

    #[tokio::test]
    async fn test_recording_dispatcher() {
        let dispatcher = RecordingDispatcher::new();
        dispatcher
            .dispatch(request("add_todo", json!({"body": "x"})))
            .await;
        dispatcher.set_reject(true);
        let outcome = dispatcher
            .dispatch(request("add_todo", json!({"body": "y"})))
            .await;

        assert!(!outcome.is_accepted());
        assert_eq!(dispatcher.requests().len(), 1);
        assert_eq!(dispatcher.calls(), 2);
    }

    #[test]
    fn test_outcome_serialisation() {
        assert_eq!(
            serde_json::to_value(DispatchOutcome::Rejected("full".to_string())).unwrap(),
            json!({"status": "rejected", "reason": "full"})
        );
    }
}
