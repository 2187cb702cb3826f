//! Rule Executor - walk a rule graph against live telemetry
//!
//! Executes a rule by:
//! 1. Starting at `start_node` with an empty execution context
//! 2. Running each node (store reads, operators, dispatch) and recording its outcome
//! 3. Following the first id of the selected successor list until END, a
//!    failed node, or a node without successors
//!
//! A run never branches in parallel: additional successor ids only express a
//! fallback order and are not visited.

use crate::action::ActionRequest;
use crate::context::{is_truthy, ExecutionContext};
use crate::dispatcher::{ActionDispatcher, DispatchOutcome};
use crate::operator::Operator;
use crate::types::{Node, NodeType, Rule};
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use telemetry_store::TelemetryStore;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Value a PUBLISH node produces once its request was accepted
pub const PUBLISHED_MARKER: &str = "published";

/// Default deadline for a single store read or dispatch
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a run stopped early
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Start node not found: {0}")]
    StartNodeMissing(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Cycle detected: node '{0}' visited twice")]
    CycleDetected(String),

    #[error("Node '{node_id}' failed: {reason}")]
    NodeFailed { node_id: String, reason: String },
}

/// Outcome of one executed node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeOutcome {
    pub node_id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub success: bool,
    /// Value written into the context (`None` for failures and TRIGGER)
    #[serde(rename = "result")]
    pub value: Option<Value>,
    pub details: Map<String, Value>,
}

/// Result of executing a rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub rule_id: String,
    pub triggered: bool,
    /// Executed nodes in traversal order (END excluded)
    pub trace: Vec<NodeOutcome>,
    /// Node ids visited, END included
    pub execution_path: Vec<String>,
    /// Requests accepted by the dispatcher
    pub actions: Vec<ActionRequest>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    fn new(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            triggered: false,
            trace: Vec::new(),
            execution_path: Vec::new(),
            actions: Vec::new(),
            error: None,
        }
    }

    /// GET_DATA readings as `(topic, value)` pairs, in trace order
    pub fn readings(&self) -> Vec<(&str, &Value)> {
        self.trace
            .iter()
            .filter(|o| o.node_type == NodeType::GetData && o.success)
            .filter_map(|o| {
                let topic = o.details.get("topic")?.as_str()?;
                Some((topic, o.value.as_ref()?))
            })
            .collect()
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<ExecutionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Result of running a single node
struct NodeStep {
    success: bool,
    value: Option<Value>,
    details: Map<String, Value>,
    action: Option<ActionRequest>,
    reason: Option<String>,
}

impl NodeStep {
    fn ok(value: Option<Value>, details: Map<String, Value>) -> Self {
        Self {
            success: true,
            value,
            details,
            action: None,
            reason: None,
        }
    }

    fn fail(reason: impl Into<String>, mut details: Map<String, Value>) -> Self {
        let reason = reason.into();
        details.insert("error".to_string(), Value::String(reason.clone()));
        Self {
            success: false,
            value: None,
            details,
            action: None,
            reason: Some(reason),
        }
    }
}

/// Rule executor
///
/// Store and dispatcher are injected so tests can supply in-memory fakes.
pub struct RuleExecutor {
    store: Arc<dyn TelemetryStore>,
    dispatcher: Arc<dyn ActionDispatcher>,
    node_timeout: Duration,
}

impl RuleExecutor {
    pub fn new(store: Arc<dyn TelemetryStore>, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            node_timeout: DEFAULT_NODE_TIMEOUT,
        }
    }

    /// Deadline applied to each store read and dispatch call
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    /// Execute a rule graph once
    ///
    /// Failures are reported in the returned result, never as a panic or `Err`.
    pub async fn execute(&self, rule: &Rule) -> ExecutionResult {
        let mut result = ExecutionResult::new(&rule.id);
        let nodes = rule.node_index();
        let mut ctx = ExecutionContext::new();
        let mut visited: HashSet<&str> = HashSet::new();

        let Some(mut current) = nodes.get(rule.start_node.as_str()).copied() else {
            warn!("Rule {}: start node '{}' not found", rule.id, rule.start_node);
            result.error = Some(ExecutionError::StartNodeMissing(rule.start_node.clone()));
            return result;
        };

        loop {
            if !visited.insert(current.id.as_str()) {
                warn!("Rule {}: cycle at node '{}'", rule.id, current.id);
                result.error = Some(ExecutionError::CycleDetected(current.id.clone()));
                break;
            }
            result.execution_path.push(current.id.clone());

            if current.node_type == NodeType::End {
                break;
            }

            debug!("Rule {}: executing {} node '{}'", rule.id, current.node_type, current.id);
            let step = self.execute_node(current, &ctx).await;

            if step.success {
                ctx.insert(&current.id, step.value.clone().unwrap_or(Value::Null));
            }
            if let Some(action) = step.action {
                result.actions.push(action);
            }

            let branch = step.value.as_ref().map(is_truthy);
            result.trace.push(NodeOutcome {
                node_id: current.id.clone(),
                node_type: current.node_type.clone(),
                success: step.success,
                value: step.value,
                details: step.details,
            });

            if let Some(reason) = step.reason {
                warn!("Rule {}: node '{}' failed: {}", rule.id, current.id, reason);
                result.error = Some(ExecutionError::NodeFailed {
                    node_id: current.id.clone(),
                    reason,
                });
                break;
            }

            let Some(next_id) = current.successors(branch).first() else {
                debug!("Rule {}: node '{}' has no successor", rule.id, current.id);
                break;
            };

            current = match nodes.get(next_id.as_str()) {
                Some(node) => *node,
                None => {
                    warn!("Rule {}: successor '{}' not found", rule.id, next_id);
                    result.error = Some(ExecutionError::NodeNotFound(next_id.clone()));
                    break;
                },
            };
        }

        result.triggered = result.trace.iter().any(|o| {
            o.node_type == NodeType::Publish
                && o.value.as_ref().and_then(Value::as_str) == Some(PUBLISHED_MARKER)
        });

        if result.triggered {
            info!(
                "Rule {} triggered, {} action(s) dispatched",
                rule.id,
                result.actions.len()
            );
        } else {
            debug!("Rule {} not triggered", rule.id);
        }

        result
    }

    async fn execute_node(&self, node: &Node, ctx: &ExecutionContext) -> NodeStep {
        match &node.node_type {
            NodeType::GetData => self.execute_get_data(node).await,
            NodeType::Compare => execute_compare(node, ctx),
            NodeType::And | NodeType::Or => execute_logical(node, ctx),
            NodeType::Publish => self.execute_publish(node).await,
            NodeType::Trigger => NodeStep::ok(None, Map::new()),
            // END is terminal and handled by the caller
            NodeType::End => NodeStep::ok(None, Map::new()),
            NodeType::Unknown(name) => {
                NodeStep::fail(format!("Unknown node type: {}", name), Map::new())
            },
        }
    }

    async fn execute_get_data(&self, node: &Node) -> NodeStep {
        let Some(topic) = node.str_property("topic") else {
            return NodeStep::fail("No topic specified", Map::new());
        };

        let mut details = Map::new();
        details.insert("topic".to_string(), json!(topic));

        match self.bounded(self.store.latest_value(topic)).await {
            Err(reason) => NodeStep::fail(format!("Telemetry read {}", reason), details),
            Ok(Err(e)) => NodeStep::fail(format!("Telemetry read failed: {}", e), details),
            Ok(Ok(None)) | Ok(Ok(Some(Value::Null))) => {
                details.insert("value".to_string(), Value::Null);
                NodeStep::fail(format!("No value available for topic {}", topic), details)
            },
            Ok(Ok(Some(value))) => {
                details.insert("value".to_string(), value.clone());
                NodeStep::ok(Some(value), details)
            },
        }
    }

    async fn execute_publish(&self, node: &Node) -> NodeStep {
        let Some(action) = node.str_property("action") else {
            return NodeStep::fail("No action specified", Map::new());
        };
        let action_data = match node.property("action_data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return NodeStep::fail(
                    format!("action_data must be an object, got {}", other),
                    Map::new(),
                )
            },
        };

        let mut details = Map::new();
        details.insert("action".to_string(), json!(action));
        details.insert("action_data".to_string(), Value::Object(action_data.clone()));

        let request = ActionRequest::new(action, action_data);
        match self.bounded(self.dispatcher.dispatch(request.clone())).await {
            Ok(DispatchOutcome::Accepted) => {
                let mut step = NodeStep::ok(Some(json!(PUBLISHED_MARKER)), details);
                step.action = Some(request);
                step
            },
            Ok(DispatchOutcome::Rejected(reason)) => {
                NodeStep::fail(format!("Dispatch rejected: {}", reason), details)
            },
            Err(reason) => NodeStep::fail(format!("Dispatch {}", reason), details),
        }
    }

    /// Apply the node deadline to an adapter call
    async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output, String> {
        tokio::time::timeout(self.node_timeout, fut)
            .await
            .map_err(|_| format!("timed out after {}ms", self.node_timeout.as_millis()))
    }
}

fn execute_compare(node: &Node, ctx: &ExecutionContext) -> NodeStep {
    let (Some(raw1), Some(raw2)) = (node.property("input1"), node.property("input2")) else {
        return NodeStep::fail("COMPARE requires 'input1' and 'input2'", Map::new());
    };
    let Some(symbol) = node.str_property("operator") else {
        return NodeStep::fail("No operator specified", Map::new());
    };

    let input1 = ctx.resolve(raw1);
    let input2 = ctx.resolve(raw2);
    let mut details = Map::new();
    details.insert("input1".to_string(), input1.clone());
    details.insert("input2".to_string(), input2.clone());
    details.insert("operation".to_string(), json!(symbol));

    let outcome = symbol
        .parse::<Operator>()
        .and_then(|op| op.apply(&input1, &input2));
    match outcome {
        Ok(holds) => {
            details.insert("result".to_string(), json!(holds));
            NodeStep::ok(Some(json!(holds)), details)
        },
        Err(e) => NodeStep::fail(e.to_string(), details),
    }
}

fn execute_logical(node: &Node, ctx: &ExecutionContext) -> NodeStep {
    let Some(Value::Array(inputs)) = node.property("inputs") else {
        return NodeStep::fail("Missing 'inputs' list", Map::new());
    };

    let values: Vec<Value> = inputs
        .iter()
        .map(|id| {
            id.as_str()
                .and_then(|id| ctx.get(id))
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect();

    let holds = if node.node_type == NodeType::And {
        values.iter().all(is_truthy)
    } else {
        values.iter().any(is_truthy)
    };

    let mut details = Map::new();
    details.insert("inputs".to_string(), Value::Array(values));
    details.insert("operation".to_string(), json!(node.node_type.as_str()));
    details.insert("result".to_string(), json!(holds));
    NodeStep::ok(Some(json!(holds)), details)
}
