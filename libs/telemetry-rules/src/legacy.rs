//! Legacy condition-tree rules
//!
//! Older rules describe their logic as a nested AND/OR tree of
//! `{topic, operation, value}` conditions. [`convert_legacy`] rewrites such a
//! tree into an equivalent node graph so only one engine has to exist:
//!
//! ```text
//! get_1 -> cond_1 -> get_2 -> cond_2 -> and_3 -> gate --true--> publish -> end
//!                                                    \--false-> end
//! ```
//!
//! Conditions are emitted in post-order, each logical node after its operands,
//! so every AND/OR input is already in the context when it runs.

use crate::action::{ActionRequest, ACTION_ADD_TODO};
use crate::error::{Result, RuleError};
use crate::operator::Operator;
use crate::types::{Node, NodeType, Rule, DEFAULT_INTERVAL_SECS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const GATE_NODE_ID: &str = "gate";
pub const PUBLISH_NODE_ID: &str = "publish";
pub const END_NODE_ID: &str = "end";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// Single telemetry condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub topic: String,
    pub operation: String,
    pub value: Value,
}

/// Operand of a logical expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Expression(LogicalExpression),
    Condition(Condition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalExpression {
    pub operator: LogicalOperator,
    pub operands: Vec<Operand>,
}

/// Rule in the condition-tree format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval: u64,
    pub logic: LogicalExpression,
    /// Action fired when the tree holds; defaults to an `add_todo` naming the rule
    #[serde(default)]
    pub action: Option<ActionRequest>,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

/// Stored rule document in either format
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleDocument {
    Graph(Rule),
    Legacy(LegacyRule),
}

impl RuleDocument {
    /// Graph form of the document
    pub fn into_rule(self) -> Result<Rule> {
        match self {
            RuleDocument::Graph(rule) => Ok(rule),
            RuleDocument::Legacy(legacy) => convert_legacy(&legacy),
        }
    }
}

/// Convert a condition-tree rule into a node graph
///
/// Each condition reads its topic through a GET_DATA node, so a topic with no
/// reading fails the whole run: an OR over a missing topic never fires, even
/// when a sibling condition holds.
pub fn convert_legacy(legacy: &LegacyRule) -> Result<Rule> {
    let mut builder = GraphBuilder::default();
    let root = builder.expression(&legacy.logic)?;

    let action = legacy.action.clone().unwrap_or_else(|| default_action(legacy));

    let mut nodes = builder.chain(GATE_NODE_ID);
    nodes.push(
        Node::new(GATE_NODE_ID, NodeType::Compare)
            .with_property("input1", root)
            .with_property("input2", true)
            .with_property("operator", Operator::Eq.symbol())
            .with_branches(&[PUBLISH_NODE_ID], &[END_NODE_ID]),
    );
    nodes.push(
        Node::new(PUBLISH_NODE_ID, NodeType::Publish)
            .with_property("action", action.action)
            .with_property("action_data", Value::Object(action.action_data))
            .with_property("rule_id", legacy.id.as_str())
            .with_next(&[END_NODE_ID]),
    );
    nodes.push(Node::new(END_NODE_ID, NodeType::End));

    let start_node = nodes
        .first()
        .map(|n| n.id.clone())
        .unwrap_or_else(|| GATE_NODE_ID.to_string());

    Ok(Rule {
        id: legacy.id.clone(),
        name: legacy.name.clone(),
        description: legacy.description.clone(),
        enabled: legacy.enabled,
        interval: legacy.interval,
        last_run: DateTime::<Utc>::UNIX_EPOCH,
        start_node,
        nodes,
    })
}

fn default_action(legacy: &LegacyRule) -> ActionRequest {
    let mut data = Map::new();
    data.insert(
        "body".to_string(),
        json!(format!("Rule '{}' ({}) triggered", legacy.name, legacy.id)),
    );
    data.insert("rule_id".to_string(), json!(legacy.id));
    ActionRequest::new(ACTION_ADD_TODO, data)
}

#[derive(Default)]
struct GraphBuilder {
    nodes: Vec<Node>,
    counter: usize,
}

impl GraphBuilder {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}_{}", prefix, self.counter)
    }

    /// Emit an expression; returns the id holding its boolean
    fn expression(&mut self, expr: &LogicalExpression) -> Result<String> {
        let mut inputs = Vec::with_capacity(expr.operands.len());
        for operand in &expr.operands {
            let id = match operand {
                Operand::Condition(cond) => self.condition(cond)?,
                Operand::Expression(inner) => self.expression(inner)?,
            };
            inputs.push(Value::String(id));
        }

        let (prefix, node_type) = match expr.operator {
            LogicalOperator::And => ("and", NodeType::And),
            LogicalOperator::Or => ("or", NodeType::Or),
        };
        let id = self.next_id(prefix);
        self.nodes
            .push(Node::new(&id, node_type).with_property("inputs", Value::Array(inputs)));
        Ok(id)
    }

    fn condition(&mut self, cond: &Condition) -> Result<String> {
        cond.operation.parse::<Operator>().map_err(|e| {
            RuleError::InvalidFormat(format!("condition on '{}': {}", cond.topic, e))
        })?;

        let n = self.counter + 1;
        self.counter = n;
        let get_id = format!("get_{}", n);
        let cond_id = format!("cond_{}", n);

        self.nodes.push(
            Node::new(&get_id, NodeType::GetData).with_property("topic", cond.topic.as_str()),
        );
        self.nodes.push(
            Node::new(&cond_id, NodeType::Compare)
                .with_property("input1", get_id.as_str())
                .with_property("input2", cond.value.clone())
                .with_property("operator", cond.operation.as_str()),
        );
        Ok(cond_id)
    }

    /// Link emitted nodes into a straight line ending at `tail`
    fn chain(self, tail: &str) -> Vec<Node> {
        let ids: Vec<String> = self
            .nodes
            .iter()
            .skip(1)
            .map(|n| n.id.clone())
            .chain(std::iter::once(tail.to_string()))
            .collect();

        self.nodes
            .into_iter()
            .zip(ids)
            .map(|(mut node, next)| {
                if node.node_type == NodeType::Compare {
                    node.next_true = vec![next.clone()];
                    node.next_false = vec![next];
                } else {
                    node.next = vec![next];
                }
                node
            })
            .collect()
    }
}
