//! Rule graph validation
//!
//! Catches configuration errors at load time so a malformed rule is skipped
//! instead of failing half-way through a run. The walk follows the same
//! first-successor rule as the executor: every reachable path must end at an
//! END node without revisiting a node.

use crate::error::{Result, RuleError};
use crate::operator::Operator;
use crate::types::{Node, NodeType, Rule};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Validate a rule graph
pub fn validate_rule(rule: &Rule) -> Result<()> {
    if rule.nodes.is_empty() {
        return Err(RuleError::invalid_graph(&rule.id, "rule has no nodes"));
    }

    let mut ids = HashSet::with_capacity(rule.nodes.len());
    for node in &rule.nodes {
        if node.id.is_empty() {
            return Err(RuleError::invalid_graph(&rule.id, "node with empty id"));
        }
        if !ids.insert(node.id.as_str()) {
            return Err(RuleError::invalid_graph(
                &rule.id,
                format!("duplicate node id '{}'", node.id),
            ));
        }
    }

    if !ids.contains(rule.start_node.as_str()) {
        return Err(RuleError::invalid_graph(
            &rule.id,
            format!("start node '{}' not found", rule.start_node),
        ));
    }

    for node in &rule.nodes {
        check_node(node).map_err(|reason| {
            RuleError::invalid_graph(&rule.id, format!("node '{}': {}", node.id, reason))
        })?;

        if let Some(missing) = node.all_successors().find(|id| !ids.contains(id.as_str())) {
            return Err(RuleError::invalid_graph(
                &rule.id,
                format!("node '{}' references unknown node '{}'", node.id, missing),
            ));
        }
    }

    let index = rule.node_index();
    let mut marks = HashMap::new();
    walk(&index, &rule.start_node, &mut marks)
        .map_err(|reason| RuleError::invalid_graph(&rule.id, reason))
}

fn check_node(node: &Node) -> std::result::Result<(), String> {
    match &node.node_type {
        NodeType::GetData => {
            node.str_property("topic")
                .ok_or("missing 'topic'")?;
        },
        NodeType::Compare => {
            for key in ["input1", "input2"] {
                if node.property(key).is_none() {
                    return Err(format!("missing '{}'", key));
                }
            }
            let symbol = node
                .str_property("operator")
                .ok_or("missing 'operator'")?;
            symbol.parse::<Operator>().map_err(|e| e.to_string())?;
        },
        NodeType::And | NodeType::Or => match node.property("inputs") {
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => {},
            Some(_) => return Err("'inputs' must be a list of node ids".to_string()),
            None => return Err("missing 'inputs'".to_string()),
        },
        NodeType::Publish => {
            node.str_property("action")
                .ok_or("missing 'action'")?;
            if let Some(data) = node.property("action_data") {
                if !(data.is_object() || data.is_null()) {
                    return Err("'action_data' must be an object".to_string());
                }
            }
        },
        NodeType::End | NodeType::Trigger => {},
        NodeType::Unknown(name) => return Err(format!("unknown node type '{}'", name)),
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

/// Depth-first walk over walkable edges
fn walk<'a>(
    index: &HashMap<&'a str, &'a Node>,
    id: &'a str,
    marks: &mut HashMap<&'a str, Mark>,
) -> std::result::Result<(), String> {
    match marks.get(id) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::OnPath) => return Err(format!("cycle through node '{}'", id)),
        None => {},
    }

    let Some(node) = index.get(id).copied() else {
        return Err(format!("node '{}' not found", id));
    };
    if node.node_type == NodeType::End {
        marks.insert(id, Mark::Done);
        return Ok(());
    }

    let successors: Vec<Option<&'a String>> = if node.node_type == NodeType::Compare {
        vec![node.next_true.first(), node.next_false.first()]
    } else {
        vec![node.next.first()]
    };

    marks.insert(id, Mark::OnPath);
    for next in successors {
        let Some(next) = next else {
            return Err(format!("path ends at '{}' without reaching an END node", id));
        };
        walk(index, next.as_str(), marks)?;
    }
    marks.insert(id, Mark::Done);
    Ok(())
}
