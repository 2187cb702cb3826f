//! Execution context
//!
//! Per-run scratch mapping from node id to the value that node produced.
//! Created fresh for every evaluation and dropped afterwards.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct ExecutionContext {
    values: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node_id: &str, value: Value) {
        self.values.insert(node_id.to_string(), value);
    }

    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.values.get(node_id)
    }

    /// Resolve a COMPARE input
    ///
    /// A string naming a context entry yields that entry's value; anything
    /// else is taken literally.
    pub fn resolve(&self, reference: &Value) -> Value {
        match reference {
            Value::String(key) => self
                .values
                .get(key)
                .cloned()
                .unwrap_or_else(|| reference.clone()),
            literal => literal.clone(),
        }
    }
}

/// Truthiness: null, false, zero, and empty strings/arrays/objects are falsy
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
