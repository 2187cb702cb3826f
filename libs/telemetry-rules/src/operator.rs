//! Operator library
//!
//! Pure comparison and membership operators over JSON values. When exactly
//! one operand of an ordering/equality operator is a string, it is coerced to
//! the other operand's type first; failure to coerce is an `OperatorError`,
//! which the engine reports as a local node failure.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Operator evaluation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperatorError {
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Type conversion failed: cannot convert {text} to {target} (left={left}, right={right})")]
    Coercion {
        text: String,
        target: &'static str,
        left: Value,
        right: Value,
    },

    #[error("Values are not comparable: left={left}, right={right}")]
    NotComparable { left: Value, right: Value },

    #[error("Membership test needs an array, string or object on the left, got {0}")]
    NotContainer(Value),
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not_contains")]
    NotContains,
}

impl Operator {
    pub const ALL: [Operator; 8] = [
        Operator::Gt,
        Operator::Ge,
        Operator::Lt,
        Operator::Le,
        Operator::Eq,
        Operator::Ne,
        Operator::Contains,
        Operator::NotContains,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
        }
    }

    /// Apply the operator to `left op right`
    pub fn apply(&self, left: &Value, right: &Value) -> Result<bool, OperatorError> {
        match self {
            Operator::Contains => contains(left, right),
            Operator::NotContains => contains(left, right).map(|found| !found),
            Operator::Eq | Operator::Ne => {
                let (l, r) = coerce_operands(left, right)?;
                let equal = values_equal(&l, &r);
                Ok(if *self == Operator::Eq { equal } else { !equal })
            },
            Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le => {
                let (l, r) = coerce_operands(left, right)?;
                let ord = ordering(&l, &r).ok_or_else(|| OperatorError::NotComparable {
                    left: left.clone(),
                    right: right.clone(),
                })?;
                Ok(match self {
                    Operator::Gt => ord == Ordering::Greater,
                    Operator::Ge => ord != Ordering::Less,
                    Operator::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                })
            },
        }
    }
}

impl FromStr for Operator {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.symbol() == s)
            .ok_or_else(|| OperatorError::UnknownOperator(s.to_string()))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Coerce a lone string operand to the other operand's type
///
/// Returns the operands unchanged when both or neither are strings.
pub fn coerce_operands(left: &Value, right: &Value) -> Result<(Value, Value), OperatorError> {
    match (left, right) {
        (Value::String(text), other) if !other.is_string() => {
            Ok((coerce_text(text, other, left, right)?, other.clone()))
        },
        (other, Value::String(text)) if !other.is_string() => {
            Ok((other.clone(), coerce_text(text, other, left, right)?))
        },
        _ => Ok((left.clone(), right.clone())),
    }
}

fn coerce_text(
    text: &str,
    like: &Value,
    left: &Value,
    right: &Value,
) -> Result<Value, OperatorError> {
    let trimmed = text.trim();
    let coerced = match like {
        Value::Number(_) => trimmed
            .parse::<i64>()
            .ok()
            .map(Value::from)
            .or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
            }),
        Value::Bool(_) => match trimmed.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Array(_) => serde_json::from_str::<Value>(trimmed)
            .ok()
            .filter(Value::is_array),
        Value::Object(_) => serde_json::from_str::<Value>(trimmed)
            .ok()
            .filter(Value::is_object),
        Value::Null | Value::String(_) => None,
    };

    coerced.ok_or_else(|| OperatorError::Coercion {
        text: text.to_string(),
        target: type_name(like),
        left: left.clone(),
        right: right.clone(),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Structural equality; numbers agree with the ordering operators
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b) == Some(Ordering::Equal),
        _ => left == right,
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Integers compare exactly; anything involving a float compares as f64
fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return Some(a.cmp(&b));
    }
    // One side above i64::MAX, the other negative
    if a.is_i64() && b.is_u64() {
        return Some(Ordering::Less);
    }
    if a.is_u64() && b.is_i64() {
        return Some(Ordering::Greater);
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Whether `needle` is a member of `haystack`
///
/// Arrays test element equality, objects test key presence, strings test
/// substring presence (scalar needles are rendered as text).
fn contains(haystack: &Value, needle: &Value) -> Result<bool, OperatorError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        Value::Object(map) => Ok(needle.as_str().is_some_and(|key| map.contains_key(key))),
        Value::String(text) => match needle {
            Value::String(s) => Ok(text.contains(s.as_str())),
            Value::Number(n) => Ok(text.contains(&n.to_string())),
            Value::Bool(b) => Ok(text.contains(&b.to_string())),
            _ => Err(OperatorError::NotComparable {
                left: haystack.clone(),
                right: needle.clone(),
            }),
        },
        other => Err(OperatorError::NotContainer(other.clone())),
    }
}
