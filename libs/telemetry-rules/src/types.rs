//! Rule model type definitions
//!
//! Core types for rule storage and execution:
//! - Rule: a named, independently schedulable node graph
//! - Node: one typed step of the graph with its successor lists
//! - NodeType: the closed set of node kinds (plus `Unknown` for reporting)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Default evaluation interval in seconds
pub const DEFAULT_INTERVAL_SECS: u64 = 3600;

// ============================================================================
// Node
// ============================================================================

/// Node kind
///
/// Accepts lower-case (`get_data`) and upper-case (`GET_DATA`) names. Anything
/// else is kept as `Unknown` so the engine and validator can report it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    GetData,
    Compare,
    And,
    Or,
    Publish,
    End,
    /// Entry node: succeeds without a value
    Trigger,
    Unknown(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::GetData => "get_data",
            NodeType::Compare => "compare",
            NodeType::And => "and",
            NodeType::Or => "or",
            NodeType::Publish => "publish",
            NodeType::End => "end",
            NodeType::Trigger => "trigger",
            NodeType::Unknown(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, NodeType::Unknown(_))
    }
}

impl From<String> for NodeType {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "get_data" => NodeType::GetData,
            "compare" => NodeType::Compare,
            "and" => NodeType::And,
            "or" => NodeType::Or,
            "publish" => NodeType::Publish,
            "end" => NodeType::End,
            "trigger" => NodeType::Trigger,
            _ => NodeType::Unknown(name),
        }
    }
}

impl From<NodeType> for String {
    fn from(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Unknown(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a rule graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    #[serde(rename = "type")]
    pub node_type: NodeType,

    /// Type-specific parameters; unrecognised keys are preserved
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: Map<String, Value>,

    /// Successors for non-branching nodes
    #[serde(default, deserialize_with = "null_as_default")]
    pub next: Vec<String>,

    /// COMPARE successors when the comparison holds
    #[serde(default, deserialize_with = "null_as_default")]
    pub next_true: Vec<String>,

    /// COMPARE successors when the comparison fails
    #[serde(default, deserialize_with = "null_as_default")]
    pub next_false: Vec<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            properties: Map::new(),
            next: Vec::new(),
            next_true: Vec::new(),
            next_false: Vec::new(),
        }
    }

    /// Builder helper: set a property
    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn with_next(mut self, next: &[&str]) -> Self {
        self.next = next.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_branches(mut self, next_true: &[&str], next_false: &[&str]) -> Self {
        self.next_true = next_true.iter().map(|s| s.to_string()).collect();
        self.next_false = next_false.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// String property, `None` when absent, non-string, or empty
    pub fn str_property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Successor list selected by the node's outcome
    ///
    /// COMPARE nodes pick `next_true`/`next_false` by `branch`; all other
    /// types use `next`.
    pub fn successors(&self, branch: Option<bool>) -> &[String] {
        match (&self.node_type, branch) {
            (NodeType::Compare, Some(true)) => &self.next_true,
            (NodeType::Compare, _) => &self.next_false,
            _ => &self.next,
        }
    }

    /// Every id referenced by any successor list
    pub fn all_successors(&self) -> impl Iterator<Item = &String> {
        self.next
            .iter()
            .chain(self.next_true.iter())
            .chain(self.next_false.iter())
    }
}

// ============================================================================
// Rule
// ============================================================================

/// Rule - a named, independently schedulable node graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier
    pub id: String,

    /// Rule name
    pub name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    /// Whether the rule is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Minimum seconds between evaluations
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Start of the most recent evaluation
    #[serde(default = "default_last_run", with = "iso_timestamp")]
    pub last_run: DateTime<Utc>,

    pub start_node: String,

    pub nodes: Vec<Node>,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_last_run() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Rule {
    /// Nodes indexed by id
    ///
    /// On duplicate ids the last definition wins; `validate_rule` rejects
    /// such graphs before they are scheduled.
    pub fn node_index(&self) -> HashMap<&str, &Node> {
        self.nodes.iter().map(|n| (n.id.as_str(), n)).collect()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Whether any GET_DATA node reads `topic`
    pub fn references_topic(&self, topic: &str) -> bool {
        self.nodes
            .iter()
            .any(|n| n.node_type == NodeType::GetData && n.str_property("topic") == Some(topic))
    }

    /// Topics read by this rule, in node order
    pub fn topics(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.node_type == NodeType::GetData)
            .filter_map(|n| n.str_property("topic"))
            .collect()
    }
}

/// Rule summary for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub interval: u64,
    #[serde(with = "iso_timestamp")]
    pub last_run: DateTime<Utc>,
}

impl From<&Rule> for RuleSummary {
    fn from(rule: &Rule) -> Self {
        Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            enabled: rule.enabled,
            interval: rule.interval,
            last_run: rule.last_run,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// ISO-8601 timestamps
///
/// Reads RFC 3339 or naive `YYYY-MM-DDTHH:MM:SS[.f]` (taken as UTC), writes
/// RFC 3339 with microseconds.
pub mod iso_timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid ISO-8601 timestamp: {}", raw)))
    }
}
