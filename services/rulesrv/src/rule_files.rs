//! Rule document files for the `validate` and `import` commands
//!
//! A file holds either a single rule document or an array of them, in JSON
//! or YAML (by extension). Graph rules and legacy condition trees may be mixed.

use crate::error::{Result, RulesrvError};
use serde::Deserialize;
use std::path::Path;
use telemetry_rules::{validate_rule, Rule, RuleDocument, RuleRepository};
use tracing::info;

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Many(Vec<RuleDocument>),
    One(Box<RuleDocument>),
}

/// Parse `content` as rule documents and convert them to graph rules
pub fn parse_rules(content: &str, yaml: bool) -> Result<Vec<Rule>> {
    let file: RuleFile = if yaml {
        serde_yaml::from_str(content)
            .map_err(|e| RulesrvError::InvalidRequest(format!("Invalid YAML: {}", e)))?
    } else {
        serde_json::from_str(content)
            .map_err(|e| RulesrvError::InvalidRequest(format!("Invalid JSON: {}", e)))?
    };

    let docs = match file {
        RuleFile::Many(docs) => docs,
        RuleFile::One(doc) => vec![*doc],
    };
    docs.into_iter()
        .map(|doc| doc.into_rule().map_err(RulesrvError::from))
        .collect()
}

/// Read and convert every rule in `path`
pub fn load_rules(path: &Path) -> Result<Vec<Rule>> {
    let content = std::fs::read_to_string(path)?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    parse_rules(&content, yaml)
}

/// Validate every rule, collecting `(rule_id, reason)` for the invalid ones
pub fn check_rules(rules: &[Rule]) -> Vec<(String, String)> {
    rules
        .iter()
        .filter_map(|rule| {
            validate_rule(rule)
                .err()
                .map(|e| (rule.id.clone(), e.to_string()))
        })
        .collect()
}

/// Validate and upsert `rules`; nothing is written if any rule is invalid
pub async fn import_rules(repository: &dyn RuleRepository, rules: &[Rule]) -> Result<usize> {
    if let Some((id, reason)) = check_rules(rules).into_iter().next() {
        return Err(RulesrvError::InvalidRequest(format!(
            "Rule {} rejected: {}",
            id, reason
        )));
    }

    for rule in rules {
        repository.upsert_rule(rule).await?;
        info!("Imported rule {} ({})", rule.id, rule.name);
    }
    Ok(rules.len())
}
