//! Rule execution logger
//!
//! Provides independent log files for each rule, one line per evaluation with
//! the telemetry readings, the verdict, and the dispatched actions or error.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use crate::action::ActionRequest;
use crate::executor::ExecutionResult;

/// Logger for individual rule execution
pub struct RuleLogger {
    rule_id: String,
    log_dir: PathBuf,
    current_date: Mutex<String>,
    current_file: Mutex<Option<File>>,
}

impl RuleLogger {
    /// Create a new RuleLogger for a specific rule
    ///
    /// Log files will be created in: `{log_root}/rules/{rule_id}/`
    /// with naming format: `{YYYYMMDD}_{rule_id}.log`
    pub fn new(log_root: &Path, rule_id: &str) -> Self {
        let rule_dir = log_root.join("rules").join(safe_path_segment(rule_id));
        if let Err(e) = fs::create_dir_all(&rule_dir) {
            warn!("Log dir err {:?}: {}", rule_dir, e);
        }

        Self {
            rule_id: rule_id.to_string(),
            log_dir: rule_dir,
            current_date: Mutex::new(String::new()),
            current_file: Mutex::new(None),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Log one evaluation
    ///
    /// Format: `timestamp [RULE] rule_id readings | verdict | actions-or-error`
    pub fn log_execution(&self, result: &ExecutionResult) {
        let readings = result.readings();
        let readings_str = if readings.is_empty() {
            "-".to_string()
        } else {
            readings
                .iter()
                .map(|(topic, value)| format!("{}={}", topic, format_value(value)))
                .collect::<Vec<_>>()
                .join(" ")
        };

        let verdict = if result.triggered {
            "TRIGGERED"
        } else {
            "not triggered"
        };

        let error = result.error.as_ref().map(|e| e.to_string());
        let actions_str = format_actions(&result.actions, error.as_deref());

        let message = format!("{} | {} | {}", readings_str, verdict, actions_str);
        self.write_line(&message);
    }

    /// Log a rule that was skipped before execution
    pub fn log_skipped(&self, reason: &str) {
        self.write_line(&format!("- | skipped | {}", reason));
    }

    fn write_line(&self, message: &str) {
        let now = Utc::now();
        let today = now.format("%Y%m%d").to_string();
        let timestamp = now.format("%Y-%m-%dT%H:%M:%S%.3fZ");

        // Check if we need to rotate the file (new day)
        let Ok(mut current_date) = self.current_date.lock() else {
            warn!("Date lock fail");
            return;
        };
        let Ok(mut file_guard) = self.current_file.lock() else {
            warn!("File lock fail");
            return;
        };

        if *current_date != today {
            *current_date = today.clone();
            let file_path = self
                .log_dir
                .join(format!("{}_{}.log", today, safe_path_segment(&self.rule_id)));

            match OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)
            {
                Ok(file) => *file_guard = Some(file),
                Err(e) => {
                    warn!("Log open err {:?}: {}", file_path, e);
                    return;
                },
            }
        }

        if let Some(ref mut file) = *file_guard {
            let line = format!("{} [RULE] {} {}\n", timestamp, self.rule_id, message);
            if let Err(e) = file.write_all(line.as_bytes()) {
                warn!("Log write err: {}", e);
            }
        }
    }
}

/// Rule ids come from users; keep them inside the log directory
fn safe_path_segment(rule_id: &str) -> String {
    rule_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Format dispatched actions for logging
fn format_actions(actions: &[ActionRequest], error: Option<&str>) -> String {
    if let Some(err) = error {
        return err.to_string();
    }

    if actions.is_empty() {
        return "no action".to_string();
    }

    actions
        .iter()
        .map(|a| format!("{} OK", a.action))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Manager for multiple rule loggers
pub struct RuleLoggerManager {
    log_root: PathBuf,
    loggers: DashMap<String, Arc<RuleLogger>>,
}

impl RuleLoggerManager {
    pub fn new(log_root: PathBuf) -> Self {
        Self {
            log_root,
            loggers: DashMap::new(),
        }
    }

    /// Get or create a logger for a specific rule
    pub fn get_logger(&self, rule_id: &str) -> Arc<RuleLogger> {
        if let Some(logger) = self.loggers.get(rule_id) {
            return Arc::clone(logger.value());
        }

        self.loggers
            .entry(rule_id.to_string())
            .or_insert_with(|| Arc::new(RuleLogger::new(&self.log_root, rule_id)))
            .value()
            .clone()
    }

    /// Remove a logger (e.g., when rule is deleted)
    pub fn remove_logger(&self, rule_id: &str) {
        self.loggers.remove(rule_id);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_format_actions_success() {
        let actions = vec![
            ActionRequest::new("email", Map::new()),
            ActionRequest::new("add_todo", Map::new()),
        ];
        assert_eq!(format_actions(&actions, None), "email OK, add_todo OK");
    }

    #[test]
    fn test_format_actions_with_error() {
        assert_eq!(format_actions(&[], Some("read failed")), "read failed");
    }

    #[test]
    fn test_format_actions_empty() {
        assert_eq!(format_actions(&[], None), "no action");
    }

    #[test]
    fn test_safe_path_segment() {
        assert_eq!(safe_path_segment("../etc/passwd"), "___etc_passwd");
        assert_eq!(safe_path_segment("temp-alert_1"), "temp-alert_1");
    }

    #[test]
    fn test_log_skipped_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RuleLoggerManager::new(dir.path().to_path_buf());
        let logger = manager.get_logger("r1");
        logger.log_skipped("Invalid rule graph");

        let files: Vec<_> = fs::read_dir(logger.log_dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let content = fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(content.contains("[RULE] r1 - | skipped | Invalid rule graph"));

        assert!(Arc::ptr_eq(&logger, &manager.get_logger("r1")));
        manager.remove_logger("r1");
        assert!(!Arc::ptr_eq(&logger, &manager.get_logger("r1")));
    }
}
