//! Rule Scheduler - interval-gated rule evaluation
//!
//! Each evaluation pass:
//! 1. Loads rules from the repository and keeps the due ones
//! 2. Claims each rule (conditional `last_run = now`) so overlapping passes
//!    cannot select it twice
//! 3. Validates and executes claimed rules concurrently, bounded by
//!    `max_concurrent_rules`
//!
//! The stamp is kept whatever the outcome, so a failing rule still waits a
//! full interval before its next attempt.

use crate::error::Result;
use crate::executor::{ExecutionResult, NodeOutcome, RuleExecutor};
use crate::logger::RuleLoggerManager;
use crate::repository::RuleRepository;
use crate::types::{iso_timestamp, Rule};
use crate::validation::validate_rule;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_store::{SystemTimeProvider, TimeProvider};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default scheduler tick interval (1s)
pub const DEFAULT_TICK_MS: u64 = 1000;

/// Default number of rules evaluated at once
pub const DEFAULT_MAX_CONCURRENT_RULES: usize = 8;

/// Whether `rule` should run at `now`
///
/// Enabled and at least `interval` seconds since `last_run`; the boundary is
/// inclusive.
pub fn is_due(rule: &Rule, now: DateTime<Utc>) -> bool {
    let interval_ms = i64::try_from(rule.interval)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    rule.enabled && (now - rule.last_run).num_milliseconds() >= interval_ms
}

/// Rules due at `now`, in input order
pub fn due_rules(rules: &[Rule], now: DateTime<Utc>) -> Vec<&Rule> {
    rules.iter().filter(|r| is_due(r, now)).collect()
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub max_concurrent_rules: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            max_concurrent_rules: DEFAULT_MAX_CONCURRENT_RULES,
        }
    }
}

/// Per-rule entry of an evaluation report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleReport {
    pub rule_id: String,
    pub rule_name: String,
    pub triggered: bool,
    #[serde(with = "iso_timestamp")]
    pub evaluation_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_results: Option<Vec<NodeOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RuleReport {
    fn executed(rule: &Rule, at: DateTime<Utc>, result: ExecutionResult) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            triggered: result.triggered,
            evaluation_time: at,
            node_results: Some(result.trace),
            error: result.error.map(|e| e.to_string()),
        }
    }

    fn failed(rule: &Rule, at: DateTime<Utc>, error: String) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            triggered: false,
            evaluation_time: at,
            node_results: None,
            error: Some(error),
        }
    }
}

/// Result of one evaluation pass
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub status: String,
    #[serde(with = "iso_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub rule_results: Vec<RuleReport>,
}

impl EvaluationReport {
    fn new(timestamp: DateTime<Utc>, rule_results: Vec<RuleReport>) -> Self {
        Self {
            status: "success".to_string(),
            timestamp,
            rule_results,
        }
    }

    pub fn triggered_count(&self) -> usize {
        self.rule_results.iter().filter(|r| r.triggered).count()
    }
}

/// Scheduler status information
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub due_rules: usize,
    pub tick_interval_ms: u64,
}

/// Rule Scheduler - evaluates due rules on every tick
pub struct RuleScheduler {
    repository: Arc<dyn RuleRepository>,
    executor: Arc<RuleExecutor>,
    time: Arc<dyn TimeProvider>,
    loggers: Option<Arc<RuleLoggerManager>>,
    config: SchedulerConfig,
    shutdown: Notify,
    running: AtomicBool,
}

impl RuleScheduler {
    pub fn new(
        repository: Arc<dyn RuleRepository>,
        executor: Arc<RuleExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            executor,
            time: Arc::new(SystemTimeProvider),
            loggers: None,
            config,
            shutdown: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Write per-rule log files through `loggers`
    pub fn with_rule_logs(mut self, loggers: Arc<RuleLoggerManager>) -> Self {
        self.loggers = Some(loggers);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    /// Evaluate every due, enabled rule
    pub async fn evaluate_due(&self, now: DateTime<Utc>) -> Result<EvaluationReport> {
        let rules = self.repository.list_rules().await?;
        let due: Vec<Rule> = rules.into_iter().filter(|r| is_due(r, now)).collect();
        debug!("{} rule(s) due", due.len());

        let results = self.evaluate_batch(due, now).await;
        Ok(EvaluationReport::new(now, results))
    }

    /// Evaluate enabled rules reading `topic`, ignoring interval gating
    pub async fn evaluate_topic(&self, topic: &str, now: DateTime<Utc>) -> Result<EvaluationReport> {
        let rules = self.repository.list_rules().await?;
        let matching: Vec<Rule> = rules
            .into_iter()
            .filter(|r| r.enabled && r.references_topic(topic))
            .collect();
        info!(
            "Immediate evaluation of {} rule(s) for topic {}",
            matching.len(),
            topic
        );

        let results = self.evaluate_batch(matching, now).await;
        Ok(EvaluationReport::new(now, results))
    }

    /// Manually evaluate one rule, ignoring interval gating
    ///
    /// `Ok(None)` when the rule does not exist. Disabled rules are reported,
    /// not executed.
    pub async fn evaluate_rule(&self, rule_id: &str, now: DateTime<Utc>) -> Result<Option<RuleReport>> {
        let Some(rule) = self.repository.get_rule(rule_id).await? else {
            return Ok(None);
        };
        if !rule.enabled {
            return Ok(Some(RuleReport::failed(&rule, now, "Rule is disabled".to_string())));
        }

        let report = match self.evaluate_one(rule.clone(), now).await {
            Some(report) => report,
            None => RuleReport::failed(
                &rule,
                now,
                "Rule is being evaluated by a concurrent pass".to_string(),
            ),
        };
        Ok(Some(report))
    }

    async fn evaluate_batch(&self, rules: Vec<Rule>, now: DateTime<Utc>) -> Vec<RuleReport> {
        stream::iter(rules)
            .map(|rule| self.evaluate_one(rule, now))
            .buffered(self.config.max_concurrent_rules.max(1))
            .filter_map(|report| async move { report })
            .collect()
            .await
    }

    /// Claim, validate, and execute one rule
    ///
    /// `None` when another pass claimed the rule first.
    async fn evaluate_one(&self, rule: Rule, now: DateTime<Utc>) -> Option<RuleReport> {
        match self.repository.claim(&rule.id, rule.last_run, now).await {
            Ok(true) => {},
            Ok(false) => {
                debug!("Rule {} already claimed, skipping", rule.id);
                return None;
            },
            Err(e) => {
                error!("Rule {} claim error: {}", rule.id, e);
                return Some(RuleReport::failed(
                    &rule,
                    self.time.now(),
                    format!("Failed to claim rule: {}", e),
                ));
            },
        }

        if let Err(e) = validate_rule(&rule) {
            warn!("Rule {} skipped: {}", rule.id, e);
            if let Some(loggers) = &self.loggers {
                loggers.get_logger(&rule.id).log_skipped(&e.to_string());
            }
            return Some(RuleReport::failed(&rule, self.time.now(), e.to_string()));
        }

        let result = self.executor.execute(&rule).await;
        if result.triggered {
            info!("Rule '{}' ({}) triggered", rule.name, rule.id);
        } else if let Some(e) = &result.error {
            warn!("Rule '{}' ({}) failed: {}", rule.name, rule.id, e);
        } else {
            debug!("Rule '{}' not triggered", rule.name);
        }

        if let Some(loggers) = &self.loggers {
            loggers.get_logger(&rule.id).log_execution(&result);
        }

        Some(RuleReport::executed(&rule, self.time.now(), result))
    }

    /// Run the scheduler loop until [`stop`](Self::stop) is called
    ///
    /// Topics received on `immediate_rx` trigger an out-of-interval evaluation
    /// of the rules reading them.
    pub async fn run(&self, mut immediate_rx: Option<mpsc::Receiver<String>>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        info!(
            "Starting rule scheduler with {}ms tick",
            self.config.tick_interval.as_millis()
        );

        let mut tick = interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut immediate_open = immediate_rx.is_some();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.evaluate_due(self.time.now()).await {
                        Ok(report) if !report.rule_results.is_empty() => debug!(
                            "Evaluated {} rule(s), {} triggered",
                            report.rule_results.len(),
                            report.triggered_count()
                        ),
                        Ok(_) => {},
                        Err(e) => error!("Scheduler tick error: {}", e),
                    }
                }
                topic = next_topic(&mut immediate_rx), if immediate_open => {
                    match topic {
                        Some(topic) => {
                            if let Err(e) = self.evaluate_topic(&topic, self.time.now()).await {
                                error!("Immediate evaluation for {} failed: {}", topic, e);
                            }
                        },
                        None => {
                            info!("Immediate evaluation channel closed");
                            immediate_open = false;
                        },
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Rule scheduler stopped");
    }

    /// Stop the scheduler
    pub fn stop(&self) {
        info!("Stopping rule scheduler...");
        self.shutdown.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        let rules = self.repository.list_rules().await?;
        let now = self.time.now();

        Ok(SchedulerStatus {
            running: self.is_running(),
            total_rules: rules.len(),
            enabled_rules: rules.iter().filter(|r| r.enabled).count(),
            due_rules: due_rules(&rules, now).len(),
            tick_interval_ms: self.config.tick_interval.as_millis() as u64,
        })
    }
}

async fn next_topic(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
