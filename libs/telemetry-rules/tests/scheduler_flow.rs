//! End-to-end scheduling tests
//!
//! Wires the scheduler to in-memory rules, telemetry and a recording
//! dispatcher, and checks gating, claiming, failure isolation and the
//! background loop.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use telemetry_rules::{
    MemoryRuleRepository, Node, NodeType, RecordingDispatcher, Rule, RuleExecutor,
    RuleLoggerManager, RuleRepository, RuleScheduler, SchedulerConfig,
};
use telemetry_store::{FixedTimeProvider, MemoryStore, TimeProvider};
use tokio::sync::mpsc;

const NOW_MS: i64 = 1_700_000_000_000;

struct Harness {
    repo: Arc<MemoryRuleRepository>,
    store: Arc<MemoryStore>,
    dispatcher: Arc<RecordingDispatcher>,
    clock: Arc<FixedTimeProvider>,
    scheduler: Arc<RuleScheduler>,
}

fn harness(rules: Vec<Rule>) -> Harness {
    let repo = Arc::new(MemoryRuleRepository::with_rules(rules));
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = Arc::new(FixedTimeProvider::new(NOW_MS));
    let executor = Arc::new(RuleExecutor::new(store.clone(), dispatcher.clone()));
    let scheduler = Arc::new(
        RuleScheduler::new(
            repo.clone(),
            executor,
            SchedulerConfig {
                tick_interval: Duration::from_millis(10),
                max_concurrent_rules: 4,
            },
        )
        .with_time_provider(clock.clone()),
    );

    Harness {
        repo,
        store,
        dispatcher,
        clock,
        scheduler,
    }
}

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(NOW_MS).unwrap()
}

/// `GET_DATA(topic) -> COMPARE(> threshold) -> {true: PUBLISH(email), false: END}`
fn threshold_rule(id: &str, topic: &str, threshold: i64, last_run: DateTime<Utc>) -> Rule {
    Rule {
        id: id.to_string(),
        name: format!("{} alert", id),
        description: String::new(),
        enabled: true,
        interval: 60,
        last_run,
        start_node: "get".to_string(),
        nodes: vec![
            Node::new("get", NodeType::GetData)
                .with_property("topic", topic)
                .with_next(&["cmp"]),
            Node::new("cmp", NodeType::Compare)
                .with_property("input1", "get")
                .with_property("input2", threshold)
                .with_property("operator", ">")
                .with_branches(&["pub"], &["end"]),
            Node::new("pub", NodeType::Publish)
                .with_property("action", "email")
                .with_property("action_data", json!({"to": "ops@example.com", "body": id}))
                .with_next(&["end"]),
            Node::new("end", NodeType::End),
        ],
    }
}

fn long_ago() -> DateTime<Utc> {
    now() - ChronoDuration::hours(1)
}

#[tokio::test]
async fn test_due_rule_triggers_and_stamps_last_run() {
    let h = harness(vec![threshold_rule("temp", "sensors/1/temp", 30, long_ago())]);
    h.store.insert("sensors/1/temp", json!(35), 1);

    let report = h.scheduler.evaluate_due(now()).await.unwrap();
    assert_eq!(report.status, "success");
    assert_eq!(report.rule_results.len(), 1);
    let result = &report.rule_results[0];
    assert!(result.triggered);
    assert_eq!(result.rule_name, "temp alert");
    assert_eq!(result.node_results.as_ref().unwrap().len(), 3);

    assert_eq!(h.dispatcher.requests().len(), 1);
    assert_eq!(h.repo.get_rule("temp").await.unwrap().unwrap().last_run, now());

    // Same instant: the rule is no longer due
    let report = h.scheduler.evaluate_due(now()).await.unwrap();
    assert!(report.rule_results.is_empty());
}

#[tokio::test]
async fn test_interval_gating() {
    let h = harness(vec![threshold_rule("temp", "sensors/1/temp", 30, now())]);
    h.store.insert("sensors/1/temp", json!(35), 1);

    let early = now() + ChronoDuration::seconds(59);
    assert!(h.scheduler.evaluate_due(early).await.unwrap().rule_results.is_empty());

    let on_time = now() + ChronoDuration::seconds(60);
    assert_eq!(h.scheduler.evaluate_due(on_time).await.unwrap().rule_results.len(), 1);
}

#[tokio::test]
async fn test_failures_are_isolated_per_rule() {
    let mut broken = threshold_rule("broken", "sensors/2/temp", 30, long_ago());
    broken.start_node = "missing".to_string();
    let h = harness(vec![
        broken,
        threshold_rule("no_data", "sensors/9/temp", 30, long_ago()),
        threshold_rule("temp", "sensors/1/temp", 30, long_ago()),
    ]);
    h.store.insert("sensors/1/temp", json!(40), 1);

    let report = h.scheduler.evaluate_due(now()).await.unwrap();
    assert_eq!(report.status, "success");
    assert_eq!(report.rule_results.len(), 3);

    let by_id = |id: &str| {
        report
            .rule_results
            .iter()
            .find(|r| r.rule_id == id)
            .unwrap()
            .clone()
    };

    let broken = by_id("broken");
    assert!(!broken.triggered);
    assert!(broken.node_results.is_none());
    assert!(broken.error.unwrap().contains("start node 'missing'"));

    let no_data = by_id("no_data");
    assert!(!no_data.triggered);
    assert_eq!(no_data.node_results.unwrap().len(), 1);
    assert!(no_data.error.is_some());

    assert!(by_id("temp").triggered);

    // Failed runs still consume their interval
    for id in ["broken", "no_data", "temp"] {
        assert_eq!(h.repo.get_rule(id).await.unwrap().unwrap().last_run, now());
    }
}

#[tokio::test]
async fn test_overlapping_passes_claim_once() {
    let h = harness(vec![threshold_rule("temp", "sensors/1/temp", 30, long_ago())]);
    h.store.insert("sensors/1/temp", json!(35), 1);

    let (a, b) = tokio::join!(
        h.scheduler.evaluate_due(now()),
        h.scheduler.evaluate_due(now())
    );
    let total = a.unwrap().rule_results.len() + b.unwrap().rule_results.len();
    assert_eq!(total, 1);
    assert_eq!(h.dispatcher.requests().len(), 1);
}

#[tokio::test]
async fn test_evaluate_topic_bypasses_interval() {
    let h = harness(vec![
        threshold_rule("temp", "sensors/1/temp", 30, now()),
        threshold_rule("other", "sensors/2/temp", 30, now()),
    ]);
    h.store.insert("sensors/1/temp", json!(35), 1);

    let report = h
        .scheduler
        .evaluate_topic("sensors/1/temp", now() + ChronoDuration::seconds(1))
        .await
        .unwrap();
    assert_eq!(report.rule_results.len(), 1);
    assert_eq!(report.rule_results[0].rule_id, "temp");
    assert!(report.rule_results[0].triggered);
}

#[tokio::test]
async fn test_evaluate_rule_manual_trigger() {
    let mut disabled = threshold_rule("off", "sensors/1/temp", 30, now());
    disabled.enabled = false;
    let h = harness(vec![threshold_rule("temp", "sensors/1/temp", 30, now()), disabled]);
    h.store.insert("sensors/1/temp", json!(10), 1);

    let report = h.scheduler.evaluate_rule("temp", now()).await.unwrap().unwrap();
    assert!(!report.triggered);
    assert!(report.error.is_none());

    let report = h.scheduler.evaluate_rule("off", now()).await.unwrap().unwrap();
    assert_eq!(report.error.as_deref(), Some("Rule is disabled"));

    assert!(h.scheduler.evaluate_rule("ghost", now()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_status_counts() {
    let mut disabled = threshold_rule("off", "t", 30, long_ago());
    disabled.enabled = false;
    let h = harness(vec![
        threshold_rule("due", "t", 30, long_ago()),
        threshold_rule("recent", "t", 30, now()),
        disabled,
    ]);

    let status = h.scheduler.status().await.unwrap();
    assert!(!status.running);
    assert_eq!(status.total_rules, 3);
    assert_eq!(status.enabled_rules, 2);
    assert_eq!(status.due_rules, 1);
    assert_eq!(status.tick_interval_ms, 10);
}

async fn wait_for_requests(dispatcher: &RecordingDispatcher, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.requests().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_run_loop_ticks_and_stops() {
    let h = harness(vec![threshold_rule("temp", "sensors/1/temp", 30, long_ago())]);
    h.store.insert("sensors/1/temp", json!(35), 1);

    let scheduler = h.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run(None).await });

    wait_for_requests(&h.dispatcher, 1).await;
    assert!(h.scheduler.is_running());

    h.scheduler.stop();
    handle.await.unwrap();
    assert!(!h.scheduler.is_running());
    assert_eq!(h.dispatcher.requests().len(), 1);
}

#[tokio::test]
async fn test_run_loop_immediate_topic() {
    // Just evaluated: only the immediate path can fire it
    let h = harness(vec![threshold_rule("door", "door/front", 0, now())]);
    h.store.insert("door/front", json!(1), 1);

    let (tx, rx) = mpsc::channel(4);
    let scheduler = h.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run(Some(rx)).await });

    h.clock.advance(1_000);
    tx.send("door/front".to_string()).await.unwrap();
    wait_for_requests(&h.dispatcher, 1).await;

    h.scheduler.stop();
    handle.await.unwrap();
    assert_eq!(
        h.repo.get_rule("door").await.unwrap().unwrap().last_run,
        h.clock.now()
    );
}

#[tokio::test]
async fn test_rule_logs_written() {
    let dir = tempfile::tempdir().unwrap();
    let loggers = Arc::new(RuleLoggerManager::new(dir.path().to_path_buf()));

    let repo = Arc::new(MemoryRuleRepository::with_rules([threshold_rule(
        "temp",
        "sensors/1/temp",
        30,
        long_ago(),
    )]));
    let store = Arc::new(MemoryStore::new());
    store.insert("sensors/1/temp", json!(35), 1);
    let executor = Arc::new(RuleExecutor::new(store, Arc::new(RecordingDispatcher::new())));
    let scheduler =
        RuleScheduler::new(repo, executor, SchedulerConfig::default()).with_rule_logs(loggers.clone());

    scheduler.evaluate_due(now()).await.unwrap();

    let logger = loggers.get_logger("temp");
    let entries: Vec<_> = std::fs::read_dir(logger.log_dir()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let content = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
    assert!(content.contains("[RULE] temp sensors/1/temp=35 | TRIGGERED | email OK"));
}
