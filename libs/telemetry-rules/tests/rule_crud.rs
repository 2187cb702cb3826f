//! Integration tests for rule storage and rule documents
//!
//! Uses a file-backed SQLite database in a temporary directory, and runs
//! converted legacy rules through the executor.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use telemetry_rules::{
    validate_rule, RecordingDispatcher, RuleDocument, RuleExecutor, RuleRepository,
    SqliteRuleRepository,
};
use telemetry_store::MemoryStore;

fn documents() -> serde_json::Value {
    json!([
        {
            "id": "temp_alert",
            "name": "Temperature alert",
            "description": "Mail ops when the server room overheats",
            "interval": 300,
            "last_run": "2024-01-01T00:00:00",
            "start_node": "get",
            "nodes": [
                {"id": "get", "type": "GET_DATA", "properties": {"topic": "sensors/room/temp"}, "next": ["cmp"]},
                {"id": "cmp", "type": "COMPARE",
                 "properties": {"input1": "get", "input2": "30", "operator": ">"},
                 "next_true": ["pub"], "next_false": ["end"]},
                {"id": "pub", "type": "PUBLISH",
                 "properties": {"action": "email", "action_data": {"to": "ops@example.com", "body": "Room too hot"}},
                 "next": ["end"]},
                {"id": "end", "type": "END"}
            ]
        },
        {
            "id": "door_cold",
            "name": "Door open while cold",
            "enabled": false,
            "logic": {
                "operator": "AND",
                "operands": [
                    {"topic": "door/front", "operation": "==", "value": "open"},
                    {"topic": "sensors/out/temp", "operation": "<", "value": 5}
                ]
            }
        }
    ])
}

async fn file_repo() -> (tempfile::TempDir, SqliteRuleRepository) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("rules.db").display());
    let repo = SqliteRuleRepository::connect(&url).await.unwrap();
    (dir, repo)
}

async fn import(repo: &SqliteRuleRepository) {
    let docs: Vec<RuleDocument> = serde_json::from_value(documents()).unwrap();
    for doc in docs {
        let rule = doc.into_rule().unwrap();
        validate_rule(&rule).unwrap();
        repo.upsert_rule(&rule).await.unwrap();
    }
}

#[tokio::test]
async fn test_import_both_formats() {
    let (_dir, repo) = file_repo().await;
    import(&repo).await;

    let rules = repo.list_rules().await.unwrap();
    let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["door_cold", "temp_alert"]);

    let temp = &rules[1];
    assert_eq!(temp.interval, 300);
    assert_eq!(
        temp.last_run,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    );
    assert!(!rules[0].enabled);
    assert_eq!(rules[0].last_run, DateTime::<Utc>::UNIX_EPOCH);
}

#[tokio::test]
async fn test_reopen_keeps_rules() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("rules.db").display());
    {
        let repo = SqliteRuleRepository::connect(&url).await.unwrap();
        import(&repo).await;
        repo.pool().close().await;
    }

    let repo = SqliteRuleRepository::connect(&url).await.unwrap();
    assert_eq!(repo.list_rules().await.unwrap().len(), 2);
    assert!(repo.set_enabled("door_cold", true).await.unwrap());
    assert!(repo.get_rule("door_cold").await.unwrap().unwrap().enabled);
}

#[tokio::test]
async fn test_stored_graph_rule_executes() {
    let (_dir, repo) = file_repo().await;
    import(&repo).await;

    let store = Arc::new(MemoryStore::new());
    store.insert("sensors/room/temp", json!(31.5), 1);
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let executor = RuleExecutor::new(store, dispatcher.clone());

    let rule = repo.get_rule("temp_alert").await.unwrap().unwrap();
    let result = executor.execute(&rule).await;
    assert!(result.triggered);
    assert_eq!(dispatcher.requests()[0].action, "email");
}

#[tokio::test]
async fn test_converted_legacy_rule_semantics() {
    let (_dir, repo) = file_repo().await;
    import(&repo).await;
    let rule = repo.get_rule("door_cold").await.unwrap().unwrap();

    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let executor = RuleExecutor::new(store.clone(), dispatcher.clone());

    store.insert("door/front", json!("open"), 1);
    store.insert("sensors/out/temp", json!("3"), 1);
    let result = executor.execute(&rule).await;
    assert!(result.triggered);
    assert_eq!(dispatcher.requests()[0].action, "add_todo");

    // One operand false: the gate routes to END
    store.insert("door/front", json!("closed"), 2);
    let result = executor.execute(&rule).await;
    assert!(!result.triggered);
    assert!(result.error.is_none());
    assert_eq!(result.execution_path.last().map(String::as_str), Some("end"));
    assert_eq!(dispatcher.requests().len(), 1);
}
