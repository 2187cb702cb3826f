//! Rules Repository - rule persistence
//!
//! [`RuleRepository`] is the scheduler's view of stored rules. `claim` is the
//! only write the engine performs: a conditional update of `last_run` that
//! succeeds for exactly one of several concurrent evaluators.

use crate::error::{Result, RuleError};
use crate::types::{iso_timestamp, Node, Rule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[async_trait]
pub trait RuleRepository: Send + Sync + 'static {
    /// All stored rules ordered by id; unreadable rows are logged and skipped
    async fn list_rules(&self) -> Result<Vec<Rule>>;

    async fn get_rule(&self, id: &str) -> Result<Option<Rule>>;

    /// Insert or replace a rule, `last_run` included
    async fn upsert_rule(&self, rule: &Rule) -> Result<()>;

    /// Returns `false` when the rule does not exist
    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool>;

    /// Stamp `last_run = now` if it still equals `expected_last_run`
    ///
    /// `Ok(false)` means another evaluator claimed the rule first; an unknown
    /// id is `RuleError::NotFound`.
    async fn claim(
        &self,
        id: &str,
        expected_last_run: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

// ============================================================================
// In-memory repository
// ============================================================================

#[derive(Default)]
pub struct MemoryRuleRepository {
    rules: RwLock<HashMap<String, Rule>>,
}

impl MemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            rules: RwLock::new(rules.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }
}

#[async_trait]
impl RuleRepository for MemoryRuleRepository {
    async fn list_rules(&self) -> Result<Vec<Rule>> {
        let mut rules: Vec<Rule> = self.rules.read().await.values().cloned().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn get_rule(&self, id: &str) -> Result<Option<Rule>> {
        Ok(self.rules.read().await.get(id).cloned())
    }

    async fn upsert_rule(&self, rule: &Rule) -> Result<()> {
        self.rules
            .write()
            .await
            .insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        Ok(match self.rules.write().await.get_mut(id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            },
            None => false,
        })
    }

    async fn claim(
        &self,
        id: &str,
        expected_last_run: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut rules = self.rules.write().await;
        match rules.get_mut(id) {
            Some(rule) if rule.last_run == expected_last_run => {
                rule.last_run = now;
                Ok(true)
            },
            Some(_) => Ok(false),
            None => Err(RuleError::NotFound(id.to_string())),
        }
    }
}

// ============================================================================
// SQLite repository
// ============================================================================

/// Graph part of a rule, stored as JSON in `definition`
#[derive(Serialize, Deserialize)]
struct Definition {
    start_node: String,
    nodes: Vec<Node>,
}

pub struct SqliteRuleRepository {
    pool: SqlitePool,
}

impl SqliteRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and ensure the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!("Connected to rule database {}", url);

        let repo = Self::new(pool);
        repo.init_schema().await?;
        Ok(repo)
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                enabled INTEGER NOT NULL DEFAULT 1,
                interval_secs INTEGER NOT NULL DEFAULT 3600,
                last_run TEXT NOT NULL,
                definition TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RuleRepository for SqliteRuleRepository {
    async fn list_rules(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, enabled, interval_secs, last_run, definition
            FROM rules
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            match hydrate_rule(&row) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    warn!("Skipping unreadable rule {}: {}", id, e);
                },
            }
        }
        Ok(rules)
    }

    async fn get_rule(&self, id: &str) -> Result<Option<Rule>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, enabled, interval_secs, last_run, definition
            FROM rules
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(hydrate_rule).transpose()
    }

    async fn upsert_rule(&self, rule: &Rule) -> Result<()> {
        let definition = serde_json::to_string(&Definition {
            start_node: rule.start_node.clone(),
            nodes: rule.nodes.clone(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO rules (id, name, description, enabled, interval_secs, last_run, definition)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                enabled = excluded.enabled,
                interval_secs = excluded.interval_secs,
                last_run = excluded.last_run,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.enabled)
        .bind(i64::try_from(rule.interval).unwrap_or(i64::MAX))
        .bind(iso_timestamp::format(&rule.last_run))
        .bind(&definition)
        .execute(&self.pool)
        .await?;

        debug!("Rule {} stored", rule.id);
        Ok(())
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE rules
            SET enabled = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(enabled)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim(
        &self,
        id: &str,
        expected_last_run: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE rules
            SET last_run = ?
            WHERE id = ? AND last_run = ?
            "#,
        )
        .bind(iso_timestamp::format(&now))
        .bind(id)
        .bind(iso_timestamp::format(&expected_last_run))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(RuleError::NotFound(id.to_string()))
        }
    }
}

/// Hydrate a row into Rule struct
fn hydrate_rule(row: &SqliteRow) -> Result<Rule> {
    let id: String = row.try_get("id")?;
    let name: String = row.try_get("name")?;
    let description: String = row.try_get("description")?;
    let enabled: i64 = row.try_get("enabled")?;
    let interval_secs: i64 = row.try_get("interval_secs")?;
    let last_run: String = row.try_get("last_run")?;
    let definition: String = row.try_get("definition")?;

    let definition: Definition = serde_json::from_str(&definition)
        .map_err(|e| RuleError::SerializationError(format!("definition of {}: {}", id, e)))?;
    let last_run = iso_timestamp::parse(&last_run).ok_or_else(|| {
        RuleError::InvalidFormat(format!("last_run of {}: '{}'", id, last_run))
    })?;

    Ok(Rule {
        id,
        name,
        description,
        enabled: enabled != 0,
        interval: u64::try_from(interval_secs).unwrap_or(0),
        last_run,
        start_node: definition.start_node,
        nodes: definition.nodes,
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::types::NodeType;
    use chrono::TimeZone;

    fn sample_rule(id: &str) -> Rule {
        Rule {
            id: id.to_string(),
            name: format!("Rule {}", id),
            description: "test".to_string(),
            enabled: true,
            interval: 60,
            last_run: DateTime::<Utc>::UNIX_EPOCH,
            start_node: "end".to_string(),
            nodes: vec![Node::new("end", NodeType::End)],
        }
    }

    /// Both repositories must agree on claim results, unknown ids included
    async fn assert_claim_contract(repo: &dyn RuleRepository) {
        repo.upsert_rule(&sample_rule("a")).await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(repo.claim("a", DateTime::<Utc>::UNIX_EPOCH, now).await.unwrap());
        // Second claimer still holds the old timestamp
        assert!(!repo.claim("a", DateTime::<Utc>::UNIX_EPOCH, now).await.unwrap());
        assert_eq!(repo.get_rule("a").await.unwrap().unwrap().last_run, now);

        assert!(matches!(
            repo.claim("missing", now, now).await,
            Err(RuleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_claim_is_conditional() {
        assert_claim_contract(&MemoryRuleRepository::new()).await;
    }

    #[tokio::test]
    async fn test_memory_set_enabled_and_list_order() {
        let repo = MemoryRuleRepository::with_rules([sample_rule("b"), sample_rule("a")]);

        assert!(repo.set_enabled("b", false).await.unwrap());
        assert!(!repo.set_enabled("zzz", false).await.unwrap());

        let rules = repo.list_rules().await.unwrap();
        assert_eq!(rules[0].id, "a");
        assert!(!rules[1].enabled);
    }

    async fn sqlite_repo() -> SqliteRuleRepository {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let repo = SqliteRuleRepository::new(pool);
        repo.init_schema().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let repo = sqlite_repo().await;
        let mut rule = sample_rule("a");
        rule.last_run = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        repo.upsert_rule(&rule).await.unwrap();

        assert_eq!(repo.get_rule("a").await.unwrap(), Some(rule.clone()));
        assert_eq!(repo.get_rule("b").await.unwrap(), None);

        rule.name = "Renamed".to_string();
        repo.upsert_rule(&rule).await.unwrap();
        let rules = repo.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "Renamed");
    }

    #[tokio::test]
    async fn test_sqlite_claim_is_conditional() {
        assert_claim_contract(&sqlite_repo().await).await;
    }

    #[tokio::test]
    async fn test_sqlite_skips_corrupt_rows() {
        let repo = sqlite_repo().await;
        repo.upsert_rule(&sample_rule("good")).await.unwrap();
        sqlx::query(
            "INSERT INTO rules (id, name, last_run, definition) VALUES ('bad', 'bad', 'never', '{}')",
        )
        .execute(repo.pool())
        .await
        .unwrap();

        let rules = repo.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "good");
        assert!(repo.get_rule("bad").await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_set_enabled() {
        let repo = sqlite_repo().await;
        repo.upsert_rule(&sample_rule("a")).await.unwrap();

        assert!(repo.set_enabled("a", false).await.unwrap());
        assert!(!repo.set_enabled("nope", true).await.unwrap());
        assert!(!repo.get_rule("a").await.unwrap().unwrap().enabled);
    }
}
