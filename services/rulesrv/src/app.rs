//! Application state and initialization logic
//!
//! Rules live in SQLite. Telemetry is read from Redis (or kept in memory for
//! single-process deployments), and actions leave through the Redis action
//! channel or an in-process logging worker.

use crate::actions::LogActionHandler;
use crate::config::{Config, DispatcherBackend, StoreBackend};
use crate::dispatcher::RedisQueueDispatcher;
use crate::error::{Result, RulesrvError};
use std::path::Path;
use std::sync::Arc;
use telemetry_rules::{
    ActionDispatcher, ActionWorker, ChannelDispatcher, RuleExecutor, RuleLoggerManager,
    RuleRepository, RuleScheduler, SchedulerConfig, SqliteRuleRepository,
};
use telemetry_store::{
    Ingestor, KeySpace, MemoryStore, RedisClient, RedisStore, TelemetryStore,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the immediate-evaluation and in-process action queues
const QUEUE_CAPACITY: usize = 1024;

/// Application state shared across all handlers
pub struct AppState {
    pub config: Arc<Config>,
    pub repository: Arc<dyn RuleRepository>,
    pub store: Arc<dyn TelemetryStore>,
    pub scheduler: Arc<RuleScheduler>,
    pub ingestor: Arc<Ingestor>,
}

/// State plus the background pieces that still need a task
pub struct Runtime {
    pub state: Arc<AppState>,
    immediate_rx: Option<mpsc::Receiver<String>>,
    action_worker: Option<ActionWorker>,
}

impl AppState {
    /// Wire the engine from already-built backends
    ///
    /// Returns the receiver of topics flagged for immediate evaluation.
    pub fn assemble(
        config: Config,
        repository: Arc<dyn RuleRepository>,
        store: Arc<dyn TelemetryStore>,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let executor = Arc::new(
            RuleExecutor::new(store.clone(), dispatcher)
                .with_node_timeout(config.engine.node_timeout()),
        );

        let mut scheduler = RuleScheduler::new(
            repository.clone(),
            executor,
            SchedulerConfig {
                tick_interval: config.engine.tick_interval(),
                max_concurrent_rules: config.engine.max_concurrent_rules,
            },
        );
        if let Some(dir) = &config.logging.dir {
            scheduler = scheduler.with_rule_logs(Arc::new(RuleLoggerManager::new(dir.clone())));
        }

        let (immediate_tx, immediate_rx) = mpsc::channel(QUEUE_CAPACITY);
        let ingestor = Ingestor::new(store.clone()).with_immediate_channel(immediate_tx);

        let state = Arc::new(Self {
            config: Arc::new(config),
            repository,
            store,
            scheduler: Arc::new(scheduler),
            ingestor: Arc::new(ingestor),
        });
        (state, immediate_rx)
    }
}

impl Runtime {
    /// Connect every backend selected in `config`
    pub async fn build(config: Config) -> Result<Self> {
        let repository = Arc::new(open_repository(&config.database.url).await?);

        let needs_redis = config.engine.store == StoreBackend::Redis
            || config.engine.dispatcher == DispatcherBackend::Redis;
        let redis = if needs_redis {
            let client = RedisClient::new(&config.redis.url).await?;
            debug!("Connected to Redis at: {}", client.url());
            Some(Arc::new(client))
        } else {
            None
        };

        let store: Arc<dyn TelemetryStore> = match (&redis, config.engine.store) {
            (Some(client), StoreBackend::Redis) => Arc::new(RedisStore::from_client(
                client.clone(),
                KeySpace::new(config.redis.telemetry_prefix.clone()),
                config.redis.history_len,
            )),
            _ => {
                info!("Using in-memory telemetry store");
                Arc::new(MemoryStore::new())
            },
        };

        let (dispatcher, action_worker): (Arc<dyn ActionDispatcher>, Option<ActionWorker>) =
            match (&redis, config.engine.dispatcher) {
                (Some(client), DispatcherBackend::Redis) => (
                    Arc::new(RedisQueueDispatcher::new(
                        client.clone(),
                        config.redis.action_channel.clone(),
                    )),
                    None,
                ),
                _ => {
                    let (dispatcher, rx) = ChannelDispatcher::new(QUEUE_CAPACITY);
                    let worker = ActionWorker::new(rx, Arc::new(LogActionHandler));
                    (Arc::new(dispatcher), Some(worker))
                },
            };

        let (state, immediate_rx) = AppState::assemble(config, repository, store, dispatcher);
        Ok(Self {
            state,
            immediate_rx: Some(immediate_rx),
            action_worker,
        })
    }

    /// Start the scheduler loop and, when present, the action worker
    pub fn spawn_background(&mut self) -> Vec<JoinHandle<()>> {
        let scheduler = self.state.scheduler.clone();
        let immediate_rx = self.immediate_rx.take();
        let mut handles = vec![tokio::spawn(async move {
            scheduler.run(immediate_rx).await;
        })];
        handles.extend(self.spawn_action_worker());
        handles
    }

    /// Start the in-process action worker if the log dispatcher is in use
    pub fn spawn_action_worker(&mut self) -> Option<JoinHandle<()>> {
        let worker = self.action_worker.take()?;
        Some(tokio::spawn(async move {
            let stats = worker.run().await;
            info!(
                "Action worker stopped: {} handled, {} rejected, {} failed",
                stats.handled, stats.rejected, stats.failed
            );
        }))
    }

    /// Drop the engine and wait for the action worker to drain its queue
    pub async fn drain(self, worker: Option<JoinHandle<()>>) {
        drop(self);
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!("Action worker task failed: {}", e);
            }
        }
    }
}

/// Open the rule database, creating the parent directory of a file URL
pub async fn open_repository(url: &str) -> Result<SqliteRuleRepository> {
    if let Some(parent) = sqlite_file_parent(url) {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            warn!("Creating rule database directory {}", parent.display());
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteRuleRepository::connect(url)
        .await
        .map_err(RulesrvError::from)
}

fn sqlite_file_parent(url: &str) -> Option<&Path> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Path::new(path).parent()
}
