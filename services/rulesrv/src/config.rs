//! Service configuration
//!
//! Layering, lowest to highest priority:
//! 1. Built-in defaults
//! 2. YAML file (`--config`, else `config/rulesrv.yaml` when present)
//! 3. `RULESRV_` environment variables, nested with `__`
//!    (e.g. `RULESRV_ENGINE__TICK_MS=500`)

use crate::error::{Result, RulesrvError};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/rulesrv.yaml";
pub const DEFAULT_PORT: u16 = 6003;
pub const ENV_PREFIX: &str = "RULESRV_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "rulesrv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ApiConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| RulesrvError::ConfigError(format!("Invalid api address: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Channel the action queue dispatcher publishes to
    pub action_channel: String,
    /// Key prefix of the telemetry sorted sets
    pub telemetry_prefix: String,
    /// Messages retained per topic
    pub history_len: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            action_channel: "action_queue".to_string(),
            telemetry_prefix: "telemetry".to_string(),
            history_len: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/rules.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatcherBackend {
    /// Publish requests on the Redis action channel
    Redis,
    /// Hand requests to an in-process worker that logs them
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tick_ms: u64,
    pub node_timeout_ms: u64,
    pub max_concurrent_rules: usize,
    pub store: StoreBackend,
    pub dispatcher: DispatcherBackend,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: telemetry_rules::DEFAULT_TICK_MS,
            node_timeout_ms: telemetry_rules::DEFAULT_NODE_TIMEOUT.as_millis() as u64,
            max_concurrent_rules: telemetry_rules::DEFAULT_MAX_CONCURRENT_RULES,
            store: StoreBackend::Redis,
            dispatcher: DispatcherBackend::Redis,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// Directory for the service log file and per-rule execution logs
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional YAML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(RulesrvError::ConfigError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                figment = figment.merge(Yaml::file(path));
            },
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                figment = figment.merge(Yaml::file(DEFAULT_CONFIG_PATH));
            },
            None => {},
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.port == 0 {
            return Err(RulesrvError::ConfigError("api.port cannot be 0".to_string()));
        }
        if self.engine.tick_ms == 0 {
            return Err(RulesrvError::ConfigError(
                "engine.tick_ms must be positive".to_string(),
            ));
        }
        if self.engine.node_timeout_ms == 0 {
            return Err(RulesrvError::ConfigError(
                "engine.node_timeout_ms must be positive".to_string(),
            ));
        }
        if self.engine.max_concurrent_rules == 0 {
            return Err(RulesrvError::ConfigError(
                "engine.max_concurrent_rules must be positive".to_string(),
            ));
        }
        let uses_redis = self.engine.store == StoreBackend::Redis
            || self.engine.dispatcher == DispatcherBackend::Redis;
        if uses_redis && self.redis.url.trim().is_empty() {
            return Err(RulesrvError::ConfigError(
                "redis.url is required by the selected backends".to_string(),
            ));
        }
        if self.database.url.trim().is_empty() {
            return Err(RulesrvError::ConfigError("database.url is empty".to_string()));
        }
        Ok(())
    }
}
