//! Logging bootstrap

use crate::config::LoggingConfig;
use crate::error::{Result, RulesrvError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "rulesrv.log";

/// Build the level filter; `RUST_LOG` wins over the configured level
fn env_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| RulesrvError::ConfigError(format!("Invalid log level '{}': {}", level, e)))
}

/// Initialize the global subscriber
///
/// Returns the file writer guard when `dir` is set; it must stay alive for
/// buffered lines to reach the file.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console = if config.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let mut guard = None;
    let file = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard = Some(file_guard);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            Some(if config.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            })
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.level)?)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| RulesrvError::ConfigError(format!("Failed to initialize logging: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_directives() {
        assert!(env_filter("debug,telemetry_rules=trace").is_ok());
    }
}
