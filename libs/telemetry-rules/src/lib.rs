//! Telemetry Rules - Rule Engine Library
//!
//! A node-graph rule engine for streaming telemetry providing:
//! - Rule model: typed nodes (GET_DATA, COMPARE, AND, OR, PUBLISH, END, TRIGGER)
//! - Graph execution against the latest telemetry with per-node timeouts
//! - Action dispatch through an injectable dispatcher
//! - Interval scheduling with conditional `last_run` claims
//! - SQLite persistence for rule storage
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Scheduler  │────▶│   Executor   │────▶│ TelemetryStore│
//! │   (tick)    │     │ (graph walk) │     │ (latest value)│
//! └─────────────┘     └──────────────┘     └──────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌──────────────┐
//! │ Repository  │     │  Dispatcher  │
//! │  (SQLite)   │     │  (actions)   │
//! └─────────────┘     └──────────────┘
//! ```

pub mod action;
pub mod context;
pub mod dispatcher;
mod error;
mod executor;
pub mod legacy;
pub mod logger;
pub mod operator;
mod repository;
mod scheduler;
pub mod types;
mod validation;

// Re-export public API
pub use action::{Action, ActionError, ActionHandler, ActionRequest};
pub use context::ExecutionContext;
pub use dispatcher::{
    ActionDispatcher, ActionWorker, ChannelDispatcher, DispatchOutcome, RecordingDispatcher,
    WorkerStats,
};
pub use error::{Result, RuleError};
pub use executor::{
    ExecutionError, ExecutionResult, NodeOutcome, RuleExecutor, DEFAULT_NODE_TIMEOUT,
    PUBLISHED_MARKER,
};
pub use legacy::{convert_legacy, LegacyRule, RuleDocument};
pub use logger::{RuleLogger, RuleLoggerManager};
pub use operator::{Operator, OperatorError};
pub use repository::{MemoryRuleRepository, RuleRepository, SqliteRuleRepository};
pub use scheduler::{
    due_rules, is_due, EvaluationReport, RuleReport, RuleScheduler, SchedulerConfig,
    SchedulerStatus, DEFAULT_MAX_CONCURRENT_RULES, DEFAULT_TICK_MS,
};
pub use validation::validate_rule;

// Re-export rule types for convenience
pub use types::{Node, NodeType, Rule, RuleSummary};
