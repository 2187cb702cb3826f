//! RuleSrv Library
//!
//! Telemetry rule evaluation service.
//!
//! ## Architecture
//!
//! - `app`: backend wiring (SQLite rules, Redis or in-memory telemetry,
//!   action dispatch) and background tasks
//! - `routes`: HTTP trigger surface and telemetry ingestion
//! - `rule_files`: rule document files for import and validation

pub mod actions;
pub mod app;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod routes;
pub mod rule_files;

pub use app::{open_repository, AppState, Runtime};
pub use config::Config;
pub use error::{Result, RulesrvError};
pub use routes::create_routes;
