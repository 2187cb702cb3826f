//! API routes and handlers for Rule Service

use crate::app::AppState;
use crate::error::{Result, RulesrvError};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use telemetry_rules::{EvaluationReport, Rule, RuleReport, RuleSummary, SchedulerStatus};
use telemetry_store::{IngestOutcome, TelemetryMessage};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Create all API routes with state
pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(scheduler_status))
        .route("/api/evaluate", post(evaluate_due))
        .route("/api/rules", get(list_rules))
        .route("/api/rules/{id}", get(get_rule))
        .route("/api/rules/{id}/evaluate", post(evaluate_rule))
        .route("/api/rules/{id}/enable", post(enable_rule))
        .route("/api/rules/{id}/disable", post(disable_rule))
        .route("/api/telemetry", post(ingest_telemetry))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.config.service.name,
        "scheduler_running": state.scheduler.is_running(),
    }))
}

async fn scheduler_status(State(state): State<Arc<AppState>>) -> Result<Json<SchedulerStatus>> {
    Ok(Json(state.scheduler.status().await?))
}

/// Evaluate all due rules now
///
/// Per-rule failures are reported inside the body; the request itself succeeds.
async fn evaluate_due(State(state): State<Arc<AppState>>) -> Result<Json<EvaluationReport>> {
    let report = state.scheduler.evaluate_due(state.scheduler.now()).await?;
    info!(
        "Manual evaluation: {} rule(s), {} triggered",
        report.rule_results.len(),
        report.triggered_count()
    );
    Ok(Json(report))
}

async fn evaluate_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RuleReport>> {
    state
        .scheduler
        .evaluate_rule(&id, state.scheduler.now())
        .await?
        .map(Json)
        .ok_or(RulesrvError::RuleNotFound(id))
}

async fn list_rules(State(state): State<Arc<AppState>>) -> Result<Json<Vec<RuleSummary>>> {
    let rules = state.repository.list_rules().await?;
    Ok(Json(rules.iter().map(RuleSummary::from).collect()))
}

async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Rule>> {
    state
        .repository
        .get_rule(&id)
        .await?
        .map(Json)
        .ok_or(RulesrvError::RuleNotFound(id))
}

async fn enable_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    set_enabled(&state, id, true).await
}

async fn disable_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    set_enabled(&state, id, false).await
}

async fn set_enabled(state: &AppState, id: String, enabled: bool) -> Result<Json<Value>> {
    if !state.repository.set_enabled(&id, enabled).await? {
        return Err(RulesrvError::RuleNotFound(id));
    }
    info!("Rule {} {}", id, if enabled { "enabled" } else { "disabled" });
    Ok(Json(json!({ "id": id, "enabled": enabled })))
}

async fn ingest_telemetry(
    State(state): State<Arc<AppState>>,
    Json(message): Json<TelemetryMessage>,
) -> Result<Json<IngestOutcome>> {
    Ok(Json(state.ingestor.ingest_message(message).await?))
}
