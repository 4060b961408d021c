use crate::api::{alert_error_response, success_empty_response, success_response};
use crate::logging::TraceId;
use crate::pipeline::TargetOutcome;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use propwatch_common::types::{AlertRule, DeliveryLog};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct PreviewRuleRequest {
    rule: AlertRule,
    sample_value: f64,
}

#[derive(Debug, Deserialize)]
struct SetActiveRequest {
    active: bool,
}

#[derive(Debug, Default, Deserialize)]
struct EvaluateParams {
    /// Wait for queued deliveries and include their logs.
    #[serde(default)]
    wait: bool,
}

#[derive(Serialize)]
struct EvaluateResponse {
    outcomes: Vec<TargetOutcome>,
    deliveries: Vec<DeliveryLog>,
}

async fn list_rules(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    match state.rules.list_rules() {
        Ok(rules) => success_response(StatusCode::OK, &trace_id, rules),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

async fn get_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.rules.get_rule(&id) {
        Ok(rule) => success_response(StatusCode::OK, &trace_id, rule),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

async fn create_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(mut rule): Json<AlertRule>,
) -> Response {
    rule.id.clear();
    match state.rules.save_rule(rule) {
        Ok(rule) => success_response(StatusCode::CREATED, &trace_id, rule),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

async fn update_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut rule): Json<AlertRule>,
) -> Response {
    if let Err(e) = state.rules.get_rule(&id) {
        return alert_error_response(&trace_id, &e);
    }
    rule.id = id;
    match state.rules.save_rule(rule) {
        Ok(rule) => success_response(StatusCode::OK, &trace_id, rule),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

async fn delete_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.rules.delete_rule(&id) {
        Ok(()) => success_empty_response(StatusCode::OK, &trace_id, "Rule deleted"),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

async fn set_rule_active(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetActiveRequest>,
) -> Response {
    match state.rules.set_rule_active(&id, req.active) {
        Ok(rule) => success_response(StatusCode::OK, &trace_id, rule),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

/// What-if classification; nothing is persisted.
async fn preview_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<PreviewRuleRequest>,
) -> impl IntoResponse {
    success_response(
        StatusCode::OK,
        &trace_id,
        state.rules.preview_rule(&req.rule, req.sample_value),
    )
}

/// Evaluates the rule now, outside the scheduler.
async fn evaluate_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<EvaluateParams>,
) -> Response {
    let rule = match state.rules.get_rule(&id) {
        Ok(rule) => rule,
        Err(e) => return alert_error_response(&trace_id, &e),
    };

    let evaluation = state.pipeline.evaluate_rule(&rule).await;
    let mut deliveries = Vec::new();
    if params.wait {
        for ticket in evaluation.tickets {
            match ticket.wait().await {
                Ok(log) => deliveries.push(log),
                Err(e) => tracing::warn!(rule_id = %id, error = %e, "Queued delivery failed"),
            }
        }
    }

    success_response(
        StatusCode::OK,
        &trace_id,
        EvaluateResponse {
            outcomes: evaluation.outcomes,
            deliveries,
        },
    )
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/rules", get(list_rules).post(create_rule))
        .route("/v1/rules/preview", post(preview_rule))
        .route(
            "/v1/rules/{id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/v1/rules/{id}/active", put(set_rule_active))
        .route("/v1/rules/{id}/evaluate", post(evaluate_rule))
}
