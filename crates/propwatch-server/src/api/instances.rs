use crate::api::{alert_error_response, error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use propwatch_common::types::InstanceFilter;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    /// Operator performing the change.
    by: String,
}

/// Newest first.
async fn list_instances(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(filter): Query<InstanceFilter>,
) -> Response {
    match state.instances.list(&filter) {
        Ok(instances) => success_response(StatusCode::OK, &trace_id, instances),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

async fn get_instance(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.instances.get(&id) {
        Ok(instance) => success_response(StatusCode::OK, &trace_id, instance),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

async fn acknowledge_instance(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Response {
    if req.by.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", "by must not be empty");
    }
    match state.instances.acknowledge(&id, &req.by) {
        Ok(instance) => success_response(StatusCode::OK, &trace_id, instance),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

async fn resolve_instance(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Response {
    if req.by.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", "by must not be empty");
    }
    match state.instances.resolve(&id, &req.by) {
        Ok(instance) => success_response(StatusCode::OK, &trace_id, instance),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/instances", get(list_instances))
        .route("/v1/instances/{id}", get(get_instance))
        .route("/v1/instances/{id}/acknowledge", post(acknowledge_instance))
        .route("/v1/instances/{id}/resolve", post(resolve_instance))
}
