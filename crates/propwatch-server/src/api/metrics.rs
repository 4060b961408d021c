use crate::api::{error_response, success_response};
use crate::logging::TraceId;
use crate::metrics::MetricReading;
use crate::pipeline::TargetOutcome;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use propwatch_common::types::MetricType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct IngestMetricRequest {
    metric_type: MetricType,
    target_id: String,
    value: f64,
}

#[derive(Serialize)]
struct IngestMetricResponse {
    reading: MetricReading,
    /// Immediate rules evaluated for this target.
    outcomes: Vec<TargetOutcome>,
    deliveries_queued: usize,
}

/// Stores the reading, then evaluates `immediate` rules for the target.
async fn ingest_metric(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<IngestMetricRequest>,
) -> Response {
    if req.target_id.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "target_id must not be empty",
        );
    }
    if !req.value.is_finite() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "value must be a finite number",
        );
    }

    let reading = state
        .metrics
        .record(req.metric_type, &req.target_id, req.value);
    tracing::debug!(
        metric = %req.metric_type,
        target_id = %req.target_id,
        value = req.value,
        "Metric reading stored"
    );

    let evaluation = match state
        .pipeline
        .evaluate_immediate_rules(&req.target_id)
        .await
    {
        Ok(evaluation) => evaluation,
        Err(e) => {
            tracing::error!(target_id = %req.target_id, error = %e, "Immediate rule evaluation failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "internal_error",
                "Rule evaluation failed",
            );
        }
    };

    success_response(
        StatusCode::OK,
        &trace_id,
        IngestMetricResponse {
            reading,
            deliveries_queued: evaluation.tickets.len(),
            outcomes: evaluation.outcomes,
        },
    )
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/metrics", post(ingest_metric))
}
