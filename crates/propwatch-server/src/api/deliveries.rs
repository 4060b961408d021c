use crate::api::{error_response, notify_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, NaiveDate, Utc};
use propwatch_common::types::{ChannelType, DateRange};
use propwatch_notify::ReceiptOutcome;
use serde::Deserialize;

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 500;

/// Days covered by a statistics query without `from`.
const DEFAULT_STATS_DAYS: i64 = 7;

#[derive(Debug, Default, Deserialize)]
struct ListLogsParams {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ReceiptRequest {
    outcome: ReceiptOutcome,
}

#[derive(Debug, Default, Deserialize)]
struct StatisticsParams {
    #[serde(default)]
    from: Option<NaiveDate>,
    #[serde(default)]
    to: Option<NaiveDate>,
    #[serde(default)]
    channel: Option<ChannelType>,
}

/// Newest first.
async fn list_logs(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListLogsParams>,
) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    match state.dispatcher.list_logs(limit) {
        Ok(logs) => success_response(StatusCode::OK, &trace_id, logs),
        Err(e) => notify_error_response(&trace_id, &e),
    }
}

/// Provider callback for a sent message.
async fn record_receipt(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReceiptRequest>,
) -> Response {
    match state.dispatcher.record_receipt(&id, req.outcome) {
        Ok(log) => success_response(StatusCode::OK, &trace_id, log),
        Err(e) => notify_error_response(&trace_id, &e),
    }
}

async fn get_statistics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<StatisticsParams>,
) -> Response {
    let to = params.to.unwrap_or_else(|| Utc::now().date_naive());
    let from = params
        .from
        .unwrap_or_else(|| to - Duration::days(DEFAULT_STATS_DAYS - 1));
    if from > to {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "from must not be after to",
        );
    }

    match state
        .dispatcher
        .statistics()
        .query(&DateRange { from, to }, params.channel)
    {
        Ok(report) => success_response(StatusCode::OK, &trace_id, report),
        Err(e) => notify_error_response(&trace_id, &e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/deliveries", get(list_logs))
        .route("/v1/deliveries/{id}/receipt", post(record_receipt))
        .route("/v1/statistics", get(get_statistics))
}
