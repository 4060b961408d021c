pub mod deliveries;
pub mod instances;
pub mod metrics;
pub mod rules;
pub mod templates;

use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use propwatch_alert::AlertError;
use propwatch_notify::NotifyError;
use serde::Serialize;
use serde_json::Value;

/// Error envelope.
#[derive(Serialize)]
pub struct ApiError {
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
}

/// Envelope around every successful response.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success.
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn success_empty_response(status: StatusCode, trace_id: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: 0,
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "invalid_transition" => 1005,
        "validation_error" => 1006,
        "template_error" => 1007,
        "no_transport" => 1201,
        "queue_full" => 1202,
        "internal_error" => 1500,
        "storage_error" => 1501,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

/// Maps rule and instance errors onto the envelope.
pub fn alert_error_response(trace_id: &str, err: &AlertError) -> Response {
    let (status, code) = match err {
        AlertError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        AlertError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        AlertError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        AlertError::Storage(e) => {
            tracing::error!(error = %e, "Alert storage failure");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "Database error",
            );
        }
    };
    error_response(status, trace_id, code, &err.to_string())
}

/// Maps template and delivery errors onto the envelope.
pub fn notify_error_response(trace_id: &str, err: &NotifyError) -> Response {
    let (status, code) = match err {
        NotifyError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        NotifyError::TemplateError(_) => (StatusCode::BAD_REQUEST, "template_error"),
        NotifyError::NoTransport(_) => (StatusCode::UNPROCESSABLE_ENTITY, "no_transport"),
        NotifyError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        NotifyError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        NotifyError::QueueFull | NotifyError::QueueClosed => {
            (StatusCode::SERVICE_UNAVAILABLE, "queue_full")
        }
        NotifyError::Storage(e) => {
            tracing::error!(error = %e, "Notification storage failure");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "Database error",
            );
        }
    };
    error_response(status, trace_id, code, &err.to_string())
}

#[derive(Serialize)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    channel_count: usize,
    storage: String,
}

async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    let storage = if state.config.database_path.is_empty() {
        "memory"
    } else {
        "sqlite"
    };
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            channel_count: state.channels.len(),
            storage: storage.to_string(),
        },
    )
}

/// Configured transports with secrets redacted.
async fn list_channels(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    success_response(StatusCode::OK, &trace_id, state.channels.as_slice())
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/channels", get(list_channels))
        .merge(rules::routes())
        .merge(instances::routes())
        .merge(templates::routes())
        .merge(deliveries::routes())
        .merge(metrics::routes())
}
