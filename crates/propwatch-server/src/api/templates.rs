use crate::api::{error_response, notify_error_response, success_empty_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use propwatch_common::types::{ChannelType, MessageTemplate};
use propwatch_notify::Bindings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
struct ListTemplatesParams {
    /// `email`, `sms`, `push` (or `dashboard`)
    #[serde(default)]
    channel: Option<ChannelType>,
}

#[derive(Debug, Deserialize)]
struct PreviewTemplateRequest {
    template: MessageTemplate,
    /// Applied on top of the sample bindings.
    #[serde(default)]
    bindings: Bindings,
}

#[derive(Debug, Deserialize)]
struct TestDeliveryRequest {
    recipient: String,
    #[serde(default)]
    bindings: Bindings,
}

#[derive(Serialize)]
struct TestDeliveryResponse {
    success: bool,
}

async fn list_templates(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListTemplatesParams>,
) -> Response {
    match state.templates.list_templates(params.channel) {
        Ok(templates) => success_response(StatusCode::OK, &trace_id, templates),
        Err(e) => notify_error_response(&trace_id, &e),
    }
}

async fn get_template(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.templates.get_template(&id) {
        Ok(template) => success_response(StatusCode::OK, &trace_id, template),
        Err(e) => notify_error_response(&trace_id, &e),
    }
}

async fn create_template(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(mut template): Json<MessageTemplate>,
) -> Response {
    template.id.clear();
    match state.templates.save_template(template) {
        Ok(template) => success_response(StatusCode::CREATED, &trace_id, template),
        Err(e) => notify_error_response(&trace_id, &e),
    }
}

async fn update_template(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut template): Json<MessageTemplate>,
) -> Response {
    if let Err(e) = state.templates.get_template(&id) {
        return notify_error_response(&trace_id, &e);
    }
    template.id = id;
    match state.templates.save_template(template) {
        Ok(template) => success_response(StatusCode::OK, &trace_id, template),
        Err(e) => notify_error_response(&trace_id, &e),
    }
}

async fn delete_template(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.templates.delete_template(&id) {
        Ok(()) => success_empty_response(StatusCode::OK, &trace_id, "Template deleted"),
        Err(e) => notify_error_response(&trace_id, &e),
    }
}

async fn preview_template(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<PreviewTemplateRequest>,
) -> impl IntoResponse {
    success_response(
        StatusCode::OK,
        &trace_id,
        state.templates.preview_template(&req.template, &req.bindings),
    )
}

/// Sends the stored template once. Transport failures come back as
/// `success: false`, not as an error.
async fn test_delivery(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TestDeliveryRequest>,
) -> Response {
    if req.recipient.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "recipient must not be empty",
        );
    }
    match state
        .templates
        .test_delivery(&id, &req.recipient, &req.bindings)
        .await
    {
        Ok(success) => success_response(StatusCode::OK, &trace_id, TestDeliveryResponse { success }),
        Err(e) => notify_error_response(&trace_id, &e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/templates", get(list_templates).post(create_template))
        .route("/v1/templates/preview", post(preview_template))
        .route(
            "/v1/templates/{id}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/v1/templates/{id}/test", post(test_delivery))
}
