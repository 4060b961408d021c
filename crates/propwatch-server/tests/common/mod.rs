#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use propwatch_common::types::ChannelType;
use propwatch_notify::error::DeliveryError;
use propwatch_notify::plugin::ChannelRegistry;
use propwatch_notify::{NotificationChannel, RenderedMessage, SendReceipt};
use propwatch_server::app;
use propwatch_server::config::{ChannelConfig, RecipientEntry, ServerConfig, TargetEntry};
use propwatch_server::state::{build_channels, AppState};
use propwatch_storage::sqlite::SqliteStore;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, OnceLock};
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const TARGET: &str = "sunset-gardens";

/// Email transport double. Recipients containing "bounce" are refused
/// permanently.
pub struct MockEmail {
    pub sent: Mutex<Vec<(String, RenderedMessage)>>,
}

#[async_trait]
impl NotificationChannel for MockEmail {
    async fn deliver(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> Result<SendReceipt, DeliveryError> {
        if recipient.contains("bounce") {
            return Err(DeliveryError::Bounced("550 mailbox unavailable".into()));
        }
        self.sent
            .lock()
            .expect("mock lock")
            .push((recipient.to_string(), message.clone()));
        Ok(SendReceipt {
            provider_message_id: Some("250 OK".into()),
        })
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn instance_id(&self) -> &str {
        "mock-email"
    }
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
    pub email: Arc<MockEmail>,
}

fn ensure_rustls_provider() {
    static RUSTLS_PROVIDER_INIT: OnceLock<()> = OnceLock::new();
    RUSTLS_PROVIDER_INIT.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// SQLite-backed app with a mock email transport and a real (unreachable)
/// SMS gateway channel built through the plugin registry.
pub fn build_test_context() -> Result<TestContext> {
    ensure_rustls_provider();

    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("propwatch.db");

    let mut config = ServerConfig {
        database_path: db_path.to_string_lossy().to_string(),
        ..Default::default()
    };
    config.scheduler.enabled = false;
    config.delivery.base_backoff_ms = 1;
    config.delivery.max_backoff_ms = 2;
    config.channels = vec![ChannelConfig {
        channel_type: "sms".into(),
        id: Some("sms-gateway".into()),
        enabled: true,
        config: json!({
            "gateway_url": "http://127.0.0.1:9/send",
            "api_key": "sk-live-secret",
            "timeout_secs": 1
        }),
    }];
    config.recipients = vec![RecipientEntry {
        target_id: TARGET.into(),
        channel_type: ChannelType::Email,
        address: "ops@example.com".into(),
    }];
    config.targets = vec![TargetEntry {
        id: TARGET.into(),
        name: "Sunset Gardens".into(),
    }];

    let (mut channels, channel_info) = build_channels(&config, &ChannelRegistry::default())?;
    let email = Arc::new(MockEmail {
        sent: Mutex::new(Vec::new()),
    });
    channels.push(email.clone());

    let store = Arc::new(SqliteStore::open(&db_path)?);
    let state = AppState::build(config, store, channels, channel_info);
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
        email,
    })
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    let req_body = body.unwrap_or(Value::Null).to_string();
    let req = builder
        .body(Body::from(req_body))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub fn assert_ok_envelope(json: &Value) {
    assert_eq!(json["err_code"], 0);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
}

pub fn assert_err_envelope(json: &Value, err_code: i32) {
    assert_eq!(json["err_code"], err_code);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
    assert!(json["data"].is_null());
}

/// Scenario thresholds: red below 85, yellow 85..94, green from 95.
pub fn occupancy_rule_body(name: &str, frequency: &str) -> Value {
    json!({
        "name": name,
        "metric_type": "occupancy",
        "target_ids": [TARGET],
        "red_max": 84.0,
        "yellow_min": 85.0,
        "yellow_max": 94.0,
        "green_min": 95.0,
        "frequency": frequency,
        "channels": ["email"]
    })
}

pub fn email_template_body() -> Value {
    json!({
        "name": "Occupancy email",
        "channel_type": "email",
        "subject": "[{{alert_level}}] {{property_name}}",
        "body": "Alert: {{metric_name}} at {{property_name}} is {{metric_value}}"
    })
}

/// Creates a resource and returns its id.
pub async fn create(app: &axum::Router, uri: &str, body: Value) -> String {
    let (status, json, _) = request_json(app, "POST", uri, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "create {uri} failed: {json}");
    json["data"]["id"]
        .as_str()
        .expect("id should exist")
        .to_string()
}
