//! HTTP API surface of the dashboard service.
//!
//! Three kinds of routes share one router: the ingestion endpoints upstream
//! engines push events at, the read views assembled from the search store,
//! and thin delegation routes for the risk/rule engines. The router is
//! constructed separately from binding so tests can drive it directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use opswatch_core::broadcast::Broadcaster;
use opswatch_core::config::OpswatchConfig;
use opswatch_core::error::OpswatchError;
use opswatch_core::event::{AlertEvent, Envelope, RiskUpdateEvent};
use opswatch_core::registry::ConnectionRegistry;

use crate::proxy::UpstreamProxy;
use crate::search::{LogQuery, SearchClient};
use crate::tiers::{HttpTierSource, TierCache};
use crate::views::ViewService;
use crate::ws;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub broadcaster: Broadcaster,
    pub views: Arc<ViewService>,
    pub proxy: Arc<UpstreamProxy>,
}

impl AppState {
    /// Wire every subsystem from the deployment configuration.
    pub fn from_config(config: &OpswatchConfig) -> anyhow::Result<Self> {
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone());

        let tier_source = HttpTierSource::new(
            &config.upstream.risk_engine_url,
            Duration::from_secs(config.timeouts.tier_fetch_secs),
        )?;
        let tiers = Arc::new(TierCache::new(
            Arc::new(tier_source),
            Duration::from_secs(config.timeouts.tier_ttl_secs),
        ));

        let search = SearchClient::new(
            &config.upstream.search_url,
            config.indices.clone(),
            Duration::from_secs(config.timeouts.search_secs),
        )?;
        let views = Arc::new(ViewService::new(search, tiers));

        let proxy = Arc::new(UpstreamProxy::new(
            &config.upstream.risk_engine_url,
            &config.upstream.rule_engine_url,
            Duration::from_secs(config.timeouts.proxy_secs),
        )?);

        Ok(Self {
            registry,
            broadcaster,
            views,
            proxy,
        })
    }
}

/// Build the full route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws::live_updates_handler))
        .route("/api/alert/push", post(push_alert_handler))
        .route("/api/ueba/push", post(push_ueba_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/users/risk", get(users_risk_handler))
        .route("/api/user/{user_id}", get(user_detail_handler))
        .route("/api/user/{user_id}/hourly", get(user_hourly_handler))
        .route("/api/user/{user_id}/history", get(user_history_handler))
        .route("/api/logs", get(logs_handler))
        .route("/api/alerts", get(alerts_handler))
        .route("/api/users", get(user_scores_handler))
        .route("/api/rules", get(rules_handler).post(create_rule_handler))
        .route(
            "/api/rules/{rule_id}",
            put(update_rule_handler).delete(delete_rule_handler),
        )
        .route(
            "/api/ueba/settings",
            get(settings_handler).post(save_settings_handler),
        )
        .route("/api/cep/status", get(engine_status_handler))
        .route("/api/cep/reload", post(engine_reload_handler))
        .with_state(state)
}

/// Map a core error onto the HTTP surface.
fn error_response(err: OpswatchError) -> Response {
    let status = match err {
        OpswatchError::Validation { .. } => StatusCode::BAD_REQUEST,
        OpswatchError::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
        OpswatchError::Deserialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

// ---------------------------------------------------------------------------
// Ingestion (push) endpoints
// ---------------------------------------------------------------------------

/// Acknowledgment returned to the pushing engine. The count is an
/// observability signal, not a delivery guarantee.
#[derive(Debug, Serialize)]
struct PushAck {
    status: &'static str,
    #[serde(rename = "targetedSubscriberCount")]
    targeted_subscriber_count: usize,
}

async fn push_alert_handler(
    State(state): State<AppState>,
    Json(event): Json<AlertEvent>,
) -> Response {
    if let Err(e) = event.validate() {
        return error_response(e);
    }
    let targeted = state.broadcaster.broadcast(&Envelope::alert(event)).await;
    Json(PushAck {
        status: "ok",
        targeted_subscriber_count: targeted,
    })
    .into_response()
}

async fn push_ueba_handler(
    State(state): State<AppState>,
    Json(event): Json<RiskUpdateEvent>,
) -> Response {
    if let Err(e) = event.validate() {
        return error_response(e);
    }
    let targeted = state.broadcaster.broadcast(&Envelope::ueba(event)).await;
    Json(PushAck {
        status: "ok",
        targeted_subscriber_count: targeted,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Read views
// ---------------------------------------------------------------------------

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn dashboard_handler(State(state): State<AppState>) -> Response {
    match state.views.dashboard().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct UsersQuery {
    level: Option<String>,
}

async fn users_risk_handler(
    State(state): State<AppState>,
    Query(query): Query<UsersQuery>,
) -> Response {
    match state.views.users(query.level.as_deref()).await {
        Ok(users) => Json(json!({"users": users})).into_response(),
        Err(e) => error_response(e),
    }
}

async fn user_detail_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.views.user_detail(&user_id).await {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => error_response(e),
    }
}

async fn logs_handler(State(state): State<AppState>, Query(query): Query<LogQuery>) -> Response {
    match state.views.logs(&query).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Engine delegation
// ---------------------------------------------------------------------------

async fn alerts_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    Json(state.proxy.alerts_page(&params).await)
}

async fn user_scores_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match state.proxy.user_scores(&params).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(e),
    }
}

async fn user_hourly_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.proxy.user_hourly(&user_id).await {
        Ok(data) => Json(data).into_response(),
        Err(e) => error_response(e),
    }
}

async fn user_history_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.proxy.user_history(&user_id).await {
        Ok(data) => Json(data).into_response(),
        Err(e) => error_response(e),
    }
}

async fn rules_handler(State(state): State<AppState>) -> Json<Value> {
    Json(Value::Array(state.proxy.merged_rules().await))
}

async fn create_rule_handler(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    Json(state.proxy.create_rule(&body).await)
}

async fn update_rule_handler(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    Json(state.proxy.update_rule(&rule_id, &body).await)
}

async fn delete_rule_handler(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Json<Value> {
    Json(state.proxy.delete_rule(&rule_id).await)
}

async fn settings_handler(State(state): State<AppState>) -> Response {
    match state.proxy.settings().await {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => error_response(e),
    }
}

async fn save_settings_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    match state.proxy.save_settings(&body).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

async fn engine_status_handler(State(state): State<AppState>) -> Json<Value> {
    Json(state.proxy.rule_engine_status().await)
}

async fn engine_reload_handler(State(state): State<AppState>) -> Json<Value> {
    Json(state.proxy.rule_engine_reload().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn test_app() -> (Router, AppState) {
        let state = AppState::from_config(&OpswatchConfig::default()).unwrap();
        (router(state.clone()), state)
    }

    async fn json_body(response: axum::http::Response<Body>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn alert_push(user_id: &str) -> String {
        json!({
            "ruleId": "R-104",
            "ruleName": "usb-mass-copy",
            "severity": "HIGH",
            "description": "bulk file copy to removable media",
            "userId": user_id
        })
        .to_string()
    }

    fn post_json(uri: &str, body: String) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let (app, _state) = test_app();
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn alert_push_acks_with_subscriber_count() {
        let (app, _state) = test_app();
        let response = app
            .oneshot(post_json("/api/alert/push", alert_push("u1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack = json_body(response).await;
        assert_eq!(ack["status"], "ok");
        assert_eq!(ack["targetedSubscriberCount"], 0);
    }

    #[tokio::test]
    async fn alert_push_rejects_empty_required_field() {
        let (app, _state) = test_app();
        let body = json!({
            "ruleId": "",
            "ruleName": "usb-mass-copy",
            "severity": "HIGH",
            "description": "d",
            "userId": "u1"
        })
        .to_string();
        let response = app.oneshot(post_json("/api/alert/push", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error = json_body(response).await;
        assert!(error["error"].as_str().unwrap().contains("ruleId"));
    }

    #[tokio::test]
    async fn alert_push_rejects_malformed_payload() {
        let (app, _state) = test_app();
        // Missing required fields entirely.
        let response = app
            .oneshot(post_json("/api/alert/push", r#"{"ruleId": "R-1"}"#.into()))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn ueba_push_validates_and_acks() {
        let (app, _state) = test_app();
        let body = json!({"userId": "u2", "riskScore": 55, "riskLevel": "MEDIUM", "prevScore": 20})
            .to_string();
        let response = app.oneshot(post_json("/api/ueba/push", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn pushed_alert_reaches_every_live_subscriber() {
        let (app, state) = test_app();

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        state.registry.register(tx_a).await;
        state.registry.register(tx_b).await;

        let response = app
            .oneshot(post_json("/api/alert/push", alert_push("u1")))
            .await
            .unwrap();
        let ack = json_body(response).await;
        assert_eq!(ack["targetedSubscriberCount"], 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["type"], "alert");
            assert_eq!(frame["data"]["userId"], "u1");
            assert_eq!(frame["data"]["severity"], "HIGH");
            assert!(frame["timestamp"].is_string());
        }
    }

    #[tokio::test]
    async fn disconnected_subscriber_is_dropped_from_the_next_push() {
        let (_, state) = test_app();
        let app = router(state.clone());

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        state.registry.register(tx_a).await;
        let id_b = state.registry.register(tx_b).await;

        let response = app
            .clone()
            .oneshot(post_json("/api/alert/push", alert_push("u1")))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["targetedSubscriberCount"], 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());

        // B disconnects: its session loop unregisters it on the way out.
        state.registry.unregister(id_b).await;
        drop(rx_b);

        let response = app
            .oneshot(post_json("/api/alert/push", alert_push("u1")))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["targetedSubscriberCount"], 1);
        assert!(rx_a.recv().await.is_some());
    }
}
