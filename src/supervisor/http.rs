//! HTTP API: `/health`, `/internal/bots/room-config`,
//! `/internal/bots/room-stop`. All POSTs are gated by an optional shared
//! secret header when one is configured.

use super::state::RunnerSpawner;
use super::Supervisor;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const ACCESS_KEY_HEADER: &str = "x-ret-bot-access-key";

pub fn build_router<S>(supervisor: Arc<Supervisor<S>>) -> Router
where
    S: RunnerSpawner + Send + Sync + 'static,
    S::Handle: Send + 'static,
{
    let protected = Router::new()
        .route("/internal/bots/room-config", post(room_config::<S>))
        .route("/internal/bots/room-stop", post(room_stop::<S>))
        .route_layer(middleware::from_fn_with_state(supervisor.clone(), require_access_key::<S>));

    Router::new()
        .route("/health", get(health::<S>))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(supervisor)
}

async fn require_access_key<S>(State(supervisor): State<Arc<Supervisor<S>>>, headers: HeaderMap, request: Request, next: Next) -> Response
where
    S: RunnerSpawner + Send + Sync + 'static,
    S::Handle: Send + 'static,
{
    let Some(expected) = supervisor.config().bot_access_key.as_deref() else {
        return next.run(request).await;
    };
    let provided = headers.get(ACCESS_KEY_HEADER).and_then(|v| v.to_str().ok());
    if provided == Some(expected) {
        next.run(request).await
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response()
    }
}

async fn health<S>(State(supervisor): State<Arc<Supervisor<S>>>) -> impl IntoResponse
where
    S: RunnerSpawner + Send + Sync + 'static,
    S::Handle: Send + 'static,
{
    let snapshot = supervisor.health().await;
    Json(json!({
        "ok": true,
        "rooms": snapshot.rooms,
        "active_rooms": snapshot.active_rooms,
        "queued_rooms": snapshot.queued_rooms,
        "max_active_rooms": snapshot.max_active_rooms,
        "max_bots_per_room": snapshot.max_bots_per_room,
        // LLM-backed chat is a boundary contract (spec.md §1 Non-goals);
        // the core never enables it.
        "llm_enabled": false,
        "model": Value::Null,
        "active_hubs": snapshot.active_hubs,
        "queued_hubs": snapshot.queued_hubs,
    }))
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn extract_hub_sid(body: &Value) -> Result<&str, Response> {
    match body.get("hub_sid").and_then(|v| v.as_str()) {
        Some(hub_sid) if !hub_sid.is_empty() => Ok(hub_sid),
        _ => Err(bad_request("hub_sid is required and must be a string")),
    }
}

async fn room_config<S>(State(supervisor): State<Arc<Supervisor<S>>>, Json(body): Json<Value>) -> Response
where
    S: RunnerSpawner + Send + Sync + 'static,
    S::Handle: Send + 'static,
{
    let hub_sid = match extract_hub_sid(&body) {
        Ok(h) => h.to_string(),
        Err(resp) => return resp,
    };
    let bots_raw = body.get("bots").cloned().unwrap_or(Value::Null);
    let runner_state = supervisor.room_config(&hub_sid, &bots_raw).await;
    let bots = supervisor
        .room_config_snapshot(&hub_sid)
        .await
        .map(|c| c.bots.to_json())
        .unwrap_or(Value::Null);

    Json(json!({
        "ok": true,
        "hub_sid": hub_sid,
        "bots": bots,
        "runner_state": runner_state_str(runner_state),
    }))
    .into_response()
}

async fn room_stop<S>(State(supervisor): State<Arc<Supervisor<S>>>, Json(body): Json<Value>) -> Response
where
    S: RunnerSpawner + Send + Sync + 'static,
    S::Handle: Send + 'static,
{
    let hub_sid = match extract_hub_sid(&body) {
        Ok(h) => h.to_string(),
        Err(resp) => return resp,
    };
    supervisor.room_stop(&hub_sid).await;

    Json(json!({
        "ok": true,
        "hub_sid": hub_sid,
        "runner_state": "stopped",
    }))
    .into_response()
}

fn runner_state_str(state: super::state::RunnerState) -> &'static str {
    use super::state::RunnerState::*;
    match state {
        Running => "running",
        QueuedCapacity => "queued_capacity",
        Stopped => "stopped",
    }
}
