// crates/gem-server/src/web/mod.rs
// Router HTTP surface

pub mod state;
pub mod webhooks;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gem_types::{ApiResponse, BrainRequest};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::web::state::AppState;

/// Create the web server router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/brain/run", post(brain_run))
        .route("/brain/tools", get(brain_tools))
        .route("/brain/help", get(brain_help))
        .route("/webhooks/{source}", post(webhooks::ingress))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health` - liveness probe
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "gem-router",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `POST /brain/run`
async fn brain_run(State(state): State<AppState>, Json(request): Json<BrainRequest>) -> Response {
    let response = state.brain.run(request).await;

    // A plan rejected before any enqueue is the caller's error; partial
    // enqueue trouble is reported in-band with a 200.
    let status = if !response.ok && response.enqueued.is_empty() && !response.errors.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    (status, Json(response)).into_response()
}

/// `GET /brain/tools` - tool names with their idempotency modes
async fn brain_tools(State(state): State<AppState>) -> impl IntoResponse {
    let tools: Vec<_> = state
        .registry
        .all()
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "idempotency": format!("{:?}", tool.idempotency.mode).to_lowercase(),
                "timeout_ms": tool.timeout_ms,
            })
        })
        .collect();
    Json(ApiResponse::ok(json!({"tools": tools, "count": tools.len()})))
}

/// `GET /brain/help`
async fn brain_help() -> impl IntoResponse {
    Json(json!({
        "help": HELP_TEXT,
    }))
}

const HELP_TEXT: &str = "\
POST /brain/run with {message, mode, context?, limits?}.
Modes: answer (plan only), plan (plan awaiting approval), enqueue (queue and \
return call ids), enqueue_and_wait (queue, then poll receipts until done or \
wait_timeout_ms).
Example messages:
  health check
  new lead: John Smith, 0412 345 678, Clayton, facebook
  move lead lead-1 to quoted
  book inspection for lead-1 at 2026-08-03T09:00:00Z
  quote lead-1 $4200 for full reroof
  accept quote quote-1
  schedule job for quote quote-1 on 2026-08-10T08:00:00Z
  invoice job job-1 $4200
  mark invoice inv-1 paid
  sms 0412345678: running 20 min late
GET /brain/tools lists every registered tool.";
