use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::application::{broadcast_session, conversation_session};
use crate::domain::translation::Direction;
use crate::gateway::state::AppState;

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct ConversationQuery {
    mode: String,
}

async fn ws_conversation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConversationQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let Some(direction) = Direction::parse(&query.mode) else {
        return (StatusCode::BAD_REQUEST, "unknown mode").into_response();
    };

    let Some(guard) = state.try_acquire_session() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "too many sessions").into_response();
    };

    upgrade.on_upgrade(move |socket| async move {
        conversation_session::run(socket, direction, state).await;
        drop(guard);
    })
}

async fn ws_publisher(State(state): State<Arc<AppState>>, upgrade: WebSocketUpgrade) -> Response {
    let Some(guard) = state.try_acquire_session() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "too many sessions").into_response();
    };

    upgrade.on_upgrade(move |socket| async move {
        broadcast_session::run_publisher(socket, state).await;
        drop(guard);
    })
}

async fn ws_browser(State(state): State<Arc<AppState>>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        broadcast_session::run_browser(socket, state).await;
    })
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}

/// All gateway routes, composed without state so the caller attaches it
/// once at the very end (keeps the router reusable in tests with a
/// different `AppState`).
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/ws/conversation", get(ws_conversation))
        .route("/ws/publisher", get(ws_publisher))
        .route("/ws/browser", get(ws_browser))
}

pub fn build(state: Arc<AppState>) -> Router {
    router()
        .with_state(state)
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
}
