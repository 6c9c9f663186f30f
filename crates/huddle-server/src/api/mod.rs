use crate::state::AppState;
use crate::ws;
use crate::ws::registry::RelayStats;
use axum::{Json, Router, extract::State, routing::get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        .route("/api/stats", get(stats))
        // WebRTC configuration
        .route("/api/rtc/ice-servers", get(crate::webrtc::get_ice_servers))
        // WebSocket control channel
        .route("/ws", get(ws::handler::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn stats(State(state): State<AppState>) -> Json<RelayStats> {
    Json(state.registry.stats().await)
}
