//! Huddle relay library
//!
//! This module exposes the relay components for testing and embedding.

pub mod api;
pub mod error;
pub mod state;
pub mod webrtc;
pub mod ws;

/// Create the relay application and start its liveness sweep.
///
/// Must be called from within a Tokio runtime.
pub fn create_app(config: state::Config) -> (axum::Router, state::AppState) {
    let app_state = state::AppState::new(config);
    ws::liveness::spawn_sweeper(
        app_state.registry.clone(),
        app_state.config.liveness_interval,
    );
    let router = api::create_router(app_state.clone());
    (router, app_state)
}
