//! wa-daemon
//!
//! The HTTP control-plane surface (component K, `spec.md` §4.K): wraps a
//! [`ControlPlane`] in an Axum router so campaigns, scheduled messages,
//! and template previews can be driven over HTTP instead of embedded
//! directly in a process.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod middleware;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use wa_runtime::ControlPlane;

/// Shared state handed to every route handler.
pub struct AppState {
    /// The embedded control plane driving all campaign and message state.
    pub control_plane: Arc<ControlPlane>,
}

/// Assemble the full router: routes, request logging, and request-id
/// tagging, wired the way `abp-daemon` wires its own app.
pub fn build_app(control_plane: Arc<ControlPlane>) -> Router {
    let state = Arc::new(AppState { control_plane });

    Router::new()
        .route("/health", get(api::health))
        .route("/campaigns", post(api::create_campaign))
        .route("/campaigns/{id}/pause", post(api::pause_campaign))
        .route("/campaigns/{id}/resume", post(api::resume_campaign))
        .route("/campaigns/{id}/cancel", post(api::cancel_campaign))
        .route("/campaigns/{id}/progress", get(api::campaign_progress))
        .route("/campaigns/{id}/stats", get(api::campaign_stats))
        .route("/campaigns/{id}/export", get(api::export_campaign))
        .route("/messages/schedule", post(api::schedule_message))
        .route("/messages/{id}", delete(api::cancel_scheduled))
        .route("/templates/validate", post(api::validate_template))
        .route("/templates/preview", post(api::preview_template))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
