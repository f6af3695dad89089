//! Thin HTTP transport sketch wiring representative endpoints onto C1-C11.
//! Not a full production router: one handler per component to show the
//! shape (extractors, `IntoResponse`, the `Arc<ControlPlane>` state share)
//! a real deployment would flesh out the same way. Grounded in the
//! `axum`/`tower`/`tower-http` stack and `Router::new().route(...)`
//! composition style used by the pack's tunnel server
//! (`httpserver-tunnel/src/server.rs`).

mod error;
mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::ControlPlane;

pub fn router(plane: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/users/login", post(handlers::login))
        .route("/ssh/db/host", get(handlers::list_hosts))
        .route("/metrics/:id", get(handlers::host_metrics))
        .route("/ssh/file_manager/listFiles", get(handlers::list_directory))
        .route("/ssh/tunnel/connect", post(handlers::connect_tunnel))
        .route("/ssh/tunnel/disconnect", post(handlers::disconnect_tunnel))
        .route("/ssh/tunnel/status", get(handlers::tunnel_statuses))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(plane)
}
