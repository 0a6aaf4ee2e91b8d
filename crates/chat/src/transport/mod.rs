// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the chat gateway.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::GatewayState;

/// Build the axum `Router` with all gateway routes.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    // Conversation registration (admin bearer token)
    let admin = Router::new()
        .route(
            "/api/v1/conversations/{id}",
            put(http::put_conversation).delete(http::delete_conversation),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::admin_layer));

    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // History (participant token)
        .route("/api/v1/conversations/{id}/messages", get(http::history))
        // Live channel
        .route("/ws", get(ws::ws_handler))
        .merge(admin)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
