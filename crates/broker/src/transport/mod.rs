// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP admin transport for the broker.

pub mod auth;
pub mod http;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::BrokerState;

/// Build the axum `Router` with all admin routes.
pub fn build_router(state: Arc<BrokerState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Account management
        .route("/api/v1/accounts", get(http::list_accounts))
        .route("/api/v1/accounts/{id}", delete(http::delete_account))
        .route("/api/v1/accounts/{id}/config", get(http::get_config).post(http::put_config))
        .route("/api/v1/accounts/{id}/use", post(http::use_account))
        .route("/api/v1/accounts/{id}/status", get(http::account_status))
        .route("/api/v1/accounts/{id}/info", get(http::account_info))
        // Tokens
        .route("/api/v1/accounts/{id}/token", post(http::account_token))
        .route("/api/v1/token", post(http::current_token))
        // OAuth authorization-code redirect target (no auth)
        .route("/api/v1/oauth/callback", get(http::oauth_callback))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
