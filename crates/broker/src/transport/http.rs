// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the broker admin API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::credential::AccountConfig;
use crate::error::BrokerError;
use crate::state::BrokerState;
use crate::store::PutOutcome;
use crate::validator::VerifyOptions;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub current_account: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountListResponse {
    pub accounts: Vec<String>,
    pub current: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredResponse {
    pub account_id: String,
    pub durable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl StoredResponse {
    fn new(account_id: &str, outcome: &PutOutcome) -> Self {
        Self {
            account_id: account_id.to_owned(),
            durable: outcome.is_durable(),
            warning: outcome.warning().map(|w| w.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub account_id: String,
    pub removed: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub verify: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub account_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub account: Option<String>,
    pub code: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub account_id: String,
    pub authorized: bool,
    pub refresh_token_stored: bool,
    pub expires_in_secs: u64,
}

fn error_response(e: &BrokerError) -> Response {
    e.to_http_response().into_response()
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<BrokerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: if s.shutdown.is_cancelled() { "stopping" } else { "running" }.to_owned(),
        current_account: s.registry.current_account(),
        uptime_secs: s.started_at.elapsed().as_secs(),
    })
}

/// `GET /api/v1/accounts`
pub async fn list_accounts(State(s): State<Arc<BrokerState>>) -> impl IntoResponse {
    Json(AccountListResponse {
        accounts: s.registry.list_accounts().await,
        current: s.registry.current_account(),
    })
}

/// `GET /api/v1/accounts/{id}/config`, secrets redacted.
pub async fn get_config(State(s): State<Arc<BrokerState>>, Path(id): Path<String>) -> Response {
    match s.registry.account_config(&id).await {
        Some(credential) => Json(credential.redacted()).into_response(),
        None => error_response(&BrokerError::not_configured(&id, "no stored credential")),
    }
}

/// `POST /api/v1/accounts/{id}/config`
pub async fn put_config(
    State(s): State<Arc<BrokerState>>,
    Path(id): Path<String>,
    Json(config): Json<AccountConfig>,
) -> Response {
    match s.registry.set_account_config(&id, config).await {
        Ok(outcome) => Json(StoredResponse::new(&id, &outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `DELETE /api/v1/accounts/{id}`
pub async fn delete_account(State(s): State<Arc<BrokerState>>, Path(id): Path<String>) -> Response {
    match s.registry.delete_account(&id).await {
        Ok(removed) => Json(DeleteResponse { account_id: id, removed }).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /api/v1/accounts/{id}/use`: make the account current.
pub async fn use_account(State(s): State<Arc<BrokerState>>, Path(id): Path<String>) -> Response {
    match s.registry.use_account(&id).await {
        Ok(outcome) => Json(StoredResponse::new(&id, &outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/v1/accounts/{id}/status`
pub async fn account_status(State(s): State<Arc<BrokerState>>, Path(id): Path<String>) -> Response {
    Json(s.registry.status(&id).await).into_response()
}

/// `GET /api/v1/accounts/{id}/info`: partner identity behind the token.
pub async fn account_info(State(s): State<Arc<BrokerState>>, Path(id): Path<String>) -> Response {
    match s.registry.validator().account_info(&id).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn issue(s: &BrokerState, id: String, query: TokenQuery) -> Response {
    let result = if query.verify {
        let options = VerifyOptions { force_refresh: query.force, ..VerifyOptions::default() };
        s.registry.get_verified_token(&id, options).await
    } else if query.force {
        s.registry.refresh_token(&id).await
    } else {
        s.registry.get_valid_token(&id).await
    };
    match result {
        Ok(access_token) => {
            let expires_in_secs =
                s.registry.cache().peek(&id).expires_in(Instant::now()).map(|d| d.as_secs());
            Json(TokenResponse { account_id: id, access_token, expires_in_secs }).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// `POST /api/v1/accounts/{id}/token[?verify=true][&force=true]`
pub async fn account_token(
    State(s): State<Arc<BrokerState>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Response {
    issue(&s, id, query).await
}

/// `POST /api/v1/token`: token for the current account.
pub async fn current_token(
    State(s): State<Arc<BrokerState>>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let id = s.registry.current_account();
    issue(&s, id, query).await
}

/// `GET /api/v1/oauth/callback?code=...[&account=...][&redirect_uri=...]`
pub async fn oauth_callback(
    State(s): State<Arc<BrokerState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let id = query.account.unwrap_or_else(|| s.registry.current_account());
    if query.code.trim().is_empty() {
        return error_response(&BrokerError::InvalidConfig {
            message: "authorization code is required".to_owned(),
        });
    }
    match s
        .registry
        .exchange_authorization_code(&id, query.code.trim(), query.redirect_uri.as_deref())
        .await
    {
        Ok(issued) => Json(CallbackResponse {
            account_id: id,
            authorized: true,
            refresh_token_stored: issued.refresh_token.is_some(),
            expires_in_secs: issued.expires_in,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}
