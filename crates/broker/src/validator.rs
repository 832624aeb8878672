// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live token verification against the partner API.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{http_client, HttpClient};
use crate::config::BrokerSettings;
use crate::error::BrokerError;
use crate::store::TieredStore;
use crate::token::refresh::RefreshCoordinator;

/// Cheapest authenticated endpoint on the partner API.
pub const ACCOUNT_INFO_PATH: &str = "/api/v3/account/info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Valid,
    Expired,
    Invalid,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStatus {
    pub status: AuthStatus,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl TokenStatus {
    fn new(status: AuthStatus, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { status, code: code.into(), message: message.into(), http_status: None }
    }

    fn with_http(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.status == AuthStatus::Valid
    }
}

/// Options for [`LiveValidator::get_verified_token`].
#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    pub force_refresh: bool,
    pub max_retries: u32,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self { force_refresh: false, max_retries: 2 }
    }
}

/// Identity of the partner account that owns a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub username: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoEnvelope {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<InfoData>,
}

#[derive(Debug, Deserialize)]
struct InfoData {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Partner API success code, sent as a string or number.
fn code_text(code: &Option<serde_json::Value>) -> Option<String> {
    match code {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub struct LiveValidator {
    coordinator: Arc<RefreshCoordinator>,
    store: Arc<TieredStore>,
    http: HttpClient,
}

impl LiveValidator {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        store: Arc<TieredStore>,
        settings: &BrokerSettings,
    ) -> Self {
        Self { coordinator, store, http: http_client(settings.validate_timeout) }
    }

    async fn call_account_info(
        &self,
        access_token: &str,
        base_url: &str,
    ) -> (TokenStatus, Option<InfoEnvelope>) {
        if access_token.is_empty() {
            return (TokenStatus::new(AuthStatus::Invalid, "missing_token", "no token supplied"), None);
        }

        let url = format!("{}{ACCOUNT_INFO_PATH}", base_url.trim_end_matches('/'));
        let resp = match self.http.get(&url).bearer_auth(access_token).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(err = %e, "account info request failed");
                return (TokenStatus::new(AuthStatus::Error, "network_error", e.to_string()), None);
            }
        };

        let status = resp.status();
        let http = status.as_u16();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let status = TokenStatus::new(AuthStatus::Expired, format!("http_{http}"), "token rejected");
            return (status.with_http(http), None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let status = TokenStatus::new(AuthStatus::Error, "rate_limited", "partner API rate limit");
            return (status.with_http(http), None);
        }
        if !status.is_success() {
            let status = TokenStatus::new(
                AuthStatus::Error,
                format!("api_error_{http}"),
                format!("partner API answered HTTP {http}"),
            );
            return (status.with_http(http), None);
        }

        let envelope: InfoEnvelope = match resp.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                let status =
                    TokenStatus::new(AuthStatus::Invalid, "api_unknown", format!("unreadable body: {e}"));
                return (status.with_http(http), None);
            }
        };
        match code_text(&envelope.code).as_deref() {
            Some("1") => (TokenStatus::new(AuthStatus::Valid, "ok", "token accepted").with_http(http), Some(envelope)),
            other => {
                let code = format!("api_{}", other.unwrap_or("unknown"));
                let message = envelope.message.clone().unwrap_or_else(|| "token not accepted".to_owned());
                (TokenStatus::new(AuthStatus::Invalid, code, message).with_http(http), None)
            }
        }
    }

    /// Classify a token by calling the partner account-info endpoint.
    pub async fn check_token_status(&self, access_token: &str, base_url: &str) -> TokenStatus {
        self.call_account_info(access_token, base_url).await.0
    }

    async fn base_url(&self, account_id: &str) -> Result<String, BrokerError> {
        self.store
            .get(account_id)
            .await
            .map(|c| c.base_url)
            .ok_or_else(|| BrokerError::not_configured(account_id, "no stored credential"))
    }

    /// Return a token the partner API has just accepted.
    ///
    /// A token the API rejects as expired triggers a forced refresh and a
    /// re-check. An INVALID answer is treated the same way while rounds
    /// remain. Terminal refresh failures are returned immediately.
    pub async fn get_verified_token(
        &self,
        account_id: &str,
        options: VerifyOptions,
    ) -> Result<String, BrokerError> {
        let base_url = self.base_url(account_id).await?;
        let mut token = self.coordinator.get_valid_token(account_id, options.force_refresh).await?;
        let mut last_error = None;

        for round in 0..=options.max_retries {
            let status = self.check_token_status(&token, &base_url).await;
            if status.is_valid() {
                return Ok(token);
            }

            let refreshable = status.status == AuthStatus::Expired
                || (status.status == AuthStatus::Invalid && round < options.max_retries);
            if !refreshable {
                debug!(account = account_id, round, code = %status.code, "verification inconclusive");
                last_error = Some(BrokerError::Verification { code: status.code, message: status.message });
                continue;
            }

            warn!(account = account_id, round, code = %status.code, "token rejected by partner API, refreshing");
            match self.coordinator.get_valid_token(account_id, true).await {
                Ok(fresh) => {
                    let recheck = self.check_token_status(&fresh, &base_url).await;
                    if recheck.is_valid() {
                        return Ok(fresh);
                    }
                    last_error =
                        Some(BrokerError::Verification { code: recheck.code, message: recheck.message });
                    token = fresh;
                }
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| BrokerError::Verification {
            code: "exhausted".to_owned(),
            message: "verification rounds exhausted".to_owned(),
        }))
    }

    /// Whether the account's current token is accepted by the partner API.
    /// Never refreshes.
    pub async fn is_token_valid(&self, account_id: &str, access_token: &str) -> bool {
        match self.base_url(account_id).await {
            Ok(base_url) => self.check_token_status(access_token, &base_url).await.is_valid(),
            Err(_) => false,
        }
    }

    /// Partner account identity for a verified token.
    pub async fn account_info(&self, account_id: &str) -> Result<AccountInfo, BrokerError> {
        let token = self.get_verified_token(account_id, VerifyOptions::default()).await?;
        let base_url = self.base_url(account_id).await?;
        let (status, envelope) = self.call_account_info(&token, &base_url).await;
        let data = envelope.and_then(|e| e.data).ok_or(BrokerError::Verification {
            code: status.code,
            message: "account info missing from response".to_owned(),
        })?;
        let username = data.username.unwrap_or_default();
        Ok(AccountInfo {
            name: data.name.filter(|n| !n.is_empty()).unwrap_or_else(|| username.clone()),
            username,
            email: data.email,
        })
    }
}
