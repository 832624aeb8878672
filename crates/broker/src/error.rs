// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Failure surfaced by the broker to its callers.
///
/// Every variant is either retryable (the refresh coordinator backs off and
/// tries again) or terminal (surfaced immediately). Clone is required because
/// a single refresh outcome is fanned out to every waiter on that account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No credential, or no refresh token, exists for the account.
    NotConfigured { account: String, reason: String },
    /// Operator-supplied configuration failed validation.
    InvalidConfig { message: String },
    /// Timeout, connection failure, or a provider 5xx.
    Network { status: Option<u16>, message: String },
    /// Provider answered 429.
    RateLimited { retry_after_secs: Option<u64>, message: String },
    /// Refresh token revoked or expired. Re-authorization required.
    InvalidGrant { description: String },
    /// Client id or secret rejected by the provider.
    InvalidClient { status: u16, description: String },
    /// Any other 4xx from the token endpoint.
    Rejected { status: u16, error: String, description: String },
    /// Success status without a usable token payload.
    MalformedResponse { status: u16, message: String },
    /// Written to a fallback tier only; the primary tier was unreachable.
    StorageDegraded { tier: String, message: String },
    /// No storage tier accepted a write that had to be durable.
    Storage { message: String },
    /// Live verification against the partner API did not succeed.
    Verification { code: String, message: String },
}

impl BrokerError {
    pub fn not_configured(account: &str, reason: impl Into<String>) -> Self {
        Self::NotConfigured { account: account.to_owned(), reason: reason.into() }
    }

    /// Whether the refresh coordinator should back off and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::RateLimited { .. }
                | Self::MalformedResponse { .. }
                | Self::Storage { .. }
        )
    }

    /// Whether a human has to re-run the authorization flow.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::InvalidGrant { .. } | Self::NotConfigured { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConfigured { .. } => "NOT_CONFIGURED",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::InvalidGrant { .. } => "INVALID_GRANT",
            Self::InvalidClient { .. } => "INVALID_CLIENT",
            Self::Rejected { .. } => "REJECTED",
            Self::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            Self::StorageDegraded { .. } => "STORAGE_DEGRADED",
            Self::Storage { .. } => "STORAGE_UNAVAILABLE",
            Self::Verification { .. } => "VERIFICATION_FAILED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotConfigured { .. } => 404,
            Self::InvalidConfig { .. } => 400,
            Self::InvalidGrant { .. } => 401,
            Self::InvalidClient { .. } => 403,
            Self::RateLimited { .. } => 429,
            Self::Rejected { .. } | Self::MalformedResponse { .. } | Self::Verification { .. } => {
                502
            }
            Self::Network { .. } | Self::StorageDegraded { .. } | Self::Storage { .. } => 503,
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: self.to_string() }
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse { error: self.to_error_body() }))
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured { account, reason } => {
                write!(f, "account {account} is not configured: {reason}")
            }
            Self::InvalidConfig { message } => write!(f, "invalid configuration: {message}"),
            Self::Network { status: Some(status), message } => {
                write!(f, "token endpoint unavailable (HTTP {status}): {message}")
            }
            Self::Network { status: None, message } => write!(f, "network error: {message}"),
            Self::RateLimited { retry_after_secs: Some(secs), message } => {
                write!(f, "rate limited, retry after {secs}s: {message}")
            }
            Self::RateLimited { retry_after_secs: None, message } => {
                write!(f, "rate limited: {message}")
            }
            Self::InvalidGrant { description } => {
                write!(f, "refresh token rejected (invalid_grant): {description}")
            }
            Self::InvalidClient { status, description } => {
                write!(f, "client credentials rejected (HTTP {status}): {description}")
            }
            Self::Rejected { status, error, description } => {
                write!(f, "token request rejected (HTTP {status}, {error}): {description}")
            }
            Self::MalformedResponse { status, message } => {
                write!(f, "malformed token response (HTTP {status}): {message}")
            }
            Self::StorageDegraded { tier, message } => {
                write!(f, "credential written without primary tier {tier}: {message}")
            }
            Self::Storage { message } => write!(f, "credential storage unavailable: {message}"),
            Self::Verification { code, message } => {
                write!(f, "token verification failed ({code}): {message}")
            }
        }
    }
}

impl std::error::Error for BrokerError {}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
