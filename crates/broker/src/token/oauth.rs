// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token endpoint client and response classification.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use serde::Deserialize;

use crate::client::HttpClient;
use crate::credential::AccountCredential;
use crate::error::BrokerError;

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
/// Share of the advertised lifetime during which a token is served.
const USABLE_LIFETIME_PERMILLE: u64 = 900;
const BODY_EXCERPT_LEN: usize = 200;

/// Grant presented to the token endpoint.
#[derive(Debug, Clone, Copy)]
pub enum Grant<'a> {
    RefreshToken(&'a str),
    AuthorizationCode { code: &'a str, redirect_uri: Option<&'a str> },
}

/// Successful token endpoint answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    /// Present when the provider rotated (or first issued) a refresh token.
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

impl IssuedToken {
    /// Time from issuance during which the token is handed out.
    pub fn usable_lifetime(&self) -> Duration {
        Duration::from_millis(self.expires_in.saturating_mul(USABLE_LIFETIME_PERMILLE))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Secs(u64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<ExpiresIn>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_owned(),
    }
}

fn classify_oauth_error(status: u16, error: &str, description: String) -> BrokerError {
    match error {
        "invalid_grant" => BrokerError::InvalidGrant { description },
        "invalid_client" | "unauthorized_client" => {
            BrokerError::InvalidClient { status, description }
        }
        "temporarily_unavailable" | "server_error" => {
            BrokerError::Network { status: Some(status), message: format!("{error}: {description}") }
        }
        other => BrokerError::Rejected { status, error: other.to_owned(), description },
    }
}

/// Map a token endpoint response onto a token or a classified error.
pub fn classify_response(
    status: u16,
    retry_after_secs: Option<u64>,
    body: &str,
) -> Result<IssuedToken, BrokerError> {
    let parsed: Option<RawTokenResponse> = serde_json::from_str(body).ok();

    if status == 429 {
        let message = parsed
            .and_then(|r| r.error_description.or(r.error))
            .unwrap_or_else(|| excerpt(body));
        return Err(BrokerError::RateLimited { retry_after_secs, message });
    }
    if status >= 500 {
        return Err(BrokerError::Network { status: Some(status), message: excerpt(body) });
    }

    let raw = parsed.unwrap_or_default();
    let description = raw.error_description.clone().unwrap_or_default();

    if (200..300).contains(&status) {
        if let Some(access_token) = raw.access_token.filter(|t| !t.is_empty()) {
            let expires_in = match raw.expires_in {
                Some(ExpiresIn::Secs(secs)) => secs,
                Some(ExpiresIn::Text(text)) => {
                    text.trim().parse().unwrap_or(DEFAULT_EXPIRES_IN_SECS)
                }
                None => DEFAULT_EXPIRES_IN_SECS,
            };
            return Ok(IssuedToken {
                access_token,
                refresh_token: raw.refresh_token.filter(|t| !t.is_empty()),
                expires_in,
            });
        }
        if let Some(error) = raw.error.as_deref() {
            return Err(classify_oauth_error(status, error, description));
        }
        return Err(BrokerError::MalformedResponse {
            status,
            message: "response has no access_token".to_owned(),
        });
    }

    match raw.error.as_deref() {
        Some(error) => Err(classify_oauth_error(status, error, description)),
        None if status == 401 => {
            Err(BrokerError::InvalidClient { status, description: excerpt(body) })
        }
        None => Err(BrokerError::Rejected {
            status,
            error: format!("http_{status}"),
            description: excerpt(body),
        }),
    }
}

fn transport_error(e: reqwest::Error) -> BrokerError {
    let message = if e.is_timeout() {
        format!("token request timed out: {e}")
    } else if e.is_connect() {
        format!("token endpoint unreachable: {e}")
    } else {
        e.to_string()
    };
    BrokerError::Network { status: None, message }
}

/// POST a grant to the account's token endpoint.
pub async fn request_token(
    client: &HttpClient,
    credential: &AccountCredential,
    grant: Grant<'_>,
) -> Result<IssuedToken, BrokerError> {
    let mut form: Vec<(&str, &str)> = Vec::with_capacity(5);
    match grant {
        Grant::RefreshToken(refresh_token) => {
            form.push(("grant_type", "refresh_token"));
            form.push(("refresh_token", refresh_token));
        }
        Grant::AuthorizationCode { code, redirect_uri } => {
            form.push(("grant_type", "authorization_code"));
            form.push(("code", code));
            if let Some(uri) = redirect_uri {
                form.push(("redirect_uri", uri));
            }
        }
    }
    form.push(("client_id", credential.client_id.as_str()));
    form.push(("client_secret", credential.client_secret.as_str()));

    let resp =
        client.post(&credential.token_url).form(&form).send().await.map_err(transport_error)?;
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = resp.text().await.map_err(transport_error)?;
    classify_response(status, retry_after, &body)
}

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
