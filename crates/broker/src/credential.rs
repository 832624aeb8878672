// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-account OAuth2 client credentials and their validation.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

pub const DEFAULT_BASE_URL: &str = "https://partner.hanet.ai";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth.hanet.com/token";

const REDACTED: &str = "******";
const MAX_ACCOUNT_ID_LEN: usize = 128;

/// Stored OAuth2 client registration for one tenant account.
///
/// `updated_at_ms` is stamped on every write and decides which storage tier
/// holds the newest copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCredential {
    pub account_id: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_url: String,
    pub base_url: String,
    pub app_name: String,
    #[serde(default)]
    pub place_ids: BTreeSet<String>,
    #[serde(default)]
    pub updated_at_ms: u64,
}

/// Operator input for creating or replacing an account's configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub place_ids: Vec<String>,
}

/// Credential view with secrets masked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactedCredential {
    pub account_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: Option<String>,
    pub token_url: String,
    pub base_url: String,
    pub app_name: String,
    pub place_ids: Vec<String>,
    pub updated_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    InvalidAccountId(String),
    MissingField(&'static str),
    InvalidUrl { field: &'static str, value: String },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAccountId(id) => write!(f, "invalid account id {id:?}"),
            Self::MissingField(field) => write!(f, "{field} is required"),
            Self::InvalidUrl { field, value } => {
                write!(f, "{field} must be an http(s) URL, got {value:?}")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

impl From<CredentialError> for BrokerError {
    fn from(e: CredentialError) -> Self {
        BrokerError::InvalidConfig { message: e.to_string() }
    }
}

/// Account ids double as file names in the file tier.
pub fn validate_account_id(account_id: &str) -> Result<(), CredentialError> {
    let ok = !account_id.is_empty()
        && account_id.len() <= MAX_ACCOUNT_ID_LEN
        && !account_id.starts_with('.')
        && account_id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if ok {
        Ok(())
    } else {
        Err(CredentialError::InvalidAccountId(account_id.to_owned()))
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn require_url(field: &'static str, value: String) -> Result<String, CredentialError> {
    let value = value.trim().trim_end_matches('/').to_owned();
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(value)
    } else {
        Err(CredentialError::InvalidUrl { field, value })
    }
}

impl AccountCredential {
    /// Build a credential from operator input, filling provider defaults.
    pub fn from_config(account_id: &str, config: AccountConfig) -> Result<Self, CredentialError> {
        validate_account_id(account_id)?;
        let client_id =
            normalize(Some(config.client_id)).ok_or(CredentialError::MissingField("client_id"))?;
        let client_secret = normalize(Some(config.client_secret))
            .ok_or(CredentialError::MissingField("client_secret"))?;
        let token_url = require_url(
            "token_url",
            normalize(config.token_url).unwrap_or_else(|| DEFAULT_TOKEN_URL.to_owned()),
        )?;
        let base_url = require_url(
            "base_url",
            normalize(config.base_url).unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
        )?;
        let place_ids = config
            .place_ids
            .into_iter()
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Self {
            account_id: account_id.to_owned(),
            client_id,
            client_secret,
            refresh_token: normalize(config.refresh_token),
            token_url,
            base_url,
            app_name: normalize(config.app_name).unwrap_or_else(|| account_id.to_owned()),
            place_ids,
            updated_at_ms: epoch_ms(),
        })
    }

    /// Stamp the record as the newest write.
    ///
    /// Strictly increases `updated_at_ms` even when two writes land in the
    /// same millisecond.
    pub fn touch(&mut self) {
        self.updated_at_ms = epoch_ms().max(self.updated_at_ms.saturating_add(1));
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn redacted(&self) -> RedactedCredential {
        RedactedCredential {
            account_id: self.account_id.clone(),
            client_id: self.client_id.clone(),
            client_secret: REDACTED.to_owned(),
            refresh_token: self.refresh_token.as_ref().map(|_| REDACTED.to_owned()),
            token_url: self.token_url.clone(),
            base_url: self.base_url.clone(),
            app_name: self.app_name.clone(),
            place_ids: self.place_ids.iter().cloned().collect(),
            updated_at_ms: self.updated_at_ms,
        }
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
