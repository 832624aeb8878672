// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account registry: the entry point collaborators use to obtain tokens.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::config::BrokerSettings;
use crate::credential::{validate_account_id, AccountConfig, AccountCredential};
use crate::error::BrokerError;
use crate::store::{PutOutcome, TieredStore};
use crate::token::cache::{TokenCache, TokenState};
use crate::token::oauth::IssuedToken;
use crate::token::refresh::RefreshCoordinator;
use crate::validator::{LiveValidator, VerifyOptions};

/// Connection summary for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No credential stored.
    Unconfigured,
    /// Credential stored but no refresh token yet.
    Configured,
    Authenticated,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub account_id: String,
    pub status: ConnectionStatus,
    pub token_state: TokenState,
    pub refresh_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub current: bool,
}

pub struct AccountRegistry {
    store: Arc<TieredStore>,
    cache: Arc<TokenCache>,
    coordinator: Arc<RefreshCoordinator>,
    validator: LiveValidator,
    current: RwLock<Option<String>>,
    default_account: String,
}

impl AccountRegistry {
    pub fn new(store: TieredStore, settings: &BrokerSettings) -> Arc<Self> {
        let store = Arc::new(store);
        let cache = Arc::new(TokenCache::new(settings.retry.max_attempts, settings.failed_cooldown));
        let coordinator =
            Arc::new(RefreshCoordinator::new(Arc::clone(&store), Arc::clone(&cache), settings));
        let validator = LiveValidator::new(Arc::clone(&coordinator), Arc::clone(&store), settings);
        Arc::new(Self {
            store,
            cache,
            coordinator,
            validator,
            current: RwLock::new(None),
            default_account: settings.default_account.clone(),
        })
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    pub fn validator(&self) -> &LiveValidator {
        &self.validator
    }

    /// Restore the persisted current-account pointer.
    pub async fn load_active(&self) -> Option<String> {
        let active = self.store.get_active().await;
        if let Some(id) = &active {
            info!(account = %id, "restored current account");
            *self.current.write() = Some(id.clone());
        }
        active
    }

    /// Account used when a caller does not name one.
    pub fn current_account(&self) -> String {
        self.current.read().clone().unwrap_or_else(|| self.default_account.clone())
    }

    /// Make `account_id` current. The account must have a stored credential.
    pub async fn use_account(&self, account_id: &str) -> Result<PutOutcome, BrokerError> {
        validate_account_id(account_id)?;
        if self.store.get(account_id).await.is_none() {
            return Err(BrokerError::not_configured(account_id, "no stored credential"));
        }
        self.cache.invalidate_idle(account_id);
        let outcome = self.store.set_active(account_id).await?;
        *self.current.write() = Some(account_id.to_owned());
        info!(account = account_id, "switched current account");
        Ok(outcome)
    }

    /// Create or replace an account's configuration.
    ///
    /// An omitted refresh token keeps the stored one when the client id is
    /// unchanged, so rotating a client secret does not force re-authorization.
    pub async fn set_account_config(
        &self,
        account_id: &str,
        config: AccountConfig,
    ) -> Result<PutOutcome, BrokerError> {
        let mut credential = AccountCredential::from_config(account_id, config)?;
        if credential.refresh_token.is_none() {
            if let Some(existing) = self.store.get(account_id).await {
                if existing.client_id == credential.client_id {
                    credential.refresh_token = existing.refresh_token;
                }
                credential.updated_at_ms = credential.updated_at_ms.max(existing.updated_at_ms);
            }
        }
        credential.touch();
        let outcome = self.store.put(&credential).await?;
        self.cache.invalidate(account_id);
        info!(account = account_id, durable = outcome.is_durable(), "account configuration stored");
        Ok(outcome)
    }

    pub async fn account_config(&self, account_id: &str) -> Option<AccountCredential> {
        self.store.get(account_id).await
    }

    pub async fn list_accounts(&self) -> Vec<String> {
        self.store.list_account_ids().await
    }

    pub async fn delete_account(&self, account_id: &str) -> Result<bool, BrokerError> {
        let removed = self.store.delete(account_id).await?;
        self.cache.remove(account_id);
        let mut current = self.current.write();
        if current.as_deref() == Some(account_id) {
            *current = None;
        }
        Ok(removed)
    }

    pub async fn get_valid_token(&self, account_id: &str) -> Result<String, BrokerError> {
        self.coordinator.get_valid_token(account_id, false).await
    }

    /// Force a refresh regardless of the cached token.
    pub async fn refresh_token(&self, account_id: &str) -> Result<String, BrokerError> {
        self.coordinator.get_valid_token(account_id, true).await
    }

    pub async fn get_verified_token(
        &self,
        account_id: &str,
        options: VerifyOptions,
    ) -> Result<String, BrokerError> {
        self.validator.get_verified_token(account_id, options).await
    }

    /// Cached token is present and accepted by the partner API.
    pub async fn is_token_valid(&self, account_id: &str) -> bool {
        let entry = self.cache.peek(account_id);
        match entry.usable_token(Instant::now()) {
            Some(token) => self.validator.is_token_valid(account_id, token).await,
            None => false,
        }
    }

    pub async fn exchange_authorization_code(
        &self,
        account_id: &str,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<IssuedToken, BrokerError> {
        self.coordinator.exchange_authorization_code(account_id, code, redirect_uri).await
    }

    /// Resolve a token for the account and summarize the result.
    pub async fn status(&self, account_id: &str) -> AccountStatus {
        let credential = self.store.get(account_id).await;
        let (status, error) = match &credential {
            None => (ConnectionStatus::Unconfigured, None),
            Some(c) if !c.has_refresh_token() => (ConnectionStatus::Configured, None),
            Some(_) => match self.get_valid_token(account_id).await {
                Ok(_) => (ConnectionStatus::Authenticated, None),
                Err(e) => (ConnectionStatus::Error, Some(e)),
            },
        };
        let entry = self.cache.peek(account_id);
        AccountStatus {
            account_id: account_id.to_owned(),
            status,
            token_state: entry.state,
            refresh_attempts: entry.refresh_attempts,
            expires_in_secs: entry.expires_in(Instant::now()).map(|d| d.as_secs()),
            error_code: error.as_ref().map(|e| e.as_str().to_owned()),
            message: error.map(|e| e.to_string()),
            current: self.current_account() == account_id,
        }
    }
}
