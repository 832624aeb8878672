// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use async_trait::async_trait;

use crate::credential::{AccountConfig, AccountCredential};
use crate::store::{CredentialTier, StoreError};

/// Provider settings supplied through the environment.
#[derive(Debug, Clone, Default)]
pub struct EnvDefaults {
    pub account_id: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub base_url: Option<String>,
    pub token_url: Option<String>,
}

/// Read-only last-resort tier synthesized from [`EnvDefaults`].
///
/// Only answers for the default account id, and only when both client id
/// and secret are set. The record carries `updated_at_ms = 0` so any
/// persisted copy supersedes it.
pub struct DefaultsTier {
    account_id: String,
    credential: Option<AccountCredential>,
}

impl DefaultsTier {
    pub fn new(defaults: EnvDefaults) -> Self {
        let account_id = defaults.account_id.clone();
        let credential = match (defaults.client_id, defaults.client_secret) {
            (Some(client_id), Some(client_secret)) => {
                let config = AccountConfig {
                    client_id,
                    client_secret,
                    refresh_token: defaults.refresh_token,
                    token_url: defaults.token_url,
                    base_url: defaults.base_url,
                    app_name: Some(format!("{account_id} (environment)")),
                    place_ids: Vec::new(),
                };
                match AccountCredential::from_config(&account_id, config) {
                    Ok(mut cred) => {
                        cred.updated_at_ms = 0;
                        Some(cred)
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, "ignoring environment credential defaults");
                        None
                    }
                }
            }
            _ => None,
        };
        Self { account_id, credential }
    }

    pub fn is_configured(&self) -> bool {
        self.credential.is_some()
    }
}

#[async_trait]
impl CredentialTier for DefaultsTier {
    fn name(&self) -> &str {
        "env-defaults"
    }

    fn is_writable(&self) -> bool {
        false
    }

    async fn get(&self, account_id: &str) -> Result<Option<AccountCredential>, StoreError> {
        Ok(self.credential.clone().filter(|_| account_id == self.account_id))
    }

    async fn put(&self, _credential: &AccountCredential) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn delete(&self, _account_id: &str) -> Result<bool, StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.credential.iter().map(|c| c.account_id.clone()).collect())
    }

    async fn get_active(&self) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    async fn set_active(&self, _account_id: &str) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }
}
