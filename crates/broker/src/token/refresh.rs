// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight token refresh with backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{http_client, HttpClient};
use crate::config::BrokerSettings;
use crate::error::BrokerError;
use crate::store::{PutOutcome, TieredStore};
use crate::token::cache::{TokenCache, TokenState};
use crate::token::oauth::{self, Grant, IssuedToken};
use crate::token::retry::RetryPolicy;

pub struct RefreshCoordinator {
    store: Arc<TieredStore>,
    cache: Arc<TokenCache>,
    http: HttpClient,
    policy: RetryPolicy,
    poll: Duration,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<TieredStore>, cache: Arc<TokenCache>, settings: &BrokerSettings) -> Self {
        Self {
            store,
            cache,
            http: http_client(settings.token_timeout),
            policy: settings.retry,
            poll: settings.single_flight_poll,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Return a usable access token, refreshing at most once concurrently
    /// per account.
    ///
    /// Callers arriving while a refresh is in flight wait for it and share
    /// its result. Retryable failures are retried with backoff until the
    /// attempt budget is spent; terminal failures return immediately.
    pub async fn get_valid_token(
        &self,
        account_id: &str,
        force_refresh: bool,
    ) -> Result<String, BrokerError> {
        let mut force = force_refresh;
        let mut joined = false;
        loop {
            let now = Instant::now();
            let entry = self.cache.peek(account_id);

            // A flight that finished after we joined satisfies a forced request.
            if joined && entry.state != TokenState::Refreshing {
                force = false;
            }
            if !force {
                if let Some(token) = entry.usable_token(now) {
                    return Ok(token.to_owned());
                }
            }

            match entry.state {
                TokenState::Failed => {
                    return Err(entry.last_error.unwrap_or_else(|| {
                        BrokerError::not_configured(account_id, "refresh failed")
                    }));
                }
                TokenState::Refreshing => {
                    joined = true;
                    self.cache.wait_for_change(self.poll).await;
                    continue;
                }
                TokenState::Unknown | TokenState::Valid => {}
            }

            if let Some(retry_at) = entry.retry_at.filter(|at| *at > now) {
                debug!(account = account_id, wait_ms = (retry_at - now).as_millis() as u64, "refresh backoff");
                tokio::time::sleep_until(retry_at).await;
                continue;
            }

            let Some(gate) = self.cache.begin_refresh(account_id) else {
                joined = true;
                self.cache.wait_for_change(self.poll).await;
                continue;
            };

            match self.refresh_once(account_id).await {
                Ok(issued) => {
                    let expires_at = Instant::now() + issued.usable_lifetime();
                    if gate.complete(issued.access_token.clone(), expires_at) {
                        info!(account = account_id, expires_in = issued.expires_in, "access token refreshed");
                        return Ok(issued.access_token);
                    }
                    debug!(account = account_id, "refresh superseded by credential change");
                    force = false;
                }
                Err(e) if e.is_retryable() => {
                    let failures = gate.refresh_attempts().saturating_add(1);
                    let delay = self.policy.backoff(failures, &e);
                    if gate.fail(e.clone(), Some(delay)) == TokenState::Failed {
                        warn!(account = account_id, attempts = failures, err = %e, "refresh attempts exhausted");
                        return Err(e);
                    }
                    warn!(
                        account = account_id,
                        attempt = failures,
                        retry_ms = delay.as_millis() as u64,
                        err = %e,
                        "refresh failed, retrying"
                    );
                    force = false;
                }
                Err(e) => {
                    if matches!(e, BrokerError::InvalidGrant { .. }) {
                        self.clear_refresh_token(account_id).await;
                    }
                    warn!(account = account_id, err = %e, "refresh failed");
                    gate.fail(e.clone(), None);
                    return Err(e);
                }
            }
        }
    }

    async fn refresh_once(&self, account_id: &str) -> Result<IssuedToken, BrokerError> {
        let Some(credential) = self.store.get(account_id).await else {
            return Err(BrokerError::not_configured(account_id, "no stored credential"));
        };
        let Some(refresh_token) = credential.refresh_token.clone().filter(|t| !t.is_empty()) else {
            return Err(BrokerError::not_configured(account_id, "no refresh token, authorization required"));
        };

        let issued =
            oauth::request_token(&self.http, &credential, Grant::RefreshToken(&refresh_token))
                .await?;

        // The rotated refresh token must be stored before the access token is
        // handed out; otherwise a restart would replay a dead refresh token.
        if let Some(rotated) = issued.refresh_token.as_deref().filter(|rt| *rt != refresh_token) {
            self.persist_rotation(account_id, &refresh_token, rotated).await?;
        }
        Ok(issued)
    }

    /// Store a rotated refresh token on the latest stored credential.
    ///
    /// The presented token is already retired upstream, so the rotation is
    /// kept even if the account was invalidated meanwhile. A refresh token an
    /// operator replaced during the flight is left alone.
    async fn persist_rotation(
        &self,
        account_id: &str,
        presented: &str,
        rotated: &str,
    ) -> Result<(), BrokerError> {
        let Some(mut latest) = self.store.get(account_id).await else {
            debug!(account = account_id, "account removed during refresh, rotation dropped");
            return Ok(());
        };
        if latest.refresh_token.as_deref() != Some(presented) {
            debug!(account = account_id, "refresh token replaced during refresh, rotation dropped");
            return Ok(());
        }
        latest.refresh_token = Some(rotated.to_owned());
        latest.touch();
        match self.store.put(&latest).await {
            Ok(PutOutcome::Durable) => {
                debug!(account = account_id, "rotated refresh token stored");
                Ok(())
            }
            Ok(PutOutcome::Degraded { tier, reason }) => {
                warn!(account = account_id, tier = %tier, reason = %reason, "rotated refresh token stored degraded");
                Ok(())
            }
            Err(e) => Err(BrokerError::Storage {
                message: format!("rotated refresh token not persisted: {e}"),
            }),
        }
    }

    /// Drop a revoked refresh token so it is never presented again.
    async fn clear_refresh_token(&self, account_id: &str) {
        let Some(mut credential) = self.store.get(account_id).await else { return };
        if credential.refresh_token.is_none() {
            return;
        }
        credential.refresh_token = None;
        credential.touch();
        match self.store.put(&credential).await {
            Ok(_) => info!(account = account_id, "cleared revoked refresh token"),
            Err(e) => warn!(account = account_id, err = %e, "failed to clear revoked refresh token"),
        }
    }

    /// Exchange an authorization code and store the issued refresh token.
    ///
    /// Holds the same single-flight gate as refreshes so a concurrent
    /// refresh cannot overwrite the newly issued refresh token.
    pub async fn exchange_authorization_code(
        &self,
        account_id: &str,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<IssuedToken, BrokerError> {
        let deadline = Instant::now() + self.http_budget();
        let gate = loop {
            if let Some(gate) = self.cache.begin_refresh(account_id) {
                break gate;
            }
            if self.cache.peek(account_id).state == TokenState::Failed {
                // A FAILED account is exactly what re-authorization repairs.
                self.cache.invalidate(account_id);
                continue;
            }
            if Instant::now() >= deadline {
                return Err(BrokerError::Network {
                    status: None,
                    message: "timed out waiting for in-flight refresh".to_owned(),
                });
            }
            self.cache.wait_for_change(self.poll).await;
        };

        let result = async {
            let Some(mut credential) = self.store.get(account_id).await else {
                return Err(BrokerError::not_configured(account_id, "no stored credential"));
            };
            let issued = oauth::request_token(
                &self.http,
                &credential,
                Grant::AuthorizationCode { code, redirect_uri },
            )
            .await?;
            if let Some(refresh_token) = &issued.refresh_token {
                credential.refresh_token = Some(refresh_token.clone());
                credential.touch();
                if let Some(warning) = self.store.put(&credential).await?.warning() {
                    warn!(account = account_id, err = %warning, "authorization stored degraded");
                }
            }
            Ok::<IssuedToken, BrokerError>(issued)
        }
        .await;

        match result {
            Ok(issued) => {
                let expires_at = Instant::now() + issued.usable_lifetime();
                gate.complete(issued.access_token.clone(), expires_at);
                info!(account = account_id, "authorization code exchanged");
                Ok(issued)
            }
            Err(e) => {
                warn!(account = account_id, err = %e, "authorization code exchange failed");
                gate.abandon(Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Longest a caller may reasonably wait on another flight.
    fn http_budget(&self) -> Duration {
        self.policy.max_delay.max(Duration::from_secs(30))
    }
}
