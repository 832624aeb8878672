// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory access-token state per account.
//!
//! ```text
//! UNKNOWN --begin_refresh---> REFRESHING --set_valid--> VALID
//!                                   |                      | expires_at passes
//!                                   +--mark_failed-->      v
//!                        UNKNOWN (retry_at) | FAILED (cool-down) --> UNKNOWN
//! ```
//!
//! Expired and cooled-down transitions are applied lazily on access.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Unknown,
    Refreshing,
    Valid,
    Failed,
}

impl TokenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Refreshing => "refreshing",
            Self::Valid => "valid",
            Self::Failed => "failed",
        }
    }
}

/// Snapshot of one account's cached token.
///
/// `expires_at` already has the safety margin applied: the token is served
/// only while `now < expires_at`.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: Option<String>,
    pub expires_at: Option<Instant>,
    pub last_synced_at: Option<Instant>,
    pub state: TokenState,
    /// Consecutive failed refreshes since the last success.
    pub refresh_attempts: u32,
    pub last_error: Option<BrokerError>,
    /// Earliest instant the next refresh may start.
    pub retry_at: Option<Instant>,
    pub failed_until: Option<Instant>,
    /// Bumped by `invalidate`; a refresh started under an older generation
    /// must not install its result.
    pub generation: u64,
}

impl Default for CachedToken {
    fn default() -> Self {
        Self {
            access_token: None,
            expires_at: None,
            last_synced_at: None,
            state: TokenState::Unknown,
            refresh_attempts: 0,
            last_error: None,
            retry_at: None,
            failed_until: None,
            generation: 0,
        }
    }
}

impl CachedToken {
    /// Token that may be handed out at `now`.
    ///
    /// A REFRESHING entry still serves its previous token until expiry
    /// (forced refreshes start from VALID).
    pub fn usable_token(&self, now: Instant) -> Option<&str> {
        match self.state {
            TokenState::Valid | TokenState::Refreshing => {}
            TokenState::Unknown | TokenState::Failed => return None,
        }
        match (&self.access_token, self.expires_at) {
            (Some(token), Some(expires_at)) if now < expires_at => Some(token),
            _ => None,
        }
    }

    pub fn expires_in(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }

    fn clear_token(&mut self) {
        self.access_token = None;
        self.expires_at = None;
    }

    fn apply_lazy_transitions(&mut self, now: Instant) {
        match self.state {
            TokenState::Valid if self.expires_at.is_none_or(|at| now >= at) => {
                self.clear_token();
                self.state = TokenState::Unknown;
            }
            TokenState::Failed if self.failed_until.is_none_or(|at| now >= at) => {
                self.state = TokenState::Unknown;
                self.refresh_attempts = 0;
                self.failed_until = None;
                self.retry_at = None;
            }
            _ => {}
        }
    }
}

pub struct TokenCache {
    entries: Mutex<HashMap<String, CachedToken>>,
    changed: Notify,
    max_attempts: u32,
    cooldown: Duration,
}

impl TokenCache {
    pub fn new(max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            changed: Notify::new(),
            max_attempts: max_attempts.max(1),
            cooldown,
        }
    }

    /// Current entry after lazy transitions. Missing accounts read as UNKNOWN.
    pub fn peek(&self, account_id: &str) -> CachedToken {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(account_id) {
            Some(entry) => {
                entry.apply_lazy_transitions(now);
                entry.clone()
            }
            None => CachedToken::default(),
        }
    }

    /// Single-flight gate: returns `false` if a refresh is already running
    /// or the account is cooling down.
    pub fn mark_refreshing(&self, account_id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(account_id.to_owned()).or_default();
        entry.apply_lazy_transitions(now);
        match entry.state {
            TokenState::Refreshing | TokenState::Failed => false,
            TokenState::Unknown | TokenState::Valid => {
                entry.state = TokenState::Refreshing;
                true
            }
        }
    }

    /// Acquire the single-flight gate as a guard. Dropping the guard before
    /// it is finished (e.g. the caller's future is cancelled) releases the
    /// gate without counting an attempt.
    pub fn begin_refresh(&self, account_id: &str) -> Option<RefreshGate<'_>> {
        if !self.mark_refreshing(account_id) {
            return None;
        }
        let held = self.peek(account_id);
        Some(RefreshGate {
            cache: self,
            account_id: account_id.to_owned(),
            generation: held.generation,
            refresh_attempts: held.refresh_attempts,
            finished: false,
        })
    }

    pub fn set_valid(&self, account_id: &str, access_token: String, expires_at: Instant) {
        {
            let mut entries = self.entries.lock();
            let entry = entries.entry(account_id.to_owned()).or_default();
            Self::install(entry, access_token, expires_at);
        }
        self.changed.notify_waiters();
    }

    /// Install a refresh result only if the account was not invalidated
    /// since `generation`. On mismatch the entry returns to UNKNOWN.
    pub fn complete_refresh(
        &self,
        account_id: &str,
        generation: u64,
        access_token: String,
        expires_at: Instant,
    ) -> bool {
        let installed = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(account_id.to_owned()).or_default();
            if entry.generation == generation {
                Self::install(entry, access_token, expires_at);
                true
            } else {
                entry.state = TokenState::Unknown;
                false
            }
        };
        self.changed.notify_waiters();
        installed
    }

    fn install(entry: &mut CachedToken, access_token: String, expires_at: Instant) {
        entry.access_token = Some(access_token);
        entry.expires_at = Some(expires_at);
        entry.last_synced_at = Some(Instant::now());
        entry.state = TokenState::Valid;
        entry.refresh_attempts = 0;
        entry.last_error = None;
        entry.retry_at = None;
        entry.failed_until = None;
    }

    /// Record a failed refresh.
    ///
    /// `retry_in = None` marks the error terminal. Otherwise the attempt
    /// counter is bumped and the entry either waits `retry_in` in UNKNOWN or,
    /// once attempts are exhausted, enters FAILED for the cool-down period.
    pub fn mark_failed(
        &self,
        account_id: &str,
        error: BrokerError,
        retry_in: Option<Duration>,
    ) -> TokenState {
        let now = Instant::now();
        let state = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(account_id.to_owned()).or_default();
            entry.refresh_attempts = entry.refresh_attempts.saturating_add(1);
            entry.last_error = Some(error);
            entry.clear_token();
            match retry_in {
                Some(delay) if entry.refresh_attempts < self.max_attempts => {
                    entry.state = TokenState::Unknown;
                    entry.retry_at = Some(now + delay);
                }
                _ => {
                    entry.state = TokenState::Failed;
                    entry.retry_at = None;
                    entry.failed_until = Some(now + self.cooldown);
                }
            }
            entry.state
        };
        self.changed.notify_waiters();
        state
    }

    /// Release the gate without counting an attempt.
    pub fn abandon_refresh(&self, account_id: &str, error: Option<BrokerError>) {
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(account_id) {
                if entry.state == TokenState::Refreshing {
                    entry.state =
                        if entry.access_token.is_some() { TokenState::Valid } else { TokenState::Unknown };
                }
                if error.is_some() {
                    entry.last_error = error;
                }
            }
        }
        self.changed.notify_waiters();
    }

    /// Forget the token and failure history, e.g. after the refresh token
    /// changed. An in-flight refresh keeps the gate but its result is dropped.
    pub fn invalidate(&self, account_id: &str) {
        {
            let mut entries = self.entries.lock();
            let entry = entries.entry(account_id.to_owned()).or_default();
            let refreshing = entry.state == TokenState::Refreshing;
            let generation = entry.generation.wrapping_add(1);
            *entry = CachedToken::default();
            entry.generation = generation;
            if refreshing {
                entry.state = TokenState::Refreshing;
            }
        }
        self.changed.notify_waiters();
    }

    /// Like [`invalidate`](Self::invalidate), but an in-flight refresh keeps
    /// its result: it already reads the stored credential.
    pub fn invalidate_idle(&self, account_id: &str) {
        {
            let mut entries = self.entries.lock();
            let entry = entries.entry(account_id.to_owned()).or_default();
            if entry.state == TokenState::Refreshing {
                return;
            }
            let generation = entry.generation.wrapping_add(1);
            *entry = CachedToken { generation, ..CachedToken::default() };
        }
        self.changed.notify_waiters();
    }

    /// Drop the entry. One with a refresh in flight is invalidated instead,
    /// so the late result cannot be installed under a reset generation.
    pub fn remove(&self, account_id: &str) {
        {
            let mut entries = self.entries.lock();
            match entries.get_mut(account_id) {
                Some(entry) if entry.state == TokenState::Refreshing => {
                    let generation = entry.generation.wrapping_add(1);
                    *entry = CachedToken { state: TokenState::Refreshing, generation, ..CachedToken::default() };
                }
                _ => {
                    entries.remove(account_id);
                }
            }
        }
        self.changed.notify_waiters();
    }

    /// Wait until any entry changes, bounded by `poll`.
    pub async fn wait_for_change(&self, poll: Duration) {
        let _ = tokio::time::timeout(poll, self.changed.notified()).await;
    }
}

/// Exclusive right to refresh one account, from [`TokenCache::begin_refresh`].
pub struct RefreshGate<'a> {
    cache: &'a TokenCache,
    account_id: String,
    generation: u64,
    refresh_attempts: u32,
    finished: bool,
}

impl RefreshGate<'_> {
    /// Failed attempts recorded when the gate was taken.
    pub fn refresh_attempts(&self) -> u32 {
        self.refresh_attempts
    }

    pub fn complete(mut self, access_token: String, expires_at: Instant) -> bool {
        self.finished = true;
        self.cache.complete_refresh(&self.account_id, self.generation, access_token, expires_at)
    }

    pub fn fail(mut self, error: BrokerError, retry_in: Option<Duration>) -> TokenState {
        self.finished = true;
        self.cache.mark_failed(&self.account_id, error, retry_in)
    }

    pub fn abandon(mut self, error: Option<BrokerError>) {
        self.finished = true;
        self.cache.abandon_refresh(&self.account_id, error);
    }
}

impl Drop for RefreshGate<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(account = %self.account_id, "refresh dropped in flight, releasing gate");
            self.cache.abandon_refresh(&self.account_id, None);
        }
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
