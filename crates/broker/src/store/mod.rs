// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tiered credential persistence.
//!
//! Tiers are consulted in order: the first writable tier is primary, later
//! writable tiers are mirrors, and read-only tiers (environment defaults)
//! are only used when no writable tier has a record.

pub mod defaults;
pub mod file;
pub mod memory;
pub mod sqlite;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::credential::AccountCredential;
use crate::error::BrokerError;

/// Failure reported by a single storage tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend cannot be reached right now.
    Unavailable(String),
    /// Backend answered with an error.
    Backend(String),
    /// Stored bytes could not be (de)serialized.
    Codec(String),
    /// Tier does not accept writes.
    ReadOnly,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::Backend(msg) => write!(f, "backend error: {msg}"),
            Self::Codec(msg) => write!(f, "codec error: {msg}"),
            Self::ReadOnly => f.write_str("tier is read-only"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<StoreError> for BrokerError {
    fn from(e: StoreError) -> Self {
        BrokerError::Storage { message: e.to_string() }
    }
}

/// One persistence backend.
#[async_trait]
pub trait CredentialTier: Send + Sync {
    fn name(&self) -> &str;

    fn is_writable(&self) -> bool {
        true
    }

    async fn get(&self, account_id: &str) -> Result<Option<AccountCredential>, StoreError>;

    async fn put(&self, credential: &AccountCredential) -> Result<(), StoreError>;

    /// Returns whether a record existed.
    async fn delete(&self, account_id: &str) -> Result<bool, StoreError>;

    async fn list_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn get_active(&self) -> Result<Option<String>, StoreError>;

    async fn set_active(&self, account_id: &str) -> Result<(), StoreError>;
}

/// Result of a write that at least one tier accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// Primary tier holds the write.
    Durable,
    /// Only a fallback tier holds the write; it is replayed into the primary
    /// tier on the next successful contact.
    Degraded { tier: String, reason: String },
}

impl PutOutcome {
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable)
    }

    /// Warning to surface alongside an otherwise successful write.
    pub fn warning(&self) -> Option<BrokerError> {
        match self {
            Self::Durable => None,
            Self::Degraded { tier, reason } => {
                Some(BrokerError::StorageDegraded { tier: tier.clone(), message: reason.clone() })
            }
        }
    }
}

/// Ordered set of storage tiers with newest-wins reads and write-through.
pub struct TieredStore {
    tiers: Vec<Arc<dyn CredentialTier>>,
    /// Accounts written while the primary tier was unreachable.
    pending: Mutex<HashSet<String>>,
    /// Accounts deleted while some tier refused the delete. They read as
    /// absent until every tier has dropped them or a new write lands.
    deleted: Mutex<HashSet<String>>,
}

impl TieredStore {
    pub fn new(tiers: Vec<Arc<dyn CredentialTier>>) -> Self {
        Self { tiers, pending: Mutex::new(HashSet::new()), deleted: Mutex::new(HashSet::new()) }
    }

    pub fn tier_names(&self) -> Vec<String> {
        self.tiers.iter().map(|t| t.name().to_owned()).collect()
    }

    fn writable(&self) -> impl Iterator<Item = &Arc<dyn CredentialTier>> {
        self.tiers.iter().filter(|t| t.is_writable())
    }

    fn read_only(&self) -> impl Iterator<Item = &Arc<dyn CredentialTier>> {
        self.tiers.iter().filter(|t| !t.is_writable())
    }

    /// Accounts whose latest write has not reached the primary tier.
    pub fn pending_accounts(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Newest credential across all reachable tiers, or `None` when no tier
    /// (including defaults) has one.
    pub async fn get(&self, account_id: &str) -> Option<AccountCredential> {
        let tombstoned = self.deleted.lock().contains(account_id);
        if tombstoned {
            self.replay_deletes().await;
            return None;
        }
        let (found, primary_current) = self.lookup(account_id).await;
        if primary_current {
            self.pending.lock().remove(account_id);
            self.flush_pending().await;
        }
        found
    }

    /// Read every writable tier, reconcile stale copies, and fall back to
    /// read-only tiers. Reports whether the primary tier answered and now
    /// holds the newest copy.
    async fn lookup(&self, account_id: &str) -> (Option<AccountCredential>, bool) {
        let mut answers: Vec<(usize, &Arc<dyn CredentialTier>, Option<AccountCredential>)> =
            Vec::new();

        for (idx, tier) in self.writable().enumerate() {
            match tier.get(account_id).await {
                Ok(found) => answers.push((idx, tier, found)),
                Err(e) => {
                    warn!(tier = tier.name(), account = account_id, err = %e, "credential read failed");
                }
            }
        }
        let mut primary_current = answers.first().is_some_and(|(idx, _, _)| *idx == 0);

        // Ties keep the earlier tier.
        let mut newest: Option<&AccountCredential> = None;
        for (_, _, found) in &answers {
            if let Some(cred) = found {
                if newest.is_none_or(|n| cred.updated_at_ms > n.updated_at_ms) {
                    newest = Some(cred);
                }
            }
        }

        if let Some(newest) = newest.cloned() {
            for (idx, tier, found) in &answers {
                let stale = found.as_ref().is_none_or(|c| c.updated_at_ms < newest.updated_at_ms);
                if !stale {
                    continue;
                }
                match tier.put(&newest).await {
                    Ok(()) => {
                        info!(tier = tier.name(), account = account_id, "reconciled credential tier")
                    }
                    Err(e) => {
                        if *idx == 0 {
                            primary_current = false;
                        }
                        debug!(tier = tier.name(), account = account_id, err = %e, "reconcile write failed")
                    }
                }
            }
            return (Some(newest), primary_current);
        }

        for tier in self.read_only() {
            match tier.get(account_id).await {
                Ok(Some(cred)) => return (Some(cred), primary_current),
                Ok(None) => {}
                Err(e) => debug!(tier = tier.name(), err = %e, "defaults read failed"),
            }
        }
        (None, primary_current)
    }

    async fn flush_pending(&self) {
        self.replay_deletes().await;
        let ids: Vec<String> = self.pending.lock().drain().collect();
        for id in ids {
            let (_, primary_current) = self.lookup(&id).await;
            if primary_current {
                info!(account = %id, "replayed degraded write into primary tier");
            } else {
                self.pending.lock().insert(id);
            }
        }
    }

    /// Retry deletes that some tier refused earlier.
    async fn replay_deletes(&self) {
        let ids: Vec<String> = self.deleted.lock().iter().cloned().collect();
        for id in ids {
            let mut complete = true;
            for tier in self.writable() {
                if let Err(e) = tier.delete(&id).await {
                    debug!(tier = tier.name(), account = %id, err = %e, "delete replay failed");
                    complete = false;
                }
            }
            if complete {
                self.deleted.lock().remove(&id);
                info!(account = %id, "replayed delete into every tier");
            }
        }
    }

    /// Write to the primary tier and mirror to the rest.
    ///
    /// Succeeds when any writable tier accepts the record; errors only when
    /// none does.
    pub async fn put(&self, credential: &AccountCredential) -> Result<PutOutcome, StoreError> {
        let account_id = credential.account_id.as_str();
        let mut primary: Option<Result<(), StoreError>> = None;
        let mut primary_name = String::new();
        let mut mirrored = false;
        let mut last_err = StoreError::ReadOnly;

        for (idx, tier) in self.writable().enumerate() {
            let result = tier.put(credential).await;
            if let Err(e) = &result {
                warn!(tier = tier.name(), account = account_id, err = %e, "credential write failed");
                last_err = e.clone();
            }
            if idx == 0 {
                primary_name = tier.name().to_owned();
                primary = Some(result);
            } else {
                mirrored |= result.is_ok();
            }
        }

        match primary {
            Some(Ok(())) => {
                self.deleted.lock().remove(account_id);
                self.pending.lock().remove(account_id);
                self.flush_pending().await;
                Ok(PutOutcome::Durable)
            }
            Some(Err(e)) if mirrored => {
                self.deleted.lock().remove(account_id);
                self.pending.lock().insert(account_id.to_owned());
                warn!(tier = %primary_name, account = account_id, "credential stored degraded");
                Ok(PutOutcome::Degraded { tier: primary_name, reason: e.to_string() })
            }
            _ => Err(last_err),
        }
    }

    /// Remove the account from every writable tier.
    ///
    /// Succeeds when any tier dropped the record. Tiers that refused are
    /// retried on later contact, and the account reads as absent meanwhile.
    pub async fn delete(&self, account_id: &str) -> Result<bool, StoreError> {
        let mut existed = false;
        let mut any_ok = false;
        let mut all_ok = true;
        let mut last_err = StoreError::ReadOnly;
        for tier in self.writable() {
            match tier.delete(account_id).await {
                Ok(found) => {
                    existed |= found;
                    any_ok = true;
                }
                Err(e) => {
                    warn!(tier = tier.name(), account = account_id, err = %e, "credential delete failed");
                    all_ok = false;
                    last_err = e;
                }
            }
        }
        if !any_ok {
            return Err(last_err);
        }
        self.pending.lock().remove(account_id);
        if all_ok {
            self.deleted.lock().remove(account_id);
        } else {
            warn!(account = account_id, "credential delete degraded, will retry");
            self.deleted.lock().insert(account_id.to_owned());
        }
        Ok(existed)
    }

    /// Union of account ids across every reachable tier.
    pub async fn list_account_ids(&self) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for tier in &self.tiers {
            match tier.list_ids().await {
                Ok(found) => ids.extend(found),
                Err(e) => warn!(tier = tier.name(), err = %e, "credential list failed"),
            }
        }
        let deleted = self.deleted.lock();
        ids.into_iter().filter(|id| !deleted.contains(id)).collect()
    }

    /// Persisted current-account pointer, first reachable tier wins.
    pub async fn get_active(&self) -> Option<String> {
        for tier in self.writable() {
            match tier.get_active().await {
                Ok(Some(id)) => return Some(id),
                Ok(None) => {}
                Err(e) => debug!(tier = tier.name(), err = %e, "active pointer read failed"),
            }
        }
        None
    }

    pub async fn set_active(&self, account_id: &str) -> Result<PutOutcome, StoreError> {
        let mut primary: Option<Result<(), StoreError>> = None;
        let mut primary_name = String::new();
        let mut mirrored = false;
        let mut last_err = StoreError::ReadOnly;

        for (idx, tier) in self.writable().enumerate() {
            let result = tier.set_active(account_id).await;
            if let Err(e) = &result {
                warn!(tier = tier.name(), account = account_id, err = %e, "active pointer write failed");
                last_err = e.clone();
            }
            if idx == 0 {
                primary_name = tier.name().to_owned();
                primary = Some(result);
            } else {
                mirrored |= result.is_ok();
            }
        }

        match primary {
            Some(Ok(())) => Ok(PutOutcome::Durable),
            Some(Err(e)) if mirrored => {
                Ok(PutOutcome::Degraded { tier: primary_name, reason: e.to_string() })
            }
            _ => Err(last_err),
        }
    }
}

#[cfg(test)]
#[path = "tiered_tests.rs"]
mod tests;
