// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::credential::AccountCredential;
use crate::store::{CredentialTier, StoreError};

/// In-process tier. Outages can be toggled to exercise degraded paths.
pub struct MemoryTier {
    name: String,
    records: RwLock<HashMap<String, AccountCredential>>,
    active: RwLock<Option<String>>,
    available: AtomicBool,
    writes_fail: AtomicBool,
    writes: AtomicU32,
}

impl MemoryTier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
            available: AtomicBool::new(true),
            writes_fail: AtomicBool::new(false),
            writes: AtomicU32::new(0),
        }
    }

    /// Simulate a full outage (reads and writes fail).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Simulate a tier that serves reads but rejects writes.
    pub fn set_writes_fail(&self, fail: bool) {
        self.writes_fail.store(fail, Ordering::Release);
    }

    /// Number of accepted writes.
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::Acquire)
    }

    /// Read a record bypassing availability checks.
    pub async fn snapshot(&self, account_id: &str) -> Option<AccountCredential> {
        self.records.read().await.get(account_id).cloned()
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} is unreachable", self.name)))
        }
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.check_read()?;
        if self.writes_fail.load(Ordering::Acquire) {
            return Err(StoreError::Backend(format!("{} rejected the write", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialTier for MemoryTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, account_id: &str) -> Result<Option<AccountCredential>, StoreError> {
        self.check_read()?;
        Ok(self.records.read().await.get(account_id).cloned())
    }

    async fn put(&self, credential: &AccountCredential) -> Result<(), StoreError> {
        self.check_write()?;
        self.records.write().await.insert(credential.account_id.clone(), credential.clone());
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn delete(&self, account_id: &str) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut active = self.active.write().await;
        if active.as_deref() == Some(account_id) {
            *active = None;
        }
        Ok(self.records.write().await.remove(account_id).is_some())
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        self.check_read()?;
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_active(&self) -> Result<Option<String>, StoreError> {
        self.check_read()?;
        Ok(self.active.read().await.clone())
    }

    async fn set_active(&self, account_id: &str) -> Result<(), StoreError> {
        self.check_write()?;
        *self.active.write().await = Some(account_id.to_owned());
        Ok(())
    }
}
