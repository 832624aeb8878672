// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secondary tier: one JSON file per account under a state directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credential::{epoch_ms, validate_account_id, AccountCredential};
use crate::store::{CredentialTier, StoreError};

const FILE_PREFIX: &str = "oauth-config-";
const FILE_SUFFIX: &str = ".json";
const ACTIVE_FILE: &str = "active-account.json";

#[derive(Debug, Serialize, Deserialize)]
struct ActivePointer {
    account_id: String,
    updated_at_ms: u64,
}

pub struct FileTier {
    dir: PathBuf,
}

impl FileTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn account_path(&self, account_id: &str) -> Result<PathBuf, StoreError> {
        validate_account_id(account_id).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(self.dir.join(format!("{FILE_PREFIX}{account_id}{FILE_SUFFIX}")))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &Path,
    ) -> Result<Option<T>, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write tmp + rename so readers never observe a partial file.
    ///
    /// The temp name carries PID and a counter; concurrent writers to the
    /// same target must not share a tmp file.
    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(value)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = path.with_file_name(tmp_name);
        tokio::fs::write(&tmp_path, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialTier for FileTier {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, account_id: &str) -> Result<Option<AccountCredential>, StoreError> {
        let path = self.account_path(account_id)?;
        Self::read_json(&path).await
    }

    async fn put(&self, credential: &AccountCredential) -> Result<(), StoreError> {
        let path = self.account_path(&credential.account_id)?;
        self.write_json(&path, credential).await
    }

    async fn delete(&self, account_id: &str) -> Result<bool, StoreError> {
        let path = self.account_path(account_id)?;
        let existed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if self.get_active().await?.as_deref() == Some(account_id) {
            match tokio::fs::remove_file(self.dir.join(ACTIVE_FILE)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(existed)
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) =
                name.strip_prefix(FILE_PREFIX).and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            {
                if validate_account_id(id).is_ok() {
                    ids.push(id.to_owned());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn get_active(&self) -> Result<Option<String>, StoreError> {
        let pointer: Option<ActivePointer> = Self::read_json(&self.dir.join(ACTIVE_FILE)).await?;
        Ok(pointer.map(|p| p.account_id))
    }

    async fn set_active(&self, account_id: &str) -> Result<(), StoreError> {
        let pointer = ActivePointer { account_id: account_id.to_owned(), updated_at_ms: epoch_ms() };
        self.write_json(&self.dir.join(ACTIVE_FILE), &pointer).await
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
