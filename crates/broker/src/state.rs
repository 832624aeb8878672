// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::registry::AccountRegistry;

/// Shared state behind the admin router.
pub struct BrokerState {
    pub registry: Arc<AccountRegistry>,
    /// Bearer token for the admin API. `None` disables auth.
    pub auth_token: Option<String>,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl BrokerState {
    pub fn new(
        registry: Arc<AccountRegistry>,
        auth_token: Option<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { registry, auth_token, shutdown, started_at: Instant::now() }
    }
}
