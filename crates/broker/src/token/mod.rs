// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access-token lifecycle: cache state, token endpoint client, retry policy
//! and the single-flight refresh coordinator.

pub mod cache;
pub mod oauth;
pub mod refresh;
pub mod retry;
