// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credbroker: per-account OAuth2 credential broker for partner API tenants.

pub mod client;
pub mod config;
pub mod connector;
pub mod credential;
pub mod error;
pub mod registry;
pub mod state;
pub mod store;
pub mod token;
pub mod transport;
pub mod validator;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::connector::spawn_auto_connector;
use crate::registry::AccountRegistry;
use crate::state::BrokerState;
use crate::store::defaults::DefaultsTier;
use crate::store::file::FileTier;
use crate::store::sqlite::SqliteTier;
use crate::store::{CredentialTier, TieredStore};
use crate::transport::build_router;

/// Assemble storage tiers from configuration: SQLite (when configured),
/// then the file tier, then environment defaults.
pub fn build_store(config: &BrokerConfig) -> anyhow::Result<TieredStore> {
    let mut tiers: Vec<Arc<dyn CredentialTier>> = Vec::new();
    if let Some(url) = &config.database_url {
        tiers.push(Arc::new(SqliteTier::connect_lazy(url)?));
    }
    tiers.push(Arc::new(FileTier::new(config.state_dir())));
    let defaults = DefaultsTier::new(config.env_defaults());
    if defaults.is_configured() {
        tracing::info!(account = %config.default_account, "environment credential defaults enabled");
    }
    tiers.push(Arc::new(defaults));
    Ok(TieredStore::new(tiers))
}

/// Run the broker until shutdown.
pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    client::ensure_crypto_provider();
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let store = build_store(&config)?;
    tracing::info!(tiers = ?store.tier_names(), "credential store ready");
    let registry = AccountRegistry::new(store, &config.settings());
    registry.load_active().await;

    let state = Arc::new(BrokerState::new(registry, config.auth_token.clone(), shutdown));

    if !config.no_auto_connect {
        spawn_auto_connector(
            Arc::clone(&state.registry),
            config.connector_settings(),
            state.shutdown.clone(),
        );
    }

    {
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            shutdown.cancel();
        });
    }

    let shutdown = state.shutdown.clone();
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("credbroker listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
