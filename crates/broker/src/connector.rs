// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background connector: verifies the current account at startup, retries
//! with linear backoff, then health-checks the connection periodically.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectorSettings;
use crate::error::BrokerError;
use crate::registry::AccountRegistry;
use crate::validator::VerifyOptions;

/// How the connection loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorExit {
    Shutdown,
    GaveUp { attempts: u32 },
}

/// Delay before reconnect attempt `attempt` (1-based).
pub fn reconnect_delay(settings: &ConnectorSettings, attempt: u32) -> Duration {
    settings.connect_retry.saturating_mul(attempt).min(settings.max_connect_delay)
}

async fn connect(registry: &AccountRegistry, settings: &ConnectorSettings) -> Result<String, BrokerError> {
    let account = registry.current_account();
    if registry.store().get(&account).await.is_none() {
        return Err(BrokerError::not_configured(&account, "no stored credential"));
    }
    let options = VerifyOptions { force_refresh: true, max_retries: settings.verify_retries };
    registry.get_verified_token(&account, options).await?;
    Ok(account)
}

/// Periodically re-verify the current account. Returns `true` when the
/// connection was lost, `false` on shutdown.
async fn watch(registry: &AccountRegistry, settings: &ConnectorSettings, shutdown: &CancellationToken) -> bool {
    // `interval` rejects a zero period.
    let mut timer = tokio::time::interval(settings.health_check.max(Duration::from_millis(1)));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately; the connection was just verified.
    timer.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = timer.tick() => {}
        }

        let account = registry.current_account();
        if registry.is_token_valid(&account).await {
            tracing::debug!(account = %account, "health check passed");
            continue;
        }
        let options = VerifyOptions { force_refresh: true, max_retries: settings.verify_retries };
        match registry.get_verified_token(&account, options).await {
            Ok(_) => tracing::info!(account = %account, "health check recovered token"),
            Err(e) => {
                tracing::warn!(account = %account, err = %e, "health check failed");
                return true;
            }
        }
    }
}

/// Run the connect/retry/health loop until shutdown or retries run out.
pub async fn run_connector(
    registry: Arc<AccountRegistry>,
    settings: ConnectorSettings,
    shutdown: CancellationToken,
) -> ConnectorExit {
    let mut failures = 0u32;
    loop {
        match connect(&registry, &settings).await {
            Ok(account) => {
                tracing::info!(account = %account, "connected to partner API");
                failures = 0;
                if !watch(&registry, &settings, &shutdown).await {
                    return ConnectorExit::Shutdown;
                }
            }
            Err(e) => tracing::warn!(err = %e, "connection attempt failed"),
        }

        failures += 1;
        if failures > settings.max_connect_retries {
            tracing::error!(attempts = failures, "giving up on partner API connection");
            return ConnectorExit::GaveUp { attempts: failures };
        }
        let delay = reconnect_delay(&settings, failures);
        tracing::info!(attempt = failures, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = shutdown.cancelled() => return ConnectorExit::Shutdown,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

pub fn spawn_auto_connector(
    registry: Arc<AccountRegistry>,
    settings: ConnectorSettings,
    shutdown: CancellationToken,
) -> JoinHandle<ConnectorExit> {
    tokio::spawn(run_connector(registry, settings, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_is_linear_and_capped() {
        let settings = ConnectorSettings::default();
        let delays: Vec<u64> = (1..=12).map(|n| reconnect_delay(&settings, n).as_secs()).collect();
        assert_eq!(delays, vec![30, 60, 90, 120, 150, 180, 210, 240, 270, 300, 300, 300]);
    }

    #[test]
    fn custom_base_delay() {
        let settings = ConnectorSettings {
            connect_retry: Duration::from_millis(10),
            max_connect_delay: Duration::from_millis(25),
            ..ConnectorSettings::default()
        };
        assert_eq!(reconnect_delay(&settings, 1), Duration::from_millis(10));
        assert_eq!(reconnect_delay(&settings, 3), Duration::from_millis(25));
    }
}
