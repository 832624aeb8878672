// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::store::defaults::EnvDefaults;
use crate::token::retry::RetryPolicy;

/// Configuration for the credbroker service.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "credbroker", version, about = "Per-account OAuth2 credential broker")]
pub struct BrokerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "BROKER_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 3001, env = "BROKER_PORT")]
    pub port: u16,

    /// Bearer token for the admin API. If unset, auth is disabled.
    #[arg(long, env = "BROKER_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// SQLite URL for the primary credential tier (e.g. `sqlite://broker.db`).
    #[arg(long, env = "BROKER_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Directory for the file credential tier.
    #[arg(long, env = "BROKER_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Account id the environment defaults apply to, and the fallback current account.
    #[arg(long, default_value = "default", env = "BROKER_DEFAULT_ACCOUNT")]
    pub default_account: String,

    /// OAuth client id for the default account.
    #[arg(long, env = "BROKER_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret for the default account.
    #[arg(long, env = "BROKER_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Seed refresh token for the default account.
    #[arg(long, env = "BROKER_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Partner API base URL for the default account.
    #[arg(long, env = "BROKER_BASE_URL")]
    pub base_url: Option<String>,

    /// Token endpoint for the default account.
    #[arg(long, env = "BROKER_TOKEN_URL")]
    pub token_url: Option<String>,

    /// Token endpoint request timeout in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "BROKER_TOKEN_TIMEOUT_MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub token_timeout_ms: u64,

    /// Live validation request timeout in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "BROKER_VALIDATE_TIMEOUT_MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub validate_timeout_ms: u64,

    /// Consecutive refresh failures before an account cools down.
    #[arg(long, default_value_t = 5, env = "BROKER_MAX_REFRESH_RETRIES", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_refresh_retries: u32,

    /// Initial refresh backoff in milliseconds.
    #[arg(long, default_value_t = 1_000, env = "BROKER_RETRY_BASE_MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub retry_base_ms: u64,

    /// Refresh backoff cap in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "BROKER_RETRY_CAP_MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub retry_cap_ms: u64,

    /// Minimum wait after a rate-limited refresh in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "BROKER_RATE_LIMIT_FLOOR_MS")]
    pub rate_limit_floor_ms: u64,

    /// Cool-down for accounts in FAILED state in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "BROKER_FAILED_COOLDOWN_MS")]
    pub failed_cooldown_ms: u64,

    /// Upper bound on one wait for an in-flight refresh, in milliseconds.
    #[arg(long, default_value_t = 100, env = "BROKER_SINGLE_FLIGHT_POLL_MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub single_flight_poll_ms: u64,

    /// Connection health check interval in milliseconds.
    #[arg(long, default_value_t = 600_000, env = "BROKER_HEALTH_CHECK_MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub health_check_ms: u64,

    /// Base delay between startup connection retries in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "BROKER_CONNECT_RETRY_MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub connect_retry_ms: u64,

    /// Startup connection retries before giving up.
    #[arg(long, default_value_t = 5, env = "BROKER_MAX_CONNECT_RETRIES")]
    pub max_connect_retries: u32,

    /// Disable the background connector.
    #[arg(long, env = "BROKER_NO_AUTO_CONNECT")]
    pub no_auto_connect: bool,

    /// Emit logs as JSON.
    #[arg(long, env = "BROKER_LOG_JSON")]
    pub log_json: bool,
}

impl BrokerConfig {
    /// File tier directory: explicit flag, then `$XDG_STATE_HOME/credbroker`,
    /// then `$HOME/.local/state/credbroker`, then `./.credbroker`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            if !xdg.is_empty() {
                return PathBuf::from(xdg).join("credbroker");
            }
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/credbroker");
        }
        PathBuf::from(".credbroker")
    }

    pub fn env_defaults(&self) -> EnvDefaults {
        let clean = |v: &Option<String>| v.as_ref().map(|s| s.trim().to_owned()).filter(|s| !s.is_empty());
        EnvDefaults {
            account_id: self.default_account.clone(),
            client_id: clean(&self.client_id),
            client_secret: clean(&self.client_secret),
            refresh_token: clean(&self.refresh_token),
            base_url: clean(&self.base_url),
            token_url: clean(&self.token_url),
        }
    }

    pub fn settings(&self) -> BrokerSettings {
        BrokerSettings {
            default_account: self.default_account.clone(),
            token_timeout: Duration::from_millis(self.token_timeout_ms),
            validate_timeout: Duration::from_millis(self.validate_timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.max_refresh_retries,
                base_delay: Duration::from_millis(self.retry_base_ms),
                max_delay: Duration::from_millis(self.retry_cap_ms),
                rate_limit_floor: Duration::from_millis(self.rate_limit_floor_ms),
            },
            failed_cooldown: Duration::from_millis(self.failed_cooldown_ms),
            single_flight_poll: Duration::from_millis(self.single_flight_poll_ms),
        }
    }

    pub fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            health_check: Duration::from_millis(self.health_check_ms),
            connect_retry: Duration::from_millis(self.connect_retry_ms),
            max_connect_retries: self.max_connect_retries,
            ..ConnectorSettings::default()
        }
    }
}

/// Timing knobs for the library, decoupled from CLI parsing.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub default_account: String,
    pub token_timeout: Duration,
    pub validate_timeout: Duration,
    pub retry: RetryPolicy,
    pub failed_cooldown: Duration,
    pub single_flight_poll: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            default_account: "default".to_owned(),
            token_timeout: Duration::from_secs(10),
            validate_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            failed_cooldown: Duration::from_secs(60),
            single_flight_poll: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub health_check: Duration,
    pub connect_retry: Duration,
    pub max_connect_delay: Duration,
    pub max_connect_retries: u32,
    /// Verification rounds used when connecting.
    pub verify_retries: u32,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            health_check: Duration::from_secs(600),
            connect_retry: Duration::from_secs(30),
            max_connect_delay: Duration::from_secs(300),
            max_connect_retries: 5,
            verify_retries: 2,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
