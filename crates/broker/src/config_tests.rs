// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use super::*;

fn parse(args: &[&str]) -> anyhow::Result<BrokerConfig> {
    let mut argv = vec!["credbroker"];
    argv.extend_from_slice(args);
    Ok(BrokerConfig::try_parse_from(argv)?)
}

#[test]
fn defaults_match_documented_timings() -> anyhow::Result<()> {
    let config = parse(&[])?;
    assert_eq!(config.port, 3001);

    let settings = config.settings();
    assert_eq!(settings.token_timeout, Duration::from_secs(10));
    assert_eq!(settings.validate_timeout, Duration::from_secs(5));
    assert_eq!(settings.retry.max_attempts, 5);
    assert_eq!(settings.retry.max_delay, Duration::from_secs(300));
    assert_eq!(settings.single_flight_poll, Duration::from_millis(100));

    let connector = config.connector_settings();
    assert_eq!(connector.health_check, Duration::from_secs(600));
    assert_eq!(connector.connect_retry, Duration::from_secs(30));
    Ok(())
}

#[test]
fn blank_env_values_are_ignored() -> anyhow::Result<()> {
    let config = parse(&["--client-id", "cid", "--client-secret", "  ", "--token-url", ""])?;
    let defaults = config.env_defaults();
    assert_eq!(defaults.account_id, "default");
    assert_eq!(defaults.client_id.as_deref(), Some("cid"));
    assert!(defaults.client_secret.is_none());
    assert!(defaults.token_url.is_none());
    Ok(())
}

#[test]
fn explicit_state_dir_wins() -> anyhow::Result<()> {
    let config = parse(&["--state-dir", "/var/lib/credbroker"])?;
    assert_eq!(config.state_dir(), std::path::PathBuf::from("/var/lib/credbroker"));
    Ok(())
}

#[yare::parameterized(
    health_check = { "--health-check-ms" },
    connect_retry = { "--connect-retry-ms" },
    token_timeout = { "--token-timeout-ms" },
    validate_timeout = { "--validate-timeout-ms" },
    single_flight_poll = { "--single-flight-poll-ms" },
    retry_base = { "--retry-base-ms" },
    retry_cap = { "--retry-cap-ms" },
    refresh_retries = { "--max-refresh-retries" },
)]
fn zero_is_rejected_for(flag: &str) {
    assert!(parse(&[flag, "0"]).is_err());
    assert!(parse(&[flag, "1"]).is_ok());
}
