// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod support;

use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio::time::Instant;

use credbroker::error::BrokerError;
use credbroker::validator::{AuthStatus, VerifyOptions};

use support::{credential, fast_settings, token_body, Harness, MockProvider};

/// Partner API stub answering every request with a fixed response.
async fn fixed_api(status: u16, body: serde_json::Value) -> anyhow::Result<String> {
    let app = Router::new().route(
        "/api/v3/account/info",
        get(move || {
            let body = body.clone();
            async move { (StatusCode::from_u16(status).unwrap_or(StatusCode::OK), Json(body)) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

#[tokio::test]
async fn status_classification() -> anyhow::Result<()> {
    let h = Harness::new(&fast_settings());
    let validator = h.registry.validator();

    let cases = [
        (200, serde_json::json!({"code": "1", "data": {}}), AuthStatus::Valid, "ok"),
        (200, serde_json::json!({"code": 1}), AuthStatus::Valid, "ok"),
        (200, serde_json::json!({"code": "0", "message": "bad token"}), AuthStatus::Invalid, "api_0"),
        (401, serde_json::json!({}), AuthStatus::Expired, "http_401"),
        (403, serde_json::json!({}), AuthStatus::Expired, "http_403"),
        (429, serde_json::json!({}), AuthStatus::Error, "rate_limited"),
        (500, serde_json::json!({}), AuthStatus::Error, "api_error_500"),
    ];
    for (status, body, expected, code) in cases {
        let base_url = fixed_api(status, body).await?;
        let result = validator.check_token_status("AT", &base_url).await;
        assert_eq!(result.status, expected, "HTTP {status}");
        assert_eq!(result.code, code, "HTTP {status}");
    }
    Ok(())
}

#[tokio::test]
async fn missing_token_and_unreachable_api() -> anyhow::Result<()> {
    let h = Harness::new(&fast_settings());
    let validator = h.registry.validator();

    let missing = validator.check_token_status("", "http://127.0.0.1:9").await;
    assert_eq!(missing.status, AuthStatus::Invalid);
    assert_eq!(missing.code, "missing_token");

    let unreachable = validator.check_token_status("AT", "http://127.0.0.1:9").await;
    assert_eq!(unreachable.status, AuthStatus::Error);
    assert_eq!(unreachable.code, "network_error");
    Ok(())
}

#[tokio::test]
async fn revoked_token_is_refreshed_and_rechecked() -> anyhow::Result<()> {
    let body = token_body("AT2", None, 3600);
    let provider = MockProvider::start(vec![(200, &body)]).await?;
    let h = Harness::new(&fast_settings());
    h.seed(&credential(&provider, "acme", Some("RT1"))?).await?;
    // Locally valid for 50 more minutes, but the partner API revoked it.
    h.registry.cache().set_valid("acme", "AT1".into(), Instant::now() + Duration::from_secs(3000));

    let token = h.registry.get_verified_token("acme", VerifyOptions::default()).await?;
    assert_eq!(token, "AT2");
    assert_eq!(provider.token_calls(), 1);
    assert_eq!(provider.info_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn accepted_token_needs_no_refresh() -> anyhow::Result<()> {
    let provider = MockProvider::start(vec![]).await?;
    provider.accept("AT1");
    let h = Harness::new(&fast_settings());
    h.seed(&credential(&provider, "acme", Some("RT1"))?).await?;
    h.registry.cache().set_valid("acme", "AT1".into(), Instant::now() + Duration::from_secs(3000));

    assert_eq!(h.registry.get_verified_token("acme", VerifyOptions::default()).await?, "AT1");
    assert!(h.registry.is_token_valid("acme").await);
    assert_eq!(provider.token_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn verification_gives_up_after_rounds() -> anyhow::Result<()> {
    let provider = MockProvider::start(vec![]).await?;
    provider.set_fallback(200, &token_body("AT-x", None, 3600));
    let h = Harness::new(&fast_settings());
    // Every issued token is rejected by the partner API.
    let mut cred = credential(&provider, "acme", Some("RT1"))?;
    cred.base_url = fixed_api(401, serde_json::json!({})).await?;
    h.seed(&cred).await?;
    h.registry.cache().set_valid("acme", "AT-stale".into(), Instant::now() + Duration::from_secs(3000));

    let options = VerifyOptions { force_refresh: false, max_retries: 1 };
    let err = h.registry.get_verified_token("acme", options).await;
    assert!(matches!(err, Err(BrokerError::Verification { .. })), "{err:?}");
    // One forced refresh per round.
    assert_eq!(provider.token_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn terminal_refresh_failure_stops_verification() -> anyhow::Result<()> {
    let provider = MockProvider::start(vec![(400, r#"{"error":"invalid_grant"}"#)]).await?;
    let h = Harness::new(&fast_settings());
    h.seed(&credential(&provider, "acme", Some("RT1"))?).await?;
    h.registry.cache().set_valid("acme", "AT-revoked".into(), Instant::now() + Duration::from_secs(3000));

    let err = h.registry.get_verified_token("acme", VerifyOptions::default()).await;
    assert!(matches!(err, Err(BrokerError::InvalidGrant { .. })), "{err:?}");
    assert_eq!(provider.token_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn account_info_reports_partner_identity() -> anyhow::Result<()> {
    let body = token_body("AT1", None, 3600);
    let provider = MockProvider::start(vec![(200, &body)]).await?;
    let h = Harness::new(&fast_settings());
    h.seed(&credential(&provider, "acme", Some("RT1"))?).await?;

    let info = h.registry.validator().account_info("acme").await?;
    assert_eq!(info.username, "acme-ops");
    assert_eq!(info.name, "Acme Ops");
    assert_eq!(info.email.as_deref(), Some("ops@acme.test"));
    Ok(())
}
