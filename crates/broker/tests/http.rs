// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the broker admin API.
//!
//! Uses `axum_test::TestServer`; only the scripted OAuth provider listens on TCP.

mod support;

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderValue, StatusCode};
use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use credbroker::state::BrokerState;
use credbroker::transport::build_router;

use support::{credential, fast_settings, token_body, Harness, MockProvider};

const TOKEN: &str = "admin-s3cret";

fn test_server(h: &Harness, auth_token: Option<&str>) -> anyhow::Result<TestServer> {
    let state = Arc::new(BrokerState::new(
        Arc::clone(&h.registry),
        auth_token.map(str::to_owned),
        CancellationToken::new(),
    ));
    TestServer::new(build_router(state))
}

fn bearer() -> HeaderValue {
    HeaderValue::from_static("Bearer admin-s3cret")
}

#[tokio::test]
async fn health_is_public() -> anyhow::Result<()> {
    let h = Harness::new(&fast_settings());
    let server = test_server(&h, Some(TOKEN))?;

    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["current_account"], "default");
    Ok(())
}

#[tokio::test]
async fn health_reports_shutdown() -> anyhow::Result<()> {
    let h = Harness::new(&fast_settings());
    let shutdown = CancellationToken::new();
    let state = Arc::new(BrokerState::new(Arc::clone(&h.registry), None, shutdown.clone()));
    let server = TestServer::new(build_router(state))?;

    shutdown.cancel();
    let body: serde_json::Value = server.get("/api/v1/health").await.json();
    assert_eq!(body["status"], "stopping");
    Ok(())
}

#[tokio::test]
async fn admin_routes_require_bearer() -> anyhow::Result<()> {
    let h = Harness::new(&fast_settings());
    let server = test_server(&h, Some(TOKEN))?;

    let resp = server.get("/api/v1/accounts").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let resp = server
        .get("/api/v1/accounts")
        .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer wrong"))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = server.get("/api/v1/accounts").add_header(AUTHORIZATION, bearer()).await;
    resp.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn config_roundtrip_is_redacted() -> anyhow::Result<()> {
    let provider = MockProvider::start(vec![]).await?;
    let h = Harness::new(&fast_settings());
    let server = test_server(&h, None)?;

    let resp = server
        .post("/api/v1/accounts/acme/config")
        .json(&serde_json::json!({
            "client_id": "acme-client",
            "client_secret": "very-secret",
            "refresh_token": "RT-very-secret",
            "token_url": provider.token_url(),
            "base_url": provider.base_url(),
            "place_ids": ["p1", "p2"],
        }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["account_id"], "acme");
    assert_eq!(body["durable"], true);

    let resp = server.get("/api/v1/accounts/acme/config").await;
    resp.assert_status_ok();
    let text = resp.text();
    assert!(!text.contains("very-secret"), "{text}");
    let body: serde_json::Value = resp.json();
    assert_eq!(body["client_id"], "acme-client");
    assert_eq!(body["place_ids"], serde_json::json!(["p1", "p2"]));

    let resp = server.get("/api/v1/accounts").await;
    let body: serde_json::Value = resp.json();
    assert_eq!(body["accounts"], serde_json::json!(["acme"]));
    Ok(())
}

#[tokio::test]
async fn invalid_config_is_rejected() -> anyhow::Result<()> {
    let h = Harness::new(&fast_settings());
    let server = test_server(&h, None)?;

    let resp = server
        .post("/api/v1/accounts/acme/config")
        .json(&serde_json::json!({ "client_id": "acme-client", "client_secret": "" }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "INVALID_CONFIG");
    Ok(())
}

#[tokio::test]
async fn unknown_account_is_not_found() -> anyhow::Result<()> {
    let h = Harness::new(&fast_settings());
    let server = test_server(&h, None)?;

    let resp = server.get("/api/v1/accounts/ghost/config").await;
    resp.assert_status(StatusCode::NOT_FOUND);

    let resp = server.post("/api/v1/accounts/ghost/token").await;
    resp.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "NOT_CONFIGURED");

    let resp = server.get("/api/v1/accounts/ghost/status").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "unconfigured");
    Ok(())
}

#[tokio::test]
async fn token_endpoint_issues_and_caches() -> anyhow::Result<()> {
    let body = token_body("AT1", Some("RT2"), 3600);
    let provider = MockProvider::start(vec![(200, &body)]).await?;
    let h = Harness::new(&fast_settings());
    h.seed(&credential(&provider, "acme", Some("RT1"))?).await?;
    let server = test_server(&h, None)?;

    for _ in 0..3 {
        let resp = server.post("/api/v1/accounts/acme/token").await;
        resp.assert_status_ok();
        let body: serde_json::Value = resp.json();
        assert_eq!(body["access_token"], "AT1");
        assert!(body["expires_in_secs"].as_u64().is_some_and(|s| s > 3000));
    }
    assert_eq!(provider.token_calls(), 1);

    let stored = h.registry.account_config("acme").await;
    assert_eq!(stored.and_then(|c| c.refresh_token).as_deref(), Some("RT2"));
    Ok(())
}

#[tokio::test]
async fn revoked_refresh_token_maps_to_401() -> anyhow::Result<()> {
    let provider = MockProvider::start(vec![(400, r#"{"error":"invalid_grant"}"#)]).await?;
    let h = Harness::new(&fast_settings());
    h.seed(&credential(&provider, "acme", Some("RT1"))?).await?;
    let server = test_server(&h, None)?;

    let resp = server.post("/api/v1/accounts/acme/token").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "INVALID_GRANT");

    let resp = server.get("/api/v1/accounts/acme/status").await;
    let body: serde_json::Value = resp.json();
    assert_eq!(body["token_state"], "failed");
    Ok(())
}

#[tokio::test]
async fn current_token_follows_use() -> anyhow::Result<()> {
    let provider = MockProvider::start(vec![]).await?;
    provider.set_fallback(200, &token_body("AT-beta", None, 3600));
    let h = Harness::new(&fast_settings());
    h.seed(&credential(&provider, "beta", Some("RT1"))?).await?;
    let server = test_server(&h, None)?;

    let resp = server.post("/api/v1/token").await;
    resp.assert_status(StatusCode::NOT_FOUND);

    server.post("/api/v1/accounts/beta/use").await.assert_status_ok();
    let resp = server.post("/api/v1/token").add_query_param("verify", true).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["account_id"], "beta");
    assert_eq!(body["access_token"], "AT-beta");
    assert_eq!(provider.info_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn oauth_callback_stores_refresh_token() -> anyhow::Result<()> {
    let body = token_body("AT1", Some("RT-fresh"), 3600);
    let provider = MockProvider::start(vec![(200, &body)]).await?;
    let h = Harness::new(&fast_settings());
    h.seed(&credential(&provider, "acme", None)?).await?;
    // The callback is reachable without the admin bearer.
    let server = test_server(&h, Some(TOKEN))?;

    let resp = server
        .get("/api/v1/oauth/callback")
        .add_query_param("account", "acme")
        .add_query_param("code", "AUTH-CODE")
        .add_query_param("redirect_uri", "https://app.test/cb")
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["authorized"], true);
    assert_eq!(body["refresh_token_stored"], true);

    assert_eq!(provider.form_field(0, "grant_type").as_deref(), Some("authorization_code"));
    assert_eq!(provider.form_field(0, "code").as_deref(), Some("AUTH-CODE"));
    let stored = h.registry.account_config("acme").await;
    assert_eq!(stored.and_then(|c| c.refresh_token).as_deref(), Some("RT-fresh"));

    // The issued access token is served without another exchange.
    let resp = server.post("/api/v1/accounts/acme/token").add_header(AUTHORIZATION, bearer()).await;
    resp.assert_status_ok();
    assert_eq!(provider.token_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn delete_removes_account() -> anyhow::Result<()> {
    let provider = MockProvider::start(vec![]).await?;
    let h = Harness::new(&fast_settings());
    h.seed(&credential(&provider, "acme", Some("RT1"))?).await?;
    let server = test_server(&h, None)?;

    let resp = server.delete("/api/v1/accounts/acme").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["removed"], true);

    server.get("/api/v1/accounts/acme/config").await.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}
