// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use parking_lot::Mutex;
use tokio::time::Instant;

use credbroker::config::BrokerSettings;
use credbroker::credential::{AccountConfig, AccountCredential};
use credbroker::registry::AccountRegistry;
use credbroker::store::memory::MemoryTier;
use credbroker::store::{CredentialTier, TieredStore};
use credbroker::token::retry::RetryPolicy;

/// Scripted OAuth provider plus partner account-info endpoint.
#[derive(Clone)]
pub struct MockProvider {
    pub addr: SocketAddr,
    inner: Arc<ProviderState>,
}

pub struct ProviderState {
    responses: Mutex<VecDeque<(u16, String)>>,
    fallback: Mutex<Option<(u16, String)>>,
    delay: Duration,
    token_calls: AtomicU32,
    info_calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
    forms: Mutex<Vec<HashMap<String, String>>>,
    accepted: Mutex<HashSet<String>>,
}

async fn token_endpoint(
    State(s): State<Arc<ProviderState>>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    s.token_calls.fetch_add(1, Ordering::SeqCst);
    s.call_times.lock().push(Instant::now());
    s.forms.lock().push(form);
    if !s.delay.is_zero() {
        tokio::time::sleep(s.delay).await;
    }
    let next = s.responses.lock().pop_front();
    let (status, body) = next
        .or_else(|| s.fallback.lock().clone())
        .unwrap_or((500, r#"{"error":"server_error"}"#.to_owned()));
    if status == 200 {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            if let Some(token) = value.get("access_token").and_then(|t| t.as_str()) {
                s.accepted.lock().insert(token.to_owned());
            }
        }
    }
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        [("content-type", "application/json")],
        body,
    )
}

async fn account_info(State(s): State<Arc<ProviderState>>, headers: HeaderMap) -> impl IntoResponse {
    s.info_calls.fetch_add(1, Ordering::SeqCst);
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_owned();
    if s.accepted.lock().contains(&token) {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "code": "1",
                "message": "success",
                "data": { "username": "acme-ops", "name": "Acme Ops", "email": "ops@acme.test" }
            })),
        )
    } else {
        (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "code": "401", "message": "expired" })))
    }
}

impl MockProvider {
    pub async fn start(responses: Vec<(u16, &str)>) -> anyhow::Result<Self> {
        Self::start_with_delay(responses, Duration::ZERO).await
    }

    pub async fn start_with_delay(responses: Vec<(u16, &str)>, delay: Duration) -> anyhow::Result<Self> {
        let inner = Arc::new(ProviderState {
            responses: Mutex::new(responses.into_iter().map(|(s, b)| (s, b.to_owned())).collect()),
            fallback: Mutex::new(None),
            delay,
            token_calls: AtomicU32::new(0),
            info_calls: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
            forms: Mutex::new(Vec::new()),
            accepted: Mutex::new(HashSet::new()),
        });
        let app = Router::new()
            .route("/token", post(token_endpoint))
            .route("/api/v3/account/info", get(account_info))
            .with_state(Arc::clone(&inner));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, inner })
    }

    pub fn token_url(&self) -> String {
        format!("http://{}/token", self.addr)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Answer every unscripted token request with this response.
    pub fn set_fallback(&self, status: u16, body: &str) {
        *self.inner.fallback.lock() = Some((status, body.to_owned()));
    }

    pub fn push_response(&self, status: u16, body: &str) {
        self.inner.responses.lock().push_back((status, body.to_owned()));
    }

    pub fn token_calls(&self) -> u32 {
        self.inner.token_calls.load(Ordering::SeqCst)
    }

    pub fn info_calls(&self) -> u32 {
        self.inner.info_calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.inner.call_times.lock().clone()
    }

    /// Form field `key` of the `n`-th token request.
    pub fn form_field(&self, n: usize, key: &str) -> Option<String> {
        self.inner.forms.lock().get(n).and_then(|f| f.get(key).cloned())
    }

    pub fn accept(&self, token: &str) {
        self.inner.accepted.lock().insert(token.to_owned());
    }

    /// Make the partner API reject a token it accepted before.
    pub fn revoke(&self, token: &str) {
        self.inner.accepted.lock().remove(token);
    }
}

pub fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> String {
    let mut body = serde_json::json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": expires_in,
    });
    if let Some(rt) = refresh {
        body["refresh_token"] = serde_json::Value::String(rt.to_owned());
    }
    body.to_string()
}

/// Short timings so backoff paths finish in well under a second.
pub fn fast_settings() -> BrokerSettings {
    BrokerSettings {
        default_account: "default".to_owned(),
        token_timeout: Duration::from_secs(2),
        validate_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(40),
            max_delay: Duration::from_millis(500),
            rate_limit_floor: Duration::from_millis(50),
        },
        failed_cooldown: Duration::from_secs(60),
        single_flight_poll: Duration::from_millis(10),
    }
}

pub fn credential(
    provider: &MockProvider,
    account_id: &str,
    refresh_token: Option<&str>,
) -> anyhow::Result<AccountCredential> {
    Ok(AccountCredential::from_config(
        account_id,
        AccountConfig {
            client_id: format!("{account_id}-client"),
            client_secret: format!("{account_id}-secret"),
            refresh_token: refresh_token.map(str::to_owned),
            token_url: Some(provider.token_url()),
            base_url: Some(provider.base_url()),
            ..Default::default()
        },
    )?)
}

/// Registry over two memory tiers, returned so tests can inspect or break them.
pub struct Harness {
    pub registry: Arc<AccountRegistry>,
    pub primary: Arc<MemoryTier>,
    pub secondary: Arc<MemoryTier>,
}

impl Harness {
    pub fn new(settings: &BrokerSettings) -> Self {
        let primary = Arc::new(MemoryTier::new("primary"));
        let secondary = Arc::new(MemoryTier::new("secondary"));
        Self::with_tiers(primary, secondary, settings)
    }

    /// A fresh registry over existing tiers, as after a process restart.
    pub fn with_tiers(
        primary: Arc<MemoryTier>,
        secondary: Arc<MemoryTier>,
        settings: &BrokerSettings,
    ) -> Self {
        let store = TieredStore::new(vec![
            Arc::clone(&primary) as Arc<dyn CredentialTier>,
            Arc::clone(&secondary) as Arc<dyn CredentialTier>,
        ]);
        Self { registry: AccountRegistry::new(store, settings), primary, secondary }
    }

    pub fn restart(&self, settings: &BrokerSettings) -> Self {
        Self::with_tiers(Arc::clone(&self.primary), Arc::clone(&self.secondary), settings)
    }

    pub async fn seed(&self, credential: &AccountCredential) -> anyhow::Result<()> {
        self.registry.store().put(credential).await?;
        Ok(())
    }
}
