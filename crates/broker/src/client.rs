// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// `reqwest::Client` whose requests always carry a timeout.
///
/// The timeout is also set on every request, so it holds even when the
/// configured builder failed and a default client stands in.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.inner.get(url).timeout(self.timeout)
    }

    pub fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.inner.post(url).timeout(self.timeout)
    }
}

/// HTTP client with a per-request timeout.
pub fn http_client(timeout: Duration) -> HttpClient {
    ensure_crypto_provider();
    let inner = match reqwest::Client::builder().timeout(timeout).connect_timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(err = %e, "http client build failed, using defaults with per-request timeout");
            reqwest::Client::new()
        }
    };
    HttpClient { inner, timeout }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
