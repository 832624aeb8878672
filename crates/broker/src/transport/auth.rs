// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::{ErrorBody, ErrorResponse};
use crate::state::BrokerState;

/// Paths reachable without a bearer token. The OAuth callback is hit by a
/// browser redirect.
const PUBLIC_PATHS: &[&str] = &["/api/v1/health", "/api/v1/oauth/callback"];

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Check the `Authorization: Bearer` header against `expected`.
pub fn bearer_matches(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else { return true };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .is_some_and(|token| constant_time_eq(token, expected))
}

/// Axum middleware that enforces bearer auth on the admin API.
pub async fn auth_layer(
    state: State<Arc<BrokerState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if PUBLIC_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    if !bearer_matches(req.headers(), state.auth_token.as_deref()) {
        let body = ErrorResponse {
            error: ErrorBody { code: "UNAUTHORIZED".to_owned(), message: "unauthorized".to_owned() },
        };
        return (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &'static str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("authorization", HeaderValue::from_static(value));
        map
    }

    #[test]
    fn no_expected_token_allows_everything() {
        assert!(bearer_matches(&HeaderMap::new(), None));
    }

    #[test]
    fn bearer_must_match_exactly() {
        assert!(bearer_matches(&headers("Bearer s3cret"), Some("s3cret")));
        assert!(!bearer_matches(&headers("Bearer s3cre"), Some("s3cret")));
        assert!(!bearer_matches(&headers("Basic s3cret"), Some("s3cret")));
        assert!(!bearer_matches(&HeaderMap::new(), Some("s3cret")));
    }
}
