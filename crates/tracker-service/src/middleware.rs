//! API key authentication.
//!
//! When `security.api_key_enabled` is set, every route except
//! `/api/health` requires the key, either in the `X-API-Key` header or as a
//! `token` query parameter. The query form exists for WebSocket clients,
//! since browsers cannot set custom headers on the upgrade request.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::SecurityConfig;

/// Routes reachable without a key.
const PUBLIC_PATHS: &[&str] = &["/api/health"];

/// API key authentication middleware.
///
/// Returns 401 Unauthorized if the key is missing or invalid.
pub async fn api_key_auth(
    headers: HeaderMap,
    State(config): State<Arc<SecurityConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if !config.api_key_enabled || PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let provided_key = headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().query().and_then(token_from_query));

    let valid = match (&config.api_key, provided_key) {
        (Some(expected), Some(provided)) => keys_match(expected, provided),
        _ => false,
    };

    if valid {
        next.run(request).await
    } else {
        warn!("API key authentication failed for {}", request.uri().path());
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Invalid or missing API key",
                "hint": "Provide a valid API key in the X-API-Key header or as a 'token' query parameter"
            })),
        )
            .into_response()
    }
}

fn token_from_query(query: &str) -> Option<&str> {
    query.split('&').find_map(|param| {
        let mut parts = param.splitn(2, '=');
        match (parts.next(), parts.next()) {
            (Some("token"), Some(value)) => Some(value),
            _ => None,
        }
    })
}

/// Constant-time key comparison.
fn keys_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
