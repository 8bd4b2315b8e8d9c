// =============================================================================
// Bearer Token Authentication — Axum extractors for the control plane
// =============================================================================
//
// Two tokens guard the surface: `POLARIS_ADMIN_TOKEN` for the general
// control plane and the stronger `POLARIS_KILL_TOKEN` for `/kill`. Both are
// read from the environment on every request so rotation needs no restart,
// and compared in constant time to prevent timing side-channels.
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

// =============================================================================
// Constant-time comparison
// =============================================================================

/// Compare two byte slices in constant time. The comparison always examines
/// every byte even after a mismatch is found.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn validate(parts: &Parts, env_var: &str) -> Result<String, AuthRejection> {
    let expected = std::env::var(env_var).unwrap_or_default();
    if expected.is_empty() {
        warn!(env_var, "auth token is not set — request rejected");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "server authentication not configured",
        });
    }

    let Some(token) = bearer_token(parts) else {
        warn!("missing or malformed Authorization header");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "missing or invalid authorization token",
        });
    };

    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        warn!(env_var, "invalid token presented");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "invalid authorization token",
        });
    }

    Ok(token.to_string())
}

// =============================================================================
// Extractors
// =============================================================================

/// Validates against `POLARIS_ADMIN_TOKEN`.
pub struct AuthBearer(pub String);

/// Validates against the stronger `POLARIS_KILL_TOKEN`. Only `/kill` uses it.
pub struct KillBearer(pub String);

/// Rejection type returned when authentication fails.
pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "ok": false, "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        validate(parts, "POLARIS_ADMIN_TOKEN").map(AuthBearer)
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for KillBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        validate(parts, "POLARIS_KILL_TOKEN").map(KillBearer)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_identical() {
        assert!(constant_time_eq(b"hello", b"hello"));
    }

    #[test]
    fn constant_time_eq_different() {
        assert!(!constant_time_eq(b"hello", b"world"));
    }

    #[test]
    fn constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"longer_string"));
    }

    #[test]
    fn constant_time_eq_empty() {
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn constant_time_eq_single_bit_diff() {
        assert!(!constant_time_eq(b"\x00", b"\x01"));
    }
}
