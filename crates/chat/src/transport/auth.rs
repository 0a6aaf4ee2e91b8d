// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ChatError;
use crate::state::GatewayState;

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
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

/// Extract the token from an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validate the admin bearer token. Registration is refused outright when no
/// admin token is configured.
pub fn validate_admin(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ChatError> {
    let Some(expected) = expected else {
        return Err(ChatError::forbidden("conversation registration is disabled"));
    };
    match bearer_token(headers) {
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        _ => Err(ChatError::unauthorized("invalid admin token")),
    }
}

/// Axum middleware guarding the conversation registration routes.
pub async fn admin_layer(
    state: State<Arc<GatewayState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Err(e) = validate_admin(req.headers(), state.config.admin_token.as_deref()) {
        tracing::warn!(path = %req.uri().path(), code = %e.code, "admin request rejected");
        return e.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
