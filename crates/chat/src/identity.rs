// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection identity: the authenticated principal and the verifier that
//! produces it from a bearer credential.
//!
//! Tokens are HS256 JWTs issued by the account service with the claim layout
//! `{"user": {"id", "role", "name"?}, "exp"}`. The gateway only verifies;
//! [`JwtVerifier::issue`] exists for tests and local tooling.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Which side of an appointment a principal is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Doctor => "doctor",
        }
    }
}

/// An authenticated identity. Immutable for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    pub role: Role,
    pub display_name: String,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role, display_name: impl Into<String>) -> Self {
        Self { id: id.into(), role, display_name: display_name.into() }
    }
}

/// Turns a bearer credential into a [`Principal`].
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Principal, ChatError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    user: UserClaims,
    exp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserClaims {
    id: String,
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// HS256 JWT verifier keyed with the shared account-service secret.
pub struct JwtVerifier {
    key: hmac::Key,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self { key: hmac::Key::new(hmac::HMAC_SHA256, secret) }
    }

    /// Mint a token for `principal` that expires after `ttl`.
    pub fn issue(&self, principal: &Principal, ttl: Duration) -> Result<String, ChatError> {
        let exp = epoch_secs().saturating_add(ttl.as_secs());
        self.issue_with_exp(principal, exp)
    }

    fn issue_with_exp(&self, principal: &Principal, exp: u64) -> Result<String, ChatError> {
        let header = JwtHeader { alg: "HS256".to_owned(), typ: Some("JWT".to_owned()) };
        let claims = JwtClaims {
            user: UserClaims {
                id: principal.id.clone(),
                role: principal.role.as_str().to_owned(),
                name: Some(principal.display_name.clone()),
            },
            exp,
        };
        let header = serde_json::to_vec(&header).map_err(|e| ChatError::internal(e.to_string()))?;
        let claims = serde_json::to_vec(&claims).map_err(|e| ChatError::internal(e.to_string()))?;
        let signing_input =
            format!("{}.{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(claims));
        let tag = hmac::sign(&self.key, signing_input.as_bytes());
        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref())))
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, credential: &str) -> Result<Principal, ChatError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(ChatError::unauthorized("missing credential"));
        }

        let mut parts = credential.split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ChatError::unauthorized("malformed token"));
        };

        let header: JwtHeader = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(ChatError::unauthorized(format!("unsupported alg {}", header.alg)));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| ChatError::unauthorized("malformed token signature"))?;
        let signing_input = &credential[..header_b64.len() + 1 + claims_b64.len()];
        hmac::verify(&self.key, signing_input.as_bytes(), &signature)
            .map_err(|_| ChatError::unauthorized("invalid token signature"))?;

        let claims: JwtClaims = decode_segment(claims_b64)?;
        if claims.exp <= epoch_secs() {
            return Err(ChatError::unauthorized("token expired"));
        }

        let role = match claims.user.role.as_str() {
            "patient" => Role::Patient,
            "doctor" => Role::Doctor,
            other => return Err(ChatError::unauthorized(format!("unknown role {other}"))),
        };
        if claims.user.id.is_empty() {
            return Err(ChatError::unauthorized("token has no user id"));
        }

        let display_name = claims.user.name.unwrap_or_else(|| claims.user.id.clone());
        Ok(Principal { id: claims.user.id, role, display_name })
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, ChatError> {
    let bytes =
        URL_SAFE_NO_PAD.decode(segment).map_err(|_| ChatError::unauthorized("malformed token"))?;
    serde_json::from_slice(&bytes).map_err(|_| ChatError::unauthorized("malformed token claims"))
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
