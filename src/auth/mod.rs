//! Token authentication.
//!
//! # Data Flow
//! ```text
//! HTTP:      Authorization: Bearer <token> → extractor.rs → Authenticator::verify
//! WebSocket: ?token= / Bearer / auth control message → tunnel → Authenticator::verify
//! ```
//!
//! # Design Decisions
//! - Verification sits behind a trait so tests and embedders can swap it
//! - Stateless; no token is cached or revoked by the gateway
//! - A missing token (403) is distinguished from a rejected one (401)

pub mod extractor;
pub mod jwt;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use extractor::AuthenticatedUser;
pub use jwt::JwtAuthenticator;

/// Claims carried by an accepted token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Why a token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Missing,
    Malformed,
    Expired,
    InvalidSignature,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reason::Missing => "missing",
            Reason::Malformed => "malformed",
            Reason::Expired => "expired",
            Reason::InvalidSignature => "invalid_signature",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unauthorized: {reason}")]
pub struct Unauthorized {
    pub reason: Reason,
}

impl Unauthorized {
    pub fn new(reason: Reason) -> Self {
        Self { reason }
    }
}

/// Verifies bearer tokens.
pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, Unauthorized>;
}
