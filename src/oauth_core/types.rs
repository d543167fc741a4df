//! Core entities and errors: principals, resource servers, credential rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::crypto::CryptoService;
use super::scope::ScopeSet;

/// Result type alias for hub operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// An identity known to the hub. Account management lives outside this
/// crate; this is the claims source for ID tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier (subject of every token issued for this identity).
    pub id: String,
    /// Unique email address.
    pub email: String,
    /// Display handle, carried in ID tokens.
    pub preferred_username: String,
    /// Optional avatar URL.
    pub picture: Option<String>,
    /// Machine accounts back service-to-service credentials.
    pub machine: bool,
}

impl Principal {
    /// Creates a human principal.
    pub fn new(id: impl Into<String>, email: impl Into<String>, username: impl Into<String>) -> Self {
        Principal {
            id: id.into(),
            email: email.into(),
            preferred_username: username.into(),
            picture: None,
            machine: false,
        }
    }

    /// Creates a machine principal for service-to-service calls.
    pub fn new_machine(id: impl Into<String>, email: impl Into<String>) -> Self {
        let id = id.into();
        Principal {
            id: id.clone(),
            email: email.into(),
            preferred_username: id,
            picture: None,
            machine: true,
        }
    }
}

/// A registered resource server: an OAuth client that redeems codes and
/// presents bearer tokens back to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceServer {
    /// Opaque unique client identifier.
    pub client_id: String,
    /// Human-readable name.
    pub name: String,
    /// One-way hash of the client secret. The plaintext is shown once at
    /// registration and never persisted.
    pub secret_hash: String,
    /// Redirect URI allowlist. Empty means any URI is accepted.
    pub redirect_uris: Vec<String>,
    /// Inactive servers cannot request or redeem grants.
    pub active: bool,
    /// Banned servers are rejected outright.
    pub banned: bool,
}

impl ResourceServer {
    /// Registers a new resource server. Returns the record and the plaintext
    /// secret; the plaintext exists only in this return value.
    pub fn register(
        name: impl Into<String>,
        redirect_uris: Vec<String>,
        crypto: &CryptoService,
    ) -> (Self, String) {
        let secret = crypto.generate_opaque_token();
        let server = ResourceServer {
            client_id: Uuid::new_v4().to_string(),
            name: name.into(),
            secret_hash: crypto.hash_for_storage(&secret),
            redirect_uris,
            active: true,
            banned: false,
        };
        (server, secret)
    }
}

/// A single-use authorization code row. Only the hash of the code is stored;
/// the row is removed atomically on redemption and lazily rejected once
/// `expires_at` has passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code_hash: String,
    pub principal_id: String,
    pub client_id: String,
    pub scopes: ScopeSet,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub redirect_uri: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// A persisted refresh token row, keyed by token hash. Single-use: redeeming
/// it removes the row and a replacement row is written for the new token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub principal_id: String,
    pub client_id: String,
    pub scopes: ScopeSet,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// The token endpoint response: one access/refresh/ID token triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    /// Always `"Bearer"`.
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// A resource-server-side login session capturing the raw tokens returned
/// by the hub for one principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub principal_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Error taxonomy for grant, token, and federation operations. All variants
/// are recoverable at the HTTP boundary; `error_code` and `http_status` give
/// the machine-readable mapping.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown client")]
    UnknownClient,
    #[error("client is inactive")]
    ClientInactive,
    #[error("client is banned")]
    ClientBanned,
    #[error("client secret mismatch")]
    InvalidSecret,
    #[error("redirect URI is not allowlisted for this client")]
    RedirectUriNotAllowlisted,
    #[error("redirect URI does not match the one bound at issuance")]
    RedirectUriMismatch,
    #[error("authorization code was issued to a different client")]
    ClientMismatch,
    #[error("invalid or already redeemed authorization code")]
    InvalidCode,
    #[error("authorization code has expired")]
    CodeExpired,
    #[error("invalid or already redeemed refresh token")]
    InvalidRefreshToken,
    #[error("refresh token has expired")]
    RefreshTokenExpired,
    #[error("malformed scope: {0}")]
    MalformedScope(String),
    #[error("token signature verification failed")]
    InvalidSignature,
    #[error("token has expired")]
    TokenExpired,
    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
    #[error("remote party unavailable ({status}): {message}")]
    RemoteUnavailable { status: u16, message: String },
    #[error("authentication failed: {0}")]
    AuthenticationError(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable error code for JSON error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::UnknownClient | AuthError::InvalidSecret => "invalid_client",
            AuthError::ClientInactive | AuthError::ClientBanned => "unauthorized_client",
            AuthError::RedirectUriNotAllowlisted => "invalid_request",
            AuthError::RedirectUriMismatch
            | AuthError::ClientMismatch
            | AuthError::InvalidCode
            | AuthError::CodeExpired
            | AuthError::InvalidRefreshToken
            | AuthError::RefreshTokenExpired => "invalid_grant",
            AuthError::MalformedScope(_) => "invalid_scope",
            AuthError::InvalidSignature | AuthError::TokenExpired => "invalid_token",
            AuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            AuthError::RemoteUnavailable { .. } => "upstream_unavailable",
            AuthError::AuthenticationError(_) => "authentication_failed",
            AuthError::UnsupportedKeyType(_) | AuthError::Storage(_) | AuthError::Internal(_) => {
                "server_error"
            }
        }
    }

    /// HTTP status the boundary should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::UnknownClient
            | AuthError::InvalidSecret
            | AuthError::InvalidSignature
            | AuthError::TokenExpired
            | AuthError::AuthenticationError(_) => 401,
            AuthError::ClientInactive | AuthError::ClientBanned => 403,
            AuthError::RedirectUriNotAllowlisted
            | AuthError::RedirectUriMismatch
            | AuthError::ClientMismatch
            | AuthError::InvalidCode
            | AuthError::CodeExpired
            | AuthError::InvalidRefreshToken
            | AuthError::RefreshTokenExpired
            | AuthError::MalformedScope(_)
            | AuthError::UnsupportedGrantType(_) => 400,
            AuthError::RemoteUnavailable { .. } => 503,
            AuthError::UnsupportedKeyType(_) | AuthError::Storage(_) | AuthError::Internal(_) => {
                500
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping_covers_grant_failures() {
        assert_eq!(AuthError::InvalidCode.error_code(), "invalid_grant");
        assert_eq!(AuthError::InvalidCode.http_status(), 400);
        assert_eq!(AuthError::UnknownClient.http_status(), 401);
        assert_eq!(
            AuthError::RemoteUnavailable { status: 502, message: "bad gateway".into() }
                .http_status(),
            503
        );
    }
}
