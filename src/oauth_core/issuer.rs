//! Token minting: access, refresh, and ID token triples from a redeemed
//! authorization code or a rolling refresh token.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::config::TokenTtlConfig;
use super::crypto::CryptoService;
use super::scope::ScopeSet;
use super::store::{PrincipalStore, RefreshTokenStore};
use super::types::{
    AuthError, AuthorizationCode, Principal, RefreshTokenRecord, Result, TokenSet,
};

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";
pub const TOKEN_TYPE_ID: &str = "id";

/// Claims carried by access and refresh tokens, distinguished by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Principal id.
    pub sub: String,
    /// Fixed issuer string.
    pub iss: String,
    /// Client id of the resource server the token was minted for.
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    /// Granted scopes in wire format, one `"<path>:<mode>"` per entry.
    pub scopes: Vec<String>,
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Claims carried by ID tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub email: String,
    pub preferred_username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(rename = "type")]
    pub token_type: String,
}

pub struct TokenIssuer {
    crypto: Arc<CryptoService>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    principals: Arc<dyn PrincipalStore>,
    config: TokenTtlConfig,
}

impl TokenIssuer {
    pub fn new(
        crypto: Arc<CryptoService>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        principals: Arc<dyn PrincipalStore>,
        config: TokenTtlConfig,
    ) -> Self {
        TokenIssuer { crypto, refresh_tokens, principals, config }
    }

    /// Mints the token triple for a redeemed authorization code. The code
    /// row was consumed by the atomic redeem; this completes the same
    /// logical operation.
    #[instrument(skip(self, code), level = "debug")]
    pub async fn issue_from_code(&self, code: &AuthorizationCode) -> Result<TokenSet> {
        let principal = self.principal(&code.principal_id).await?;
        self.mint(&principal, &code.client_id, &code.scopes, code.nonce.clone()).await
    }

    /// Redeems a refresh token and mints a fresh triple. Rolling refresh:
    /// the presented token's row is taken atomically, so it can never be
    /// redeemed twice, and the replacement row is persisted before the
    /// triple is returned.
    #[instrument(skip(self, presented), level = "debug")]
    pub async fn issue_from_refresh(&self, presented: &str) -> Result<TokenSet> {
        let claims: AccessTokenClaims =
            self.crypto.verify(presented, None).map_err(|e| match e {
                AuthError::TokenExpired => AuthError::RefreshTokenExpired,
                _ => AuthError::InvalidRefreshToken,
            })?;
        if claims.token_type != TOKEN_TYPE_REFRESH {
            return Err(AuthError::InvalidRefreshToken);
        }

        let hash = self.crypto.hash_for_storage(presented);
        let record = self
            .refresh_tokens
            .take(&hash)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;
        if record.is_expired() {
            warn!(client_id = %record.client_id, "expired refresh token presented");
            return Err(AuthError::RefreshTokenExpired);
        }

        let principal = self.principal(&record.principal_id).await?;
        self.mint(&principal, &record.client_id, &record.scopes, None).await
    }

    async fn principal(&self, id: &str) -> Result<Principal> {
        self.principals
            .find_by_id(id)
            .await?
            .ok_or_else(|| AuthError::AuthenticationError(format!("unknown principal {id}")))
    }

    async fn mint(
        &self,
        principal: &Principal,
        client_id: &str,
        scopes: &ScopeSet,
        nonce: Option<String>,
    ) -> Result<TokenSet> {
        let now = Utc::now();
        let scope_strings = scopes.to_scope_strings();

        let access_token = self.crypto.sign(&AccessTokenClaims {
            sub: principal.id.clone(),
            iss: self.config.issuer.clone(),
            aud: client_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.config.access_ttl_secs)).timestamp(),
            scopes: scope_strings.clone(),
            token_type: TOKEN_TYPE_ACCESS.to_string(),
        })?;

        let refresh_expires_at = now + Duration::seconds(self.config.refresh_ttl_secs);
        let refresh_token = self.crypto.sign(&AccessTokenClaims {
            sub: principal.id.clone(),
            iss: self.config.issuer.clone(),
            aud: client_id.to_string(),
            iat: now.timestamp(),
            exp: refresh_expires_at.timestamp(),
            scopes: scope_strings,
            token_type: TOKEN_TYPE_REFRESH.to_string(),
        })?;
        self.refresh_tokens
            .insert(RefreshTokenRecord {
                token_hash: self.crypto.hash_for_storage(&refresh_token),
                principal_id: principal.id.clone(),
                client_id: client_id.to_string(),
                scopes: scopes.clone(),
                expires_at: refresh_expires_at,
            })
            .await?;

        let id_token = self.crypto.sign(&IdTokenClaims {
            sub: principal.id.clone(),
            iss: self.config.issuer.clone(),
            aud: client_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.config.id_ttl_secs)).timestamp(),
            email: principal.email.clone(),
            preferred_username: principal.preferred_username.clone(),
            picture: principal.picture.clone(),
            nonce,
            token_type: TOKEN_TYPE_ID.to_string(),
        })?;

        debug!(client_id, sub = %principal.id, "token triple minted");

        Ok(TokenSet {
            access_token,
            refresh_token,
            id_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_ttl_secs as u64,
        })
    }
}
