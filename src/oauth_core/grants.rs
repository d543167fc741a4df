//! Authorization code lifecycle: client validation, issuance, and atomic
//! redemption.
//!
//! A code moves `issued -> redeemed` (row removed) or `issued -> expired`
//! (rejected on lookup, removed lazily). Redemption is a single conditional
//! take against the store, so two racing redeemers can never both succeed.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, instrument, warn};

use super::config::TokenTtlConfig;
use super::crypto::CryptoService;
use super::scope::ScopeSet;
use super::store::{AuthorizationCodeStore, ResourceServerStore};
use super::types::{AuthError, AuthorizationCode, ResourceServer, Result};

pub struct AuthorizationGrantManager {
    servers: Arc<dyn ResourceServerStore>,
    codes: Arc<dyn AuthorizationCodeStore>,
    crypto: Arc<CryptoService>,
    code_ttl: Duration,
}

impl AuthorizationGrantManager {
    pub fn new(
        servers: Arc<dyn ResourceServerStore>,
        codes: Arc<dyn AuthorizationCodeStore>,
        crypto: Arc<CryptoService>,
        config: &TokenTtlConfig,
    ) -> Self {
        AuthorizationGrantManager {
            servers,
            codes,
            crypto,
            code_ttl: Duration::seconds(config.code_ttl_secs),
        }
    }

    /// Looks up a client and checks its standing, without touching the
    /// redirect-URI allowlist.
    pub async fn require_client(&self, client_id: &str) -> Result<ResourceServer> {
        let server = self
            .servers
            .find_by_client_id(client_id)
            .await?
            .ok_or(AuthError::UnknownClient)?;
        if server.banned {
            return Err(AuthError::ClientBanned);
        }
        if !server.active {
            return Err(AuthError::ClientInactive);
        }
        Ok(server)
    }

    /// Validates the client initiating an authorize request.
    ///
    /// An empty redirect-URI allowlist accepts any URI; registering at least
    /// one URI switches the client to strict matching.
    pub async fn validate_requesting_client(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<ResourceServer> {
        let server = self.require_client(client_id).await?;
        if !server.redirect_uris.is_empty()
            && !server.redirect_uris.iter().any(|uri| uri == redirect_uri)
        {
            return Err(AuthError::RedirectUriNotAllowlisted);
        }
        Ok(server)
    }

    /// Validates the client redeeming a grant: requesting-client checks plus
    /// secret hash equality. The redirect URI is only checked against the
    /// allowlist when the grant type carries one.
    pub async fn validate_consuming_client(
        &self,
        client_id: &str,
        secret: &str,
        redirect_uri: Option<&str>,
    ) -> Result<ResourceServer> {
        let server = match redirect_uri {
            Some(uri) => self.validate_requesting_client(client_id, uri).await?,
            None => self.require_client(client_id).await?,
        };
        if self.crypto.hash_for_storage(secret) != server.secret_hash {
            warn!(client_id, "client secret mismatch");
            return Err(AuthError::InvalidSecret);
        }
        Ok(server)
    }

    /// Issues a single-use authorization code bound to a principal, server,
    /// scope set, and redirect URI. The plaintext token is returned exactly
    /// once; only its hash is stored.
    #[instrument(skip(self, server, scopes, state, nonce), level = "debug")]
    pub async fn issue_code(
        &self,
        principal_id: &str,
        server: &ResourceServer,
        scopes: ScopeSet,
        state: Option<String>,
        nonce: Option<String>,
        redirect_uri: String,
    ) -> Result<String> {
        let token = self.crypto.generate_opaque_token();
        let code = AuthorizationCode {
            code_hash: self.crypto.hash_for_storage(&token),
            principal_id: principal_id.to_string(),
            client_id: server.client_id.clone(),
            scopes,
            state,
            nonce,
            redirect_uri,
            expires_at: Utc::now() + self.code_ttl,
        };
        self.codes.insert(code).await?;
        debug!(client_id = %server.client_id, "authorization code issued");
        Ok(token)
    }

    /// Redeems a presented code: hashes it and takes the row in one
    /// conditional operation. A missing row (never issued, already
    /// redeemed, or swept) is `InvalidCode`; a present-but-expired row is
    /// `CodeExpired` and is consumed by the take.
    #[instrument(skip(self, presented), level = "debug")]
    pub async fn redeem_code(&self, presented: &str) -> Result<AuthorizationCode> {
        let hash = self.crypto.hash_for_storage(presented);
        let code = self.codes.take(&hash).await?.ok_or(AuthError::InvalidCode)?;
        if code.is_expired() {
            warn!(client_id = %code.client_id, "expired authorization code presented");
            return Err(AuthError::CodeExpired);
        }
        Ok(code)
    }

    /// Checks that a redeemed code is bound to the presenting client and the
    /// redirect URI given at issuance.
    pub fn validate_code_binding(
        &self,
        code: &AuthorizationCode,
        server: &ResourceServer,
        redirect_uri: &str,
    ) -> Result<()> {
        if code.client_id != server.client_id {
            return Err(AuthError::ClientMismatch);
        }
        if code.redirect_uri != redirect_uri {
            return Err(AuthError::RedirectUriMismatch);
        }
        Ok(())
    }
}
