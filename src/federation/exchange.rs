//! Federated token exchange: the client a resource server runs against the
//! hub. Redeems authorization codes, rolls refresh tokens, verifies every
//! returned token against the hub's published JWKS, and maintains an
//! encrypted machine credential for service-to-service calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::oauth_core::crypto::{CryptoService, verify_with_key};
use crate::oauth_core::endpoint::{
    GRANT_TYPE_AUTHORIZATION_CODE, GRANT_TYPE_REFRESH_TOKEN, MachineAuthorizer, MachineGrant,
};
use crate::oauth_core::issuer::{
    AccessTokenClaims, IdTokenClaims, TOKEN_TYPE_ACCESS, TOKEN_TYPE_ID, TOKEN_TYPE_REFRESH,
};
use crate::oauth_core::jwks::JwksCache;
use crate::oauth_core::store::{MachineCredentialStore, PrincipalStore, SessionStore};
use crate::oauth_core::types::{AuthError, Principal, Result, Session, TokenSet};

/// Where the hub lives.
#[derive(Debug, Clone)]
pub struct HubEndpoints {
    /// Expected `iss` claim value on every hub-signed token.
    pub issuer: String,
    pub token_url: String,
    pub jwks_url: String,
}

/// Static client configuration for one resource server.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub hub: HubEndpoints,
    /// This server's client id at the hub.
    pub client_id: String,
    pub client_secret: String,
    /// Redirect URI registered for this server.
    pub redirect_uri: String,
    /// Timeout applied to every outbound call.
    pub http_timeout_secs: u64,
    /// How long fetched hub keys stay fresh.
    pub jwks_ttl_secs: u64,
}

impl FederationConfig {
    pub fn new(
        hub: HubEndpoints,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        FederationConfig {
            hub,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            http_timeout_secs: 10,
            jwks_ttl_secs: 3600,
        }
    }
}

/// A sibling resource server this one calls with a machine credential.
#[derive(Debug, Clone)]
pub struct RemoteServer {
    /// The target's client id at the hub; also the credential cache key.
    pub client_id: String,
    /// The target's code-exchange endpoint.
    pub exchange_url: String,
    /// Cheap authenticated identity probe; 401 means the bearer is stale.
    pub identity_url: String,
}

#[derive(Debug, Deserialize)]
struct BearerResponse {
    access_token: String,
}

pub struct FederatedTokenExchange {
    http: reqwest::Client,
    config: FederationConfig,
    jwks: JwksCache,
    principals: Arc<dyn PrincipalStore>,
    sessions: Arc<dyn SessionStore>,
    machine: Arc<dyn MachineCredentialStore>,
    authorizer: Arc<dyn MachineAuthorizer>,
    crypto: Arc<CryptoService>,
}

impl FederatedTokenExchange {
    /// Builds the client and fetches the hub's key set once up front.
    pub async fn connect(
        config: FederationConfig,
        principals: Arc<dyn PrincipalStore>,
        sessions: Arc<dyn SessionStore>,
        machine: Arc<dyn MachineCredentialStore>,
        authorizer: Arc<dyn MachineAuthorizer>,
        crypto: Arc<CryptoService>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| AuthError::Internal(format!("http client construction failed: {e}")))?;
        let jwks = JwksCache::new(
            http.clone(),
            config.hub.jwks_url.clone(),
            Duration::from_secs(config.jwks_ttl_secs),
        )
        .await?;
        Ok(FederatedTokenExchange {
            http,
            config,
            jwks,
            principals,
            sessions,
            machine,
            authorizer,
            crypto,
        })
    }

    /// Redeems an authorization code at the hub and establishes a local
    /// session: verifies all three returned tokens and upserts the principal
    /// keyed by the ID token's email claim.
    #[instrument(skip(self, code), level = "debug")]
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<Session> {
        let form = [
            ("grant_type", GRANT_TYPE_AUTHORIZATION_CODE.to_string()),
            ("code", code.to_string()),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
        ];
        let tokens = self.request_tokens(&form).await?;
        self.establish_session(tokens).await
    }

    /// Rolls the session's refresh token at the hub. The old token is
    /// consumed hub-side; the returned session carries the replacement.
    #[instrument(skip(self, session), level = "debug")]
    pub async fn refresh(&self, session: &Session) -> Result<Session> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::AuthenticationError("session has no refresh token".into()))?;
        let form = [
            ("grant_type", GRANT_TYPE_REFRESH_TOKEN.to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
        ];
        let tokens = self.request_tokens(&form).await?;
        self.establish_session(tokens).await
    }

    /// Returns a valid machine bearer for `target`, bootstrapping one when
    /// the cached credential is absent or rejected.
    ///
    /// The cached bearer is probed with a cheap identity call; a 401 means
    /// re-authenticate: self-grant a full read-write code for the machine
    /// account, redeem it at the target, and cache the new bearer encrypted
    /// at rest.
    #[instrument(skip(self, target), fields(target = %target.client_id), level = "debug")]
    pub async fn ensure_authenticated(&self, target: &RemoteServer) -> Result<String> {
        if let Some(ciphertext) = self.machine.get(&target.client_id).await? {
            let bearer = self.crypto.decrypt_secret(&ciphertext)?;
            if self.probe_identity(&target.identity_url, &bearer).await? {
                return Ok(bearer);
            }
            debug!("cached machine credential rejected, re-authenticating");
        }
        let grant = self.authorizer.grant_machine_code(&target.client_id).await?;
        let bearer = self.redeem_at_target(target, &grant).await?;
        let ciphertext = self.crypto.encrypt_secret(&bearer)?;
        self.machine.put(&target.client_id, &ciphertext).await?;
        Ok(bearer)
    }

    async fn request_tokens(&self, form: &[(&str, String)]) -> Result<TokenSet> {
        let resp = self
            .http
            .post(&self.config.hub.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::RemoteUnavailable { status: 0, message: e.to_string() })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::RemoteUnavailable {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        resp.json::<TokenSet>().await.map_err(|e| AuthError::RemoteUnavailable {
            status: status.as_u16(),
            message: format!("malformed token response: {e}"),
        })
    }

    async fn establish_session(&self, tokens: TokenSet) -> Result<Session> {
        let access = self.verify_bearer(&tokens.access_token, TOKEN_TYPE_ACCESS).await?;
        self.verify_bearer(&tokens.refresh_token, TOKEN_TYPE_REFRESH).await?;
        let id = self.verify_id(&tokens.id_token).await?;

        let principal = match self.principals.find_by_email(&id.email).await? {
            Some(mut existing) => {
                existing.preferred_username = id.preferred_username.clone();
                existing.picture = id.picture.clone();
                self.principals.upsert(existing.clone()).await?;
                existing
            }
            None => {
                let created = Principal {
                    id: id.sub.clone(),
                    email: id.email.clone(),
                    preferred_username: id.preferred_username.clone(),
                    picture: id.picture.clone(),
                    machine: false,
                };
                self.principals.upsert(created.clone()).await?;
                created
            }
        };

        let expires_at = DateTime::from_timestamp(access.exp, 0)
            .ok_or_else(|| AuthError::AuthenticationError("unusable expiry claim".into()))?;
        let session = Session {
            principal_id: principal.id,
            access_token: tokens.access_token,
            refresh_token: Some(tokens.refresh_token),
            id_token: tokens.id_token,
            expires_at,
        };
        self.sessions.put(session.clone()).await?;
        debug!(principal_id = %session.principal_id, "hub session established");
        Ok(session)
    }

    async fn verify_bearer(&self, token: &str, expected_type: &str) -> Result<AccessTokenClaims> {
        let key = self.key_for(token).await?;
        let claims: AccessTokenClaims =
            verify_with_key(token, &key, &self.config.hub.issuer, &self.config.client_id)
                .map_err(reject_signature)?;
        if claims.token_type != expected_type {
            return Err(AuthError::AuthenticationError(format!(
                "unexpected token type {}",
                claims.token_type
            )));
        }
        Ok(claims)
    }

    async fn verify_id(&self, token: &str) -> Result<IdTokenClaims> {
        let key = self.key_for(token).await?;
        let claims: IdTokenClaims =
            verify_with_key(token, &key, &self.config.hub.issuer, &self.config.client_id)
                .map_err(reject_signature)?;
        if claims.token_type != TOKEN_TYPE_ID {
            return Err(AuthError::AuthenticationError(format!(
                "unexpected token type {}",
                claims.token_type
            )));
        }
        Ok(claims)
    }

    async fn key_for(&self, token: &str) -> Result<jsonwebtoken::DecodingKey> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|_| AuthError::AuthenticationError("malformed token header".into()))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::AuthenticationError("token missing key id".into()))?;
        self.jwks.get(&kid).await
    }

    async fn probe_identity(&self, identity_url: &str, bearer: &str) -> Result<bool> {
        let resp = self
            .http
            .get(identity_url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| AuthError::RemoteUnavailable { status: 0, message: e.to_string() })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(false);
        }
        Err(AuthError::RemoteUnavailable {
            status: status.as_u16(),
            message: resp.text().await.unwrap_or_default(),
        })
    }

    async fn redeem_at_target(&self, target: &RemoteServer, grant: &MachineGrant) -> Result<String> {
        let form = [
            ("grant_type", GRANT_TYPE_AUTHORIZATION_CODE.to_string()),
            ("code", grant.code.clone()),
            ("redirect_uri", grant.redirect_uri.clone()),
        ];
        let resp = self
            .http
            .post(&target.exchange_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::RemoteUnavailable { status: 0, message: e.to_string() })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::RemoteUnavailable {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let bearer: BearerResponse =
            resp.json().await.map_err(|e| AuthError::RemoteUnavailable {
                status: status.as_u16(),
                message: format!("malformed bearer response: {e}"),
            })?;
        Ok(bearer.access_token)
    }
}

fn reject_signature(err: AuthError) -> AuthError {
    match err {
        AuthError::TokenExpired => AuthError::TokenExpired,
        _ => AuthError::AuthenticationError("token signature rejected".into()),
    }
}
