//! Framework-free authorize/token endpoint semantics. The HTTP layer parses
//! requests into these shapes and maps [`AuthError`] back to status codes;
//! everything between those two edges lives here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::grants::AuthorizationGrantManager;
use super::issuer::TokenIssuer;
use super::scope::ScopeSet;
use super::types::{AuthError, Result, TokenSet};

pub const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_TYPE_REFRESH_TOKEN: &str = "refresh_token";

/// Body of `POST /oauth/authorize` for an already-authenticated principal.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    /// Requested scope strings, one `"<path>:<mode>"` per entry.
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
}

/// Successful authorize outcome: where to send the browser.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeRedirect {
    pub redirect_uri: String,
    pub code: String,
    pub state: Option<String>,
}

impl AuthorizeRedirect {
    /// Builds the full redirect location, `<uri>?code=<token>[&state=...]`.
    pub fn location(&self) -> Result<String> {
        let mut url = url::Url::parse(&self.redirect_uri)
            .map_err(|e| AuthError::Internal(format!("unusable redirect URI: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("code", &self.code);
            if let Some(state) = &self.state {
                query.append_pair("state", state);
            }
        }
        Ok(url.into())
    }
}

/// Form shape of `POST /oauth/token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub refresh_token: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: String,
    pub client_secret: String,
}

impl TokenRequest {
    pub fn authorization_code(
        code: impl Into<String>,
        redirect_uri: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        TokenRequest {
            grant_type: GRANT_TYPE_AUTHORIZATION_CODE.to_string(),
            code: Some(code.into()),
            refresh_token: None,
            redirect_uri: Some(redirect_uri.into()),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn refresh_token(
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        TokenRequest {
            grant_type: GRANT_TYPE_REFRESH_TOKEN.to_string(),
            code: None,
            refresh_token: Some(refresh_token.into()),
            redirect_uri: None,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

/// The authorize endpoint: validates the requesting client and scope
/// strings, issues a code, and answers with the redirect target.
pub struct AuthorizationEndpoint {
    grants: Arc<AuthorizationGrantManager>,
}

impl AuthorizationEndpoint {
    pub fn new(grants: Arc<AuthorizationGrantManager>) -> Self {
        AuthorizationEndpoint { grants }
    }

    #[instrument(skip(self, request), level = "debug")]
    pub async fn authorize(
        &self,
        principal_id: &str,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeRedirect> {
        let server = self
            .grants
            .validate_requesting_client(&request.client_id, &request.redirect_uri)
            .await?;
        let scopes = ScopeSet::parse(&request.scopes)?;
        let code = self
            .grants
            .issue_code(
                principal_id,
                &server,
                scopes,
                request.state.clone(),
                request.nonce,
                request.redirect_uri.clone(),
            )
            .await?;
        Ok(AuthorizeRedirect { redirect_uri: request.redirect_uri, code, state: request.state })
    }
}

/// The token endpoint: authenticates the consuming client and dispatches on
/// grant type.
pub struct TokenEndpoint {
    grants: Arc<AuthorizationGrantManager>,
    issuer: Arc<TokenIssuer>,
}

impl TokenEndpoint {
    pub fn new(grants: Arc<AuthorizationGrantManager>, issuer: Arc<TokenIssuer>) -> Self {
        TokenEndpoint { grants, issuer }
    }

    #[instrument(skip(self, request), level = "debug")]
    pub async fn handle(&self, request: TokenRequest) -> Result<TokenSet> {
        match request.grant_type.as_str() {
            GRANT_TYPE_AUTHORIZATION_CODE => {
                let presented = request.code.ok_or(AuthError::InvalidCode)?;
                let redirect_uri = request.redirect_uri.ok_or(AuthError::RedirectUriMismatch)?;
                let server = self
                    .grants
                    .validate_consuming_client(
                        &request.client_id,
                        &request.client_secret,
                        Some(&redirect_uri),
                    )
                    .await?;
                let code = self.grants.redeem_code(&presented).await?;
                self.grants.validate_code_binding(&code, &server, &redirect_uri)?;
                self.issuer.issue_from_code(&code).await
            }
            GRANT_TYPE_REFRESH_TOKEN => {
                let token = request.refresh_token.ok_or(AuthError::InvalidRefreshToken)?;
                self.grants
                    .validate_consuming_client(&request.client_id, &request.client_secret, None)
                    .await?;
                self.issuer.issue_from_refresh(&token).await
            }
            other => Err(AuthError::UnsupportedGrantType(other.to_string())),
        }
    }
}

/// A self-granted machine-account code, together with the redirect URI it
/// was bound to (the target's registered URI, needed again at redemption).
#[derive(Debug, Clone)]
pub struct MachineGrant {
    pub code: String,
    pub redirect_uri: String,
}

/// Source of self-granted machine-account authorization codes, used by the
/// federation client to bootstrap service-to-service credentials.
#[async_trait]
pub trait MachineAuthorizer: Send + Sync + 'static {
    /// Grants a fresh code for the machine account, scoped to full
    /// read-write, bound to `target_client_id`.
    async fn grant_machine_code(&self, target_client_id: &str) -> Result<MachineGrant>;
}

/// Hub-side machine authorizer: issues codes for the configured machine
/// principal directly through the grant manager, no HTTP round trip.
pub struct MachineGrantAuthorizer {
    grants: Arc<AuthorizationGrantManager>,
    machine_principal_id: String,
}

impl MachineGrantAuthorizer {
    pub fn new(
        grants: Arc<AuthorizationGrantManager>,
        machine_principal_id: impl Into<String>,
    ) -> Self {
        MachineGrantAuthorizer { grants, machine_principal_id: machine_principal_id.into() }
    }
}

#[async_trait]
impl MachineAuthorizer for MachineGrantAuthorizer {
    async fn grant_machine_code(&self, target_client_id: &str) -> Result<MachineGrant> {
        let server = self.grants.require_client(target_client_id).await?;
        // Machine grants carry no browser redirect; the code binds to the
        // target's first registered URI so redemption still round-trips the
        // binding check.
        let redirect_uri = server.redirect_uris.first().cloned().unwrap_or_default();
        let scopes = ScopeSet::parse(&["/:rw"])?;
        let code = self
            .grants
            .issue_code(
                &self.machine_principal_id,
                &server,
                scopes,
                None,
                None,
                redirect_uri.clone(),
            )
            .await?;
        Ok(MachineGrant { code, redirect_uri })
    }
}
