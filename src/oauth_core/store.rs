//! Repository traits over the backing store. Persistence itself lives
//! outside this crate; these seams carry find-by-key, insert, and, for
//! single-use credentials, atomic take semantics.

use async_trait::async_trait;

use super::types::{
    AuthError, AuthorizationCode, Principal, RefreshTokenRecord, ResourceServer, Session,
};

/// Registered resource servers, keyed by client id.
#[async_trait]
pub trait ResourceServerStore: Send + Sync + 'static {
    async fn find_by_client_id(&self, client_id: &str)
    -> Result<Option<ResourceServer>, AuthError>;

    async fn insert(&self, server: ResourceServer) -> Result<(), AuthError>;
}

/// Authorization code rows, keyed by code hash.
///
/// Redemption must be `take`: a single conditional removal that returns the
/// row if and only if this call deleted it. Concurrent redemption of the
/// same code must succeed at most once; a SQL implementation maps this to
/// `DELETE ... RETURNING` or an equivalent row-locked delete.
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync + 'static {
    async fn insert(&self, code: AuthorizationCode) -> Result<(), AuthError>;

    async fn take(&self, code_hash: &str) -> Result<Option<AuthorizationCode>, AuthError>;
}

/// Refresh token rows, keyed by token hash. Same atomic-take contract as
/// authorization codes: rolling refresh consumes the row exactly once.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync + 'static {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), AuthError>;

    async fn take(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AuthError>;
}

/// Principals, keyed by id and by unique email.
#[async_trait]
pub trait PrincipalStore: Send + Sync + 'static {
    async fn find_by_id(&self, id: &str) -> Result<Option<Principal>, AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AuthError>;

    async fn upsert(&self, principal: Principal) -> Result<(), AuthError>;
}

/// Resource-server-side sessions, keyed by principal id.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn put(&self, session: Session) -> Result<(), AuthError>;

    async fn find_by_principal(&self, principal_id: &str) -> Result<Option<Session>, AuthError>;
}

/// At-rest cache of machine bearer credentials, keyed by the target server's
/// client id. Values are ciphertext; encryption happens above this seam.
#[async_trait]
pub trait MachineCredentialStore: Send + Sync + 'static {
    async fn put(&self, client_id: &str, ciphertext: &str) -> Result<(), AuthError>;

    async fn get(&self, client_id: &str) -> Result<Option<String>, AuthError>;
}
