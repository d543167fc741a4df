//! In-memory default implementations for the store traits, suitable for
//! tests and single-process deployments.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::store::{
    AuthorizationCodeStore, MachineCredentialStore, PrincipalStore, RefreshTokenStore,
    ResourceServerStore, SessionStore,
};
use super::types::{
    AuthError, AuthorizationCode, Principal, RefreshTokenRecord, ResourceServer, Session,
};

#[derive(Clone, Default)]
pub struct InMemoryResourceServerStore {
    servers: Arc<DashMap<String, ResourceServer>>,
}

impl InMemoryResourceServerStore {
    /// Creates a store pre-populated with an initial set of servers.
    pub fn new(initial_servers: Vec<ResourceServer>) -> Self {
        let map = DashMap::new();
        for server in initial_servers {
            map.insert(server.client_id.clone(), server);
        }
        Self { servers: Arc::new(map) }
    }
}

#[async_trait]
impl ResourceServerStore for InMemoryResourceServerStore {
    async fn find_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<ResourceServer>, AuthError> {
        Ok(self.servers.get(client_id).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, server: ResourceServer) -> Result<(), AuthError> {
        self.servers.insert(server.client_id.clone(), server);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuthorizationCodeStore {
    codes: Arc<DashMap<String, AuthorizationCode>>,
}

impl InMemoryAuthorizationCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthorizationCodeStore for InMemoryAuthorizationCodeStore {
    async fn insert(&self, code: AuthorizationCode) -> Result<(), AuthError> {
        self.codes.insert(code.code_hash.clone(), code);
        Ok(())
    }

    async fn take(&self, code_hash: &str) -> Result<Option<AuthorizationCode>, AuthError> {
        // DashMap::remove is the atomic conditional delete: of two racing
        // redeemers, exactly one sees the row.
        Ok(self.codes.remove(code_hash).map(|(_, code)| code))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRefreshTokenStore {
    tokens: Arc<DashMap<String, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), AuthError> {
        self.tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn take(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        Ok(self.tokens.remove(token_hash).map(|(_, record)| record))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPrincipalStore {
    principals: Arc<DashMap<String, Principal>>,
}

impl InMemoryPrincipalStore {
    pub fn new(initial_principals: Vec<Principal>) -> Self {
        let map = DashMap::new();
        for principal in initial_principals {
            map.insert(principal.id.clone(), principal);
        }
        Self { principals: Arc::new(map) }
    }
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Principal>, AuthError> {
        Ok(self.principals.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AuthError> {
        Ok(self
            .principals
            .iter()
            .find(|entry| entry.value().email == email)
            .map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, principal: Principal) -> Result<(), AuthError> {
        self.principals.insert(principal.id.clone(), principal);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, session: Session) -> Result<(), AuthError> {
        self.sessions.insert(session.principal_id.clone(), session);
        Ok(())
    }

    async fn find_by_principal(&self, principal_id: &str) -> Result<Option<Session>, AuthError> {
        Ok(self.sessions.get(principal_id).map(|entry| entry.value().clone()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMachineCredentialStore {
    credentials: Arc<DashMap<String, String>>,
}

impl InMemoryMachineCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MachineCredentialStore for InMemoryMachineCredentialStore {
    async fn put(&self, client_id: &str, ciphertext: &str) -> Result<(), AuthError> {
        self.credentials.insert(client_id.to_string(), ciphertext.to_string());
        Ok(())
    }

    async fn get(&self, client_id: &str) -> Result<Option<String>, AuthError> {
        Ok(self.credentials.get(client_id).map(|entry| entry.value().clone()))
    }
}
