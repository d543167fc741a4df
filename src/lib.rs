pub mod oauth_core;

#[cfg(feature = "federation")]
pub mod federation;

pub use oauth_core::config::{KeyConfig, TokenTtlConfig};
pub use oauth_core::crypto::CryptoService;
pub use oauth_core::endpoint::{
    AuthorizationEndpoint, AuthorizeRedirect, AuthorizeRequest, MachineAuthorizer,
    MachineGrant, MachineGrantAuthorizer, TokenEndpoint, TokenRequest,
};
pub use oauth_core::grants::AuthorizationGrantManager;
pub use oauth_core::issuer::{AccessTokenClaims, IdTokenClaims, TokenIssuer};
pub use oauth_core::jwks::{Jwk, JwkSet};
pub use oauth_core::memory::{
    InMemoryAuthorizationCodeStore, InMemoryMachineCredentialStore, InMemoryPrincipalStore,
    InMemoryRefreshTokenStore, InMemoryResourceServerStore, InMemorySessionStore,
};
pub use oauth_core::scope::{AccessMode, Scope, ScopeSet};
pub use oauth_core::store::{
    AuthorizationCodeStore, MachineCredentialStore, PrincipalStore, RefreshTokenStore,
    ResourceServerStore, SessionStore,
};
pub use oauth_core::types::{
    AuthError, AuthorizationCode, Principal, RefreshTokenRecord, ResourceServer, Session,
    TokenSet,
};

#[cfg(feature = "federation")]
pub use federation::{FederatedTokenExchange, FederationConfig, HubEndpoints, RemoteServer};
