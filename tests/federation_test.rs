#![cfg(feature = "federation")]
//! Federated exchange against a mocked hub: code exchange, refresh, error
//! propagation, and machine credential bootstrap.

use std::sync::Arc;

use chrono::{Duration, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use filehub_oauth::{
    AuthError, AuthorizationCode, AuthorizationGrantManager, CryptoService,
    FederatedTokenExchange, FederationConfig, HubEndpoints, InMemoryAuthorizationCodeStore,
    InMemoryMachineCredentialStore, InMemoryPrincipalStore, InMemoryRefreshTokenStore,
    InMemoryResourceServerStore, InMemorySessionStore, KeyConfig, MachineAuthorizer,
    MachineCredentialStore, MachineGrant, MachineGrantAuthorizer, Principal, PrincipalStore,
    RemoteServer, ResourceServer, ScopeSet, Session, SessionStore, TokenIssuer, TokenSet,
    TokenTtlConfig,
};

const HUB_ISSUER: &str = "filehub";
const SERVER_CLIENT_ID: &str = "server-1";
const CALLBACK: &str = "https://files.example/callback";

struct HubSigner {
    crypto: Arc<CryptoService>,
    issuer: TokenIssuer,
}

fn hub_signer() -> HubSigner {
    let (private_pem, public_pem) = KeyConfig::generate_rsa_keys(None).unwrap();
    let crypto =
        Arc::new(CryptoService::new_rs256("hub-secret", &private_pem, &public_pem).unwrap());
    let principals = Arc::new(InMemoryPrincipalStore::new(vec![Principal::new(
        "user-1",
        "ada@example.com",
        "ada",
    )]));
    let refresh = Arc::new(InMemoryRefreshTokenStore::new());
    let issuer =
        TokenIssuer::new(crypto.clone(), refresh, principals, TokenTtlConfig::default());
    HubSigner { crypto, issuer }
}

async fn minted_token_set(hub: &HubSigner) -> TokenSet {
    let code = AuthorizationCode {
        code_hash: "unused".to_string(),
        principal_id: "user-1".to_string(),
        client_id: SERVER_CLIENT_ID.to_string(),
        scopes: ScopeSet::parse(&["/docs:rw"]).unwrap(),
        state: None,
        nonce: None,
        redirect_uri: CALLBACK.to_string(),
        expires_at: Utc::now() + Duration::minutes(5),
    };
    hub.issuer.issue_from_code(&code).await.unwrap()
}

async fn mount_jwks(mock: &MockServer, hub: &HubSigner) {
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hub.crypto.jwks().unwrap()))
        .mount(mock)
        .await;
}

struct ModuleSide {
    exchange: FederatedTokenExchange,
    crypto: Arc<CryptoService>,
    principals: Arc<InMemoryPrincipalStore>,
    sessions: Arc<InMemorySessionStore>,
    machine: Arc<InMemoryMachineCredentialStore>,
}

async fn connect_module(mock: &MockServer, authorizer: Arc<dyn MachineAuthorizer>) -> ModuleSide {
    let principals = Arc::new(InMemoryPrincipalStore::new(Vec::new()));
    let sessions = Arc::new(InMemorySessionStore::new());
    let machine = Arc::new(InMemoryMachineCredentialStore::new());
    let crypto = Arc::new(CryptoService::new_hs256("module-secret"));
    let config = FederationConfig::new(
        HubEndpoints {
            issuer: HUB_ISSUER.to_string(),
            token_url: format!("{}/oauth/token", mock.uri()),
            jwks_url: format!("{}/.well-known/jwks.json", mock.uri()),
        },
        SERVER_CLIENT_ID,
        "server-secret",
        CALLBACK,
    );
    let exchange = FederatedTokenExchange::connect(
        config,
        principals.clone(),
        sessions.clone(),
        machine.clone(),
        authorizer,
        crypto.clone(),
    )
    .await
    .unwrap();
    ModuleSide { exchange, crypto, principals, sessions, machine }
}

struct StaticAuthorizer;

#[async_trait::async_trait]
impl MachineAuthorizer for StaticAuthorizer {
    async fn grant_machine_code(&self, _: &str) -> Result<MachineGrant, AuthError> {
        Ok(MachineGrant { code: "static-code".to_string(), redirect_uri: String::new() })
    }
}

#[tokio::test]
async fn test_exchange_establishes_session_and_upserts_principal() {
    let hub = hub_signer();
    let mock = MockServer::start().await;
    mount_jwks(&mock, &hub).await;

    let tokens = minted_token_set(&hub).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&tokens))
        .mount(&mock)
        .await;

    let module = connect_module(&mock, Arc::new(StaticAuthorizer)).await;
    let session = module.exchange.exchange_authorization_code("issued-code").await.unwrap();

    assert_eq!(session.access_token, tokens.access_token);
    assert_eq!(session.refresh_token.as_deref(), Some(tokens.refresh_token.as_str()));
    assert!(session.expires_at > Utc::now());

    let principal =
        module.principals.find_by_email("ada@example.com").await.unwrap().unwrap();
    assert_eq!(principal.id, session.principal_id);

    let stored = module.sessions.find_by_principal(&session.principal_id).await.unwrap().unwrap();
    assert_eq!(stored.access_token, session.access_token);
}

#[tokio::test]
async fn test_refresh_rolls_the_session() {
    let hub = hub_signer();
    let mock = MockServer::start().await;
    mount_jwks(&mock, &hub).await;

    let tokens = minted_token_set(&hub).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&tokens))
        .mount(&mock)
        .await;

    let module = connect_module(&mock, Arc::new(StaticAuthorizer)).await;
    let session = module.exchange.exchange_authorization_code("issued-code").await.unwrap();
    let rolled = module.exchange.refresh(&session).await.unwrap();
    assert_eq!(rolled.principal_id, session.principal_id);
}

#[tokio::test]
async fn test_refresh_without_stored_token_fails() {
    let hub = hub_signer();
    let mock = MockServer::start().await;
    mount_jwks(&mock, &hub).await;

    let module = connect_module(&mock, Arc::new(StaticAuthorizer)).await;
    let session = Session {
        principal_id: "user-1".to_string(),
        access_token: "stale".to_string(),
        refresh_token: None,
        id_token: "stale".to_string(),
        expires_at: Utc::now(),
    };
    let result = module.exchange.refresh(&session).await;
    assert!(matches!(result, Err(AuthError::AuthenticationError(_))));
}

#[tokio::test]
async fn test_upstream_error_carries_status_and_message() {
    let hub = hub_signer();
    let mock = MockServer::start().await;
    mount_jwks(&mock, &hub).await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .mount(&mock)
        .await;

    let module = connect_module(&mock, Arc::new(StaticAuthorizer)).await;
    let result = module.exchange.exchange_authorization_code("bad-code").await;
    match result {
        Err(AuthError::RemoteUnavailable { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "invalid_grant");
        }
        other => panic!("expected RemoteUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tokens_signed_by_a_foreign_key_are_rejected() {
    let hub = hub_signer();
    let foreign = hub_signer();
    let mock = MockServer::start().await;
    mount_jwks(&mock, &hub).await;

    // Token set minted under a key the hub never published.
    let tokens = minted_token_set(&foreign).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&tokens))
        .mount(&mock)
        .await;

    let module = connect_module(&mock, Arc::new(StaticAuthorizer)).await;
    let result = module.exchange.exchange_authorization_code("issued-code").await;
    assert!(matches!(result, Err(AuthError::AuthenticationError(_))));
}

#[tokio::test]
async fn test_machine_bootstrap_redeems_once_and_caches_encrypted() {
    let hub = hub_signer();
    let mock = MockServer::start().await;
    mount_jwks(&mock, &hub).await;

    let (target, _target_secret) = ResourceServer::register(
        "target",
        vec!["https://target.example/cb".to_string()],
        &hub.crypto,
    );
    let servers = Arc::new(InMemoryResourceServerStore::new(vec![target.clone()]));
    let codes = Arc::new(InMemoryAuthorizationCodeStore::new());
    let grants = Arc::new(AuthorizationGrantManager::new(
        servers,
        codes,
        hub.crypto.clone(),
        &TokenTtlConfig::default(),
    ));
    let authorizer = Arc::new(MachineGrantAuthorizer::new(grants, "svc-1"));

    let module = connect_module(&mock, authorizer).await;

    Mock::given(method("GET"))
        .and(path("/identity"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/exchange"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "machine-bearer-1" })),
        )
        .expect(1)
        .mount(&mock)
        .await;

    let remote = RemoteServer {
        client_id: target.client_id.clone(),
        exchange_url: format!("{}/exchange", mock.uri()),
        identity_url: format!("{}/identity", mock.uri()),
    };

    let bearer = module.exchange.ensure_authenticated(&remote).await.unwrap();
    assert_eq!(bearer, "machine-bearer-1");

    // The credential rests encrypted, never in plaintext.
    let ciphertext = module.machine.get(&target.client_id).await.unwrap().unwrap();
    assert_ne!(ciphertext, "machine-bearer-1");
    assert_eq!(module.crypto.decrypt_secret(&ciphertext).unwrap(), "machine-bearer-1");

    // Second call probes the identity endpoint, sees 200, and reuses the
    // cached bearer; the expect(1) above verifies no second redemption.
    let again = module.exchange.ensure_authenticated(&remote).await.unwrap();
    assert_eq!(again, "machine-bearer-1");
}

#[tokio::test]
async fn test_rejected_machine_credential_triggers_reauthentication() {
    let hub = hub_signer();
    let mock = MockServer::start().await;
    mount_jwks(&mock, &hub).await;

    let (target, _target_secret) = ResourceServer::register(
        "target",
        vec!["https://target.example/cb".to_string()],
        &hub.crypto,
    );
    let servers = Arc::new(InMemoryResourceServerStore::new(vec![target.clone()]));
    let codes = Arc::new(InMemoryAuthorizationCodeStore::new());
    let grants = Arc::new(AuthorizationGrantManager::new(
        servers,
        codes,
        hub.crypto.clone(),
        &TokenTtlConfig::default(),
    ));
    let authorizer = Arc::new(MachineGrantAuthorizer::new(grants, "svc-1"));

    let module = connect_module(&mock, authorizer).await;

    // A stale credential is already cached; the target answers 401 for it.
    let stale = module.crypto.encrypt_secret("stale-bearer").unwrap();
    module.machine.put(&target.client_id, &stale).await.unwrap();

    Mock::given(method("GET"))
        .and(path("/identity"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/exchange"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "machine-bearer-2" })),
        )
        .mount(&mock)
        .await;

    let remote = RemoteServer {
        client_id: target.client_id.clone(),
        exchange_url: format!("{}/exchange", mock.uri()),
        identity_url: format!("{}/identity", mock.uri()),
    };

    let bearer = module.exchange.ensure_authenticated(&remote).await.unwrap();
    assert_eq!(bearer, "machine-bearer-2");

    let ciphertext = module.machine.get(&target.client_id).await.unwrap().unwrap();
    assert_eq!(module.crypto.decrypt_secret(&ciphertext).unwrap(), "machine-bearer-2");
}
