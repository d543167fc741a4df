//! Process-start configuration: signing key material and token lifetimes.
//!
//! Both structs are built once at startup and injected; nothing in this
//! crate reads ambient global state.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use super::types::{AuthError, Result};

/// Environment variable consulted when the private key path is absent.
pub const PRIVATE_KEY_ENV: &str = "FILEHUB_JWT_PRIVATE_KEY";
/// Environment variable consulted when the public key path is absent.
pub const PUBLIC_KEY_ENV: &str = "FILEHUB_JWT_PUBLIC_KEY";

/// Key material for the crypto service.
///
/// With an RSA PEM pair the hub signs RS256 and can publish a JWKS. Without
/// one, the app secret doubles as an HS256 signing key, which is only
/// suitable for development: HS256 material cannot be published.
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// PKCS#8 PEM private key for RS256 signing.
    pub rsa_private_key: Option<String>,
    /// SPKI PEM public key for RS256 verification and JWKS derivation.
    pub rsa_public_key: Option<String>,
    /// Process-wide secret: salts the storage hash, keys the at-rest cipher,
    /// and serves as the HS256 fallback signing key.
    pub app_secret: String,
}

impl KeyConfig {
    /// Builds a config from an app secret and an RSA PEM pair.
    pub fn with_rsa(
        app_secret: impl Into<String>,
        private_pem: impl Into<String>,
        public_pem: impl Into<String>,
    ) -> Self {
        KeyConfig {
            rsa_private_key: Some(private_pem.into()),
            rsa_public_key: Some(public_pem.into()),
            app_secret: app_secret.into(),
        }
    }

    /// Development-only config without RSA material.
    pub fn insecure(app_secret: impl Into<String>) -> Self {
        KeyConfig { rsa_private_key: None, rsa_public_key: None, app_secret: app_secret.into() }
    }

    /// Loads the RSA pair from file paths, falling back to the
    /// `FILEHUB_JWT_*` environment variables for any path that is empty or
    /// unreadable.
    pub fn load_rsa_keys(
        private_key_path: Option<&str>,
        public_key_path: Option<&str>,
    ) -> (Option<String>, Option<String>) {
        let private = private_key_path.and_then(|p| load_key_from_path_or_env(p, PRIVATE_KEY_ENV));
        let public = public_key_path.and_then(|p| load_key_from_path_or_env(p, PUBLIC_KEY_ENV));
        (private, public)
    }

    /// Generates a fresh 2048-bit RSA pair, optionally persisting it.
    /// Returns `(private_pem, public_pem)`.
    pub fn generate_rsa_keys(persist_dir: Option<&Path>) -> Result<(String, String)> {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
        use rsa::{RsaPrivateKey, RsaPublicKey};

        info!("generating RSA key pair (2048 bit)");

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048)
            .map_err(|e| AuthError::Internal(format!("RSA key generation failed: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::Internal(format!("private key encoding failed: {e}")))?
            .to_string();
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::Internal(format!("public key encoding failed: {e}")))?;

        if let Some(dir) = persist_dir {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!("could not create key directory {}: {e}", dir.display());
            } else {
                let private_path = dir.join("private.key");
                let public_path = dir.join("public.key");
                if let Err(e) = fs::write(&private_path, &private_pem)
                    .and_then(|()| fs::write(&public_path, &public_pem))
                {
                    warn!("could not persist RSA keys: {e}");
                } else {
                    info!("persisted RSA keys to {}", dir.display());
                }
            }
        }

        Ok((private_pem, public_pem))
    }

    /// Loads the RSA pair from configured paths or env, then from the
    /// persisted `.jwt-keys/` directory, and finally generates and persists
    /// a new pair.
    pub fn load_or_generate_rsa_keys(
        private_key_path: Option<&str>,
        public_key_path: Option<&str>,
    ) -> Result<(String, String)> {
        if let (Some(private), Some(public)) =
            Self::load_rsa_keys(private_key_path, public_key_path)
        {
            return Ok((private, public));
        }

        let keys_dir = Path::new(".jwt-keys");
        let private_path = keys_dir.join("private.key");
        let public_path = keys_dir.join("public.key");
        if private_path.exists() && public_path.exists() {
            if let (Ok(private), Ok(public)) =
                (fs::read_to_string(&private_path), fs::read_to_string(&public_path))
            {
                info!("loaded persisted RSA keys from {}", keys_dir.display());
                return Ok((private, public));
            }
        }

        Self::generate_rsa_keys(Some(keys_dir))
    }
}

fn load_key_from_path_or_env(path: &str, env_var: &str) -> Option<String> {
    if !path.is_empty() {
        if let Ok(content) = fs::read_to_string(path) {
            info!("loaded JWT key from file: {path}");
            return Some(content);
        }
    }
    match std::env::var(env_var) {
        Ok(content) if !content.is_empty() => {
            info!("loaded JWT key from env: {env_var}");
            Some(content)
        }
        _ => None,
    }
}

/// Issuer identity and per-kind token lifetimes.
#[derive(Debug, Clone)]
pub struct TokenTtlConfig {
    /// Fixed `iss` claim value for every signed token.
    pub issuer: String,
    /// Authorization code lifetime in seconds.
    pub code_ttl_secs: i64,
    /// Access token lifetime in seconds.
    pub access_ttl_secs: i64,
    /// Refresh token lifetime in seconds.
    pub refresh_ttl_secs: i64,
    /// ID token lifetime in seconds.
    pub id_ttl_secs: i64,
}

impl Default for TokenTtlConfig {
    fn default() -> Self {
        TokenTtlConfig {
            issuer: "filehub".to_string(),
            code_ttl_secs: 300,
            access_ttl_secs: 3600,
            refresh_ttl_secs: 30 * 24 * 3600,
            id_ttl_secs: 3600,
        }
    }
}

impl TokenTtlConfig {
    pub fn with_issuer(issuer: impl Into<String>) -> Self {
        TokenTtlConfig { issuer: issuer.into(), ..TokenTtlConfig::default() }
    }
}
