//! JSON Web Key Set types, plus remote JWKS caching for the federation
//! client.

use serde::{Deserialize, Serialize};

/// A single published verification key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub kid: String,
    /// Modulus, base64url.
    pub n: String,
    /// Exponent, base64url.
    pub e: String,
}

/// The document served at `/.well-known/jwks.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}

#[cfg(feature = "federation")]
pub use cache::JwksCache;

#[cfg(feature = "federation")]
mod cache {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use dashmap::DashMap;
    use jsonwebtoken::DecodingKey;
    use tokio::sync::RwLock;
    use tracing::instrument;

    use super::JwkSet;
    use crate::oauth_core::types::{AuthError, Result};

    /// A cache of a remote party's published keys, refreshed when the TTL
    /// elapses or an unknown `kid` is requested.
    #[derive(Clone)]
    pub struct JwksCache {
        http: reqwest::Client,
        uri: String,
        keys: Arc<DashMap<String, (String, String)>>,
        ttl: Duration,
        last_refresh: Arc<RwLock<Instant>>,
    }

    impl JwksCache {
        /// Creates the cache and immediately fetches the key set.
        pub async fn new(
            http: reqwest::Client,
            uri: impl Into<String>,
            ttl: Duration,
        ) -> Result<Self> {
            let cache = JwksCache {
                http,
                uri: uri.into(),
                keys: Arc::new(DashMap::new()),
                ttl,
                last_refresh: Arc::new(RwLock::new(Instant::now())),
            };
            cache.fetch_and_store().await?;
            Ok(cache)
        }

        #[instrument(skip(self), level = "debug")]
        async fn fetch_and_store(&self) -> Result<()> {
            let resp = self.http.get(&self.uri).send().await.map_err(|e| {
                AuthError::RemoteUnavailable { status: 0, message: e.to_string() }
            })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(AuthError::RemoteUnavailable {
                    status: status.as_u16(),
                    message: resp.text().await.unwrap_or_default(),
                });
            }
            let jwks: JwkSet = resp.json().await.map_err(|e| AuthError::RemoteUnavailable {
                status: status.as_u16(),
                message: format!("malformed JWKS document: {e}"),
            })?;
            self.keys.clear();
            for jwk in jwks.keys {
                self.keys.insert(jwk.kid, (jwk.n, jwk.e));
            }
            let mut write_lock = self.last_refresh.write().await;
            *write_lock = Instant::now();
            Ok(())
        }

        /// Returns the decoding key for `kid`, refetching the document when
        /// the entry is missing or the cache has gone stale.
        #[instrument(skip(self), level = "debug")]
        pub async fn get(&self, kid: &str) -> Result<DecodingKey> {
            let elapsed = Instant::now().duration_since(*self.last_refresh.read().await);
            if self.keys.get(kid).is_none() || elapsed > self.ttl {
                self.fetch_and_store().await?;
            }
            match self.keys.get(kid) {
                Some(entry) => {
                    let (n, e) = entry.value();
                    DecodingKey::from_rsa_components(n, e)
                        .map_err(|e| AuthError::Internal(format!("unusable JWK: {e}")))
                }
                None => Err(AuthError::AuthenticationError(format!("unknown signing key {kid}"))),
            }
        }
    }
}
