//! Cryptographic primitives backing credential integrity: opaque token
//! generation, iterated storage hashing, RS256 signing, at-rest secret
//! encryption, and JWKS derivation.

use std::num::NonZeroU32;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use ring::aead;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::info;

use super::config::KeyConfig;
use super::jwks::{Jwk, JwkSet};
use super::types::{AuthError, Result};

/// PBKDF2 rounds for at-rest credential hashing.
const STORAGE_HASH_ROUNDS: NonZeroU32 = NonZeroU32::new(4096).unwrap();

/// RSA public key components for JWKS derivation, base64url encoded.
#[derive(Debug, Clone)]
struct RsaComponents {
    n: String,
    e: String,
}

/// Immutable process-wide crypto state, built once at startup from
/// [`KeyConfig`] and shared by `Arc`.
pub struct CryptoService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    key_id: Option<String>,
    rsa_components: Option<RsaComponents>,
    storage_salt: Vec<u8>,
    cipher_key: [u8; 32],
}

impl CryptoService {
    /// Builds the service from key material. RSA PEM pairs select RS256;
    /// otherwise the app secret signs HS256 (development only: HS256
    /// material cannot publish a JWKS).
    pub fn from_config(config: &KeyConfig) -> Result<Self> {
        match (&config.rsa_private_key, &config.rsa_public_key) {
            (Some(private_pem), Some(public_pem)) => {
                Self::new_rs256(&config.app_secret, private_pem, public_pem)
            }
            _ => Ok(Self::new_hs256(&config.app_secret)),
        }
    }

    /// RS256 service from a PEM key pair.
    pub fn new_rs256(app_secret: &str, private_pem: &str, public_pem: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::Internal(format!("invalid RSA private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| AuthError::Internal(format!("invalid RSA public key: {e}")))?;
        let key_id = derive_key_id(public_pem);
        let rsa_components = extract_rsa_components(public_pem)?;

        info!(key_id = %key_id, "crypto service initialized with RS256");

        Ok(CryptoService {
            encoding_key,
            decoding_key,
            algorithm: Algorithm::RS256,
            key_id: Some(key_id),
            rsa_components: Some(rsa_components),
            storage_salt: app_secret.as_bytes().to_vec(),
            cipher_key: derive_cipher_key(app_secret),
        })
    }

    /// HS256 service keyed by the app secret alone.
    pub fn new_hs256(app_secret: &str) -> Self {
        info!("crypto service initialized with HS256");
        CryptoService {
            encoding_key: EncodingKey::from_secret(app_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(app_secret.as_bytes()),
            algorithm: Algorithm::HS256,
            key_id: None,
            rsa_components: None,
            storage_salt: app_secret.as_bytes().to_vec(),
            cipher_key: derive_cipher_key(app_secret),
        }
    }

    /// Generates a cryptographically random opaque token (256 bits,
    /// base64url). Returned once in plaintext; callers store only its hash.
    pub fn generate_opaque_token(&self) -> String {
        let rng = SystemRandom::new();
        let mut buf = [0u8; 32];
        rng.fill(&mut buf).expect("system rng failure");
        URL_SAFE_NO_PAD.encode(buf)
    }

    /// Deterministic iterated keyed hash for at-rest credential storage.
    /// Comparison is always hash-to-hash; the digest is never reversed.
    pub fn hash_for_storage(&self, secret: &str) -> String {
        let mut out = [0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            STORAGE_HASH_ROUNDS,
            &self.storage_salt,
            secret.as_bytes(),
            &mut out,
        );
        URL_SAFE_NO_PAD.encode(out)
    }

    /// Signs a claims object into a compact token, carrying the key id when
    /// one exists.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        let mut header = Header::new(self.algorithm);
        header.kid = self.key_id.clone();
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))
    }

    /// Verifies a token against the service's own key. Zero leeway: a token
    /// one second past `exp` is already rejected. With `expected_aud` unset
    /// the audience claim is not checked.
    pub fn verify<T: DeserializeOwned>(&self, token: &str, expected_aud: Option<&str>) -> Result<T> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        match expected_aud {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(map_verify_error)
    }

    /// Encrypts a secret the hub must later present in plaintext (e.g. a
    /// cached machine bearer). AES-256-GCM with a random nonce prefixed to
    /// the ciphertext, base64url output.
    pub fn encrypt_secret(&self, plaintext: &str) -> Result<String> {
        let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &self.cipher_key)
            .map_err(|_| AuthError::Internal("cipher key rejected".to_string()))?;
        let key = aead::LessSafeKey::new(unbound);

        let rng = SystemRandom::new();
        let mut nonce = [0u8; aead::NONCE_LEN];
        rng.fill(&mut nonce).expect("system rng failure");

        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(
            aead::Nonce::assume_unique_for_key(nonce),
            aead::Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| AuthError::Internal("secret encryption failed".to_string()))?;

        Ok(URL_SAFE_NO_PAD.encode([&nonce[..], &in_out[..]].concat()))
    }

    /// Decrypts ciphertext produced by [`encrypt_secret`](Self::encrypt_secret).
    pub fn decrypt_secret(&self, ciphertext: &str) -> Result<String> {
        let raw = URL_SAFE_NO_PAD
            .decode(ciphertext)
            .map_err(|_| AuthError::Internal("malformed ciphertext".to_string()))?;
        if raw.len() <= aead::NONCE_LEN {
            return Err(AuthError::Internal("ciphertext too short".to_string()));
        }
        let (nonce_bytes, encrypted) = raw.split_at(aead::NONCE_LEN);

        let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &self.cipher_key)
            .map_err(|_| AuthError::Internal("cipher key rejected".to_string()))?;
        let key = aead::LessSafeKey::new(unbound);

        let mut in_out = encrypted.to_vec();
        let plaintext = key
            .open_in_place(
                aead::Nonce::try_assume_unique_for_key(nonce_bytes)
                    .map_err(|_| AuthError::Internal("malformed nonce".to_string()))?,
                aead::Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| AuthError::Internal("secret decryption failed".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| AuthError::Internal("decrypted secret is not UTF-8".to_string()))
    }

    /// Derives the public JSON Web Key Set for third-party verification.
    /// Only RSA material can be published.
    pub fn jwks(&self) -> Result<JwkSet> {
        let components = self
            .rsa_components
            .as_ref()
            .ok_or_else(|| AuthError::UnsupportedKeyType(format!("{:?}", self.algorithm)))?;
        let kid = self.key_id.clone().unwrap_or_default();
        Ok(JwkSet {
            keys: vec![Jwk {
                kty: "RSA".to_string(),
                alg: "RS256".to_string(),
                use_: "sig".to_string(),
                kid,
                n: components.n.clone(),
                e: components.e.clone(),
            }],
        })
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

/// Verifies a token against an externally published key (JWKS path). Issuer
/// and audience are both enforced; leeway is zero.
pub fn verify_with_key<T: DeserializeOwned>(
    token: &str,
    key: &DecodingKey,
    expected_iss: &str,
    expected_aud: &str,
) -> Result<T> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = 0;
    validation.set_issuer(&[expected_iss]);
    validation.set_audience(&[expected_aud]);
    decode::<T>(token, key, &validation).map(|data| data.claims).map_err(map_verify_error)
}

fn map_verify_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidSignature,
    }
}

/// Key id: base64url of the first 6 bytes of the public PEM's SHA-256.
fn derive_key_id(public_key_pem: &str) -> String {
    let digest = Sha256::digest(public_key_pem.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..6])
}

/// Cipher key: SHA-256 of the app secret under a fixed domain label, so the
/// storage salt and the cipher key never coincide.
fn derive_cipher_key(app_secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"filehub.secret-cipher.v1");
    hasher.update(app_secret.as_bytes());
    hasher.finalize().into()
}

/// Extracts the base64url modulus and exponent needed for a JWK.
fn extract_rsa_components(public_key_pem: &str) -> Result<RsaComponents> {
    use rsa::RsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;
    use rsa::traits::PublicKeyParts;

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| AuthError::UnsupportedKeyType(format!("not an RSA public key: {e}")))?;

    Ok(RsaComponents {
        n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_hash_is_deterministic_and_not_plaintext() {
        let crypto = CryptoService::new_hs256("test-secret");
        let a = crypto.hash_for_storage("x");
        let b = crypto.hash_for_storage("x");
        assert_eq!(a, b);
        assert_ne!(a, "x");
        assert_ne!(a, crypto.hash_for_storage("y"));
    }

    #[test]
    fn storage_hash_depends_on_salt() {
        let one = CryptoService::new_hs256("salt-one");
        let two = CryptoService::new_hs256("salt-two");
        assert_ne!(one.hash_for_storage("x"), two.hash_for_storage("x"));
    }

    #[test]
    fn secret_encryption_round_trips() {
        let crypto = CryptoService::new_hs256("test-secret");
        let ciphertext = crypto.encrypt_secret("bearer-abc123").unwrap();
        assert_ne!(ciphertext, "bearer-abc123");
        assert_eq!(crypto.decrypt_secret(&ciphertext).unwrap(), "bearer-abc123");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let crypto = CryptoService::new_hs256("test-secret");
        let ciphertext = crypto.encrypt_secret("bearer-abc123").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&ciphertext).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(raw);
        assert!(crypto.decrypt_secret(&tampered).is_err());
    }

    #[test]
    fn hs256_material_cannot_publish_jwks() {
        let crypto = CryptoService::new_hs256("test-secret");
        assert!(matches!(crypto.jwks(), Err(AuthError::UnsupportedKeyType(_))));
    }

    #[test]
    fn from_config_without_rsa_material_falls_back_to_hs256() {
        let crypto = CryptoService::from_config(&KeyConfig::insecure("dev-secret")).unwrap();
        assert_eq!(crypto.algorithm(), Algorithm::HS256);
        assert!(crypto.key_id().is_none());
    }

    #[test]
    fn opaque_tokens_are_unique_and_long() {
        let crypto = CryptoService::new_hs256("test-secret");
        let one = crypto.generate_opaque_token();
        let two = crypto.generate_opaque_token();
        assert_ne!(one, two);
        // 32 random bytes base64url-encode to 43 characters
        assert_eq!(one.len(), 43);
    }
}
