//! Shared test utilities for authorization testing.
//!
//! This module provides helpers for generating Ed25519 signing keys and
//! their JWKs, creating signed JWTs, crafting raw JWT strings (for attack
//! testing), and wiring verifiers and guards over an in-memory key set. It is
//! feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! drinks-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use drinks_authn::testutil::{TestKey, test_guard, valid_claims};
//! ```

#![allow(clippy::expect_used)]

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use serde_json::json;
use zeroize::Zeroizing;

use crate::{
    guard::PermissionGuard,
    jwks::{JwksDocument, StaticJwksSource},
    jwt::{TokenVerifier, VerifierSettings},
    key_store::KeyStore,
};

/// Issuer used by [`valid_claims`] and [`test_settings`].
pub const TEST_ISSUER: &str = "https://drinks-test.auth0.com/";

/// Audience used by [`valid_claims`] and [`test_settings`].
pub const TEST_AUDIENCE: &str = "drinks";

/// Generates a test Ed25519 key pair.
///
/// Returns `(pkcs8_der, public_key_base64url)` where:
/// - `pkcs8_der` is the private key in PKCS#8 DER format wrapped in [`Zeroizing`] (suitable for
///   [`EncodingKey::from_ed_der`])
/// - `public_key_base64url` is the 32-byte public key encoded as base64url without padding
///   (the `x` member of an OKP JWK)
///
/// Each call generates a fresh random key pair.
pub fn generate_test_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_b64 = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_b64)
}

/// An Ed25519 signing key with a key id, standing in for the identity provider.
pub struct TestKey {
    kid: String,
    pkcs8_der: Zeroizing<Vec<u8>>,
    public_key_b64: String,
}

impl TestKey {
    /// Generates a fresh key pair under `kid`.
    pub fn generate(kid: &str) -> Self {
        let (pkcs8_der, public_key_b64) = generate_test_keypair();
        Self { kid: kid.to_owned(), pkcs8_der, public_key_b64 }
    }

    /// Returns the key id.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Returns the public key, base64url-encoded.
    pub fn public_key_b64(&self) -> &str {
        &self.public_key_b64
    }

    /// Returns the private key in PKCS#8 DER format.
    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }

    /// Returns the public JWK, as the provider would publish it.
    pub fn jwk(&self) -> serde_json::Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "use": "sig",
            "alg": "EdDSA",
            "kid": self.kid,
            "x": self.public_key_b64,
        })
    }

    /// Signs `claims` as an EdDSA JWT carrying this key's id.
    ///
    /// # Panics
    ///
    /// Panics if JWT encoding fails (should not happen with valid inputs).
    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.kid.clone());
        self.sign_with_header(header, claims)
    }

    /// Signs `claims` with an arbitrary header.
    ///
    /// # Panics
    ///
    /// Panics if JWT encoding fails, e.g. when `header.alg` is not EdDSA.
    pub fn sign_with_header(&self, header: Header, claims: &serde_json::Value) -> String {
        let encoding_key = EncodingKey::from_ed_der(&self.pkcs8_der);
        jsonwebtoken::encode(&header, claims, &encoding_key).expect("Failed to encode test JWT")
    }
}

/// Builds a JWKS document publishing `keys` in order.
pub fn jwks_document(keys: &[&TestKey]) -> JwksDocument {
    JwksDocument::new(keys.iter().map(|key| key.jwk()).collect())
}

/// Returns claims accepted by [`test_settings`], expiring in one hour.
pub fn valid_claims(permissions: &[&str]) -> serde_json::Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": TEST_ISSUER,
        "sub": "auth0|test-user",
        "aud": [TEST_AUDIENCE, "https://drinks-test.auth0.com/userinfo"],
        "iat": now,
        "exp": now + 3600,
        "permissions": permissions,
    })
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. This is useful for testing rejection of
/// malformed or attack JWTs (e.g., `alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Verifier settings matching [`valid_claims`]: EdDSA, [`TEST_ISSUER`], [`TEST_AUDIENCE`].
pub fn test_settings() -> VerifierSettings {
    VerifierSettings::new(TEST_ISSUER, TEST_AUDIENCE, Algorithm::EdDSA)
}

/// Creates a verifier over an in-memory key set publishing `keys`.
///
/// The returned source can be used to rotate keys.
pub fn test_verifier(keys: &[&TestKey]) -> (TokenVerifier, StaticJwksSource) {
    let source = StaticJwksSource::new(jwks_document(keys));
    let key_store = Arc::new(KeyStore::new(Arc::new(source.clone())));
    (TokenVerifier::new(key_store, test_settings()), source)
}

/// Creates a permission guard over an in-memory key set publishing `keys`.
pub fn test_guard(keys: &[&TestKey]) -> (PermissionGuard, StaticJwksSource) {
    let (verifier, source) = test_verifier(keys);
    (PermissionGuard::new(verifier), source)
}

/// Asserts that a [`Result<T, AuthError>`] is an `Err` matching the given [`AuthError`] variant.
///
/// Works with any `AuthError` variant. On failure, prints the expected variant
/// and the actual result for debugging.
///
/// [`AuthError`]: crate::error::AuthError
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use drinks_authn::assert_auth_error;
/// use drinks_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::token_expired(0));
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        match &$result {
            result => assert!(
                matches!(result, Err($crate::error::AuthError::$variant { .. })),
                "expected AuthError::{}, got: {:?}",
                stringify!($variant),
                result,
            ),
        }
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        match &$result {
            result => assert!(
                matches!(result, Err($crate::error::AuthError::$variant { .. })),
                "{}: expected AuthError::{}, got: {:?}",
                $msg,
                stringify!($variant),
                result,
            ),
        }
    };
}
