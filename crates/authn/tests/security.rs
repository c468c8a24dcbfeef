//! Security-focused authorization tests.
//!
//! These tests verify the authorization pipeline's resistance to common JWT
//! attack vectors: algorithm substitution, algorithm confusion, expired and
//! not-yet-valid tokens, issuer/audience substitution, forged permissions,
//! key rotation during active use, and malformed JWT structures.
#![allow(clippy::expect_used, clippy::panic)]

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use drinks_authn::{
    AuthError, AuthErrorKind, ErrorResponse, RawToken, assert_auth_error,
    jwks::JwksDocument,
    permissions::{DELETE_DRINKS, GET_DRINKS_DETAIL, PATCH_DRINKS, POST_DRINKS},
    testutil::{TestKey, craft_raw_jwt, jwks_document, test_guard, test_verifier, valid_claims},
    validation::{FORBIDDEN_ALGORITHMS, validate_algorithm},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

// ===========================================================================
// 1. Algorithm substitution: JWT with `alg: "none"` must be rejected
// ===========================================================================

#[test]
fn test_algorithm_none_rejected_before_key_lookup() {
    let result = validate_algorithm("none", Algorithm::RS256);
    assert!(
        matches!(&result, Err(AuthError::UnsupportedAlgorithm { message }) if message.contains("not allowed for security reasons")),
        "Expected 'none' to be rejected with security message, got: {result:?}"
    );
}

#[tokio::test]
async fn test_algorithm_none_jwt_rejected_end_to_end() {
    let key = TestKey::generate("none-alg-key");
    let (guard, _source) = test_guard(&[&key]);

    let token = craft_raw_jwt(
        &json!({"typ": "JWT", "alg": "none", "kid": "none-alg-key"}),
        &valid_claims(&[GET_DRINKS_DETAIL]),
    );
    let decision = guard.authorize(Some(&bearer(&token)), GET_DRINKS_DETAIL).await;

    assert_auth_error!(decision.into_result(), UnsupportedAlgorithm);
    assert_eq!(guard.verifier().key_store().fetch_count(), 0, "key set must not be fetched");
}

// ===========================================================================
// 2. Algorithm confusion: HS256 with the published public key as HMAC secret
// ===========================================================================

#[test]
fn test_all_forbidden_algorithms_rejected_with_security_message() {
    for alg in FORBIDDEN_ALGORITHMS {
        let result = validate_algorithm(alg, Algorithm::EdDSA);
        assert!(
            matches!(&result, Err(AuthError::UnsupportedAlgorithm { message }) if message.contains("not allowed for security reasons")),
            "Security: '{alg}' must be rejected, got: {result:?}"
        );
    }
}

#[tokio::test]
async fn test_algorithm_confusion_hs256_end_to_end() {
    let key = TestKey::generate("confusion-key");
    let (guard, _source) = test_guard(&[&key]);

    // The token would verify if HS256 were honored with the public key as secret.
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("confusion-key".into());
    let secret = EncodingKey::from_secret(key.public_key_b64().as_bytes());
    let token = jsonwebtoken::encode(&header, &valid_claims(&[DELETE_DRINKS]), &secret)
        .expect("encode HS256 token");

    let decision = guard.authorize(Some(&bearer(&token)), DELETE_DRINKS).await;
    assert_auth_error!(decision.into_result(), UnsupportedAlgorithm);
}

#[tokio::test]
async fn test_other_asymmetric_algorithm_rejected() {
    // Only EdDSA is configured; an RS256 header is refused even though the key exists.
    let key = TestKey::generate("rs-key");
    let (verifier, _source) = test_verifier(&[&key]);

    let token = craft_raw_jwt(&json!({"alg": "RS256", "kid": "rs-key"}), &valid_claims(&[]));
    let result = verifier.verify(&RawToken::new(token)).await;
    assert!(
        matches!(&result, Err(AuthError::UnsupportedAlgorithm { message }) if message.contains("only EdDSA")),
        "got: {result:?}"
    );
}

// ===========================================================================
// 3. Expiry and not-before boundaries
// ===========================================================================

#[tokio::test]
async fn test_token_expired_one_second_ago() {
    let key = TestKey::generate("exp-key");
    let (verifier, _source) = test_verifier(&[&key]);
    let now = Utc::now().timestamp();

    let mut claims = valid_claims(&[]);
    claims["exp"] = json!(now - 1);
    let token = RawToken::new(key.sign(&claims));

    let result = verifier.verify_at(&token, now).await;
    assert!(
        matches!(&result, Err(AuthError::TokenExpired { expired_at }) if *expired_at == (now - 1) as u64),
        "got: {result:?}"
    );
}

#[tokio::test]
async fn test_token_expiring_now_is_expired() {
    let key = TestKey::generate("exp-key");
    let (verifier, _source) = test_verifier(&[&key]);
    let now = Utc::now().timestamp();

    let mut claims = valid_claims(&[]);
    claims["exp"] = json!(now);
    let token = RawToken::new(key.sign(&claims));

    assert_auth_error!(verifier.verify_at(&token, now).await, TokenExpired);
    assert!(verifier.verify_at(&token, now - 1).await.is_ok());
}

#[tokio::test]
async fn test_future_nbf_rejected() {
    let key = TestKey::generate("nbf-key");
    let (verifier, _source) = test_verifier(&[&key]);
    let now = Utc::now().timestamp();

    let mut claims = valid_claims(&[]);
    claims["nbf"] = json!(now + 600);
    let token = RawToken::new(key.sign(&claims));

    assert_auth_error!(verifier.verify_at(&token, now).await, ClaimMismatch);
    assert!(verifier.verify_at(&token, now + 600).await.is_ok());
}

// ===========================================================================
// 4. Issuer and audience substitution
// ===========================================================================

#[tokio::test]
async fn test_token_for_other_tenant_rejected() {
    let key = TestKey::generate("tenant-key");
    let (guard, _source) = test_guard(&[&key]);

    let mut claims = valid_claims(&[GET_DRINKS_DETAIL]);
    claims["iss"] = json!("https://other-tenant.auth0.com/");
    let decision = guard.authorize(Some(&bearer(&key.sign(&claims))), GET_DRINKS_DETAIL).await;

    assert!(
        matches!(decision.failure(), Some(AuthError::ClaimMismatch { claim, .. }) if claim == "iss"),
        "got: {decision:?}"
    );
}

#[tokio::test]
async fn test_token_for_other_api_rejected() {
    let key = TestKey::generate("aud-key");
    let (guard, _source) = test_guard(&[&key]);

    let mut claims = valid_claims(&[GET_DRINKS_DETAIL]);
    claims["aud"] = json!(["https://billing.example/api"]);
    let decision = guard.authorize(Some(&bearer(&key.sign(&claims))), GET_DRINKS_DETAIL).await;

    assert!(
        matches!(decision.failure(), Some(AuthError::ClaimMismatch { claim, .. }) if claim == "aud"),
        "got: {decision:?}"
    );
}

// ===========================================================================
// 5. Forged permissions
// ===========================================================================

#[tokio::test]
async fn test_forged_permission_claim_rejected() {
    // A barista token re-encoded with manager permissions keeps its old signature.
    let key = TestKey::generate("forge-key");
    let (guard, _source) = test_guard(&[&key]);
    let token = key.sign(&valid_claims(&[GET_DRINKS_DETAIL]));

    let parts: Vec<&str> = token.split('.').collect();
    let forged = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&valid_claims(&[GET_DRINKS_DETAIL, DELETE_DRINKS])).expect("json"),
    );
    let forged_token = format!("{}.{forged}.{}", parts[0], parts[2]);

    let decision = guard.authorize(Some(&bearer(&forged_token)), DELETE_DRINKS).await;
    assert_auth_error!(decision.into_result(), InvalidSignature);
}

#[tokio::test]
async fn test_token_signed_by_unpublished_key_rejected() {
    let published = TestKey::generate("published");
    let attacker = TestKey::generate("attacker");
    let (guard, _source) = test_guard(&[&published]);

    let token = attacker.sign(&valid_claims(&[DELETE_DRINKS]));
    let decision = guard.authorize(Some(&bearer(&token)), DELETE_DRINKS).await;
    assert_auth_error!(decision.into_result(), InvalidKey);
}

#[tokio::test]
async fn test_permission_string_is_not_prefix_matched() {
    let key = TestKey::generate("prefix-key");
    let (guard, _source) = test_guard(&[&key]);
    let token = key.sign(&valid_claims(&["post:drinks-draft", "POST:DRINKS"]));

    let decision = guard.authorize(Some(&bearer(&token)), POST_DRINKS).await;
    assert_auth_error!(decision.into_result(), PermissionNotGranted);
}

#[tokio::test]
async fn test_manager_and_barista_roles() {
    let key = TestKey::generate("role-key");
    let (guard, _source) = test_guard(&[&key]);

    let barista = bearer(&key.sign(&valid_claims(&[GET_DRINKS_DETAIL])));
    let manager = bearer(&key.sign(&valid_claims(&[
        GET_DRINKS_DETAIL,
        POST_DRINKS,
        PATCH_DRINKS,
        DELETE_DRINKS,
    ])));

    assert!(guard.authorize(Some(&barista), GET_DRINKS_DETAIL).await.is_authorized());
    for required in [POST_DRINKS, PATCH_DRINKS, DELETE_DRINKS] {
        let decision = guard.authorize(Some(&barista), required).await;
        assert_eq!(decision.failure().map(AuthError::status_code), Some(403), "{required}");
        assert!(guard.authorize(Some(&manager), required).await.is_authorized(), "{required}");
    }
}

// ===========================================================================
// 6. Key rotation: provider retires a key
// ===========================================================================

#[tokio::test]
async fn test_key_rotation_retired_key_rejects_inflight_token_after_invalidate() {
    let old = TestKey::generate("rotate-old");
    let new = TestKey::generate("rotate-new");
    let (verifier, source) = test_verifier(&[&old]);

    let old_token = RawToken::new(old.sign(&valid_claims(&[])));
    assert!(verifier.verify(&old_token).await.is_ok(), "old key must verify before rotation");

    source.replace(jwks_document(&[&new]));
    verifier.key_store().invalidate();

    assert_auth_error!(verifier.verify(&old_token).await, InvalidKey);
    let new_token = RawToken::new(new.sign(&valid_claims(&[])));
    assert!(verifier.verify(&new_token).await.is_ok(), "new key must verify after rotation");
}

#[tokio::test]
async fn test_symmetric_jwk_is_never_used() {
    // An `oct` key published under the token's kid must not become an HMAC secret.
    let (verifier, source) = test_verifier(&[]);
    let secret = b"published-by-mistake";
    source.replace(JwksDocument::new(vec![json!({
        "kty": "oct",
        "kid": "oct-key",
        "k": URL_SAFE_NO_PAD.encode(secret),
    })]));

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("oct-key".into());
    let token =
        jsonwebtoken::encode(&header, &valid_claims(&[]), &EncodingKey::from_secret(secret))
            .expect("encode");

    assert_auth_error!(verifier.verify(&RawToken::new(token)).await, UnsupportedAlgorithm);
}

// ===========================================================================
// 7. Malformed headers and JWT structures
// ===========================================================================

#[tokio::test]
async fn test_malformed_authorization_headers() {
    let key = TestKey::generate("hdr-key");
    let (guard, _source) = test_guard(&[&key]);

    let cases: &[(Option<&str>, AuthErrorKind)] = &[
        (None, AuthErrorKind::MissingHeader),
        (Some(""), AuthErrorKind::MissingHeader),
        (Some("Bearer"), AuthErrorKind::MalformedHeader),
        (Some("Bearer a b"), AuthErrorKind::MalformedHeader),
        (Some("Basic abc123"), AuthErrorKind::MissingBearer),
        (Some("bearer abc.def.ghi"), AuthErrorKind::MissingBearer),
    ];

    for (header, expected) in cases {
        let decision = guard.authorize(*header, GET_DRINKS_DETAIL).await;
        let kind = decision.failure().map(AuthError::kind);
        assert_eq!(kind, Some(*expected), "header {header:?}");
    }
}

#[tokio::test]
async fn test_malformed_jwt_structures() {
    let key = TestKey::generate("jwt-key");
    let (verifier, _source) = test_verifier(&[&key]);

    for token in ["just-one-part", "two.parts", "a.b.c.d", "", "!!!.@@@.###", "e30.e30."] {
        let result = verifier.verify(&RawToken::new(token)).await;
        assert!(
            matches!(
                &result,
                Err(AuthError::InvalidTokenFormat { .. } | AuthError::MissingKeyId)
                    | Err(AuthError::UnsupportedAlgorithm { .. })
            ),
            "token {token:?}: {result:?}"
        );
    }
}

#[tokio::test]
async fn test_empty_signature_rejected() {
    let key = TestKey::generate("sig-key");
    let (verifier, _source) = test_verifier(&[&key]);

    let token = key.sign(&valid_claims(&[]));
    let (unsigned, _) = token.rsplit_once('.').expect("three segments");
    let result = verifier.verify(&RawToken::new(format!("{unsigned}."))).await;
    assert!(
        matches!(&result, Err(AuthError::InvalidSignature | AuthError::InvalidTokenFormat { .. })),
        "got: {result:?}"
    );
}

#[tokio::test]
async fn test_non_object_payload_rejected() {
    let key = TestKey::generate("payload-key");
    let (verifier, _source) = test_verifier(&[&key]);

    let token = key.sign(&json!(["not", "an", "object"]));
    assert_auth_error!(verifier.verify(&RawToken::new(token)).await, InvalidTokenFormat);
}

// ===========================================================================
// 8. Error bodies never leak internals
// ===========================================================================

#[tokio::test]
async fn test_unavailable_key_store_body_is_generic() {
    let key = TestKey::generate("down-key");
    let (guard, _source) = test_guard(&[]);

    let decision = guard.authorize(Some(&bearer(&key.sign(&valid_claims(&[])))), POST_DRINKS).await;
    let err = decision.into_result().expect_err("empty key set must deny");
    let body = ErrorResponse::from(&err);

    assert_eq!(body.error, 500);
    assert_eq!(body.code, AuthErrorKind::KeyStoreUnavailable);
    assert!(!body.message.contains("key set"), "internal detail leaked: {}", body.message);
}
