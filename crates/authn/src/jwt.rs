//! JWT verification and verified claims.
//!
//! [`TokenVerifier`] turns a [`RawToken`] into a [`ClaimSet`]:
//!
//! 1. decode the unverified header (algorithm, key id)
//! 2. check the algorithm against the single accepted one
//! 3. resolve the signing key through the [`KeyStore`]
//! 4. verify the signature and decode the payload
//! 5. validate `exp`, `nbf`, `iss`, `aud` and the permissions claim
//!
//! A [`ClaimSet`] has no public constructor, so holding one means the token
//! passed every step.

use std::{collections::BTreeSet, sync::Arc};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{Algorithm, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::AuthError,
    extract::RawToken,
    key_store::KeyStore,
    validation::{algorithm_name, validate_algorithm, validate_kid},
};

/// Default name of the claim carrying permission strings.
pub const DEFAULT_PERMISSIONS_CLAIM: &str = "permissions";

/// Unverified token header fields used to select a signing key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Declared algorithm, exactly as it appears in the token.
    pub alg: String,
    /// Key id, if present.
    #[serde(default)]
    pub kid: Option<String>,
}

/// Decodes the header segment of a JWT without verifying anything.
///
/// Unlike [`jsonwebtoken::decode_header`], this accepts any algorithm name so
/// that `"none"` and unknown algorithms are reported as unsupported rather
/// than as a format error.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the token does not have three
/// dot-separated segments, or the header is not base64url-encoded JSON with a
/// string `alg`.
pub fn decode_token_header(token: &str) -> Result<TokenHeader, AuthError> {
    let mut segments = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(AuthError::invalid_token_format("JWT must have 3 parts separated by dots"));
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to decode JWT header: {e}"))
    })?;

    serde_json::from_slice(&header_bytes)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to parse JWT header: {e}")))
}

/// The `aud` claim: a single audience or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// A single audience string.
    Single(String),
    /// An array of audience strings.
    Multiple(Vec<String>),
}

impl Audience {
    /// Returns `true` if `audience` is one of the listed audiences.
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::Single(aud) => aud == audience,
            Self::Multiple(auds) => auds.iter().any(|aud| aud == audience),
        }
    }

    /// Iterates over the listed audiences.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice = match self {
            Self::Single(aud) => std::slice::from_ref(aud),
            Self::Multiple(auds) => auds.as_slice(),
        };
        slice.iter().map(String::as_str)
    }
}

/// Claims of a token that passed verification.
///
/// Only [`TokenVerifier`] creates values of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimSet {
    #[serde(rename = "iss")]
    issuer: String,
    #[serde(rename = "aud")]
    audience: Audience,
    #[serde(rename = "sub", skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(rename = "exp")]
    expires_at: i64,
    #[serde(rename = "iat", skip_serializing_if = "Option::is_none")]
    issued_at: Option<i64>,
    permissions: BTreeSet<String>,
}

impl ClaimSet {
    /// Returns the issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the audience claim.
    #[must_use]
    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    /// Returns the subject, if present.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Returns the expiry, in seconds since the epoch.
    #[must_use]
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Returns the issued-at time, in seconds since the epoch, if present.
    #[must_use]
    pub fn issued_at(&self) -> Option<i64> {
        self.issued_at
    }

    /// Returns the granted permissions.
    #[must_use]
    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    /// Returns `true` if `permission` was granted.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// What a token must satisfy to be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierSettings {
    /// Expected `iss`, compared exactly.
    pub issuer: String,
    /// Audience that `aud` must contain.
    pub audience: String,
    /// The single accepted algorithm.
    pub algorithm: Algorithm,
    /// Name of the claim carrying permission strings.
    pub permissions_claim: String,
}

impl VerifierSettings {
    /// Creates settings using the default permissions claim.
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>, algorithm: Algorithm) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            algorithm,
            permissions_claim: DEFAULT_PERMISSIONS_CLAIM.to_owned(),
        }
    }

    /// Overrides the permissions claim name.
    #[must_use]
    pub fn with_permissions_claim(mut self, claim: impl Into<String>) -> Self {
        self.permissions_claim = claim.into();
        self
    }
}

/// Standard claims that passed validation.
struct StandardClaims {
    issuer: String,
    audience: Audience,
    subject: Option<String>,
    expires_at: i64,
    issued_at: Option<i64>,
}

/// Validates the standard claims of a decoded payload at instant `now`.
///
/// Checks, in order:
/// - `exp` is present ([`AuthError::ClaimMismatch`]) and strictly after `now`
///   ([`AuthError::TokenExpired`])
/// - `nbf`, if present, is not after `now`
/// - `iss` equals the expected issuer exactly
/// - `aud` (string or array) contains the expected audience
///
/// # Errors
///
/// Returns the first failing check as [`AuthError::TokenExpired`] or
/// [`AuthError::ClaimMismatch`].
pub fn validate_claims(
    claims: &Map<String, Value>,
    settings: &VerifierSettings,
    now: i64,
) -> Result<(), AuthError> {
    check_standard_claims(claims, settings, now).map(|_| ())
}

fn check_standard_claims(
    claims: &Map<String, Value>,
    settings: &VerifierSettings,
    now: i64,
) -> Result<StandardClaims, AuthError> {
    let expires_at = numeric_date(claims, "exp")?
        .ok_or_else(|| AuthError::claim_mismatch("exp", "claim is required"))?;
    if expires_at <= now {
        return Err(AuthError::token_expired(u64::try_from(expires_at).unwrap_or(0)));
    }

    if let Some(nbf) = numeric_date(claims, "nbf")?
        && nbf > now
    {
        return Err(AuthError::claim_mismatch("nbf", format!("token is not valid before {nbf}")));
    }

    let issuer = match claims.get("iss") {
        Some(Value::String(iss)) => iss,
        Some(_) => return Err(AuthError::claim_mismatch("iss", "claim must be a string")),
        None => return Err(AuthError::claim_mismatch("iss", "claim is required")),
    };
    if *issuer != settings.issuer {
        return Err(AuthError::claim_mismatch(
            "iss",
            format!("expected '{}', got '{issuer}'", settings.issuer),
        ));
    }

    let audience = match claims.get("aud") {
        Some(aud) => serde_json::from_value::<Audience>(aud.clone()).map_err(|_| {
            AuthError::claim_mismatch("aud", "claim must be a string or an array of strings")
        })?,
        None => return Err(AuthError::claim_mismatch("aud", "claim is required")),
    };
    if !audience.contains(&settings.audience) {
        return Err(AuthError::claim_mismatch(
            "aud",
            format!("expected audience '{}' not present", settings.audience),
        ));
    }

    let subject = match claims.get("sub") {
        None | Some(Value::Null) => None,
        Some(Value::String(sub)) => Some(sub.clone()),
        Some(_) => return Err(AuthError::claim_mismatch("sub", "claim must be a string")),
    };

    Ok(StandardClaims {
        issuer: issuer.clone(),
        audience,
        subject,
        expires_at,
        issued_at: numeric_date(claims, "iat")?,
    })
}

/// Reads a NumericDate claim, truncating fractional seconds.
fn numeric_date(claims: &Map<String, Value>, name: &'static str) -> Result<Option<i64>, AuthError> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
            .map(Some)
            .ok_or_else(|| AuthError::claim_mismatch(name, "claim is not a valid NumericDate")),
        Some(_) => Err(AuthError::claim_mismatch(name, "claim must be a NumericDate")),
    }
}

/// Reads the permissions claim. Absent or `null` means no permissions.
fn parse_permissions(claims: &Map<String, Value>, claim: &str) -> Result<BTreeSet<String>, AuthError> {
    let not_strings = || AuthError::claim_mismatch(claim, "claim must be an array of strings");
    let entries = match claims.get(claim) {
        None | Some(Value::Null) => return Ok(BTreeSet::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(not_strings()),
    };

    entries
        .iter()
        .map(|entry| entry.as_str().map(str::to_owned).ok_or_else(not_strings))
        .collect()
}

/// Maps a `jsonwebtoken` failure during signature verification.
fn map_verify_error(err: jsonwebtoken::errors::Error, kid: &str, algorithm: Algorithm) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidEcdsaKey => AuthError::invalid_key(
            kid,
            format!("key cannot verify {} signatures", algorithm_name(algorithm)),
        ),
        ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) | ErrorKind::InvalidToken => {
            AuthError::invalid_token_format(format!("Failed to decode JWT: {err}"))
        },
        _ => AuthError::from(err),
    }
}

/// Verifies bearer tokens against the identity provider's signing keys.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    key_store: Arc<KeyStore>,
    settings: VerifierSettings,
}

impl TokenVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(key_store: Arc<KeyStore>, settings: VerifierSettings) -> Self {
        Self { key_store, settings }
    }

    /// Returns the key store.
    #[must_use]
    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    /// Returns the verification settings.
    #[must_use]
    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    /// Verifies `token` at the current time.
    ///
    /// # Errors
    ///
    /// Returns the first failing step as an [`AuthError`]; see the
    /// [module documentation](self) for the order.
    pub async fn verify(&self, token: &RawToken) -> Result<ClaimSet, AuthError> {
        self.verify_at(token, Utc::now().timestamp()).await
    }

    /// Verifies `token` as of `now` (seconds since the epoch).
    ///
    /// # Errors
    ///
    /// See [`verify`](Self::verify).
    #[tracing::instrument(skip_all, fields(kid = tracing::field::Empty))]
    pub async fn verify_at(&self, token: &RawToken, now: i64) -> Result<ClaimSet, AuthError> {
        self.verify_inner(token.as_str(), now).await.inspect_err(|err| {
            tracing::debug!(kind = %err.kind(), "token verification failed");
        })
    }

    async fn verify_inner(&self, token: &str, now: i64) -> Result<ClaimSet, AuthError> {
        let accepted = self.settings.algorithm;

        let header = decode_token_header(token)?;
        validate_algorithm(&header.alg, accepted)?;
        let kid = validate_kid(header.kid.as_deref())?;
        tracing::Span::current().record("kid", kid);

        let key = self.key_store.get_key(kid).await?;
        if let Some(published) = key.algorithm()
            && published != accepted
        {
            return Err(AuthError::invalid_key(
                kid,
                format!(
                    "key is published for {}, not {}",
                    algorithm_name(published),
                    algorithm_name(accepted)
                ),
            ));
        }

        // Signature only; claims are validated below with our own ordering.
        let mut validation = Validation::new(accepted);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Map<String, Value>>(token, key.decoding_key(), &validation)
            .map_err(|e| map_verify_error(e, kid, accepted))?;

        let standard = check_standard_claims(&data.claims, &self.settings, now)?;
        let permissions = parse_permissions(&data.claims, &self.settings.permissions_claim)?;

        tracing::debug!(permissions = permissions.len(), "token verified");
        Ok(ClaimSet {
            issuer: standard.issuer,
            audience: standard.audience,
            subject: standard.subject,
            expires_at: standard.expires_at,
            issued_at: standard.issued_at,
            permissions,
        })
    }
}
