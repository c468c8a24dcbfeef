//! JWT algorithm and key id validation.
//!
//! The verifier accepts exactly one configured asymmetric algorithm. These
//! checks run on the unverified token header, before any key lookup, so an
//! attacker cannot steer verification onto a weaker algorithm.
//!
//! # Security
//!
//! - Strict equality against the configured algorithm prevents algorithm substitution
//! - Symmetric algorithms and "none" are always rejected, and can never be configured

use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// Algorithms that are never accepted.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: symmetric, so a published public key could be abused as the
///   shared secret
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Asymmetric algorithms that may be configured as the accepted algorithm.
pub const ASYMMETRIC_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Maximum accepted key id length, in bytes.
pub const MAX_KID_LENGTH: usize = 256;

/// Returns the JOSE name of an algorithm (e.g. `"RS256"`).
#[must_use]
pub fn algorithm_name(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::EdDSA => "EdDSA",
    }
}

/// Returns `true` if `alg` may be configured as the accepted algorithm.
#[must_use]
pub fn is_asymmetric(alg: Algorithm) -> bool {
    ASYMMETRIC_ALGORITHMS.contains(&alg)
}

/// Validates the algorithm declared in a token header.
///
/// # Arguments
///
/// * `declared` - The `alg` header value, exactly as it appears in the token
/// * `accepted` - The single algorithm the verifier is configured for
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if `declared` is forbidden or
/// differs from `accepted`.
///
/// # Examples
///
/// ```
/// use drinks_authn::validation::validate_algorithm;
/// use jsonwebtoken::Algorithm;
///
/// assert!(validate_algorithm("RS256", Algorithm::RS256).is_ok());
/// assert!(validate_algorithm("none", Algorithm::RS256).is_err());
/// assert!(validate_algorithm("HS256", Algorithm::RS256).is_err());
/// assert!(validate_algorithm("EdDSA", Algorithm::RS256).is_err());
/// ```
pub fn validate_algorithm(declared: &str, accepted: Algorithm) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|forbidden| forbidden.eq_ignore_ascii_case(declared)) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{declared}' is not allowed for security reasons"
        )));
    }

    let expected = algorithm_name(accepted);
    if declared != expected {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{declared}' is not accepted (only {expected} is supported)"
        )));
    }

    Ok(())
}

/// Validates the key id from a token header before it reaches the key store.
///
/// # Errors
///
/// - [`AuthError::MissingKeyId`] if the key id is absent or empty
/// - [`AuthError::InvalidKey`] if it is longer than [`MAX_KID_LENGTH`] or contains control
///   characters, so it cannot name any published key
pub fn validate_kid(kid: Option<&str>) -> Result<&str, AuthError> {
    let kid = match kid {
        Some(kid) if !kid.is_empty() => kid,
        _ => return Err(AuthError::MissingKeyId),
    };

    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::invalid_key(
            format!("{}...", kid.chars().take(32).collect::<String>()),
            format!("key id exceeds {MAX_KID_LENGTH} bytes"),
        ));
    }

    if kid.chars().any(char::is_control) {
        return Err(AuthError::invalid_key(
            kid.escape_debug().to_string(),
            "key id contains control characters",
        ));
    }

    Ok(kid)
}
