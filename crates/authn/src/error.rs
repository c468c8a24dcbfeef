//! Authorization error types.
//!
//! This module defines every failure the authorization core can report, the
//! fieldless [`AuthErrorKind`] tag used by clients to react programmatically,
//! and the mapping from failures to HTTP status codes.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// A shareable boxed error used to preserve source chains.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Authorization failures.
///
/// Every variant is a distinct, client-visible kind. Variants are grouped by
/// [`FailureTier`]; see [`AuthError::tier`].
#[derive(Debug, Error)]
pub enum AuthError {
    /// The `Authorization` header is absent or empty.
    #[error("Authorization header is expected")]
    MissingHeader,

    /// The header does not consist of exactly two whitespace-separated parts.
    #[error("Malformed authorization header: {message}")]
    MalformedHeader {
        /// Description of the malformation.
        message: String,
    },

    /// The header scheme is not `Bearer`.
    #[error("Authorization header must start with \"Bearer\", got \"{scheme}\"")]
    MissingBearer {
        /// The scheme that was presented instead.
        scheme: String,
    },

    /// The token cannot be decoded.
    #[error("Invalid token format: {message}")]
    InvalidTokenFormat {
        /// Description of the decoding failure.
        message: String,
    },

    /// The token declares an algorithm other than the accepted one.
    #[error("Unsupported algorithm: {message}")]
    UnsupportedAlgorithm {
        /// Description including the declared algorithm.
        message: String,
    },

    /// The token header carries no key id.
    #[error("Token header is missing the key id (kid)")]
    MissingKeyId,

    /// The key id does not resolve to a usable signing key.
    #[error("Invalid signing key {kid}: {message}")]
    InvalidKey {
        /// Key id from the token header.
        kid: String,
        /// Why the key could not be used.
        message: String,
    },

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token's `exp` is not in the future.
    #[error("Token expired at {expired_at}")]
    TokenExpired {
        /// The `exp` claim, in seconds since the epoch.
        expired_at: u64,
    },

    /// A standard claim does not match configuration.
    #[error("Claim mismatch on '{claim}': {message}")]
    ClaimMismatch {
        /// Name of the offending claim.
        claim: String,
        /// Description of the mismatch.
        message: String,
    },

    /// The signing key set could not be fetched.
    #[error("Signing key store unavailable: {message}")]
    KeyStoreUnavailable {
        /// Description of the failure.
        message: String,
        /// Underlying cause, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// The verified claims do not grant the required permission.
    #[error("Permission not granted: {permission}")]
    PermissionNotGranted {
        /// The permission that was required.
        permission: String,
    },

    /// The protected operation declared no required permission.
    #[error("No permission configured for the protected operation")]
    NoPermissionConfigured,
}

/// Machine-readable failure tag, one per [`AuthError`] variant.
///
/// Serializes as the variant name (e.g. `"TokenExpired"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AuthErrorKind {
    /// See [`AuthError::MissingHeader`].
    MissingHeader,
    /// See [`AuthError::MalformedHeader`].
    MalformedHeader,
    /// See [`AuthError::MissingBearer`].
    MissingBearer,
    /// See [`AuthError::InvalidTokenFormat`].
    InvalidTokenFormat,
    /// See [`AuthError::UnsupportedAlgorithm`].
    UnsupportedAlgorithm,
    /// See [`AuthError::MissingKeyId`].
    MissingKeyId,
    /// See [`AuthError::InvalidKey`].
    InvalidKey,
    /// See [`AuthError::InvalidSignature`].
    InvalidSignature,
    /// See [`AuthError::TokenExpired`].
    TokenExpired,
    /// See [`AuthError::ClaimMismatch`].
    ClaimMismatch,
    /// See [`AuthError::KeyStoreUnavailable`].
    KeyStoreUnavailable,
    /// See [`AuthError::PermissionNotGranted`].
    PermissionNotGranted,
    /// See [`AuthError::NoPermissionConfigured`].
    NoPermissionConfigured,
}

impl AuthErrorKind {
    /// Returns the kind's name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingHeader => "MissingHeader",
            Self::MalformedHeader => "MalformedHeader",
            Self::MissingBearer => "MissingBearer",
            Self::InvalidTokenFormat => "InvalidTokenFormat",
            Self::UnsupportedAlgorithm => "UnsupportedAlgorithm",
            Self::MissingKeyId => "MissingKeyId",
            Self::InvalidKey => "InvalidKey",
            Self::InvalidSignature => "InvalidSignature",
            Self::TokenExpired => "TokenExpired",
            Self::ClaimMismatch => "ClaimMismatch",
            Self::KeyStoreUnavailable => "KeyStoreUnavailable",
            Self::PermissionNotGranted => "PermissionNotGranted",
            Self::NoPermissionConfigured => "NoPermissionConfigured",
        }
    }

    /// Returns the stage of the pipeline this kind belongs to.
    #[must_use]
    pub fn tier(self) -> FailureTier {
        match self {
            Self::MissingHeader | Self::MalformedHeader | Self::MissingBearer => {
                FailureTier::Extraction
            },
            Self::InvalidTokenFormat
            | Self::UnsupportedAlgorithm
            | Self::MissingKeyId
            | Self::InvalidKey
            | Self::InvalidSignature
            | Self::TokenExpired
            | Self::ClaimMismatch => FailureTier::Verification,
            Self::PermissionNotGranted => FailureTier::Permission,
            Self::KeyStoreUnavailable | Self::NoPermissionConfigured => FailureTier::Operational,
        }
    }

    /// Returns the HTTP status code the boundary must answer with.
    ///
    /// - 401 for extraction and verification failures
    /// - 403 for [`AuthErrorKind::PermissionNotGranted`]
    /// - 500 for operational and configuration faults
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self.tier() {
            FailureTier::Extraction | FailureTier::Verification => 401,
            FailureTier::Permission => 403,
            FailureTier::Operational => 500,
        }
    }
}

impl std::fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a failure originates from, in precedence order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTier {
    /// The `Authorization` header could not be turned into a token.
    Extraction,
    /// The token failed decoding, signature, or claim checks.
    Verification,
    /// The token is valid but lacks the required permission.
    Permission,
    /// A dependency or configuration fault, not attributable to the client.
    Operational,
}

impl AuthError {
    /// Creates a [`AuthError::MalformedHeader`].
    pub fn malformed_header(message: impl Into<String>) -> Self {
        Self::MalformedHeader { message: message.into() }
    }

    /// Creates a [`AuthError::MissingBearer`].
    pub fn missing_bearer(scheme: impl Into<String>) -> Self {
        Self::MissingBearer { scheme: scheme.into() }
    }

    /// Creates a [`AuthError::InvalidTokenFormat`].
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat { message: message.into() }
    }

    /// Creates a [`AuthError::UnsupportedAlgorithm`].
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { message: message.into() }
    }

    /// Creates a [`AuthError::InvalidKey`].
    pub fn invalid_key(kid: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKey { kid: kid.into(), message: message.into() }
    }

    /// Creates a [`AuthError::TokenExpired`].
    #[must_use]
    pub fn token_expired(expired_at: u64) -> Self {
        Self::TokenExpired { expired_at }
    }

    /// Creates a [`AuthError::ClaimMismatch`].
    pub fn claim_mismatch(claim: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClaimMismatch { claim: claim.into(), message: message.into() }
    }

    /// Creates a [`AuthError::KeyStoreUnavailable`] without a source.
    pub fn key_store_unavailable(message: impl Into<String>) -> Self {
        Self::KeyStoreUnavailable { message: message.into(), source: None }
    }

    /// Creates a [`AuthError::PermissionNotGranted`].
    pub fn permission_not_granted(permission: impl Into<String>) -> Self {
        Self::PermissionNotGranted { permission: permission.into() }
    }

    /// Returns the machine-readable kind of this failure.
    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::MissingHeader => AuthErrorKind::MissingHeader,
            Self::MalformedHeader { .. } => AuthErrorKind::MalformedHeader,
            Self::MissingBearer { .. } => AuthErrorKind::MissingBearer,
            Self::InvalidTokenFormat { .. } => AuthErrorKind::InvalidTokenFormat,
            Self::UnsupportedAlgorithm { .. } => AuthErrorKind::UnsupportedAlgorithm,
            Self::MissingKeyId => AuthErrorKind::MissingKeyId,
            Self::InvalidKey { .. } => AuthErrorKind::InvalidKey,
            Self::InvalidSignature => AuthErrorKind::InvalidSignature,
            Self::TokenExpired { .. } => AuthErrorKind::TokenExpired,
            Self::ClaimMismatch { .. } => AuthErrorKind::ClaimMismatch,
            Self::KeyStoreUnavailable { .. } => AuthErrorKind::KeyStoreUnavailable,
            Self::PermissionNotGranted { .. } => AuthErrorKind::PermissionNotGranted,
            Self::NoPermissionConfigured => AuthErrorKind::NoPermissionConfigured,
        }
    }

    /// Returns the pipeline stage this failure belongs to.
    #[must_use]
    pub fn tier(&self) -> FailureTier {
        self.kind().tier()
    }

    /// Returns the HTTP status code for this failure.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Returns `true` for faults that are not the client's doing.
    #[must_use]
    pub fn is_operational(&self) -> bool {
        self.tier() == FailureTier::Operational
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::Crypto(_) => AuthError::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                AuthError::unsupported_algorithm("Algorithm not accepted for this key")
            },
            ErrorKind::ExpiredSignature => AuthError::token_expired(0),
            ErrorKind::InvalidIssuer => AuthError::claim_mismatch("iss", "issuer validation failed"),
            ErrorKind::InvalidAudience => {
                AuthError::claim_mismatch("aud", "audience validation failed")
            },
            ErrorKind::ImmatureSignature => AuthError::claim_mismatch("nbf", "token not yet valid"),
            ErrorKind::InvalidToken => AuthError::invalid_token_format("Invalid JWT structure"),
            _ => AuthError::invalid_token_format(format!("JWT error: {err}")),
        }
    }
}

/// Result type alias for authorization operations.
pub type Result<T> = std::result::Result<T, AuthError>;
