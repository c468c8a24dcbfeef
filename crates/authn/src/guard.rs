//! Per-operation authorization.
//!
//! [`PermissionGuard`] is what the HTTP boundary calls for every protected
//! operation: header in, [`AuthDecision`] out. Failures are reported in
//! precedence order: extraction, then verification, then permission.

use std::sync::Arc;

use crate::{
    config::{AuthConfig, ConfigError},
    error::AuthError,
    extract::{RawToken, extract_bearer_token},
    jwks::HttpJwksSource,
    jwt::{ClaimSet, TokenVerifier, VerifierSettings},
    key_store::KeyStore,
};

/// Outcome of authorizing one request.
#[derive(Debug)]
pub enum AuthDecision {
    /// The caller holds the required permission.
    Authorized(ClaimSet),
    /// The request must be rejected.
    Denied(AuthError),
}

impl AuthDecision {
    /// Returns `true` for [`AuthDecision::Authorized`].
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }

    /// Returns the verified claims of an authorized request.
    #[must_use]
    pub fn claims(&self) -> Option<&ClaimSet> {
        match self {
            Self::Authorized(claims) => Some(claims),
            Self::Denied(_) => None,
        }
    }

    /// Returns the failure of a denied request.
    #[must_use]
    pub fn failure(&self) -> Option<&AuthError> {
        match self {
            Self::Authorized(_) => None,
            Self::Denied(err) => Some(err),
        }
    }

    /// Converts into a `Result`, for use with `?`.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] of a denied request.
    pub fn into_result(self) -> Result<ClaimSet, AuthError> {
        match self {
            Self::Authorized(claims) => Ok(claims),
            Self::Denied(err) => Err(err),
        }
    }
}

impl From<Result<ClaimSet, AuthError>> for AuthDecision {
    fn from(result: Result<ClaimSet, AuthError>) -> Self {
        match result {
            Ok(claims) => Self::Authorized(claims),
            Err(err) => Self::Denied(err),
        }
    }
}

/// Checks that verified claims grant `required`.
///
/// # Errors
///
/// - [`AuthError::NoPermissionConfigured`] if `required` is empty
/// - [`AuthError::PermissionNotGranted`] if the permission is not in the claims
pub fn check_permission(claims: &ClaimSet, required: &str) -> Result<(), AuthError> {
    if required.is_empty() {
        return Err(AuthError::NoPermissionConfigured);
    }
    if !claims.has_permission(required) {
        return Err(AuthError::permission_not_granted(required));
    }
    Ok(())
}

/// Authorizes requests against a required permission.
#[derive(Debug, Clone)]
pub struct PermissionGuard {
    verifier: TokenVerifier,
}

impl PermissionGuard {
    /// Creates a guard around `verifier`.
    #[must_use]
    pub fn new(verifier: TokenVerifier) -> Self {
        Self { verifier }
    }

    /// Wires a guard from configuration: HTTP key set source, key store,
    /// verifier.
    ///
    /// No network traffic happens until the first request.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Invalid`] if the configuration fails validation
    /// - [`ConfigError::Client`] if the HTTP client cannot be built
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let source =
            HttpJwksSource::new(config.jwks_url(), config.fetch_timeout()).map_err(ConfigError::Client)?;
        let key_store = KeyStore::new(Arc::new(source))
            .with_policy(config.refresh_policy())
            .with_fetch_timeout(config.fetch_timeout());
        let settings = VerifierSettings::new(config.issuer(), config.audience(), config.algorithm())
            .with_permissions_claim(config.permissions_claim());

        Ok(Self::new(TokenVerifier::new(Arc::new(key_store), settings)))
    }

    /// Returns the verifier.
    #[must_use]
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Authorizes a request given its raw `Authorization` header.
    #[tracing::instrument(skip(self, authorization_header))]
    pub async fn authorize(&self, authorization_header: Option<&str>, required: &str) -> AuthDecision {
        let token = match extract_bearer_token(authorization_header) {
            Ok(token) => token,
            Err(err) => return self.deny(err),
        };
        self.decide(&token, required).await
    }

    /// Authorizes a request whose token the boundary already extracted.
    #[tracing::instrument(skip(self, token))]
    pub async fn authorize_token(&self, token: &RawToken, required: &str) -> AuthDecision {
        self.decide(token, required).await
    }

    async fn decide(&self, token: &RawToken, required: &str) -> AuthDecision {
        let claims = match self.verifier.verify(token).await {
            Ok(claims) => claims,
            Err(err) => return self.deny(err),
        };

        match check_permission(&claims, required) {
            Ok(()) => {
                tracing::debug!(subject = claims.subject(), "request authorized");
                AuthDecision::Authorized(claims)
            },
            Err(err) => self.deny(err),
        }
    }

    fn deny(&self, err: AuthError) -> AuthDecision {
        tracing::debug!(kind = %err.kind(), tier = ?err.tier(), "request denied");
        AuthDecision::Denied(err)
    }
}
