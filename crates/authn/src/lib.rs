//! # Drinks API Authorization
//!
//! Bearer-token authorization core for the drinks API.
//!
//! This crate provides:
//! - **Token extraction**: `Authorization: Bearer <token>` parsing
//! - **Key store**: the identity provider's JWKS, fetched once and cached
//! - **Token verification**: signature, algorithm, `exp`/`nbf`/`iss`/`aud` checks
//! - **Permission guard**: per-operation permission checks with typed denials
//!
//! ## Security
//!
//! - Exactly one asymmetric algorithm is accepted (RS256 by default)
//! - `none` and symmetric algorithms (HS256, etc.) are always rejected
//! - Token contents are never logged
//!
//! ## Example
//!
//! ```no_run
//! use drinks_authn::{AuthConfig, PermissionGuard, permissions};
//!
//! # async fn example(header: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::builder()
//!     .domain("drinks.eu.auth0.com")
//!     .audience("drinks")
//!     .build()?;
//! let guard = PermissionGuard::from_config(&config)?;
//!
//! let claims = guard.authorize(header, permissions::POST_DRINKS).await.into_result()?;
//! println!("authorized {:?}", claims.subject());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Authorization configuration.
pub mod config;
/// Authorization error types.
pub mod error;
/// Bearer token extraction.
pub mod extract;
/// Per-operation permission checks.
pub mod guard;
/// JWKS document sources.
pub mod jwks;
/// JWT verification and claims.
pub mod jwt;
/// Cached signing key set.
pub mod key_store;
/// Permission scopes of the drinks API.
pub mod permissions;
/// JSON error bodies.
pub mod response;
/// Algorithm and key id validation.
pub mod validation;

/// Shared test utilities (requires `testutil` feature or `cfg(test)`).
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

// Re-export key types for convenience
pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, AuthErrorKind, FailureTier, Result};
pub use extract::{RawToken, extract_bearer_token};
pub use guard::{AuthDecision, PermissionGuard, check_permission};
pub use jwks::{HttpJwksSource, JwksDocument, JwksSource, StaticJwksSource};
pub use jwt::{Audience, ClaimSet, TokenVerifier, VerifierSettings};
pub use key_store::{KeySet, KeyStore, KeyStoreError, RefreshPolicy, SigningKey};
pub use response::ErrorResponse;
pub use validation::{FORBIDDEN_ALGORITHMS, validate_algorithm};
