//! Bearer token extraction from the `Authorization` header.

use std::fmt;

use crate::error::AuthError;

/// The only accepted authorization scheme (case-sensitive).
pub const BEARER_SCHEME: &str = "Bearer";

/// An opaque, undecoded bearer token.
///
/// `Debug` output is redacted so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct RawToken(String);

impl RawToken {
    /// Wraps a token string obtained by the caller.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper, returning the token string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawToken(<{} bytes redacted>)", self.0.len())
    }
}

impl From<String> for RawToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for RawToken {
    fn from(token: &str) -> Self {
        Self(token.to_owned())
    }
}

/// Extracts the bearer token from an `Authorization` header value.
///
/// Rules, checked in order:
/// 1. the header must be present and non-empty ([`AuthError::MissingHeader`])
/// 2. it must split into exactly two whitespace-separated parts ([`AuthError::MalformedHeader`])
/// 3. the first part must be `Bearer` ([`AuthError::MissingBearer`])
///
/// The second part is returned as-is.
///
/// # Examples
///
/// ```
/// use drinks_authn::extract::extract_bearer_token;
///
/// let token = extract_bearer_token(Some("Bearer abc.def.ghi")).unwrap();
/// assert_eq!(token.as_str(), "abc.def.ghi");
///
/// assert!(extract_bearer_token(Some("Basic abc123")).is_err());
/// assert!(extract_bearer_token(None).is_err());
/// ```
pub fn extract_bearer_token(header: Option<&str>) -> Result<RawToken, AuthError> {
    let header = match header {
        Some(value) if !value.is_empty() => value,
        _ => return Err(AuthError::MissingHeader),
    };

    let mut parts = header.split_whitespace();
    let (scheme, token) = match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) => (scheme, token),
        (_, None, _) => {
            return Err(AuthError::malformed_header("expected \"Bearer <token>\", token not found"));
        },
        _ => {
            return Err(AuthError::malformed_header(
                "expected \"Bearer <token>\", found extra parts",
            ));
        },
    };

    if scheme != BEARER_SCHEME {
        return Err(AuthError::missing_bearer(scheme));
    }

    Ok(RawToken::new(token))
}
