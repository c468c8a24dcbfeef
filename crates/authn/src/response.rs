//! JSON error body for denied requests.

use serde::Serialize;

use crate::error::{AuthError, AuthErrorKind};

/// Message returned for server-side faults in place of the internal detail.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// The body the HTTP boundary sends with a denial.
///
/// Serializes as `{"success": false, "error": 401, "code": "TokenExpired", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// HTTP status code.
    pub error: u16,
    /// Machine-readable failure kind.
    pub code: AuthErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl From<&AuthError> for ErrorResponse {
    fn from(err: &AuthError) -> Self {
        let message =
            if err.status_code() >= 500 { INTERNAL_ERROR_MESSAGE.to_owned() } else { err.to_string() };

        Self { success: false, error: err.status_code(), code: err.kind(), message }
    }
}

impl From<AuthError> for ErrorResponse {
    fn from(err: AuthError) -> Self {
        Self::from(&err)
    }
}
