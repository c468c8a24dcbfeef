//! Permission scopes required by the drinks API operations.
//!
//! Each protected operation declares exactly one of these; the guard checks
//! it against the `permissions` claim of the verified token.

/// View drink recipes in full detail.
pub const GET_DRINKS_DETAIL: &str = "get:drinks-detail";

/// Create a drink.
pub const POST_DRINKS: &str = "post:drinks";

/// Update a drink.
pub const PATCH_DRINKS: &str = "patch:drinks";

/// Delete a drink.
pub const DELETE_DRINKS: &str = "delete:drinks";

/// Every permission the API knows about.
pub const ALL: &[&str] = &[GET_DRINKS_DETAIL, POST_DRINKS, PATCH_DRINKS, DELETE_DRINKS];
