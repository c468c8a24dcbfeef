//! Fuzz target for header extraction and unverified JWT header decoding.
//!
//! Feeds arbitrary strings as `Authorization` header values. Every result
//! must be either `Ok(...)` or `Err(AuthError)`; no input may panic.

#![no_main]

use drinks_authn::{
    extract::extract_bearer_token,
    jwt::decode_token_header,
    validation::{validate_algorithm, validate_kid},
};
use jsonwebtoken::Algorithm;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(header) = std::str::from_utf8(data) else {
        return;
    };

    // The raw input may itself be a bare token.
    let _ = decode_token_header(header);

    let Ok(token) = extract_bearer_token(Some(header)) else {
        return;
    };
    assert!(header.contains(token.as_str()), "extracted token must come from the header");

    if let Ok(decoded) = decode_token_header(token.as_str()) {
        let _ = validate_algorithm(&decoded.alg, Algorithm::RS256);
        let _ = validate_kid(decoded.kid.as_deref());
    }
});
