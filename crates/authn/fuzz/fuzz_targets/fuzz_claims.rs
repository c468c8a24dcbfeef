//! Fuzz target for standard claim validation.
//!
//! Feeds arbitrary JSON objects as decoded payloads. Validation must return
//! `Ok(())` or `Err(AuthError)` for every payload and every instant.

#![no_main]

use drinks_authn::jwt::{VerifierSettings, validate_claims};
use jsonwebtoken::Algorithm;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(serde_json::Value::Object(claims)) = serde_json::from_slice(data) else {
        return;
    };

    let settings =
        VerifierSettings::new("https://drinks.auth0.com/", "drinks", Algorithm::RS256);

    for now in [i64::MIN, -1, 0, 1_700_000_000, i64::MAX] {
        let _ = validate_claims(&claims, &settings, now);
    }
});
