//! Fuzz target for bearer token checks.
//!
//! Arbitrary `Authorization` values must be accepted or rejected, never
//! panic, and only the listed token may pass a required check.

#![no_main]

use axum::http::{header, HeaderMap, HeaderValue};
use libfuzzer_sys::fuzz_target;
use truth_replication::api::authorize;
use truth_replication::AuthConfig;

fuzz_target!(|raw: &[u8]| {
    let Ok(value) = HeaderValue::from_bytes(raw) else {
        return;
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, value);

    let auth = AuthConfig {
        allowed_tokens: vec!["fuzz-token".to_string()],
    };
    if authorize(&headers, &auth, true).is_ok() {
        let presented = headers[header::AUTHORIZATION].to_str().unwrap_or_default();
        assert_eq!(presented.trim_start_matches("Bearer ").trim(), "fuzz-token");
    }
});
