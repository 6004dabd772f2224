//! Fuzz target for endpoint validation.
//!
//! `normalize_endpoint` must never panic, and whatever it accepts must be
//! stable under a second pass.

#![no_main]

use libfuzzer_sys::fuzz_target;
use truth_replication::node_registry::normalize_endpoint;

fuzz_target!(|endpoint: &str| {
    if let Ok(normalized) = normalize_endpoint(endpoint) {
        assert!(!normalized.ends_with('/'));
        assert_eq!(normalize_endpoint(&normalized).ok().as_deref(), Some(normalized.as_str()));
    }
});
