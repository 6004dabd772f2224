//! Fuzz target for topic handling.
//!
//! Extraction always yields at least one topic, and normalization is
//! idempotent on arbitrary Unicode.

#![no_main]

use libfuzzer_sys::fuzz_target;
use truth_replication::topics::{extract_topics, normalize};

fuzz_target!(|data: (&str, Vec<String>)| {
    let (content, given) = data;

    assert!(!extract_topics(content).is_empty());

    let once = normalize(&given);
    let twice = normalize(&once);
    assert_eq!(once, twice);
});
