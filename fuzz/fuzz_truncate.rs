//! Fuzz target for token-bounded truncation.
//!
//! Run with: cargo +nightly fuzz run fuzz_truncate
//!
//! The first two bytes pick the token cap; the rest is the text. The result
//! must be a prefix of the input and never exceed the cap.

#![no_main]

use ctxpack_core::context::truncate_to_tokens;
use ctxpack_core::{HeuristicEstimator, TokenEstimator};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let max_tokens = u16::from_le_bytes([data[0], data[1]]) as usize % 512;
    let text = String::from_utf8_lossy(&data[2..]);

    let estimator = HeuristicEstimator::new(1.15);
    let cut = truncate_to_tokens(&text, max_tokens, &estimator);
    assert!(cut.tokens <= max_tokens);
    assert!(text.starts_with(cut.text.as_str()));
    assert_eq!(cut.tokens, estimator.estimate(&cut.text));
});
