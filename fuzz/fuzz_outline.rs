//! Fuzz target for the tiered context builder.
//!
//! Run with: cargo +nightly fuzz run fuzz_outline
//!
//! Byte 0 picks the artifact kind and tier, byte 1 the cap. Whatever the
//! input, the built view must stay within the cap.

#![no_main]

use std::sync::Arc;

use ctxpack_core::{ContextTier, HeuristicEstimator, MemoryArtifactProvider, TieredContextBuilder};
use libfuzzer_sys::fuzz_target;

const REFERENCES: [&str; 5] = ["lib.rs", "app.py", "README.md", "data.json", "notes.txt"];
const TIERS: [ContextTier; 3] = [ContextTier::Tier1, ContextTier::Tier2, ContextTier::Tier3];

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let reference = REFERENCES[data[0] as usize % REFERENCES.len()];
    let tier = TIERS[(data[0] as usize / REFERENCES.len()) % TIERS.len()];
    let cap = data[1] as usize * 4;

    let builder = TieredContextBuilder::new(
        Arc::new(MemoryArtifactProvider::new()),
        Arc::new(HeuristicEstimator::default()),
    );
    if let Ok(ctx) = builder.build_from_bytes(reference, &data[2..], tier, cap) {
        assert!(ctx.tokens <= cap.min(tier.ceiling()));
    }
});
