//! Fuzz target for configuration parsing and consumer resolution.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Whatever `AppConfig::parse()` accepts must resolve every consumer to a
//! known tier and a non-zero budget, and must survive a TOML round trip.

#![no_main]

use ctxpack_config::AppConfig;
use ctxpack_core::ContextTier;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = AppConfig::parse(s) else {
        return;
    };

    let default_tier: ContextTier = config
        .budget
        .default_tier
        .parse()
        .expect("validated default tier");
    for id in config.consumers.keys() {
        let consumer = config.resolve_consumer(id).expect("listed consumer resolves");
        let tier = match consumer.tier.as_deref() {
            Some(name) => name.parse().expect("validated consumer tier"),
            None => default_tier,
        };
        let budget = consumer.budget_tokens.unwrap_or(tier.ceiling());
        assert!(budget > 0);
    }

    let rendered = toml::to_string(&config).expect("config serializes");
    AppConfig::parse(&rendered).expect("rendered config parses again");
});
