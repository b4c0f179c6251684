//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use ctxpack_config::{AppConfig, ConsumerConfig};

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .consumer("dev-story", "tier3", Some(12_000))
///     .truncation_floor(100)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn default_budget(mut self, tier: &str, tokens: usize) -> Self {
        self.config.budget.default_tier = tier.to_string();
        self.config.budget.default_budget_tokens = tokens;
        self
    }

    pub fn truncation_floor(mut self, floor: usize) -> Self {
        self.config.budget.truncation_floor = floor;
        self
    }

    pub fn overflow_preference(mut self, preference: &str) -> Self {
        self.config.budget.overflow_preference = preference.to_string();
        self
    }

    pub fn summarizer_enabled(mut self, enabled: bool) -> Self {
        self.config.summarizer.enabled = enabled;
        self
    }

    pub fn safety_factor(mut self, factor: f64) -> Self {
        self.config.estimator.safety_factor = factor;
        self
    }

    /// Add a consumer with a tier and optional budget.
    pub fn consumer(mut self, id: &str, tier: &str, budget_tokens: Option<usize>) -> Self {
        self.config.consumers.insert(
            id.to_string(),
            ConsumerConfig {
                tier: Some(tier.to_string()),
                budget_tokens,
                docs_cap_tokens: None,
            },
        );
        self
    }

    /// Set the per-topic docs cap of an existing consumer.
    pub fn docs_cap(mut self, id: &str, tokens: usize) -> Self {
        if let Some(consumer) = self.config.consumers.get_mut(id) {
            consumer.docs_cap_tokens = Some(tokens);
        }
        self
    }

    pub fn allow_whole_library(mut self, library: &str) -> Self {
        self.config
            .knowledge
            .allow_whole_library
            .push(library.to_string());
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.knowledge.failure_threshold = threshold;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.knowledge.fetch_timeout_secs = secs;
        self
    }

    pub fn start_offline(mut self, offline: bool) -> Self {
        self.config.knowledge.start_offline = offline;
        self
    }

    /// Build, panicking if the result would not pass validation.
    pub fn build(self) -> AppConfig {
        self.config
            .validate()
            .expect("TestConfigBuilder produced an invalid config");
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
