#![deny(unsafe_code)]

//! Configuration loading and validation for ctxpack.
//!
//! Loads TOML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure:
//! per-consumer tiers and budgets, packing knobs, estimator settings, and the
//! documentation knowledge cache.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tier names accepted in `budget.default_tier` and `consumers.<id>.tier`.
pub const VALID_TIERS: [&str; 3] = ["tier1", "tier2", "tier3"];

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Global budget and packing configuration.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Summarization backend switch.
    #[serde(default)]
    pub summarizer: SummarizerConfig,

    /// Token estimator configuration.
    #[serde(default)]
    pub estimator: EstimatorConfig,

    /// Documentation knowledge cache configuration.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Per-consumer overrides, keyed by consumer id (workflow step name).
    #[serde(default)]
    pub consumers: BTreeMap<String, ConsumerConfig>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Global budget defaults and packing behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Tier used for consumers without an entry in `[consumers]`.
    #[serde(default = "default_tier")]
    pub default_tier: String,

    /// Token budget used for consumers without an entry in `[consumers]`.
    #[serde(default = "default_budget_tokens")]
    pub default_budget_tokens: usize,

    /// Minimum remaining budget (tokens) for which an overflowing artifact
    /// is truncated rather than summarized or omitted.
    #[serde(default = "default_truncation_floor")]
    pub truncation_floor: usize,

    /// Which fallback to try first for an overflowing artifact:
    /// `"truncate"` or `"summarize"`.
    #[serde(default = "default_overflow_preference")]
    pub overflow_preference: String,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            default_budget_tokens: default_budget_tokens(),
            truncation_floor: default_truncation_floor(),
            overflow_preference: default_overflow_preference(),
        }
    }
}

fn default_tier() -> String {
    "tier2".to_string()
}

fn default_budget_tokens() -> usize {
    4000
}

fn default_truncation_floor() -> usize {
    200
}

fn default_overflow_preference() -> String {
    "truncate".to_string()
}

/// Summarization backend switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Whether a configured summarizer may be called during packing.
    #[serde(default)]
    pub enabled: bool,
}

/// Token estimator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Multiplier applied to the 4-bytes-per-token heuristic (>= 1.0).
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,

    /// Path to a HuggingFace `tokenizer.json` for precise estimation.
    /// Only honoured when built with the `hf-tokenizer` feature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_file: Option<String>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            safety_factor: default_safety_factor(),
            tokenizer_file: None,
        }
    }
}

fn default_safety_factor() -> f64 {
    1.0
}

/// Documentation knowledge cache and its backing HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Base URL of the documentation service.
    #[serde(default = "default_knowledge_base_url")]
    pub base_url: String,

    /// Optional bearer token for the documentation service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Libraries that may be fetched without a topic.
    #[serde(default)]
    pub allow_whole_library: Vec<String>,

    /// Consecutive fetch failures before switching to offline mode.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long a single caller waits for a fetch before giving up.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// HTTP request timeout for the documentation backend.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Start the process in offline mode (no documentation fetches).
    #[serde(default)]
    pub start_offline: bool,

    /// Per-topic token cap for consumers that do not set `docs_cap_tokens`.
    #[serde(default = "default_docs_cap_tokens")]
    pub default_docs_cap_tokens: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_knowledge_base_url(),
            api_key: None,
            allow_whole_library: Vec::new(),
            failure_threshold: default_failure_threshold(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            start_offline: false,
            default_docs_cap_tokens: default_docs_cap_tokens(),
        }
    }
}

fn default_knowledge_base_url() -> String {
    "https://context7.com/api/v1".to_string()
}

fn default_failure_threshold() -> u32 {
    2
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_docs_cap_tokens() -> usize {
    2000
}

/// Per-consumer tier and budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Tier name (`"tier1"`, `"tier2"`, `"tier3"`). Defaults to
    /// `budget.default_tier` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,

    /// Total token budget. Defaults to the tier's nominal ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<usize>,

    /// Per-topic documentation cap. Defaults to
    /// `knowledge.default_docs_cap_tokens`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_cap_tokens: Option<usize>,
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        debug!(path = %path.display(), bytes = content.len(), "loaded config file");
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up the configuration for a consumer id.
    pub fn resolve_consumer(&self, consumer_id: &str) -> Option<&ConsumerConfig> {
        self.consumers.get(consumer_id)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_TIERS.contains(&self.budget.default_tier.as_str()) {
            return Err(ConfigError::Validation(format!(
                "budget.default_tier must be one of {:?}, got {:?}",
                VALID_TIERS, self.budget.default_tier
            )));
        }
        if self.budget.default_budget_tokens == 0 {
            return Err(ConfigError::Validation(
                "budget.default_budget_tokens must be non-zero".to_string(),
            ));
        }
        let valid_preferences = ["truncate", "summarize"];
        if !valid_preferences.contains(&self.budget.overflow_preference.as_str()) {
            return Err(ConfigError::Validation(format!(
                "budget.overflow_preference must be one of {:?}, got {:?}",
                valid_preferences, self.budget.overflow_preference
            )));
        }

        if !self.estimator.safety_factor.is_finite() || self.estimator.safety_factor < 1.0 {
            return Err(ConfigError::Validation(format!(
                "estimator.safety_factor must be a finite number >= 1.0, got {}",
                self.estimator.safety_factor
            )));
        }

        if self.knowledge.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "knowledge.base_url must not be empty".to_string(),
            ));
        }
        if self.knowledge.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "knowledge.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.knowledge.fetch_timeout_secs == 0 || self.knowledge.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "knowledge timeouts must be non-zero".to_string(),
            ));
        }
        for (i, library) in self.knowledge.allow_whole_library.iter().enumerate() {
            if library.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "knowledge.allow_whole_library[{i}] must not be empty"
                )));
            }
        }

        for (id, consumer) in &self.consumers {
            if let Some(tier) = &consumer.tier
                && !VALID_TIERS.contains(&tier.as_str())
            {
                return Err(ConfigError::Validation(format!(
                    "consumers.{id}.tier must be one of {VALID_TIERS:?}, got {tier:?}"
                )));
            }
            if consumer.budget_tokens == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "consumers.{id}.budget_tokens must be non-zero"
                )));
            }
        }

        Ok(())
    }
}
