//! Token estimation.
//!
//! The default estimator is the ~4 bytes per token heuristic, scaled by a
//! safety factor. With the `hf-tokenizer` feature a HuggingFace tokenizer can
//! be loaded for precise counts; it degrades to the heuristic (factor 1.1) on
//! any encode error. Estimation never fails and never touches the network.

/// Bytes per token assumed by the heuristic.
const BYTES_PER_TOKEN: f64 = 4.0;

/// Safety factor used when a precise tokenizer falls back to the heuristic.
pub const DEGRADED_SAFETY_FACTOR: f64 = 1.1;

/// Anything that can estimate the token count of a piece of text.
///
/// Implementations must be deterministic and monotonic on prefixes: a prefix
/// of `text` never estimates higher than `text` itself.
pub trait TokenEstimator: Send + Sync {
    /// Short name for diagnostics (e.g. `"heuristic"`).
    fn name(&self) -> &str;

    /// Estimate the token count of `text`.
    fn estimate(&self, text: &str) -> usize;
}

/// `ceil(len / 4 * safety_factor)`.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicEstimator {
    safety_factor: f64,
}

impl HeuristicEstimator {
    /// Create a heuristic estimator. Factors below 1.0 (or non-finite) are
    /// clamped to 1.0 so estimates never undercount the plain heuristic.
    pub fn new(safety_factor: f64) -> Self {
        let safety_factor = if safety_factor.is_finite() && safety_factor >= 1.0 {
            safety_factor
        } else {
            1.0
        };
        Self { safety_factor }
    }

    /// The effective safety factor.
    pub fn safety_factor(&self) -> f64 {
        self.safety_factor
    }
}

impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        if self.safety_factor == 1.0 {
            return text.len().div_ceil(4);
        }
        // Absorb float noise so 100 * 1.1 is 110, not 111.
        let scaled = text.len() as f64 / BYTES_PER_TOKEN * self.safety_factor;
        (scaled - 1e-9).ceil().max(1.0) as usize
    }
}

/// Precise estimator backed by a HuggingFace tokenizer.
#[cfg(feature = "hf-tokenizer")]
pub struct TokenizerEstimator {
    tokenizer: tokenizers::Tokenizer,
    fallback: HeuristicEstimator,
}

#[cfg(feature = "hf-tokenizer")]
impl TokenizerEstimator {
    /// Load a `tokenizer.json` file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, String> {
        let tokenizer =
            tokenizers::Tokenizer::from_file(path.as_ref()).map_err(|e| e.to_string())?;
        Ok(Self {
            tokenizer,
            fallback: HeuristicEstimator::new(DEGRADED_SAFETY_FACTOR),
        })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl TokenEstimator for TokenizerEstimator {
    fn name(&self) -> &str {
        "tokenizer"
    }

    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                tracing::debug!(error = %e, "tokenizer failed, using heuristic");
                self.fallback.estimate(text)
            }
        }
    }
}

/// Build the estimator described by the `[estimator]` config section.
///
/// A configured tokenizer file is only used with the `hf-tokenizer` feature;
/// if it cannot be loaded the heuristic is used with the degraded factor.
pub fn from_config(
    config: &ctxpack_config::EstimatorConfig,
) -> std::sync::Arc<dyn TokenEstimator> {
    #[cfg(feature = "hf-tokenizer")]
    if let Some(path) = &config.tokenizer_file {
        match TokenizerEstimator::from_file(path) {
            Ok(estimator) => return std::sync::Arc::new(estimator),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "failed to load tokenizer, using heuristic");
                let factor = config.safety_factor.max(DEGRADED_SAFETY_FACTOR);
                return std::sync::Arc::new(HeuristicEstimator::new(factor));
            }
        }
    }

    #[cfg(not(feature = "hf-tokenizer"))]
    if let Some(path) = &config.tokenizer_file {
        tracing::warn!(
            path = %path,
            "tokenizer_file set but built without hf-tokenizer; using heuristic"
        );
    }

    std::sync::Arc::new(HeuristicEstimator::new(config.safety_factor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_is_zero() {
        assert_eq!(HeuristicEstimator::default().estimate(""), 0);
    }

    #[test]
    fn test_rounds_up() {
        let est = HeuristicEstimator::default();
        assert_eq!(est.estimate("test"), 1);
        assert_eq!(est.estimate("hello"), 2);
        assert_eq!(est.estimate("hello world"), 3);
        assert_eq!(est.estimate(&"x".repeat(100)), 25);
    }

    #[test]
    fn test_safety_factor_scales_up() {
        let est = HeuristicEstimator::new(1.1);
        // 400 bytes / 4 * 1.1 = 110
        assert_eq!(est.estimate(&"a".repeat(400)), 110);
        assert!(est.estimate("abcd") >= HeuristicEstimator::default().estimate("abcd"));
    }

    #[test]
    fn test_invalid_factor_is_clamped() {
        assert_eq!(HeuristicEstimator::new(0.2).safety_factor(), 1.0);
        assert_eq!(HeuristicEstimator::new(f64::NAN).safety_factor(), 1.0);
    }

    #[test]
    fn test_monotonic_on_growing_text() {
        for factor in [1.0, 1.1, 1.7] {
            let est = HeuristicEstimator::new(factor);
            let mut previous = 0;
            let mut text = String::new();
            for i in 0..500 {
                text.push(if i % 7 == 0 { ' ' } else { 'é' });
                let current = est.estimate(&text);
                assert!(current >= previous, "factor {factor} decreased at {i}");
                previous = current;
            }
        }
    }

    #[test]
    fn test_counts_bytes_not_chars() {
        // "é" is two bytes in UTF-8.
        assert_eq!(HeuristicEstimator::default().estimate("éé"), 1);
        assert_eq!(HeuristicEstimator::default().estimate("ééé"), 2);
    }

    #[test]
    fn test_from_config_defaults_to_heuristic() {
        let config = ctxpack_config::EstimatorConfig::default();
        let est = from_config(&config);
        assert_eq!(est.name(), "heuristic");
        assert_eq!(est.estimate("abcdefgh"), 2);
    }
}
