//! Artifact assembler — greedy, priority-ordered packing into a token budget.
//!
//! Candidates are visited in ascending priority (lower number = more
//! important). Each one is included whole if it fits; otherwise it degrades:
//!
//! 1. **Truncated** to exactly the remaining budget, when at least
//!    `truncation_floor` tokens remain;
//! 2. **Summarized** by the optional summarizer, bounded to
//!    `min(remaining, floor)`, or replaced by a one-line descriptor when the
//!    summarizer fails;
//! 3. **Omitted** otherwise.
//!
//! Once a candidate has been omitted for lack of budget every later candidate
//! is omitted too, so unimportant material never displaces important material
//! that came before it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::budget::TokenBudget;
use super::token::TokenEstimator;
use super::truncate::truncate_to_tokens;
use crate::BoxFuture;
use crate::error::SummarizeError;

/// Default minimum remaining budget worth truncating into.
pub const DEFAULT_TRUNCATION_FLOOR: usize = 200;

/// Optional summarization backend.
pub trait Summarizer: Send + Sync {
    /// Summarize `text` in roughly `max_tokens` tokens or fewer.
    fn summarize<'a>(
        &'a self,
        text: &'a str,
        max_tokens: usize,
    ) -> BoxFuture<'a, Result<String, SummarizeError>>;
}

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateKind {
    FullFile,
    PriorStepDoc,
    ExternalDoc,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateKind::FullFile => write!(f, "full-file"),
            CandidateKind::PriorStepDoc => write!(f, "prior-step-doc"),
            CandidateKind::ExternalDoc => write!(f, "external-doc"),
        }
    }
}

/// One piece of material competing for the budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateArtifact {
    pub key: String,
    pub content: String,
    /// Lower is more important.
    pub priority: u32,
    pub kind: CandidateKind,
}

impl CandidateArtifact {
    pub fn new(
        key: impl Into<String>,
        content: impl Into<String>,
        priority: u32,
        kind: CandidateKind,
    ) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
            priority,
            kind,
        }
    }
}

/// What happened to a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ContextEntry {
    Full(String),
    Truncated {
        content: String,
        original_tokens: usize,
    },
    Summarized(String),
    Omitted,
}

impl ContextEntry {
    /// The included text, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            ContextEntry::Full(content)
            | ContextEntry::Truncated { content, .. }
            | ContextEntry::Summarized(content) => Some(content),
            ContextEntry::Omitted => None,
        }
    }

    /// Short outcome name for logs and rendering.
    pub fn label(&self) -> &'static str {
        match self {
            ContextEntry::Full(_) => "full",
            ContextEntry::Truncated { .. } => "truncated",
            ContextEntry::Summarized(_) => "summarized",
            ContextEntry::Omitted => "omitted",
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ContextEntry::Full(_))
    }

    pub fn is_omitted(&self) -> bool {
        matches!(self, ContextEntry::Omitted)
    }
}

/// A candidate's key, kind, outcome, and the tokens its outcome consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledEntry {
    pub key: String,
    pub kind: CandidateKind,
    pub tokens: usize,
    pub entry: ContextEntry,
}

/// Result of one [`ArtifactAssembler::assemble`] run, in priority order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssembledContext {
    pub entries: Vec<AssembledEntry>,
    pub total_tokens: usize,
    /// Keys whose outcome is anything but `Full`.
    pub degraded_keys: Vec<String>,
}

impl AssembledContext {
    /// Outcome for `key`.
    pub fn get(&self, key: &str) -> Option<&ContextEntry> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.entry)
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_keys.is_empty()
    }

    fn push(&mut self, candidate: CandidateArtifact, entry: ContextEntry, tokens: usize) {
        if !entry.is_full() {
            self.degraded_keys.push(candidate.key.clone());
        }
        self.total_tokens += tokens;
        self.entries.push(AssembledEntry {
            key: candidate.key,
            kind: candidate.kind,
            tokens,
            entry,
        });
    }
}

/// Which fallback to try first when a candidate overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPreference {
    /// Truncate when the remaining budget reaches the floor, else summarize.
    #[default]
    Truncate,
    /// Ask the summarizer first; truncate if it fails.
    Summarize,
}

impl std::str::FromStr for OverflowPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "truncate" => Ok(OverflowPreference::Truncate),
            "summarize" => Ok(OverflowPreference::Summarize),
            other => Err(format!("unknown overflow preference {other:?}")),
        }
    }
}

/// Packs candidates into a [`TokenBudget`].
#[derive(Clone)]
pub struct ArtifactAssembler {
    estimator: Arc<dyn TokenEstimator>,
    truncation_floor: usize,
    preference: OverflowPreference,
}

impl ArtifactAssembler {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            estimator,
            truncation_floor: DEFAULT_TRUNCATION_FLOOR,
            preference: OverflowPreference::default(),
        }
    }

    pub fn with_truncation_floor(mut self, floor: usize) -> Self {
        self.truncation_floor = floor;
        self
    }

    pub fn with_preference(mut self, preference: OverflowPreference) -> Self {
        self.preference = preference;
        self
    }

    pub fn truncation_floor(&self) -> usize {
        self.truncation_floor
    }

    /// Pack `candidates` into `budget`.
    ///
    /// Deterministic for a fixed candidate list, budget, and estimator (and
    /// summarizer output, when one is given).
    pub async fn assemble(
        &self,
        mut candidates: Vec<CandidateArtifact>,
        budget: &mut TokenBudget,
        summarizer: Option<&dyn Summarizer>,
    ) -> AssembledContext {
        // Stable: equal priorities keep caller order
        candidates.sort_by_key(|c| c.priority);

        let mut assembled = AssembledContext::default();
        let mut starved = false;

        for candidate in candidates {
            if starved || budget.is_exhausted() {
                debug!(key = %candidate.key, "omitted, budget exhausted");
                assembled.push(candidate, ContextEntry::Omitted, 0);
                continue;
            }

            let tokens = self.estimator.estimate(&candidate.content);
            if budget.add(tokens) {
                debug!(key = %candidate.key, tokens, remaining = budget.remaining(), "included in full");
                let content = candidate.content.clone();
                assembled.push(candidate, ContextEntry::Full(content), tokens);
                continue;
            }

            let (entry, used) = self.overflow(&candidate, tokens, budget, summarizer).await;
            if entry.is_omitted() {
                starved = true;
            }
            debug!(
                key = %candidate.key,
                tokens,
                used,
                remaining = budget.remaining(),
                outcome = entry.label(),
                "degraded"
            );
            assembled.push(candidate, entry, used);
        }

        assembled
    }

    /// Degrade a candidate that does not fit. Returns the entry and the tokens
    /// its content occupies.
    async fn overflow(
        &self,
        candidate: &CandidateArtifact,
        original_tokens: usize,
        budget: &mut TokenBudget,
        summarizer: Option<&dyn Summarizer>,
    ) -> (ContextEntry, usize) {
        let remaining = budget.remaining();

        if self.preference == OverflowPreference::Summarize
            && let Some(summarizer) = summarizer
            && let Some(done) = self.summarize(candidate, remaining, budget, summarizer).await
        {
            return done;
        }

        if remaining >= self.truncation_floor {
            let cut = truncate_to_tokens(&candidate.content, remaining, self.estimator.as_ref());
            // The rest of the budget goes with the truncated entry
            let _ = budget.add(remaining);
            return (
                ContextEntry::Truncated {
                    content: cut.text,
                    original_tokens,
                },
                cut.tokens,
            );
        }

        let Some(summarizer) = summarizer else {
            return (ContextEntry::Omitted, 0);
        };

        if self.preference == OverflowPreference::Truncate {
            let bound = remaining.min(self.truncation_floor);
            if let Some(done) = self.summarize(candidate, bound, budget, summarizer).await {
                return done;
            }
        }

        self.descriptor(candidate, budget)
    }

    /// Ask the summarizer for at most `bound` tokens. `None` if it failed or
    /// overflowed.
    async fn summarize(
        &self,
        candidate: &CandidateArtifact,
        bound: usize,
        budget: &mut TokenBudget,
        summarizer: &dyn Summarizer,
    ) -> Option<(ContextEntry, usize)> {
        if bound == 0 {
            return None;
        }
        match summarizer.summarize(&candidate.content, bound).await {
            Ok(summary) => {
                let tokens = self.estimator.estimate(&summary);
                if tokens <= bound && budget.add(tokens) {
                    Some((ContextEntry::Summarized(summary), tokens))
                } else {
                    warn!(key = %candidate.key, tokens, bound, "summary overflowed its bound");
                    None
                }
            }
            Err(e) => {
                warn!(key = %candidate.key, error = %e, "summarization failed");
                None
            }
        }
    }

    /// Stand-in text recorded when no summary could be produced.
    fn descriptor(
        &self,
        candidate: &CandidateArtifact,
        budget: &mut TokenBudget,
    ) -> (ContextEntry, usize) {
        let text = format!(
            "{} {}: summary unavailable, omitted for budget",
            candidate.kind, candidate.key
        );
        let tokens = self.estimator.estimate(&text);
        if budget.add(tokens) {
            (ContextEntry::Summarized(text), tokens)
        } else {
            (ContextEntry::Omitted, 0)
        }
    }
}
