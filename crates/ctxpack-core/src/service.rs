//! Context assembly service — one bounded payload per workflow step.
//!
//! A call resolves the consumer to a tier and budget, then spends one fresh
//! [`TokenBudget`] in a fixed order:
//!
//! 1. the primary target's tiered view (never crowded out by anything else),
//! 2. prior artifacts, packed by priority,
//! 3. documentation topics, each capped at `min(remaining, docs cap)` in
//!    request order.
//!
//! Only a missing primary target fails the call. Every other problem shrinks
//! the payload and marks it degraded.

use std::sync::Arc;

use ctxpack_config::AppConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifact::ArtifactProvider;
use crate::context::assembler::{
    ArtifactAssembler, AssembledEntry, CandidateArtifact, CandidateKind, ContextEntry,
    OverflowPreference, Summarizer,
};
use crate::context::budget::TokenBudget;
use crate::context::tiered::{ContextTier, TieredContextBuilder};
use crate::context::token::{self, TokenEstimator};
use crate::context::truncate::truncate_to_tokens;
use crate::error::{ArtifactError, ContextError, FetchError};
use crate::knowledge::{FailureModeController, HttpDocsBackend, KnowledgeCache};

// ── Request ─────────────────────────────────────────────────────────────

/// Where a prior artifact's content comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    Inline(String),
    /// Read through the service's artifact provider.
    Reference(String),
}

/// A prior workflow artifact offered to the packer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorArtifact {
    pub key: String,
    #[serde(default)]
    pub priority: u32,
    pub kind: CandidateKind,
    pub source: ArtifactSource,
}

impl PriorArtifact {
    pub fn inline(
        key: impl Into<String>,
        content: impl Into<String>,
        priority: u32,
        kind: CandidateKind,
    ) -> Self {
        Self {
            key: key.into(),
            priority,
            kind,
            source: ArtifactSource::Inline(content.into()),
        }
    }

    pub fn reference(
        key: impl Into<String>,
        reference: impl Into<String>,
        priority: u32,
        kind: CandidateKind,
    ) -> Self {
        Self {
            key: key.into(),
            priority,
            kind,
            source: ArtifactSource::Reference(reference.into()),
        }
    }
}

/// A documentation topic to resolve through the knowledge cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRequest {
    pub library: String,
    #[serde(default)]
    pub topic: Option<String>,
}

impl TopicRequest {
    pub fn new(library: impl Into<String>, topic: Option<&str>) -> Self {
        Self {
            library: library.into(),
            topic: topic.map(str::to_string),
        }
    }

    fn section_name(&self) -> String {
        match &self.topic {
            Some(topic) => format!("docs:{}/{}", self.library, topic),
            None => format!("docs:{}", self.library),
        }
    }
}

/// Input to [`ContextAssemblyService::build`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssemblyRequest {
    pub consumer_id: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub prior_artifacts: Vec<PriorArtifact>,
    #[serde(default)]
    pub topics: Vec<TopicRequest>,
}

impl AssemblyRequest {
    pub fn new(consumer_id: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, reference: impl Into<String>) -> Self {
        self.target = Some(reference.into());
        self
    }

    pub fn with_artifact(mut self, artifact: PriorArtifact) -> Self {
        self.prior_artifacts.push(artifact);
        self
    }

    pub fn with_topic(mut self, library: impl Into<String>, topic: Option<&str>) -> Self {
        self.topics.push(TopicRequest::new(library, topic));
        self
    }
}

// ── Payload ─────────────────────────────────────────────────────────────

/// What a payload section holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SectionKind {
    Target,
    Artifact(CandidateKind),
    Docs,
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionKind::Target => write!(f, "target"),
            SectionKind::Artifact(kind) => write!(f, "{kind}"),
            SectionKind::Docs => write!(f, "docs"),
        }
    }
}

/// How a section ended up in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionOutcome {
    Full,
    Truncated,
    Summarized,
    Omitted,
    FetchFailed,
}

impl From<&ContextEntry> for SectionOutcome {
    fn from(entry: &ContextEntry) -> Self {
        match entry {
            ContextEntry::Full(_) => SectionOutcome::Full,
            ContextEntry::Truncated { .. } => SectionOutcome::Truncated,
            ContextEntry::Summarized(_) => SectionOutcome::Summarized,
            ContextEntry::Omitted => SectionOutcome::Omitted,
        }
    }
}

/// One named part of a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSection {
    /// `target:<ref>`, `artifact:<key>` or `docs:<library>[/<topic>]`.
    pub name: String,
    pub kind: SectionKind,
    pub content: String,
    pub tokens: usize,
    pub outcome: SectionOutcome,
    /// Included as raw text after a parse failure, or otherwise not as asked.
    #[serde(default)]
    pub degraded: bool,
}

impl PayloadSection {
    fn new(name: String, kind: SectionKind, content: String, tokens: usize, outcome: SectionOutcome) -> Self {
        Self {
            name,
            kind,
            content,
            tokens,
            degraded: outcome != SectionOutcome::Full,
            outcome,
        }
    }

    fn omitted(name: String, kind: SectionKind) -> Self {
        Self::new(name, kind, String::new(), 0, SectionOutcome::Omitted)
    }
}

/// The bounded result handed to a downstream model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedPayload {
    pub consumer_id: String,
    pub tier: ContextTier,
    pub budget_tokens: usize,
    pub sections: Vec<PayloadSection>,
    /// Sum of section tokens; never above `budget_tokens`.
    pub token_estimate: usize,
    /// Whether any section is not `Full`.
    pub degraded: bool,
}

impl BoundedPayload {
    /// Section by name.
    pub fn section(&self, name: &str) -> Option<&PayloadSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Join every section with content into one prompt-ready string.
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .filter(|s| !s.content.is_empty())
            .map(|s| format!("## {}\n\n{}", s.name, s.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ── Service ─────────────────────────────────────────────────────────────

/// Tier, budget, and docs cap resolved for one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsumerBudget {
    pub tier: ContextTier,
    pub budget_tokens: usize,
    pub docs_cap_tokens: usize,
}

/// Facade composing the tiered builder, the packer, and the knowledge cache.
#[derive(Clone)]
pub struct ContextAssemblyService {
    config: Arc<AppConfig>,
    provider: Arc<dyn ArtifactProvider>,
    estimator: Arc<dyn TokenEstimator>,
    builder: TieredContextBuilder,
    assembler: ArtifactAssembler,
    cache: KnowledgeCache,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl ContextAssemblyService {
    pub fn new(
        config: Arc<AppConfig>,
        provider: Arc<dyn ArtifactProvider>,
        estimator: Arc<dyn TokenEstimator>,
        cache: KnowledgeCache,
    ) -> Self {
        let preference = config
            .budget
            .overflow_preference
            .parse::<OverflowPreference>()
            .unwrap_or_default();
        let assembler = ArtifactAssembler::new(Arc::clone(&estimator))
            .with_truncation_floor(config.budget.truncation_floor)
            .with_preference(preference);
        Self {
            builder: TieredContextBuilder::new(Arc::clone(&provider), Arc::clone(&estimator)),
            config,
            provider,
            estimator,
            assembler,
            cache,
            summarizer: None,
        }
    }

    /// Wire everything from configuration: estimator, HTTP docs backend,
    /// failure controller, and cache.
    pub fn from_config(config: AppConfig, provider: Arc<dyn ArtifactProvider>) -> Result<Self, FetchError> {
        let estimator = token::from_config(&config.estimator);
        let backend = Arc::new(HttpDocsBackend::from_config(&config.knowledge)?);
        let controller = Arc::new(FailureModeController::from_config(&config.knowledge));
        let cache = KnowledgeCache::from_config(
            &config.knowledge,
            backend,
            controller,
            Arc::clone(&estimator),
        );
        Ok(Self::new(Arc::new(config), provider, estimator, cache))
    }

    /// Attach a summarizer. It is only called when `summarizer.enabled`.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn cache(&self) -> &KnowledgeCache {
        &self.cache
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Tier, budget, and docs cap for `consumer_id`; unknown consumers get
    /// the `[budget]` defaults.
    pub fn resolve(&self, consumer_id: &str) -> ConsumerBudget {
        let defaults = &self.config.budget;
        let default_tier = parse_tier(&defaults.default_tier);
        let default_cap = self.config.knowledge.default_docs_cap_tokens;

        match self.config.resolve_consumer(consumer_id) {
            Some(consumer) => {
                let tier = consumer.tier.as_deref().map_or(default_tier, parse_tier);
                ConsumerBudget {
                    tier,
                    budget_tokens: consumer.budget_tokens.unwrap_or(tier.ceiling()),
                    docs_cap_tokens: consumer.docs_cap_tokens.unwrap_or(default_cap),
                }
            }
            None => {
                warn!(
                    error = %ContextError::ConfigurationMissing(consumer_id.to_string()),
                    "using default tier and budget"
                );
                ConsumerBudget {
                    tier: default_tier,
                    budget_tokens: defaults.default_budget_tokens,
                    docs_cap_tokens: default_cap,
                }
            }
        }
    }

    /// Assemble one bounded payload.
    ///
    /// Fails only with [`ContextError::NotFound`] when the primary target is
    /// missing.
    #[tracing::instrument(skip_all, fields(consumer = %request.consumer_id))]
    pub async fn build(&self, request: AssemblyRequest) -> Result<BoundedPayload, ContextError> {
        let resolved = self.resolve(&request.consumer_id);
        let mut budget = TokenBudget::new(resolved.budget_tokens);
        let mut sections = Vec::new();

        if let Some(target) = &request.target {
            sections.push(self.target_section(target, resolved.tier, &mut budget).await?);
        }

        sections.extend(self.artifact_sections(request.prior_artifacts, &mut budget).await);

        for topic in &request.topics {
            sections.push(self.docs_section(topic, resolved.docs_cap_tokens, &mut budget).await);
        }

        let token_estimate = sections.iter().map(|s| s.tokens).sum();
        let degraded = sections.iter().any(|s| s.degraded);
        info!(
            tier = %resolved.tier,
            budget = resolved.budget_tokens,
            tokens = token_estimate,
            sections = sections.len(),
            degraded,
            "assembled payload"
        );

        Ok(BoundedPayload {
            consumer_id: request.consumer_id,
            tier: resolved.tier,
            budget_tokens: resolved.budget_tokens,
            sections,
            token_estimate,
            degraded,
        })
    }

    async fn target_section(
        &self,
        reference: &str,
        tier: ContextTier,
        budget: &mut TokenBudget,
    ) -> Result<PayloadSection, ContextError> {
        let name = format!("target:{reference}");
        let bytes = match self.provider.read(reference).await {
            Ok(bytes) => bytes,
            Err(ArtifactError::NotFound(r)) => return Err(ContextError::NotFound(r)),
            Err(e) => {
                warn!(reference, error = %e, "primary target unreadable, omitting");
                return Ok(PayloadSection::omitted(name, SectionKind::Target));
            }
        };

        let cap = budget.remaining();
        match self.builder.build_from_bytes(reference, &bytes, tier, cap) {
            Ok(ctx) => {
                if !budget.add(ctx.tokens) {
                    return Ok(PayloadSection::omitted(name, SectionKind::Target));
                }
                let outcome = if ctx.truncated {
                    SectionOutcome::Truncated
                } else {
                    SectionOutcome::Full
                };
                if ctx.layer_fallback {
                    warn!(reference, tier = %tier, "no outline for primary target, included a richer view");
                }
                let mut section =
                    PayloadSection::new(name, SectionKind::Target, ctx.content, ctx.tokens, outcome);
                section.degraded |= ctx.layer_fallback;
                Ok(section)
            }
            Err(e) => {
                warn!(reference, error = %e, "falling back to raw text for primary target");
                let raw = String::from_utf8_lossy(&bytes);
                let cut = truncate_to_tokens(&raw, cap.min(tier.ceiling()), self.estimator.as_ref());
                if !budget.add(cut.tokens) {
                    return Ok(PayloadSection::omitted(name, SectionKind::Target));
                }
                let outcome = if cut.truncated() {
                    SectionOutcome::Truncated
                } else {
                    SectionOutcome::Full
                };
                let mut section =
                    PayloadSection::new(name, SectionKind::Target, cut.text, cut.tokens, outcome);
                section.degraded = true;
                Ok(section)
            }
        }
    }

    async fn artifact_sections(
        &self,
        artifacts: Vec<PriorArtifact>,
        budget: &mut TokenBudget,
    ) -> Vec<PayloadSection> {
        let mut candidates = Vec::with_capacity(artifacts.len());
        let mut missing = Vec::new();

        for artifact in artifacts {
            let content = match artifact.source {
                ArtifactSource::Inline(content) => content,
                ArtifactSource::Reference(reference) => match self.provider.read(&reference).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        warn!(key = %artifact.key, error = %e, "prior artifact unavailable, omitting");
                        missing.push(PayloadSection::omitted(
                            format!("artifact:{}", artifact.key),
                            SectionKind::Artifact(artifact.kind),
                        ));
                        continue;
                    }
                },
            };
            candidates.push(CandidateArtifact::new(
                artifact.key,
                content,
                artifact.priority,
                artifact.kind,
            ));
        }

        let summarizer = if self.config.summarizer.enabled {
            self.summarizer.as_deref()
        } else {
            None
        };
        let assembled = self.assembler.assemble(candidates, budget, summarizer).await;

        assembled
            .entries
            .into_iter()
            .map(artifact_section)
            .chain(missing)
            .collect()
    }

    async fn docs_section(
        &self,
        request: &TopicRequest,
        docs_cap: usize,
        budget: &mut TokenBudget,
    ) -> PayloadSection {
        let name = request.section_name();
        let cap = budget.remaining().min(docs_cap);
        if cap == 0 {
            return PayloadSection::omitted(name, SectionKind::Docs);
        }

        let result = self
            .cache
            .lookup(&request.library, request.topic.as_deref(), cap)
            .await;
        if result.is_failure() {
            let mut section = PayloadSection::new(name, SectionKind::Docs, String::new(), 0, SectionOutcome::FetchFailed);
            section.degraded = true;
            return section;
        }
        if !budget.add(result.tokens) {
            return PayloadSection::omitted(name, SectionKind::Docs);
        }
        let outcome = if result.truncated {
            SectionOutcome::Truncated
        } else {
            SectionOutcome::Full
        };
        PayloadSection::new(name, SectionKind::Docs, result.content, result.tokens, outcome)
    }
}

fn artifact_section(entry: AssembledEntry) -> PayloadSection {
    let outcome = SectionOutcome::from(&entry.entry);
    let content = match entry.entry {
        ContextEntry::Full(content)
        | ContextEntry::Truncated { content, .. }
        | ContextEntry::Summarized(content) => content,
        ContextEntry::Omitted => String::new(),
    };
    PayloadSection::new(
        format!("artifact:{}", entry.key),
        SectionKind::Artifact(entry.kind),
        content,
        entry.tokens,
        outcome,
    )
}

/// Config tier strings are validated on load.
fn parse_tier(name: &str) -> ContextTier {
    name.parse().unwrap_or(ContextTier::Tier2)
}
