#![deny(unsafe_code)]

//! ctxpack core — bounded, prioritized context for LLM workflow steps.
//!
//! Keeps the material handed to a downstream model (code context, prior
//! workflow artifacts, fetched documentation) inside a token budget no matter
//! how much underlying material exists. The [`ContextAssemblyService`] is the
//! entry point; everything else is a building block it composes.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, the standard return type for async
/// trait methods that require dynamic dispatch (`dyn Trait`).
///
/// Traits consumed via `Arc<dyn Trait>` (artifact providers, documentation
/// backends, summarizers) return a concrete `Pin<Box<dyn Future>>` so they
/// stay object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Artifact providers: where primary targets and referenced artifacts are read from.
pub mod artifact;
/// Token estimation, tiered context, budgets, and priority packing.
pub mod context;
/// Error taxonomy shared across the crate.
pub mod error;
/// Documentation knowledge cache and offline-mode control.
pub mod knowledge;
/// The context assembly facade.
pub mod service;

pub use artifact::{ArtifactProvider, FsArtifactProvider, MemoryArtifactProvider};
pub use context::{
    ArtifactAssembler, ArtifactKind, AssembledContext, AssembledEntry, CandidateArtifact,
    CandidateKind, ContextEntry, ContextTier, HeuristicEstimator, OverflowPreference,
    StructuredContext, Summarizer, TieredContextBuilder, TokenBudget, TokenEstimator,
};
pub use error::{ArtifactError, ContextError, FetchError, SummarizeError};
pub use knowledge::{
    CacheStats, DocsBackend, FailureModeController, HttpDocsBackend, KnowledgeCache,
    LookupResult, LookupSource, Mode,
};
pub use service::{
    ArtifactSource, AssemblyRequest, BoundedPayload, ConsumerBudget, ContextAssemblyService,
    PayloadSection, PriorArtifact, SectionKind, SectionOutcome, TopicRequest,
};
