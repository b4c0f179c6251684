//! Context engine — estimation, tiered views, budgets, and packing.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Context Engine                      │
//! │                                                        │
//! │  ┌───────────┐  ┌────────────┐  ┌────────┐  ┌────────┐ │
//! │  │ Estimator │  │ Tiered     │  │ Budget │  │ Packer │ │
//! │  │           │  │ Builder    │  │        │  │        │ │
//! │  │ ·heuristic│  │ ·indexer   │  │ ·add   │  │ ·full  │ │
//! │  │ ·tokenizer│  │ ·skeleton  │  │ ·reset │  │ ·trunc │ │
//! │  │           │  │ ·excerpt   │  │        │  │ ·summ. │ │
//! │  └───────────┘  └────────────┘  └────────┘  └────────┘ │
//! └────────────────────────────────────────────────────────┘
//! ```

pub mod assembler;
pub mod budget;
pub mod indexer;
pub mod tiered;
pub mod token;
pub mod truncate;

pub use assembler::{
    ArtifactAssembler, AssembledContext, AssembledEntry, CandidateArtifact, CandidateKind,
    ContextEntry, OverflowPreference, Summarizer,
};
pub use budget::TokenBudget;
pub use indexer::{Language, Symbol, SymbolKind};
pub use tiered::{ArtifactKind, ContextTier, StructuredContext, TieredContextBuilder};
pub use token::{HeuristicEstimator, TokenEstimator};
pub use truncate::{Boundary, Truncation, truncate_to_tokens};
