//! Documentation knowledge — a shared cache over a documentation backend,
//! with failure-driven offline switching.

pub mod backend;
pub mod cache;
pub mod mode;

pub use backend::{DocsBackend, HttpDocsBackend};
pub use cache::{CacheKey, CacheStats, EntrySnapshot, KnowledgeCache, LookupResult, LookupSource};
pub use mode::{FailureModeController, Mode};
