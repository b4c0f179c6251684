#![deny(unsafe_code)]

//! Shared test utilities for the ctxpack workspace.
//!
//! Provides config builders, fake documentation and summarization backends,
//! a temporary artifact workspace, and tracing helpers so that individual
//! crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! ctxpack-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod fakes;
pub mod tracing_setup;
pub mod workspace;
