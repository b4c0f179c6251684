//! Tracing initialisation for tests.
//!
//! [`init_test_tracing`] installs a subscriber writing to the test-harness
//! writer, once per process. Tests using `#[test_log::test]` get the same
//! effect without calling it.

use tracing_subscriber::EnvFilter;

/// Capture tracing output in the test harness, filtered by `RUST_LOG`
/// (default `info`). Repeated calls are ignored.
///
/// ```ignore
/// #[tokio::test]
/// async fn packs_into_budget() {
///     ctxpack_test_utils::tracing_setup::init_test_tracing();
///     tracing::debug!("visible when RUST_LOG=debug");
/// }
/// ```
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
