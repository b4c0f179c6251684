//! Knowledge cache behaviour under concurrency, failures, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use ctxpack_core::{
    FailureModeController, HeuristicEstimator, KnowledgeCache, LookupSource, Mode,
};
use ctxpack_test_utils::fakes::FakeDocsBackend;
use ctxpack_test_utils::tracing_setup::init_test_tracing;
use pretty_assertions::assert_eq;

fn cache_over(backend: Arc<FakeDocsBackend>, controller: Arc<FailureModeController>) -> KnowledgeCache {
    KnowledgeCache::new(backend, controller, Arc::new(HeuristicEstimator::default()))
        .with_allow_whole_library(["tailwindcss"])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_fetch_once() {
    init_test_tracing();
    let backend = Arc::new(
        FakeDocsBackend::new()
            .with_latency(Duration::from_millis(100))
            .with_doc("react", Some("hooks"), "useState, useEffect, useMemo"),
    );
    let cache = cache_over(backend.clone(), Arc::new(FailureModeController::default()));

    let a = tokio::spawn({
        let cache = cache.clone();
        async move { cache.lookup("react", Some("hooks"), 500).await }
    });
    let b = tokio::spawn({
        let cache = cache.clone();
        async move { cache.lookup("react", Some("hooks"), 500).await }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(backend.calls(), 1);
    assert_eq!(a.content, "useState, useEffect, useMemo");
    assert_eq!(a.content, b.content);
    assert_eq!(a.source, LookupSource::CacheMissFetched);
    assert_eq!(b.source, LookupSource::CacheMissFetched);

    let third = cache.lookup("react", Some("hooks"), 500).await;
    assert_eq!(third.source, LookupSource::CacheHit);
    assert_eq!(cache.stats().hits, 1);
}

#[tokio::test]
async fn test_unrelated_keys_fetch_concurrently() {
    let backend = Arc::new(FakeDocsBackend::new().with_latency(Duration::from_millis(100)));
    let cache = cache_over(backend.clone(), Arc::new(FailureModeController::default()));

    let started = std::time::Instant::now();
    let (a, b) = tokio::join!(
        cache.lookup("react", Some("hooks"), 500),
        cache.lookup("vue", Some("composition api"), 500)
    );
    assert!(!a.is_failure() && !b.is_failure());
    assert_eq!(backend.calls(), 2);
    // Both fetches overlapped rather than running back to back
    assert!(started.elapsed() < Duration::from_millis(190));
}

#[tokio::test]
async fn test_topicless_lookup_not_allow_listed_makes_no_call() {
    let backend = Arc::new(FakeDocsBackend::new());
    let cache = cache_over(backend.clone(), Arc::new(FailureModeController::default()));

    let result = cache.lookup("react", None, 500).await;
    assert_eq!(result.source, LookupSource::FetchFailed);
    assert!(result.reason.is_some());
    assert_eq!(backend.calls(), 0);

    let whole = cache.lookup("TailwindCSS", Some("  "), 500).await;
    assert_eq!(whole.source, LookupSource::CacheMissFetched);
    assert_eq!(backend.requests(), vec![("TailwindCSS".to_string(), None)]);
}

#[test_log::test(tokio::test)]
async fn test_offline_after_threshold_and_probe_recovery() {
    let backend = Arc::new(FakeDocsBackend::new());
    let controller = Arc::new(FailureModeController::new(2));
    let cache = cache_over(backend.clone(), controller.clone());

    backend.set_down(true);
    assert!(cache.lookup("react", Some("hooks"), 500).await.is_failure());
    assert_eq!(controller.mode(), Mode::Online);
    assert!(cache.lookup("react", Some("state"), 500).await.is_failure());
    assert_eq!(controller.mode(), Mode::Offline);
    assert_eq!(backend.calls(), 2);

    // Offline misses never reach the backend
    backend.set_down(false);
    let offline = cache.lookup("react", Some("hooks"), 500).await;
    assert!(offline.is_failure());
    assert_eq!(backend.calls(), 2);

    cache.probe().await.unwrap();
    assert_eq!(controller.mode(), Mode::Online);
    assert_eq!(controller.consecutive_failures(), 0);
    let online = cache.lookup("react", Some("hooks"), 500).await;
    assert_eq!(online.source, LookupSource::CacheMissFetched);
}

#[tokio::test]
async fn test_hits_are_served_while_offline() {
    let backend = Arc::new(FakeDocsBackend::new());
    let controller = Arc::new(FailureModeController::default());
    let cache = cache_over(backend.clone(), controller.clone());

    cache.lookup("react", Some("hooks"), 500).await;
    controller.force_offline();
    let hit = cache.lookup("react", Some("hooks"), 500).await;
    assert_eq!(hit.source, LookupSource::CacheHit);
}

#[tokio::test]
async fn test_success_between_failures_resets_counter() {
    let backend = Arc::new(FakeDocsBackend::new());
    let controller = Arc::new(FailureModeController::new(2));
    let cache = cache_over(backend.clone(), controller.clone());

    backend.fail_next(1);
    assert!(cache.lookup("a", Some("x"), 100).await.is_failure());
    assert!(!cache.lookup("b", Some("x"), 100).await.is_failure());
    backend.fail_next(1);
    assert!(cache.lookup("c", Some("x"), 100).await.is_failure());
    assert_eq!(controller.mode(), Mode::Online);
    assert_eq!(controller.consecutive_failures(), 1);
}

#[tokio::test]
async fn test_cancelled_waiter_does_not_cancel_fetch() {
    let backend = Arc::new(FakeDocsBackend::new().with_latency(Duration::from_millis(80)));
    let cache = cache_over(backend.clone(), Arc::new(FailureModeController::default()));

    let waiter = tokio::spawn({
        let cache = cache.clone();
        async move { cache.lookup("react", Some("hooks"), 500).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());

    tokio::time::sleep(Duration::from_millis(150)).await;
    let next = cache.lookup("react", Some("hooks"), 500).await;
    assert_eq!(next.source, LookupSource::CacheHit);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_repeated_lookups_idempotent_and_hit_count_grows() {
    let backend = Arc::new(FakeDocsBackend::new());
    let cache = cache_over(backend.clone(), Arc::new(FailureModeController::default()));

    let first = cache.lookup("react", Some("hooks"), 500).await;
    let mut last_hits = 0;
    for _ in 0..5 {
        let again = cache.lookup("react", Some("hooks"), 500).await;
        assert_eq!(again.content, first.content);
        let hits = cache.entry("react", Some("hooks")).unwrap().hit_count;
        assert!(hits > last_hits);
        last_hits = hits;
    }
    let stats = cache.stats();
    assert_eq!(stats.lookups, 6);
    assert_eq!(stats.hits, 5);
    assert_eq!(stats.misses_fetched, 1);
}

#[tokio::test]
async fn test_warm_shares_in_flight_fetches() {
    let backend = Arc::new(FakeDocsBackend::new().with_latency(Duration::from_millis(30)));
    let cache = cache_over(backend.clone(), Arc::new(FailureModeController::default()));
    let topics = vec![
        ("react".to_string(), Some("hooks".to_string())),
        ("react".to_string(), Some("Hooks".to_string())),
        ("vue".to_string(), Some("refs".to_string())),
    ];
    let results = cache.warm(&topics, 200).await;
    assert!(results.iter().all(|r| !r.is_failure()));
    assert_eq!(backend.calls(), 2);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_backend_sees_caller_spelling() {
    let backend = Arc::new(FakeDocsBackend::new());
    let cache = cache_over(backend.clone(), Arc::new(FailureModeController::default()));

    let first = cache.lookup(" Vercel/Next.js ", Some("App Router"), 500).await;
    assert_eq!(first.source, LookupSource::CacheMissFetched);
    assert_eq!(
        backend.requests(),
        vec![("Vercel/Next.js".to_string(), Some("App Router".to_string()))]
    );

    let again = cache.lookup("vercel/next.js", Some("app  router"), 500).await;
    assert_eq!(again.source, LookupSource::CacheHit);
    assert_eq!(again.content, first.content);
    assert_eq!(backend.calls(), 1);
}

#[test_log::test(tokio::test)]
async fn test_crashed_fetch_does_not_stick_to_its_key() {
    let backend = Arc::new(FakeDocsBackend::new());
    let controller = Arc::new(FailureModeController::new(3));
    let cache = cache_over(backend.clone(), controller.clone());
    backend.panic_next(1);

    let crashed = cache.lookup("react", Some("hooks"), 500).await;
    assert_eq!(crashed.source, LookupSource::FetchFailed);
    assert!(crashed.reason.is_some());
    assert_eq!(controller.consecutive_failures(), 1);
    assert!(cache.is_empty());

    let retried = cache.lookup("react", Some("hooks"), 500).await;
    assert_eq!(retried.source, LookupSource::CacheMissFetched);
    assert_eq!(backend.calls(), 2);
    assert_eq!(controller.consecutive_failures(), 0);

    let hit = cache.lookup("react", Some("hooks"), 500).await;
    assert_eq!(hit.source, LookupSource::CacheHit);
}
