//! Knowledge cache — shared, lazily populated documentation cache.
//!
//! Entries are keyed by normalized `(library, topic)` and live for the
//! process lifetime unless invalidated. The hit path takes only a read lock.
//! On a miss the fetch runs as its own task and every concurrent requester
//! for the same key awaits one shared handle to it, so a key is fetched at
//! most once at a time. A waiter that times out or is dropped leaves the
//! fetch running; its result still lands in the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::backend::DocsBackend;
use super::mode::FailureModeController;
use crate::context::token::TokenEstimator;
use crate::context::truncate::truncate_to_tokens;
use crate::error::FetchError;

/// Default time a single caller waits for a fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Normalized `(library, topic)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub library: String,
    pub topic: Option<String>,
}

impl CacheKey {
    /// Trim and lower-case both parts; collapse runs of whitespace in the
    /// topic; an empty topic means no topic.
    pub fn new(library: &str, topic: Option<&str>) -> Self {
        let topic = topic
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
            .filter(|t| !t.is_empty());
        Self {
            library: library.trim().to_lowercase(),
            topic,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.topic {
            Some(topic) => write!(f, "{}/{}", self.library, topic),
            None => write!(f, "{}", self.library),
        }
    }
}

/// One cached document.
#[derive(Debug)]
struct CacheEntry {
    content: String,
    fetched_at: SystemTime,
    hit_count: AtomicU64,
}

/// Point-in-time copy of an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub library: String,
    pub topic: Option<String>,
    pub content: String,
    pub fetched_at: SystemTime,
    pub hit_count: u64,
}

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupSource {
    CacheHit,
    CacheMissFetched,
    FetchFailed,
}

/// Result of [`KnowledgeCache::lookup`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResult {
    /// Content truncated to the caller's `max_tokens`; empty on failure.
    pub content: String,
    pub tokens: usize,
    /// Whether `content` was cut to fit `max_tokens`.
    #[serde(default)]
    pub truncated: bool,
    pub source: LookupSource,
    pub latency_ms: u64,
    /// Why the lookup failed, for `FetchFailed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LookupResult {
    pub fn is_failure(&self) -> bool {
        self.source == LookupSource::FetchFailed
    }
}

/// Aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub lookups: u64,
    pub hits: u64,
    pub misses_fetched: u64,
    pub failures: u64,
    /// `hits / lookups`; genuine cache hits only.
    pub hit_rate: f64,
    pub avg_hit_latency_ms: f64,
}

type SharedFetch = Shared<BoxFuture<'static, Result<String, FetchError>>>;

struct CacheInner {
    backend: Arc<dyn DocsBackend>,
    controller: Arc<FailureModeController>,
    estimator: Arc<dyn TokenEstimator>,
    allow_whole_library: Vec<String>,
    fetch_timeout: Duration,
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    in_flight: Mutex<HashMap<CacheKey, SharedFetch>>,
    lookups: AtomicU64,
    hits: AtomicU64,
    misses_fetched: AtomicU64,
    failures: AtomicU64,
    hit_latency_micros: AtomicU64,
}

/// Shared documentation cache. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct KnowledgeCache {
    inner: Arc<CacheInner>,
}

impl KnowledgeCache {
    pub fn new(
        backend: Arc<dyn DocsBackend>,
        controller: Arc<FailureModeController>,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                backend,
                controller,
                estimator,
                allow_whole_library: Vec::new(),
                fetch_timeout: DEFAULT_FETCH_TIMEOUT,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                lookups: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses_fetched: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                hit_latency_micros: AtomicU64::new(0),
            }),
        }
    }

    /// Build from the `[knowledge]` config section.
    pub fn from_config(
        config: &ctxpack_config::KnowledgeConfig,
        backend: Arc<dyn DocsBackend>,
        controller: Arc<FailureModeController>,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        Self::new(backend, controller, estimator)
            .with_allow_whole_library(config.allow_whole_library.iter().cloned())
            .with_fetch_timeout(Duration::from_secs(config.fetch_timeout_secs))
    }

    /// Must be called before the cache is cloned or shared.
    pub fn with_allow_whole_library<I, S>(mut self, libraries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = libraries
            .into_iter()
            .map(|l| CacheKey::new(l.as_ref(), None).library)
            .collect();
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.allow_whole_library = list;
        } else {
            warn!("allow-list ignored: cache already shared");
        }
        self
    }

    /// Must be called before the cache is cloned or shared.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.fetch_timeout = timeout;
        } else {
            warn!("fetch timeout ignored: cache already shared");
        }
        self
    }

    pub fn controller(&self) -> &Arc<FailureModeController> {
        &self.inner.controller
    }

    /// Resolve documentation for `(library, topic)`, truncated to `max_tokens`.
    ///
    /// Never returns an error: failures come back as
    /// [`LookupSource::FetchFailed`] with a reason.
    #[tracing::instrument(skip_all, fields(library = %library, topic = ?topic))]
    pub async fn lookup(&self, library: &str, topic: Option<&str>, max_tokens: usize) -> LookupResult {
        let started = Instant::now();
        let inner = &self.inner;
        inner.lookups.fetch_add(1, Ordering::Relaxed);
        let key = CacheKey::new(library, topic);

        if key.topic.is_none() && !inner.allow_whole_library.contains(&key.library) {
            return self.failed(
                started,
                format!("topic required for {} (not on the whole-library allow-list)", key.library),
            );
        }

        if let Some(entry) = self.cached(&key) {
            entry.hit_count.fetch_add(1, Ordering::Relaxed);
            let result = self.serve(&entry.content, max_tokens, LookupSource::CacheHit, started);
            inner.hits.fetch_add(1, Ordering::Relaxed);
            let micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
            inner.hit_latency_micros.fetch_add(micros, Ordering::Relaxed);
            debug!(key = %key, tokens = result.tokens, "cache hit");
            return result;
        }

        if inner.controller.is_offline() {
            return self.failed(started, format!("offline: {key} not cached"));
        }

        let fetch = self.join_or_start(&key, library, topic);
        match tokio::time::timeout(inner.fetch_timeout, fetch).await {
            Ok(Ok(content)) => {
                inner.misses_fetched.fetch_add(1, Ordering::Relaxed);
                self.serve(&content, max_tokens, LookupSource::CacheMissFetched, started)
            }
            Ok(Err(e)) => self.failed(started, e.to_string()),
            Err(_) => self.failed(
                started,
                format!("timed out after {:?} waiting for {key}", inner.fetch_timeout),
            ),
        }
    }

    /// Look up several topics concurrently with the same token cap.
    pub async fn warm(&self, topics: &[(String, Option<String>)], max_tokens: usize) -> Vec<LookupResult> {
        let lookups = topics
            .iter()
            .map(|(library, topic)| self.lookup(library, topic.as_deref(), max_tokens));
        futures::future::join_all(lookups).await
    }

    /// Check the backend and, if it answers, return to online mode.
    pub async fn probe(&self) -> Result<(), FetchError> {
        self.inner.backend.probe().await?;
        self.inner.controller.mark_online();
        info!(backend = self.inner.backend.name(), "probe succeeded");
        Ok(())
    }

    /// Drop one entry. Returns whether it existed.
    pub fn invalidate(&self, library: &str, topic: Option<&str>) -> bool {
        let key = CacheKey::new(library, topic);
        self.entries_mut().remove(&key).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.entries_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of one entry, if cached.
    pub fn entry(&self, library: &str, topic: Option<&str>) -> Option<EntrySnapshot> {
        let key = CacheKey::new(library, topic);
        let entry = self.cached(&key)?;
        Some(EntrySnapshot {
            library: key.library,
            topic: key.topic,
            content: entry.content.clone(),
            fetched_at: entry.fetched_at,
            hit_count: entry.hit_count.load(Ordering::Relaxed),
        })
    }

    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        let lookups = inner.lookups.load(Ordering::Relaxed);
        let hits = inner.hits.load(Ordering::Relaxed);
        let micros = inner.hit_latency_micros.load(Ordering::Relaxed);
        CacheStats {
            lookups,
            hits,
            misses_fetched: inner.misses_fetched.load(Ordering::Relaxed),
            failures: inner.failures.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            avg_hit_latency_ms: if hits == 0 {
                0.0
            } else {
                micros as f64 / hits as f64 / 1000.0
            },
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<CacheKey, Arc<CacheEntry>>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn entries_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CacheKey, Arc<CacheEntry>>> {
        self.inner
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn cached(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries().get(key).cloned()
    }

    /// Join the in-flight fetch for `key`, or start one. A new fetch asks the
    /// backend with the caller's spelling, trimmed; `key` is only the map key.
    fn join_or_start(&self, key: &CacheKey, library: &str, topic: Option<&str>) -> SharedFetch {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(fetch) = in_flight.get(key) {
            debug!(key = %key, "joining in-flight fetch");
            return fetch.clone();
        }

        // The entry may have landed between the hit check and taking the lock
        if let Some(entry) = self.cached(key) {
            let content = entry.content.clone();
            return async move { Ok(content) }.boxed().shared();
        }

        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            settled: false,
        };
        let library = library.trim().to_string();
        let topic = topic.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string);
        let handle = tokio::spawn(fetch_and_store(guard, library, topic));
        let fetch = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(FetchError::Aborted(e.to_string())))
        }
        .boxed()
        .shared();
        in_flight.insert(key.clone(), fetch.clone());
        fetch
    }

    fn serve(&self, content: &str, max_tokens: usize, source: LookupSource, started: Instant) -> LookupResult {
        let cut = truncate_to_tokens(content, max_tokens, self.inner.estimator.as_ref());
        LookupResult {
            truncated: cut.truncated(),
            content: cut.text,
            tokens: cut.tokens,
            source,
            latency_ms: elapsed_ms(started),
            reason: None,
        }
    }

    fn failed(&self, started: Instant, reason: String) -> LookupResult {
        self.inner.failures.fetch_add(1, Ordering::Relaxed);
        warn!(%reason, "documentation lookup failed");
        LookupResult {
            content: String::new(),
            tokens: 0,
            truncated: false,
            source: LookupSource::FetchFailed,
            latency_ms: elapsed_ms(started),
            reason: Some(reason),
        }
    }
}

/// Clears the in-flight marker when the fetch task ends, however it ends.
/// A task that never settled (it panicked or the runtime dropped it) counts
/// as a failed fetch.
struct InFlightGuard {
    inner: Arc<CacheInner>,
    key: CacheKey,
    settled: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.settled {
            let mode = self.inner.controller.record_failure();
            warn!(key = %self.key, %mode, "documentation fetch aborted");
        }
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Body of the spawned fetch task: fetch, store, and report. The guard
/// clears the in-flight marker on the way out.
async fn fetch_and_store(
    mut guard: InFlightGuard,
    library: String,
    topic: Option<String>,
) -> Result<String, FetchError> {
    let inner = Arc::clone(&guard.inner);
    let key = guard.key.clone();
    info!(key = %key, backend = inner.backend.name(), "fetching documentation");
    let result = inner.backend.fetch(&library, topic.as_deref()).await;

    match &result {
        Ok(content) => {
            let entry = Arc::new(CacheEntry {
                content: content.clone(),
                fetched_at: SystemTime::now(),
                hit_count: AtomicU64::new(0),
            });
            inner
                .entries
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(key, entry);
            inner.controller.record_success();
        }
        Err(e) => {
            let mode = inner.controller.record_failure();
            warn!(key = %key, error = %e, %mode, "documentation fetch failed");
        }
    }

    guard.settled = true;
    result
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
