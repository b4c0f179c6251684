//! In-process fakes for the core's external collaborators.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use ctxpack_core::{BoxFuture, DocsBackend, FetchError, SummarizeError, Summarizer};

/// Documentation backend that serves canned content and records calls.
///
/// Unknown `(library, topic)` pairs get generated content. Failures can be
/// scripted for the next N fetches or switched on for every fetch.
#[derive(Default)]
pub struct FakeDocsBackend {
    docs: Mutex<HashMap<(String, Option<String>), String>>,
    calls: AtomicUsize,
    probes: AtomicUsize,
    latency: Option<Duration>,
    fail_next: AtomicUsize,
    panic_next: AtomicUsize,
    down: AtomicBool,
    log: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeDocsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Serve `content` for `(library, topic)`.
    pub fn with_doc(self, library: &str, topic: Option<&str>, content: &str) -> Self {
        self.docs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                (library.to_string(), topic.map(str::to_string)),
                content.to_string(),
            );
        self
    }

    /// Fail the next `n` fetches with a network error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Panic inside the next `n` fetches, as a crashing backend would.
    pub fn panic_next(&self, n: usize) {
        self.panic_next.store(n, Ordering::SeqCst);
    }

    /// Fail every fetch and probe until set back.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of fetches started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Every `(library, topic)` fetched, in call order.
    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn should_fail(&self) -> bool {
        if self.down.load(Ordering::SeqCst) {
            return true;
        }
        take_one(&self.fail_next)
    }
}

/// Decrement `counter` if it is positive; whether it was.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl DocsBackend for FakeDocsBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn fetch<'a>(
        &'a self,
        library: &'a str,
        topic: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((library.to_string(), topic.map(str::to_string)));
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if take_one(&self.panic_next) {
                panic!("fake backend crashed fetching {library}");
            }
            if self.should_fail() {
                return Err(FetchError::Network("connection refused".to_string()));
            }
            let key = (library.to_string(), topic.map(str::to_string));
            let canned = self
                .docs
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(&key)
                .cloned();
            Ok(canned.unwrap_or_else(|| {
                format!(
                    "# {library}\n\nReference for {}.\n",
                    topic.unwrap_or("the whole library")
                )
            }))
        })
    }

    fn probe(&self) -> BoxFuture<'_, Result<(), FetchError>> {
        Box::pin(async move {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(FetchError::Network("probe refused".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

/// Summarizer that always returns the same text and counts calls.
pub struct FixedSummarizer {
    summary: String,
    calls: AtomicUsize,
    last_bound: AtomicUsize,
}

impl FixedSummarizer {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            calls: AtomicUsize::new(0),
            last_bound: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `max_tokens` of the most recent call.
    pub fn last_bound(&self) -> usize {
        self.last_bound.load(Ordering::SeqCst)
    }
}

impl Summarizer for FixedSummarizer {
    fn summarize<'a>(
        &'a self,
        _text: &'a str,
        max_tokens: usize,
    ) -> BoxFuture<'a, Result<String, SummarizeError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_bound.store(max_tokens, Ordering::SeqCst);
        let summary = self.summary.clone();
        Box::pin(async move { Ok(summary) })
    }
}

/// Summarizer that always fails.
#[derive(Default)]
pub struct FailingSummarizer;

impl Summarizer for FailingSummarizer {
    fn summarize<'a>(
        &'a self,
        _text: &'a str,
        _max_tokens: usize,
    ) -> BoxFuture<'a, Result<String, SummarizeError>> {
        Box::pin(async { Err(SummarizeError::Request("model overloaded".to_string())) })
    }
}
