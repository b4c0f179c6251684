//! Online/offline mode driven by consecutive fetch failures.
//!
//! One controller is shared by everything that fetches documentation. It is
//! an explicit object rather than a global so tests can build isolated
//! instances.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default number of consecutive failures before going offline.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

/// Whether documentation fetches are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Online,
    Offline,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Online => write!(f, "online"),
            Mode::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug)]
struct State {
    consecutive_failures: u32,
    mode: Mode,
}

/// Tracks consecutive fetch failures and flips the shared mode.
///
/// Goes offline exactly when the failure count reaches the threshold; only
/// a success (or [`mark_online`](Self::mark_online) after a probe) brings it
/// back.
#[derive(Debug)]
pub struct FailureModeController {
    threshold: u32,
    state: Mutex<State>,
}

impl FailureModeController {
    /// A controller starting online with zero failures. A threshold of 0 is
    /// treated as 1.
    pub fn new(threshold: u32) -> Self {
        Self::with_mode(threshold, Mode::Online)
    }

    /// A controller that starts offline, for air-gapped runs.
    pub fn start_offline(threshold: u32) -> Self {
        Self::with_mode(threshold, Mode::Offline)
    }

    /// Build from the `[knowledge]` config section.
    pub fn from_config(config: &ctxpack_config::KnowledgeConfig) -> Self {
        if config.start_offline {
            Self::start_offline(config.failure_threshold)
        } else {
            Self::new(config.failure_threshold)
        }
    }

    fn with_mode(threshold: u32, mode: Mode) -> Self {
        Self {
            threshold: threshold.max(1),
            state: Mutex::new(State {
                consecutive_failures: 0,
                mode,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn mode(&self) -> Mode {
        self.state().mode
    }

    pub fn is_offline(&self) -> bool {
        self.mode() == Mode::Offline
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    /// Count a failed fetch. Returns the mode afterwards.
    pub fn record_failure(&self) -> Mode {
        let mut state = self.state();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.mode == Mode::Online && state.consecutive_failures == self.threshold {
            state.mode = Mode::Offline;
            warn!(
                failures = state.consecutive_failures,
                "documentation backend unreachable, switching to offline mode"
            );
        }
        state.mode
    }

    /// Count a successful fetch: resets the counter and returns online.
    pub fn record_success(&self) {
        let mut state = self.state();
        state.consecutive_failures = 0;
        if state.mode == Mode::Offline {
            info!("documentation backend reachable again, switching to online mode");
        }
        state.mode = Mode::Online;
    }

    /// Return to online after a successful probe.
    pub fn mark_online(&self) {
        self.record_success();
    }

    /// Go offline immediately, regardless of the counter.
    pub fn force_offline(&self) {
        let mut state = self.state();
        if state.mode == Mode::Online {
            warn!("forced offline");
        }
        state.mode = Mode::Offline;
    }
}

impl Default for FailureModeController {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}
