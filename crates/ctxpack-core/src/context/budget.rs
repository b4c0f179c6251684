//! Token budget — a single-owner running total bounded by a capacity.
//!
//! One budget is created per assembly call and threaded through every stage
//! as `&mut`, so the borrow checker rules out sharing it between concurrent
//! callers. `add` is the only way `used` grows and it never overshoots.

use serde::{Deserialize, Serialize};

/// Running token accumulator. Invariant: `used <= capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    capacity: usize,
    used: usize,
}

impl TokenBudget {
    /// Create an empty budget with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, used: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Tokens still available.
    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    /// Whether `tokens` more would still fit.
    pub fn can_add(&self, tokens: usize) -> bool {
        tokens <= self.remaining()
    }

    /// Consume `tokens` if they fit.
    ///
    /// Returns `true` if the tokens were added, `false` (with no change) if
    /// they didn't fit.
    #[must_use = "a rejected add means the content must not be included"]
    pub fn add(&mut self, tokens: usize) -> bool {
        if self.can_add(tokens) {
            self.used += tokens;
            true
        } else {
            false
        }
    }

    /// Whether nothing more can be added.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Forget everything consumed so far.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Percentage of the capacity in use (0.0–100.0).
    pub fn utilization_pct(&self) -> f32 {
        if self.capacity == 0 {
            return 100.0;
        }
        (self.used as f32 / self.capacity as f32) * 100.0
    }
}
