//! Write circuit breaker.
//!
//! One fixed window for the whole ledger. A write first resets the window if
//! `now - start > window_seconds`, then is refused once `count` has reached
//! the limit, then is refused if it moves an existing score by more than
//! `max_score_delta`. Only accepted writes are counted.

use credpass_core::error::LedgerRejection;
use credpass_core::types::CircuitBreakerConfig;

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    window_start: u64,
    window_count: u32,
}

/// Window state a write would commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub window_start: u64,
    pub window_count: u32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, now: u64) -> Self {
        Self {
            config,
            window_start: now,
            window_count: 0,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CircuitBreakerConfig) {
        self.config = config;
    }

    /// `(window_start, window_count)` as of the last accepted write.
    pub fn window(&self) -> (u64, u32) {
        (self.window_start, self.window_count)
    }

    /// Check a write without committing it.
    ///
    /// `previous` is the account's current score, if it has a passport.
    pub fn admit(&self, now: u64, previous: Option<u32>, new_score: u32) -> Result<Admission, LedgerRejection> {
        let (mut start, mut count) = (self.window_start, self.window_count);
        if now.saturating_sub(start) > self.config.window_seconds {
            start = now;
            count = 0;
        }
        if !self.config.enabled {
            return Ok(Admission {
                window_start: start,
                window_count: count.saturating_add(1),
            });
        }
        if count >= self.config.max_operations_per_window {
            return Err(LedgerRejection::RateLimitExceeded);
        }
        if let Some(old) = previous {
            if old.abs_diff(new_score) > self.config.max_score_delta {
                return Err(LedgerRejection::AmountLimitExceeded);
            }
        }
        Ok(Admission {
            window_start: start,
            window_count: count + 1,
        })
    }

    pub fn commit(&mut self, admission: Admission) {
        self.window_start = admission.window_start;
        self.window_count = admission.window_count;
    }
}
