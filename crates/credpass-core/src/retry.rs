//! Exponential backoff for transient failures.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bounded retry schedule: `base * 2^(attempt-1)`, capped, plus up to 50 %
/// random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based) without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let mult = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(mult).min(self.max_delay_ms))
    }

    /// Delay before retry number `attempt` (1-based) with jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt);
        let jitter_cap = capped.as_millis() as u64 / 2;
        if jitter_cap == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
    }

    /// A policy with no waiting, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}
