//! Ledger endpoint pool.
//!
//! Hands out endpoints round-robin, skipping any still cooling down after a
//! failure. Cooldown doubles per consecutive failure up to a cap and clears
//! on the next success. A semaphore bounds concurrent in-flight calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use credpass_core::error::AttestationError;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::transport::LedgerTransport;

pub const DEFAULT_BASE_COOLDOWN: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Debug, Default, Clone, Copy)]
struct Health {
    consecutive_failures: u32,
    excluded_until: Option<Instant>,
}

/// A checked-out endpoint. The concurrency slot is released on drop.
pub struct Lease {
    pub index: usize,
    pub transport: Arc<dyn LedgerTransport>,
    _permit: OwnedSemaphorePermit,
}

pub struct EndpointPool {
    endpoints: Vec<Arc<dyn LedgerTransport>>,
    health: Vec<Mutex<Health>>,
    next: AtomicUsize,
    permits: Arc<Semaphore>,
    base_cooldown: Duration,
    max_cooldown: Duration,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Arc<dyn LedgerTransport>>, max_connections: usize) -> Self {
        Self::with_cooldown(endpoints, max_connections, DEFAULT_BASE_COOLDOWN, DEFAULT_MAX_COOLDOWN)
    }

    pub fn with_cooldown(
        endpoints: Vec<Arc<dyn LedgerTransport>>,
        max_connections: usize,
        base_cooldown: Duration,
        max_cooldown: Duration,
    ) -> Self {
        let health = endpoints.iter().map(|_| Mutex::new(Health::default())).collect();
        Self {
            endpoints,
            health,
            next: AtomicUsize::new(0),
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
            base_cooldown,
            max_cooldown,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn is_healthy(&self, i: usize, now: Instant) -> bool {
        self.health[i].lock().excluded_until.is_none_or(|t| now >= t)
    }

    pub fn healthy_count(&self) -> usize {
        let now = Instant::now();
        (0..self.endpoints.len()).filter(|&i| self.is_healthy(i, now)).count()
    }

    /// Next healthy endpoint in rotation, preferring one other than `avoid`.
    ///
    /// Waits for a concurrency slot.
    pub async fn acquire(&self, avoid: Option<usize>) -> Result<Lease, AttestationError> {
        let n = self.endpoints.len();
        if n == 0 {
            return Err(AttestationError::NoHealthyEndpoint);
        }
        let now = Instant::now();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let order = (0..n).map(|k| (start + k) % n);
        let healthy: Vec<usize> = order.filter(|&i| self.is_healthy(i, now)).collect();
        let index = healthy
            .iter()
            .copied()
            .find(|&i| Some(i) != avoid)
            .or_else(|| healthy.first().copied())
            .ok_or(AttestationError::NoHealthyEndpoint)?;

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AttestationError::NoHealthyEndpoint)?;
        Ok(Lease {
            index,
            transport: self.endpoints[index].clone(),
            _permit: permit,
        })
    }

    pub fn report_success(&self, index: usize) {
        let mut h = self.health[index].lock();
        if h.consecutive_failures > 0 {
            info!(endpoint = self.endpoints[index].endpoint(), "pool: endpoint recovered");
        }
        *h = Health::default();
    }

    pub fn report_failure(&self, index: usize) {
        let mut h = self.health[index].lock();
        h.consecutive_failures = h.consecutive_failures.saturating_add(1);
        let cooldown = self.cooldown(h.consecutive_failures);
        h.excluded_until = Some(Instant::now() + cooldown);
        warn!(
            endpoint = self.endpoints[index].endpoint(),
            failures = h.consecutive_failures,
            cooldown_ms = cooldown.as_millis() as u64,
            "pool: endpoint excluded"
        );
    }

    fn cooldown(&self, failures: u32) -> Duration {
        let mult = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_cooldown.saturating_mul(mult).min(self.max_cooldown)
    }
}
