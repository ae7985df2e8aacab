//! Single-flight TTL cache.
//!
//! Every key owns an async mutex around its slot. A lookup takes the slot
//! lock first, so while one caller is fetching, every other caller for the
//! same key waits on the lock and then takes the outcome the first one
//! recorded, failures included. Different keys never contend.
//!
//! When a refresh fails and an expired value is present, the expired value is
//! returned instead of the error.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct Entry<V> {
    value: V,
    fetched_at: Instant,
}

struct SlotState<V, E> {
    entry: Option<Entry<V>>,
    /// Error of the most recent fetch, if it failed, and when it finished.
    failure: Option<(E, Instant)>,
}

type Slot<V, E> = Arc<Mutex<SlotState<V, E>>>;

pub struct SingleFlightCache<K, V, E = String> {
    ttl: Duration,
    slots: DashMap<K, Slot<V, E>>,
}

impl<K, V, E> SingleFlightCache<K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    E: Clone + Display,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, key: &K) -> Slot<V, E> {
        // Clone the Arc out so the shard lock is not held across an await.
        self.slots
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SlotState {
                    entry: None,
                    failure: None,
                }))
            })
            .clone()
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result.
    ///
    /// A caller that queued behind a fetch which then failed gets that
    /// fetch's outcome without calling upstream again.
    pub async fn get_or_fetch<F, Fut>(&self, key: &K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let arrived = Instant::now();
        let slot = self.slot(key);
        let mut state = slot.lock().await;

        if let Some(entry) = state.entry.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.value.clone());
            }
        }
        if let Some((e, failed_at)) = state.failure.as_ref() {
            if *failed_at >= arrived {
                debug!(?key, "cache: joined a failed fetch");
                let e = e.clone();
                return Self::fallback(key, &state, e);
            }
        }

        debug!(?key, "cache: fetching");
        match fetch().await {
            Ok(value) => {
                state.entry = Some(Entry {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                });
                state.failure = None;
                Ok(value)
            }
            Err(e) => {
                state.failure = Some((e.clone(), Instant::now()));
                Self::fallback(key, &state, e)
            }
        }
    }

    fn fallback(key: &K, state: &SlotState<V, E>, e: E) -> Result<V, E> {
        match state.entry.as_ref() {
            Some(entry) => {
                warn!(
                    ?key,
                    error = %e,
                    age_secs = entry.fetched_at.elapsed().as_secs(),
                    "cache: refresh failed, serving stale value"
                );
                Ok(entry.value.clone())
            }
            None => Err(e),
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
