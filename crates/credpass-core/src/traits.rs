//! Trait interfaces between credpass crates.
//!
//! - [`HistorySource`]: paginated transaction history (credpass-chain implements)
//! - [`PriceSource`]: spot prices and daily closes (credpass-chain implements)
//! - [`StakingSource`]: staked balance reads (credpass-chain implements)
//! - [`Clock`]: wall-clock seconds, swappable in tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::{HistoryError, OracleError, StakingReadError};
use crate::types::{Address, Price, TransactionRecord};

/// Inclusive block interval to scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// The last `max_range` blocks ending at `head`.
    pub fn ending_at(head: u64, max_range: u64) -> Self {
        Self {
            from: head.saturating_sub(max_range),
            to: head,
        }
    }
}

/// One page of history plus the cursor for the next page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryPage {
    pub records: Vec<TransactionRecord>,
    /// `None` once history is exhausted.
    pub next_cursor: Option<String>,
}

/// Source of an account's transaction history.
///
/// Cursors are opaque and only meaningful to the source that issued them.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Current chain head block number.
    async fn head_block(&self) -> Result<u64, HistoryError>;

    /// Fetch one page of records touching `account` within `range`.
    async fn fetch_page(
        &self,
        account: &Address,
        range: BlockRange,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, HistoryError>;
}

/// Source of asset prices.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Latest price of `asset` (symbol, e.g. `"ETH"`) in USD.
    async fn spot_price(&self, asset: &str) -> Result<Price, OracleError>;

    /// Daily USD closes over the last `days` days, oldest first.
    ///
    /// Sources without history return [`OracleError::Unsupported`].
    async fn daily_closes(&self, asset: &str, days: u32) -> Result<Vec<f64>, OracleError>;
}

/// Reader for the staking contract.
#[async_trait]
pub trait StakingSource: Send + Sync {
    /// Staked balance of `account` in base units.
    async fn staked_balance(&self, account: &Address) -> Result<u128, StakingReadError>;
}

/// Unix-seconds clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn set(&self, t: u64) {
        self.0.store(t, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
