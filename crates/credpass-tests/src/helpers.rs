//! Shared fixtures: in-memory sources and a full-service harness.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use credpass_attest::{
    AttestationSigner, AttestationWriter, EndpointPool, InProcessLedger, InProcessTransport, LedgerTransport,
    WriterConfig,
};
use credpass_core::constants::SECS_PER_DAY;
use credpass_core::error::{HistoryError, OracleError, StakingReadError};
use credpass_core::retry::RetryPolicy;
use credpass_core::traits::{BlockRange, HistoryPage, HistorySource, ManualClock, PriceSource, StakingSource};
use credpass_core::types::{Address, CircuitBreakerConfig, Hash256, Price, TokenKind, TransactionRecord};
use credpass_ledger::{Capability, PassportLedger};
use credpass_node_lib::{ScoreService, ServiceSettings};
use credpass_oracle::{OracleCache, OracleRiskAdapter};
use credpass_scoring::{ExtractorConfig, FeatureExtractor, StakingBoostResolver};
use parking_lot::Mutex;

/// Ledger administrator; the harness signer is granted `SCORE_UPDATER` only.
pub const ADMIN: Address = Address([0xAD; 20]);
/// The only stablecoin contract the harness knows.
pub const USDC: Address = Address([0x05; 20]);
/// Harness start time (Unix seconds).
pub const NOW: u64 = 1_750_000_000;
pub const HEAD_BLOCK: u64 = 20_000_000;
/// Base exclusion of a failed ledger endpoint.
pub const ENDPOINT_COOLDOWN: Duration = Duration::from_millis(50);

/// Account address from a seed byte.
pub fn account(seed: u8) -> Address {
    Address([seed; 20])
}

/// Record hash unique per (account, index).
pub fn record_hash(account: &Address, index: u32) -> Hash256 {
    let mut h = [0u8; 32];
    h[..20].copy_from_slice(account.as_bytes());
    h[20..24].copy_from_slice(&index.to_le_bytes());
    Hash256(h)
}

/// Incoming transfer of `value` units to `account`.
pub fn incoming(
    account: &Address,
    index: u32,
    timestamp: u64,
    value: f64,
    kind: TokenKind,
    contract: Option<Address>,
) -> TransactionRecord {
    TransactionRecord {
        hash: record_hash(account, index),
        timestamp,
        from: Address([0xEE; 20]),
        to: Some(*account),
        value,
        counterparty_contract: contract,
        token_kind: kind,
    }
}

/// Outgoing transfer of `value` units from `account`.
pub fn outgoing(
    account: &Address,
    index: u32,
    timestamp: u64,
    value: f64,
    kind: TokenKind,
    contract: Option<Address>,
) -> TransactionRecord {
    TransactionRecord {
        from: *account,
        to: Some(Address([0xEE; 20])),
        ..incoming(account, index, timestamp, value, kind, contract)
    }
}

/// Fifty incoming transfers spread evenly over 400 days, ending at [`NOW`]:
/// 30 of 1 ETH through seven distinct contracts and 20 of 200 USDC.
///
/// At $200/ETH and flat prices this yields $10 000 volume, a 0.4 stablecoin
/// ratio, eight unique contracts, no drawdown and a base score of 408.
pub fn steady_history(account: &Address) -> Vec<TransactionRecord> {
    let span = 400 * SECS_PER_DAY;
    let start = NOW - span;
    (0..50u32)
        .map(|i| {
            let ts = start + u64::from(i) * span / 49;
            if i % 5 < 3 {
                let contract = Address([0x10 + (i % 7) as u8; 20]);
                incoming(account, i, ts, 1.0, TokenKind::Native, Some(contract))
            } else {
                incoming(account, i, ts, 200.0, TokenKind::Erc20, Some(USDC))
            }
        })
        .collect()
}

/// Paged in-memory history keyed by account. Cursors are record offsets.
pub struct MemoryHistory {
    name: String,
    page_size: usize,
    accounts: Mutex<HashMap<Address, Vec<TransactionRecord>>>,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    pages_served: AtomicUsize,
}

impl MemoryHistory {
    pub fn new(name: &str, page_size: usize) -> Self {
        Self {
            name: name.to_string(),
            page_size: page_size.max(1),
            accounts: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            pages_served: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, account: Address, records: Vec<TransactionRecord>) {
        self.accounts.lock().insert(account, records);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay applied to every page request.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistorySource for MemoryHistory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head_block(&self) -> Result<u64, HistoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HistoryError::Transport(format!("{} unreachable", self.name)));
        }
        Ok(HEAD_BLOCK)
    }

    async fn fetch_page(
        &self,
        account: &Address,
        _range: BlockRange,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, HistoryError> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(HistoryError::Transport(format!("{} unreachable", self.name)));
        }
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|e| HistoryError::Decode(format!("cursor {c}: {e}")))?,
            None => 0,
        };
        let all = self.accounts.lock().get(account).cloned().unwrap_or_default();
        let end = (offset + self.page_size).min(all.len());
        let records = all.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        self.pages_served.fetch_add(1, Ordering::SeqCst);
        Ok(HistoryPage {
            records,
            next_cursor: (end < all.len()).then(|| end.to_string()),
        })
    }
}

/// Fixed spot prices and daily closes.
#[derive(Default)]
pub struct FixedPrices {
    spot: Mutex<HashMap<String, Price>>,
    closes: Mutex<HashMap<String, Vec<f64>>>,
}

impl FixedPrices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spot price in USD with 8 decimals.
    pub fn with_spot(self, asset: &str, usd: f64) -> Self {
        let answer = (usd * 1e8).round() as i128;
        self.spot.lock().insert(asset.to_string(), Price { answer, decimals: 8 });
        self
    }

    pub fn with_closes(self, asset: &str, closes: Vec<f64>) -> Self {
        self.closes.lock().insert(asset.to_string(), closes);
        self
    }
}

#[async_trait]
impl PriceSource for FixedPrices {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn spot_price(&self, asset: &str) -> Result<Price, OracleError> {
        self.spot
            .lock()
            .get(asset)
            .copied()
            .ok_or_else(|| OracleError::UnknownAsset(asset.to_string()))
    }

    async fn daily_closes(&self, asset: &str, days: u32) -> Result<Vec<f64>, OracleError> {
        let closes = self.closes.lock().get(asset).cloned().ok_or(OracleError::Unsupported {
            source_name: "fixed".to_string(),
            kind: "daily closes",
        })?;
        let keep = closes.len().min(days as usize + 1);
        Ok(closes[closes.len() - keep..].to_vec())
    }
}

/// Staked balances in base units.
#[derive(Default)]
pub struct FixedStaking {
    balances: Mutex<HashMap<Address, u128>>,
    failing: AtomicBool,
}

impl FixedStaking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stake `whole_tokens` of an 18-decimal token.
    pub fn stake(&self, account: Address, whole_tokens: u128) {
        self.balances.lock().insert(account, whole_tokens * 10u128.pow(18));
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl StakingSource for FixedStaking {
    async fn staked_balance(&self, account: &Address) -> Result<u128, StakingReadError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StakingReadError::Transport("staking node down".into()));
        }
        Ok(self.balances.lock().get(account).copied().unwrap_or(0))
    }
}

/// Flat ETH at `usd`: zero volatility, zero oracle penalty.
pub fn flat_eth(usd: f64) -> FixedPrices {
    FixedPrices::new()
        .with_spot("ETH", usd)
        .with_closes("ETH", vec![usd; 31])
}

/// Writer settings that never sleep for long.
pub fn fast_writer() -> WriterConfig {
    WriterConfig {
        receipt_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(5),
        dedup_window: Duration::from_secs(600),
        retry: RetryPolicy::immediate(3),
    }
}

/// Builder for a [`Harness`].
pub struct HarnessBuilder {
    prices: FixedPrices,
    staking: bool,
    circuit_breaker: CircuitBreakerConfig,
    endpoints: usize,
    confirmation_delay: Duration,
    writer: WriterConfig,
    deadline: Duration,
    page_size: usize,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            prices: flat_eth(200.0),
            staking: true,
            circuit_breaker: CircuitBreakerConfig::default(),
            endpoints: 1,
            confirmation_delay: Duration::ZERO,
            writer: fast_writer(),
            deadline: Duration::from_secs(5),
            page_size: 16,
        }
    }
}

impl HarnessBuilder {
    pub fn prices(mut self, prices: FixedPrices) -> Self {
        self.prices = prices;
        self
    }

    /// Run without a staking contract.
    pub fn without_staking(mut self) -> Self {
        self.staking = false;
        self
    }

    pub fn circuit_breaker(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = cfg;
        self
    }

    pub fn endpoints(mut self, n: usize) -> Self {
        self.endpoints = n;
        self
    }

    pub fn confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    pub fn writer(mut self, cfg: WriterConfig) -> Self {
        self.writer = cfg;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn build(self) -> Harness {
        let clock = Arc::new(ManualClock::new(NOW));
        let signer = AttestationSigner::generate();
        let signer_address = signer.address();

        let mut ledger = PassportLedger::new(ADMIN, self.circuit_breaker, clock.clone());
        ledger
            .grant_role(&ADMIN, Capability::ScoreUpdater, signer_address)
            .expect("admin grants roles");
        let ledger = Arc::new(InProcessLedger::new(ledger).with_confirmation_delay(self.confirmation_delay));

        let transports: Vec<Arc<InProcessTransport>> = (0..self.endpoints.max(1))
            .map(|i| Arc::new(InProcessTransport::new(&format!("endpoint-{i}"), ledger.clone())))
            .collect();
        let pool_endpoints: Vec<Arc<dyn LedgerTransport>> = transports
            .iter()
            .map(|t| t.clone() as Arc<dyn LedgerTransport>)
            .collect();
        let pool = Arc::new(EndpointPool::with_cooldown(
            pool_endpoints,
            4,
            ENDPOINT_COOLDOWN,
            ENDPOINT_COOLDOWN * 8,
        ));
        let writer = Arc::new(AttestationWriter::new(signer, pool, self.writer));

        let history = Arc::new(MemoryHistory::new("memory", self.page_size));
        let prices = Arc::new(self.prices);
        let oracle = Arc::new(OracleRiskAdapter::new(
            vec![prices.clone() as Arc<dyn PriceSource>],
            Arc::new(OracleCache::new(Duration::from_secs(300))),
            Duration::from_secs(1),
        ));
        let extractor = FeatureExtractor::new(
            vec![history.clone() as Arc<dyn HistorySource>],
            oracle.clone(),
            ExtractorConfig {
                native_asset: "ETH".to_string(),
                stablecoins: HashSet::from([USDC]),
                volatility_days: 30,
                retry: RetryPolicy::immediate(2),
                call_timeout: Duration::from_secs(1),
                max_pages: 100,
            },
        );
        let staking = Arc::new(FixedStaking::new());
        let staking_source = self.staking.then(|| staking.clone() as Arc<dyn StakingSource>);
        let resolver = StakingBoostResolver::new(staking_source, 18, Duration::from_secs(1));

        let service = Arc::new(ScoreService::new(
            extractor,
            oracle,
            resolver,
            writer,
            clock.clone(),
            ServiceSettings {
                native_asset: "ETH".to_string(),
                volatility_days: 30,
                max_block_range: 2_500_000,
                deadline: self.deadline,
            },
        ));

        Harness {
            service,
            ledger,
            endpoints: transports,
            history,
            prices,
            staking,
            clock,
            signer_address,
        }
    }
}

/// A scoring service wired to in-memory sources and an in-process ledger.
pub struct Harness {
    pub service: Arc<ScoreService>,
    pub ledger: Arc<InProcessLedger>,
    pub endpoints: Vec<Arc<InProcessTransport>>,
    pub history: Arc<MemoryHistory>,
    pub prices: Arc<FixedPrices>,
    pub staking: Arc<FixedStaking>,
    pub clock: Arc<ManualClock>,
    pub signer_address: Address,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Default harness with one endpoint, flat $200 ETH and staking enabled.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Give `account` the [`steady_history`].
    pub fn with_steady(&self, account: Address) -> &Self {
        self.history.insert(account, steady_history(&account));
        self
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_history_pages_by_offset() {
        let h = MemoryHistory::new("m", 16);
        let a = account(1);
        h.insert(a, steady_history(&a));
        let range = BlockRange::ending_at(HEAD_BLOCK, 10);

        let first = h.fetch_page(&a, range, None).await.unwrap();
        assert_eq!(first.records.len(), 16);
        assert_eq!(first.next_cursor.as_deref(), Some("16"));
        let last = h.fetch_page(&a, range, Some("48")).await.unwrap();
        assert_eq!(last.records.len(), 2);
        assert!(last.next_cursor.is_none());
        assert!(h.fetch_page(&a, range, Some("x")).await.is_err());
    }

    #[test]
    fn steady_history_spans_400_days() {
        let a = account(2);
        let h = steady_history(&a);
        assert_eq!(h.len(), 50);
        assert_eq!(h[49].timestamp - h[0].timestamp, 400 * SECS_PER_DAY);
        assert_eq!(h[49].timestamp, NOW);
        assert_eq!(h.iter().filter(|r| r.token_kind == TokenKind::Native).count(), 30);
    }

    #[tokio::test]
    async fn closes_trimmed_to_window() {
        let p = FixedPrices::new().with_closes("ETH", (1..=100).map(f64::from).collect());
        let closes = p.daily_closes("ETH", 30).await.unwrap();
        assert_eq!(closes.len(), 31);
        assert_eq!(closes.last(), Some(&100.0));
        assert!(matches!(
            p.daily_closes("BTC", 30).await,
            Err(OracleError::Unsupported { .. })
        ));
    }
}
