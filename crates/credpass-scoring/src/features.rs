//! Transaction history to [`FeatureVector`].
//!
//! The extractor reads the account's complete history in the last
//! `max_block_range` blocks from one source. If any page fails, the whole read
//! restarts on the next source after a backoff, so one history never mixes
//! sources. Once every attempt is spent the error propagates; no default
//! vector is substituted.
//!
//! USD valuation uses spot prices at call time: transfers of known stablecoin
//! contracts count at par, native transfers at the native spot price, and
//! other tokens count towards activity and diversity with zero USD value.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use credpass_core::constants::{
    DEFAULT_VOLATILITY_DAYS, MAX_HISTORY_PAGES, SECS_PER_DAY,
};
use credpass_core::error::{FeatureExtractionError, HistoryError};
use credpass_core::retry::RetryPolicy;
use credpass_core::traits::{BlockRange, HistorySource};
use credpass_core::types::{Address, FeatureVector, TokenKind, TransactionRecord};
use credpass_oracle::OracleRiskAdapter;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Symbol of the chain's native asset, e.g. `"ETH"`.
    pub native_asset: String,
    /// Stablecoin contracts valued at par.
    pub stablecoins: HashSet<Address>,
    /// Lookback for the native asset's volatility.
    pub volatility_days: u32,
    /// Attempts across all sources, round-robin.
    pub retry: RetryPolicy,
    /// Bound on each page or head request.
    pub call_timeout: Duration,
    pub max_pages: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            native_asset: "ETH".to_string(),
            stablecoins: HashSet::new(),
            volatility_days: DEFAULT_VOLATILITY_DAYS,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(10),
            max_pages: MAX_HISTORY_PAGES,
        }
    }
}

pub struct FeatureExtractor {
    sources: Vec<Arc<dyn HistorySource>>,
    oracle: Arc<OracleRiskAdapter>,
    config: ExtractorConfig,
}

impl FeatureExtractor {
    /// `sources` in priority order: RPC sources first, explorer fallback last.
    pub fn new(
        sources: Vec<Arc<dyn HistorySource>>,
        oracle: Arc<OracleRiskAdapter>,
        config: ExtractorConfig,
    ) -> Self {
        Self {
            sources,
            oracle,
            config,
        }
    }

    pub async fn extract(
        &self,
        account: &Address,
        max_block_range: u64,
    ) -> Result<FeatureVector, FeatureExtractionError> {
        let records = self.fetch_history(account, max_block_range).await?;
        if records.is_empty() {
            debug!(%account, "features: no history, cold start");
            return Ok(FeatureVector::cold_start());
        }

        let needs_native_price = records
            .iter()
            .any(|r| is_native(r.token_kind) && r.value > 0.0);
        let native = self.config.native_asset.as_str();
        let (price, volatility_pct) = tokio::join!(
            async {
                if needs_native_price {
                    self.oracle.price(native).await.map(|p| p.as_f64())
                } else {
                    Ok(0.0)
                }
            },
            self.oracle.volatility(native, self.config.volatility_days),
        );
        let native_usd = price?;

        let features = compute_features(
            account,
            &records,
            native_usd,
            &self.config.stablecoins,
            volatility_pct,
        );
        info!(
            %account,
            tx_count = features.tx_count,
            volume_usd = features.total_volume_usd,
            days_active = features.days_active,
            "features: extracted"
        );
        Ok(features)
    }

    /// Full sorted history from the first source that serves it completely.
    async fn fetch_history(
        &self,
        account: &Address,
        max_block_range: u64,
    ) -> Result<Vec<TransactionRecord>, FeatureExtractionError> {
        if self.sources.is_empty() {
            return Err(FeatureExtractionError::NoSources);
        }
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last = HistoryError::Transport("no attempt made".into());

        for attempt in 1..=max_attempts {
            let source = &self.sources[(attempt as usize - 1) % self.sources.len()];
            match self.fetch_all_pages(source.as_ref(), account, max_block_range).await {
                Ok(mut records) => {
                    records.sort_by(|a, b| (a.timestamp, a.hash).cmp(&(b.timestamp, b.hash)));
                    records.dedup();
                    debug!(%account, source = source.name(), records = records.len(), attempt, "features: history fetched");
                    return Ok(records);
                }
                Err(e) => {
                    warn!(%account, source = source.name(), attempt, error = %e, "features: history source failed");
                    last = e;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry.delay(attempt)).await;
                    }
                }
            }
        }

        Err(FeatureExtractionError::SourcesExhausted {
            account: *account,
            attempts: max_attempts,
            last,
        })
    }

    async fn fetch_all_pages(
        &self,
        source: &dyn HistorySource,
        account: &Address,
        max_block_range: u64,
    ) -> Result<Vec<TransactionRecord>, HistoryError> {
        let head = self.bounded(source.head_block()).await?;
        let range = BlockRange::ending_at(head, max_block_range);

        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..self.config.max_pages {
            let page = self
                .bounded(source.fetch_page(account, range, cursor.as_deref()))
                .await?;
            records.extend(page.records);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(records),
            }
        }
        Err(HistoryError::PageLimit(self.config.max_pages))
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, HistoryError>>,
    ) -> Result<T, HistoryError> {
        tokio::time::timeout(self.config.call_timeout, fut)
            .await
            .map_err(|_| HistoryError::Transport(format!("timed out after {:?}", self.config.call_timeout)))?
    }
}

fn is_native(kind: TokenKind) -> bool {
    matches!(kind, TokenKind::Native | TokenKind::Internal)
}

/// USD value of one record and whether it touched a stablecoin.
fn usd_value(r: &TransactionRecord, native_usd: f64, stablecoins: &HashSet<Address>) -> (f64, bool) {
    let value = if r.value.is_finite() { r.value.max(0.0) } else { 0.0 };
    match r.token_kind {
        TokenKind::Native | TokenKind::Internal => (value * native_usd, false),
        TokenKind::Erc20 => match r.counterparty_contract {
            Some(c) if stablecoins.contains(&c) => (value, true),
            _ => (0.0, false),
        },
        TokenKind::Erc721 | TokenKind::Erc1155 => (0.0, false),
    }
}

/// Largest peak-to-trough decline of the running USD net flow, in percent of
/// the peak, capped at 100.
fn max_drawdown_pct(account: &Address, records: &[TransactionRecord], usd: &[f64]) -> f64 {
    let mut balance = 0.0f64;
    let mut peak = 0.0f64;
    let mut worst = 0.0f64;
    for (r, v) in records.iter().zip(usd) {
        let incoming = r.to.as_ref() == Some(account);
        let outgoing = r.is_outgoing(account);
        match (incoming, outgoing) {
            (true, false) => balance += v,
            (false, true) => balance -= v,
            _ => {}
        }
        if balance > peak {
            peak = balance;
        } else if peak > 0.0 {
            worst = worst.max((peak - balance) / peak * 100.0);
        }
    }
    worst.min(100.0)
}

/// Pure feature computation over sorted, deduplicated records.
pub fn compute_features(
    account: &Address,
    records: &[TransactionRecord],
    native_usd: f64,
    stablecoins: &HashSet<Address>,
    volatility_pct: f64,
) -> FeatureVector {
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return FeatureVector::cold_start();
    };

    let tx_count = records.iter().map(|r| r.hash).collect::<HashSet<_>>().len() as u64;

    let mut usd = Vec::with_capacity(records.len());
    let mut total = 0.0;
    let mut stable = 0.0;
    for r in records {
        let (v, is_stable) = usd_value(r, native_usd, stablecoins);
        total += v;
        if is_stable {
            stable += v;
        }
        usd.push(v);
    }

    let unique_contracts = records
        .iter()
        .filter_map(|r| r.counterparty_contract)
        .collect::<HashSet<_>>()
        .len() as u64;

    FeatureVector {
        tx_count,
        total_volume_usd: total,
        avg_tx_value_usd: total / tx_count as f64,
        stablecoin_ratio: if total > 0.0 { (stable / total).clamp(0.0, 1.0) } else { 0.0 },
        days_active: last.timestamp.saturating_sub(first.timestamp) / SECS_PER_DAY,
        unique_contracts,
        volatility_pct: if volatility_pct.is_finite() { volatility_pct.max(0.0) } else { 0.0 },
        max_drawdown_pct: max_drawdown_pct(account, records, &usd),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use credpass_core::error::OracleError;
    use credpass_core::traits::{HistoryPage, PriceSource};
    use credpass_core::types::{Hash256, Price};
    use credpass_oracle::OracleCache;
    use parking_lot::Mutex;

    use super::*;

    const ME: Address = Address([0xAA; 20]);
    const USDC: Address = Address([0x05; 20]);

    fn rec(n: u8, ts: u64, from: Address, to: Address, value: f64, kind: TokenKind, contract: Option<Address>) -> TransactionRecord {
        TransactionRecord {
            hash: Hash256([n; 32]),
            timestamp: ts,
            from,
            to: Some(to),
            value,
            counterparty_contract: contract,
            token_kind: kind,
        }
    }

    /// Serves `records` two per page; fails the first `failures` page reads.
    struct PagedSource {
        name: &'static str,
        records: Vec<TransactionRecord>,
        failures: AtomicUsize,
        pages_served: AtomicUsize,
        ranges: Mutex<Vec<BlockRange>>,
    }

    impl PagedSource {
        fn new(name: &'static str, records: Vec<TransactionRecord>, failures: usize) -> Self {
            Self {
                name,
                records,
                failures: AtomicUsize::new(failures),
                pages_served: AtomicUsize::new(0),
                ranges: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HistorySource for PagedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn head_block(&self) -> Result<u64, HistoryError> {
            Ok(10_000)
        }

        async fn fetch_page(&self, _account: &Address, range: BlockRange, cursor: Option<&str>) -> Result<HistoryPage, HistoryError> {
            self.ranges.lock().push(range);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(HistoryError::HttpStatus(503));
            }
            let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let end = (start + 2).min(self.records.len());
            self.pages_served.fetch_add(1, Ordering::SeqCst);
            Ok(HistoryPage {
                records: self.records[start..end].to_vec(),
                next_cursor: (end < self.records.len()).then(|| end.to_string()),
            })
        }
    }

    struct EthAt(f64);

    #[async_trait]
    impl PriceSource for EthAt {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn spot_price(&self, _asset: &str) -> Result<Price, OracleError> {
            if self.0 <= 0.0 {
                return Err(OracleError::Source { source_name: "fixed".into(), message: "down".into() });
            }
            Ok(Price { answer: (self.0 * 1e8) as i128, decimals: 8 })
        }

        async fn daily_closes(&self, _asset: &str, _days: u32) -> Result<Vec<f64>, OracleError> {
            Ok(vec![self.0.max(1.0); 31])
        }
    }

    fn oracle(eth_usd: f64) -> Arc<OracleRiskAdapter> {
        Arc::new(OracleRiskAdapter::new(
            vec![Arc::new(EthAt(eth_usd))],
            Arc::new(OracleCache::new(Duration::from_secs(60))),
            Duration::from_secs(1),
        ))
    }

    fn config() -> ExtractorConfig {
        ExtractorConfig {
            stablecoins: [USDC].into_iter().collect(),
            retry: RetryPolicy::immediate(4),
            ..ExtractorConfig::default()
        }
    }

    fn history() -> Vec<TransactionRecord> {
        let other = Address([0xBB; 20]);
        vec![
            rec(1, 1_000, other, ME, 1.0, TokenKind::Native, None),
            rec(2, 1_000 + 3 * SECS_PER_DAY, ME, USDC, 500.0, TokenKind::Erc20, Some(USDC)),
            rec(3, 1_000 + 10 * SECS_PER_DAY, ME, other, 0.5, TokenKind::Native, Some(Address([0x07; 20]))),
        ]
    }

    #[tokio::test]
    async fn extracts_across_pages() {
        let src = Arc::new(PagedSource::new("rpc", history(), 0));
        let ex = FeatureExtractor::new(vec![src.clone()], oracle(2_000.0), config());
        let f = ex.extract(&ME, 5_000).await.unwrap();

        assert_eq!(src.pages_served.load(Ordering::SeqCst), 2);
        assert_eq!(src.ranges.lock()[0], BlockRange { from: 5_000, to: 10_000 });
        assert_eq!(f.tx_count, 3);
        // 2000 + 500 + 1000
        assert_eq!(f.total_volume_usd, 3_500.0);
        assert!((f.avg_tx_value_usd - 3_500.0 / 3.0).abs() < 1e-9);
        assert!((f.stablecoin_ratio - 500.0 / 3_500.0).abs() < 1e-12);
        assert_eq!(f.days_active, 10);
        assert_eq!(f.unique_contracts, 2);
        assert_eq!(f.volatility_pct, 0.0);
        // Balance 2000 -> 1500 -> 500: 75 % below the peak.
        assert!((f.max_drawdown_pct - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_history_is_cold_start() {
        let src = Arc::new(PagedSource::new("rpc", Vec::new(), 0));
        let ex = FeatureExtractor::new(vec![src], oracle(2_000.0), config());
        assert_eq!(ex.extract(&ME, 5_000).await.unwrap(), FeatureVector::cold_start());
    }

    #[tokio::test]
    async fn failover_restarts_on_next_source() {
        let primary = Arc::new(PagedSource::new("rpc", history(), 1));
        let fallback = Arc::new(PagedSource::new("explorer", history(), 0));
        let ex = FeatureExtractor::new(vec![primary.clone(), fallback.clone()], oracle(2_000.0), config());
        let f = ex.extract(&ME, 5_000).await.unwrap();
        assert_eq!(f.tx_count, 3);
        assert_eq!(primary.pages_served.load(Ordering::SeqCst), 0);
        assert_eq!(fallback.pages_served.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_sources_propagate() {
        let a = Arc::new(PagedSource::new("rpc", history(), 100));
        let b = Arc::new(PagedSource::new("explorer", history(), 100));
        let ex = FeatureExtractor::new(vec![a, b], oracle(2_000.0), config());
        let err = ex.extract(&ME, 5_000).await.unwrap_err();
        assert_eq!(
            err,
            FeatureExtractionError::SourcesExhausted { account: ME, attempts: 4, last: HistoryError::HttpStatus(503) }
        );
    }

    #[tokio::test]
    async fn no_sources() {
        let ex = FeatureExtractor::new(Vec::new(), oracle(2_000.0), config());
        assert_eq!(ex.extract(&ME, 1).await.unwrap_err(), FeatureExtractionError::NoSources);
    }

    #[tokio::test]
    async fn page_limit_is_a_failure() {
        let src = Arc::new(PagedSource::new("rpc", history(), 0));
        let cfg = ExtractorConfig { max_pages: 1, retry: RetryPolicy::immediate(1), ..config() };
        let ex = FeatureExtractor::new(vec![src], oracle(2_000.0), cfg);
        let err = ex.extract(&ME, 5_000).await.unwrap_err();
        assert!(matches!(err, FeatureExtractionError::SourcesExhausted { last: HistoryError::PageLimit(1), .. }));
    }

    #[tokio::test]
    async fn missing_native_price_fails_extraction() {
        let src = Arc::new(PagedSource::new("rpc", history(), 0));
        let ex = FeatureExtractor::new(vec![src], oracle(0.0), config());
        let err = ex.extract(&ME, 5_000).await.unwrap_err();
        assert!(matches!(err, FeatureExtractionError::Pricing(OracleError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn token_only_history_needs_no_price() {
        let only_tokens = vec![rec(9, 50, ME, USDC, 10.0, TokenKind::Erc20, Some(USDC))];
        let src = Arc::new(PagedSource::new("rpc", only_tokens, 0));
        let ex = FeatureExtractor::new(vec![src], oracle(0.0), config());
        let f = ex.extract(&ME, 5_000).await.unwrap();
        assert_eq!(f.total_volume_usd, 10.0);
        assert_eq!(f.stablecoin_ratio, 1.0);
    }

    #[test]
    fn duplicate_hashes_count_once() {
        let mut recs = history();
        let mut dup = recs[0].clone();
        dup.token_kind = TokenKind::Erc721;
        dup.counterparty_contract = Some(Address([0x09; 20]));
        recs.insert(1, dup);
        let f = compute_features(&ME, &recs, 2_000.0, &config().stablecoins, 0.0);
        assert_eq!(f.tx_count, 3);
        assert_eq!(f.unique_contracts, 3);
    }

    #[test]
    fn unknown_tokens_have_no_usd_value() {
        let recs = vec![rec(1, 0, ME, Address([1; 20]), 1e6, TokenKind::Erc20, Some(Address([0x33; 20])))];
        let f = compute_features(&ME, &recs, 2_000.0, &HashSet::new(), 0.0);
        assert_eq!(f.tx_count, 1);
        assert_eq!(f.total_volume_usd, 0.0);
        assert_eq!(f.stablecoin_ratio, 0.0);
        assert!(f.is_well_formed());
    }

    #[test]
    fn drawdown_is_capped() {
        let other = Address([0xBB; 20]);
        let recs = vec![
            rec(1, 0, other, ME, 1.0, TokenKind::Native, None),
            rec(2, 1, ME, other, 5.0, TokenKind::Native, None),
        ];
        let f = compute_features(&ME, &recs, 100.0, &HashSet::new(), 0.0);
        assert_eq!(f.max_drawdown_pct, 100.0);
    }
}
