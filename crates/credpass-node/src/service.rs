//! The scoring service.
//!
//! [`ScoreService`] composes extraction, oracle, staking and scoring into
//! `compute_score`, and the attestation writer into `attest`. Feature
//! extraction, the oracle penalty and the staking boost run concurrently;
//! reads are bounded by the configured deadline. A broadcast attestation is
//! never cancelled by the deadline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use config::ConfigError;
use credpass_attest::{
    AttestationSigner, AttestationWriter, EndpointPool, JsonRpcTransport, LedgerTransport, SubmitOutcome, TxStatus,
};
use credpass_chain::{ChainlinkFeed, ExplorerSource, HttpPriceApi, IndexerRpcSource, RpcClient, StakingContract};
use credpass_core::error::{AttestationError, FeatureExtractionError, LedgerRejection};
use credpass_core::traits::{Clock, HistorySource, PriceSource, StakingSource, SystemClock};
use credpass_core::types::{Address, FeatureVector, Hash256, PassportState, ScoreResult};
use credpass_oracle::{OracleCache, OracleRiskAdapter};
use credpass_scoring::{ExtractorConfig, FeatureExtractor, ScoringEngine, StakingBoostResolver};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Extraction(#[from] FeatureExtractionError),
    #[error(transparent)]
    Attestation(#[from] AttestationError),
    #[error("no passport for {0}")]
    NotFound(Address),
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("setup: {0}")]
    Setup(String),
}

impl ServiceError {
    /// JSON-RPC error code.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::InvalidParams(_) => -32602,
            Self::Extraction(_) => -32001,
            Self::NotFound(_) => -32004,
            Self::Timeout(_) => -32008,
            Self::Attestation(AttestationError::Rejected(_)) => credpass_attest::transport::REJECTION_CODE,
            Self::Attestation(_) => -32011,
            Self::Config(_) | Self::Setup(_) => -32603,
        }
    }

    /// JSON-RPC error message. Ledger rejections carry the bare reason.
    pub fn rpc_message(&self) -> String {
        match self {
            Self::Attestation(AttestationError::Rejected(r)) => r.to_string(),
            other => other.to_string(),
        }
    }

    pub fn rejection(&self) -> Option<LedgerRejection> {
        match self {
            Self::Attestation(AttestationError::Rejected(r)) => Some(*r),
            _ => None,
        }
    }
}

/// A computed score with the features it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredAccount {
    pub account: Address,
    pub features: FeatureVector,
    pub score: ScoreResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attested {
    pub scored: ScoredAccount,
    pub outcome: SubmitOutcome,
}

/// Tunables not owned by any component.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub native_asset: String,
    pub volatility_days: u32,
    pub max_block_range: u64,
    pub deadline: Duration,
}

impl From<&ServiceConfig> for ServiceSettings {
    fn from(cfg: &ServiceConfig) -> Self {
        Self {
            native_asset: cfg.oracle.native_asset.clone(),
            volatility_days: cfg.oracle.volatility_days,
            max_block_range: cfg.scoring.max_block_range,
            deadline: cfg.deadline(),
        }
    }
}

pub struct ScoreService {
    extractor: FeatureExtractor,
    oracle: Arc<OracleRiskAdapter>,
    staking: StakingBoostResolver,
    engine: ScoringEngine,
    writer: Arc<AttestationWriter>,
    clock: Arc<dyn Clock>,
    settings: ServiceSettings,
}

impl ScoreService {
    pub fn new(
        extractor: FeatureExtractor,
        oracle: Arc<OracleRiskAdapter>,
        staking: StakingBoostResolver,
        writer: Arc<AttestationWriter>,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            extractor,
            oracle,
            staking,
            engine: ScoringEngine::new(),
            writer,
            clock,
            settings,
        }
    }

    /// Build every component from `cfg`, writing through `ledger`.
    pub fn from_config(
        cfg: &ServiceConfig,
        signer: AttestationSigner,
        ledger: Vec<Arc<dyn LedgerTransport>>,
    ) -> Result<Self, ServiceError> {
        let history = history_sources(cfg)?;
        let prices = price_sources(cfg)?;
        info!(
            history_sources = history.len(),
            price_sources = prices.len(),
            ledger_endpoints = ledger.len(),
            "service: building"
        );
        if history.is_empty() {
            warn!("service: no history source configured; every score request will fail");
        }

        let cache = Arc::new(OracleCache::new(Duration::from_secs(cfg.oracle.cache_ttl_secs)));
        let oracle = Arc::new(OracleRiskAdapter::new(
            prices,
            cache,
            Duration::from_secs(cfg.oracle.call_timeout_secs),
        ));
        let extractor = FeatureExtractor::new(
            history,
            oracle.clone(),
            ExtractorConfig {
                native_asset: cfg.oracle.native_asset.clone(),
                stablecoins: cfg.oracle.stablecoins.iter().copied().collect::<HashSet<_>>(),
                volatility_days: cfg.oracle.volatility_days,
                retry: cfg.history.retry,
                call_timeout: Duration::from_secs(cfg.history.call_timeout_secs),
                max_pages: cfg.history.max_pages,
            },
        );
        let staking = StakingBoostResolver::new(
            staking_source(cfg)?,
            cfg.staking.decimals,
            Duration::from_secs(cfg.staking.call_timeout_secs),
        );
        let pool = Arc::new(EndpointPool::new(ledger, cfg.ledger.max_connections));
        let writer = Arc::new(AttestationWriter::new(signer, pool, cfg.ledger.writer_config()));

        Ok(Self::new(
            extractor,
            oracle,
            staking,
            writer,
            Arc::new(SystemClock),
            ServiceSettings::from(cfg),
        ))
    }

    pub fn writer(&self) -> &Arc<AttestationWriter> {
        &self.writer
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    async fn compute_unbounded(&self, account: Address) -> Result<ScoredAccount, ServiceError> {
        let (features, (volatility, penalty), boost) = tokio::join!(
            self.extractor.extract(&account, self.settings.max_block_range),
            self.oracle.penalty(&self.settings.native_asset, self.settings.volatility_days),
            self.staking.resolve(&account),
        );
        let features = features?;
        let score = self.engine.score(&features, penalty, &boost, self.clock.now());
        info!(
            %account,
            base = score.base_score,
            boost = score.staking_boost,
            penalty = score.oracle_penalty,
            volatility,
            final_score = score.final_score,
            band = %score.risk_band,
            "service: score computed"
        );
        Ok(ScoredAccount {
            account,
            features,
            score,
        })
    }

    pub async fn compute_score(&self, account: Address) -> Result<ScoredAccount, ServiceError> {
        let deadline = self.settings.deadline;
        tokio::time::timeout(deadline, self.compute_unbounded(account))
            .await
            .map_err(|_| {
                warn!(%account, ?deadline, "service: compute deadline exceeded");
                ServiceError::Timeout(deadline)
            })?
    }

    pub async fn get_attested_score(&self, account: Address) -> Result<PassportState, ServiceError> {
        let deadline = self.settings.deadline;
        tokio::time::timeout(deadline, self.writer.read_passport(&account))
            .await
            .map_err(|_| ServiceError::Timeout(deadline))??
            .ok_or(ServiceError::NotFound(account))
    }

    /// Compute and submit. Only the computation is bounded by the deadline.
    pub async fn attest(&self, account: Address) -> Result<Attested, ServiceError> {
        let scored = self.compute_score(account).await?;
        let outcome = self.writer.submit(account, &scored.features, &scored.score).await?;
        debug!(%account, tx = %outcome.tx_hash, status = ?outcome.status, "service: attested");
        Ok(Attested { scored, outcome })
    }

    pub async fn attestation_status(&self, tx_hash: Hash256) -> Result<TxStatus, ServiceError> {
        Ok(self.writer.reconcile(&tx_hash).await?)
    }
}

fn setup_err(what: &str, e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Setup(format!("{what}: {e}"))
}

fn history_sources(cfg: &ServiceConfig) -> Result<Vec<Arc<dyn HistorySource>>, ServiceError> {
    let timeout = Duration::from_secs(cfg.history.call_timeout_secs);
    let mut out: Vec<Arc<dyn HistorySource>> = Vec::new();
    for endpoint in &cfg.history.rpc_endpoints {
        let rpc = RpcClient::new(endpoint, timeout).map_err(|e| setup_err(endpoint, e))?;
        out.push(Arc::new(IndexerRpcSource::new(rpc)));
    }
    if let Some(url) = &cfg.history.explorer_url {
        let api_key = cfg
            .history
            .explorer_api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        let explorer = ExplorerSource::new(url, api_key, cfg.history.explorer_page_size, timeout)
            .map_err(|e| setup_err(url, e))?;
        out.push(Arc::new(explorer));
    }
    Ok(out)
}

fn price_sources(cfg: &ServiceConfig) -> Result<Vec<Arc<dyn PriceSource>>, ServiceError> {
    let timeout = Duration::from_secs(cfg.oracle.call_timeout_secs);
    let mut out: Vec<Arc<dyn PriceSource>> = Vec::new();
    if let Some(endpoint) = &cfg.oracle.rpc_endpoint {
        if !cfg.oracle.chainlink_feeds.is_empty() {
            let rpc = RpcClient::new(endpoint, timeout).map_err(|e| setup_err(endpoint, e))?;
            let feeds = cfg.oracle.chainlink_feeds.iter().map(|(s, a)| (s.clone(), *a));
            out.push(Arc::new(ChainlinkFeed::new(rpc, feeds)));
        }
    }
    if let Some(url) = &cfg.oracle.price_api_url {
        out.push(Arc::new(HttpPriceApi::new(url, timeout).map_err(|e| setup_err(url, e))?));
    }
    Ok(out)
}

fn staking_source(cfg: &ServiceConfig) -> Result<Option<Arc<dyn StakingSource>>, ServiceError> {
    let (Some(endpoint), Some(contract)) = (&cfg.staking.rpc_endpoint, cfg.staking.contract) else {
        return Ok(None);
    };
    let rpc = RpcClient::new(endpoint, Duration::from_secs(cfg.staking.call_timeout_secs))
        .map_err(|e| setup_err(endpoint, e))?;
    Ok(Some(Arc::new(StakingContract::new(rpc, contract))))
}

/// One [`JsonRpcTransport`] per configured ledger endpoint.
pub fn json_rpc_transports(cfg: &ServiceConfig) -> Result<Vec<Arc<dyn LedgerTransport>>, ServiceError> {
    let timeout = Duration::from_secs(cfg.ledger.request_timeout_secs);
    cfg.ledger
        .endpoints
        .iter()
        .map(|ep| {
            JsonRpcTransport::new(ep, timeout)
                .map(|t| Arc::new(t) as Arc<dyn LedgerTransport>)
                .map_err(|e| setup_err(ep, e))
        })
        .collect()
}
