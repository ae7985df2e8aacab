//! Price and volatility reads over prioritized sources.
//!
//! Sources are tried in order (on-chain feed first, HTTP API after). Every
//! call is bounded by the per-call timeout. Results go through the shared
//! [`OracleCache`], keyed by asset and data kind.

use std::sync::Arc;
use std::time::Duration;

use credpass_core::error::OracleError;
use credpass_core::traits::PriceSource;
use credpass_core::types::Price;
use tracing::{debug, warn};

use crate::cache::SingleFlightCache;
use crate::penalty::oracle_penalty;
use crate::volatility::{annualized_volatility_pct, AssetClass};

/// What a cache entry holds for an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Price,
    Volatility { days: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub asset: String,
    pub kind: DataKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OracleValue {
    Price(Price),
    VolatilityPct(f64),
}

pub type OracleCache = SingleFlightCache<CacheKey, OracleValue, OracleError>;

pub struct OracleRiskAdapter {
    sources: Vec<Arc<dyn PriceSource>>,
    cache: Arc<OracleCache>,
    call_timeout: Duration,
}

impl OracleRiskAdapter {
    pub fn new(sources: Vec<Arc<dyn PriceSource>>, cache: Arc<OracleCache>, call_timeout: Duration) -> Self {
        Self {
            sources,
            cache,
            call_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<OracleCache> {
        &self.cache
    }

    /// Latest USD price of `asset`.
    ///
    /// An expired cached price is returned when every source fails.
    pub async fn price(&self, asset: &str) -> Result<Price, OracleError> {
        let key = CacheKey {
            asset: asset.to_uppercase(),
            kind: DataKind::Price,
        };
        let value = self
            .cache
            .get_or_fetch(&key, || self.fetch_price(&key.asset))
            .await?;
        match value {
            OracleValue::Price(p) => Ok(p),
            OracleValue::VolatilityPct(_) => Err(OracleError::Unavailable { asset: key.asset }),
        }
    }

    /// Annualized volatility of `asset` over `days`, in percent.
    ///
    /// Falls back to the asset-class default when no source has history.
    /// Defaults are not cached so a recovered source is picked up on the
    /// next call.
    pub async fn volatility(&self, asset: &str, days: u32) -> f64 {
        let key = CacheKey {
            asset: asset.to_uppercase(),
            kind: DataKind::Volatility { days },
        };
        let measured = self
            .cache
            .get_or_fetch(&key, || self.fetch_volatility(&key.asset, days))
            .await;
        match measured {
            Ok(OracleValue::VolatilityPct(v)) => v,
            Ok(OracleValue::Price(_)) | Err(_) => {
                let class = AssetClass::of(&key.asset);
                let v = class.default_volatility_pct();
                warn!(asset = %key.asset, days, ?class, default_pct = v, "oracle: no price history, using class default");
                v
            }
        }
    }

    /// Volatility of `asset` and the score penalty it implies.
    pub async fn penalty(&self, asset: &str, days: u32) -> (f64, u32) {
        let vol = self.volatility(asset, days).await;
        (vol, oracle_penalty(vol))
    }

    async fn fetch_price(&self, asset: &str) -> Result<OracleValue, OracleError> {
        for src in &self.sources {
            match tokio::time::timeout(self.call_timeout, src.spot_price(asset)).await {
                Ok(Ok(p)) => {
                    debug!(asset, source = src.name(), price = p.as_f64(), "oracle: price");
                    return Ok(OracleValue::Price(p));
                }
                Ok(Err(e)) => warn!(asset, source = src.name(), error = %e, "oracle: price source failed"),
                Err(_) => warn!(asset, source = src.name(), "oracle: price source timed out"),
            }
        }
        Err(OracleError::Unavailable {
            asset: asset.to_string(),
        })
    }

    async fn fetch_volatility(&self, asset: &str, days: u32) -> Result<OracleValue, OracleError> {
        for src in &self.sources {
            match tokio::time::timeout(self.call_timeout, src.daily_closes(asset, days)).await {
                Ok(Ok(closes)) => match annualized_volatility_pct(&closes) {
                    Some(v) => {
                        debug!(asset, source = src.name(), days, volatility_pct = v, "oracle: volatility");
                        return Ok(OracleValue::VolatilityPct(v));
                    }
                    None => debug!(asset, source = src.name(), points = closes.len(), "oracle: history too short"),
                },
                Ok(Err(e @ OracleError::Unsupported { .. })) => debug!(asset, error = %e, "oracle: skipping source"),
                Ok(Err(e)) => warn!(asset, source = src.name(), error = %e, "oracle: history source failed"),
                Err(_) => warn!(asset, source = src.name(), "oracle: history source timed out"),
            }
        }
        Err(OracleError::Unavailable {
            asset: asset.to_string(),
        })
    }
}
