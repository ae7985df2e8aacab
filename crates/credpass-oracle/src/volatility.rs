//! Volatility estimation.
//!
//! Volatility is the sample standard deviation of daily log returns, scaled
//! to a year by `sqrt(365)` and expressed in percent. When no price history
//! is available the asset's class default is used instead.

use credpass_core::constants::{
    DAYS_PER_YEAR, DEFAULT_VOLATILITY_MAJOR_PCT, DEFAULT_VOLATILITY_OTHER_PCT,
    DEFAULT_VOLATILITY_STABLECOIN_PCT,
};

const STABLECOINS: &[&str] = &["USDC", "USDT", "DAI", "BUSD", "TUSD", "USDP", "FRAX", "LUSD", "PYUSD"];
const MAJORS: &[&str] = &["BTC", "ETH", "WBTC", "WETH"];

/// Coarse asset grouping used for default volatilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    Stablecoin,
    Major,
    Other,
}

impl AssetClass {
    pub fn of(symbol: &str) -> Self {
        let s = symbol.to_uppercase();
        if STABLECOINS.contains(&s.as_str()) {
            Self::Stablecoin
        } else if MAJORS.contains(&s.as_str()) {
            Self::Major
        } else {
            Self::Other
        }
    }

    pub fn default_volatility_pct(self) -> f64 {
        match self {
            Self::Stablecoin => DEFAULT_VOLATILITY_STABLECOIN_PCT,
            Self::Major => DEFAULT_VOLATILITY_MAJOR_PCT,
            Self::Other => DEFAULT_VOLATILITY_OTHER_PCT,
        }
    }
}

/// Annualized volatility in percent from daily closes, oldest first.
///
/// Needs at least three strictly positive closes (two returns); returns
/// `None` otherwise.
pub fn annualized_volatility_pct(closes: &[f64]) -> Option<f64> {
    if closes.len() < 3 || closes.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        return None;
    }
    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let pct = var.sqrt() * DAYS_PER_YEAR.sqrt() * 100.0;
    pct.is_finite().then_some(pct)
}
