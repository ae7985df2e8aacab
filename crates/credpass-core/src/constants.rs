//! Scoring, staking and ledger constants.
//!
//! Scores are integers in `[SCORE_MIN, SCORE_MAX]`. Weights are expressed in
//! basis points of `SCORE_MAX` so the positive factors sum to 8_000 bps and the
//! two penalty factors to 3_000 bps.

/// Lowest attestable score.
pub const SCORE_MIN: u32 = 0;
/// Highest attestable score.
pub const SCORE_MAX: u32 = 1_000;

/// Basis-point denominator.
pub const BPS_PRECISION: u32 = 10_000;

/// Final score at or above which an account is in the low-risk band.
pub const RISK_BAND_LOW_MIN_SCORE: u32 = 750;
/// Final score at or above which an account is in the moderate-risk band.
pub const RISK_BAND_MODERATE_MIN_SCORE: u32 = 500;

pub const SECS_PER_DAY: u64 = 86_400;
pub const DAYS_PER_YEAR: f64 = 365.0;

// ---------------------------------------------------------------------------
// Scoring weights (bps of SCORE_MAX)
// ---------------------------------------------------------------------------

pub const WEIGHT_ACTIVITY_BPS: u32 = 2_000;
pub const WEIGHT_VOLUME_BPS: u32 = 1_800;
pub const WEIGHT_AVG_TX_VALUE_BPS: u32 = 1_000;
pub const WEIGHT_STABLECOIN_RATIO_BPS: u32 = 1_200;
pub const WEIGHT_ACCOUNT_AGE_BPS: u32 = 1_200;
pub const WEIGHT_CONTRACT_DIVERSITY_BPS: u32 = 800;
pub const WEIGHT_VOLATILITY_PENALTY_BPS: u32 = 2_000;
pub const WEIGHT_DRAWDOWN_PENALTY_BPS: u32 = 1_000;

// ---------------------------------------------------------------------------
// Feature normalizers: the raw value that saturates a factor at 1.0
// ---------------------------------------------------------------------------

pub const NORM_TX_COUNT: f64 = 100.0;
pub const NORM_VOLUME_USD: f64 = 50_000.0;
pub const NORM_AVG_TX_VALUE_USD: f64 = 500.0;
pub const NORM_DAYS_ACTIVE: f64 = 365.0;
pub const NORM_UNIQUE_CONTRACTS: f64 = 10.0;
pub const NORM_VOLATILITY_PCT: f64 = 100.0;
pub const NORM_DRAWDOWN_PCT: f64 = 100.0;

// ---------------------------------------------------------------------------
// Oracle penalty curve
// ---------------------------------------------------------------------------

/// Volatility (percent) below which no oracle penalty applies.
pub const ORACLE_PENALTY_FREE_VOLATILITY_PCT: f64 = 20.0;
/// Penalty points per volatility percentage point above the free threshold.
pub const ORACLE_PENALTY_POINTS_PER_PCT: f64 = 1.0;
/// Maximum oracle penalty.
pub const ORACLE_PENALTY_CAP: u32 = 100;

/// Fallback annualized volatility for stablecoins, in percent.
pub const DEFAULT_VOLATILITY_STABLECOIN_PCT: f64 = 1.0;
/// Fallback annualized volatility for major assets (BTC, ETH), in percent.
pub const DEFAULT_VOLATILITY_MAJOR_PCT: f64 = 60.0;
/// Fallback annualized volatility for every other asset, in percent.
pub const DEFAULT_VOLATILITY_OTHER_PCT: f64 = 90.0;

/// Default oracle cache time-to-live.
pub const DEFAULT_ORACLE_CACHE_TTL_SECS: u64 = 300;
/// Default look-back for volatility, in days.
pub const DEFAULT_VOLATILITY_DAYS: u32 = 30;

// ---------------------------------------------------------------------------
// Staking tiers (whole tokens) and boosts
// ---------------------------------------------------------------------------

pub const STAKING_TIER1_MIN: u128 = 500;
pub const STAKING_TIER2_MIN: u128 = 2_000;
pub const STAKING_TIER3_MIN: u128 = 10_000;

pub const STAKING_TIER1_BOOST: u32 = 50;
pub const STAKING_TIER2_BOOST: u32 = 150;
pub const STAKING_TIER3_BOOST: u32 = 300;

/// Decimals of the staking token's base unit.
pub const DEFAULT_STAKING_DECIMALS: u8 = 18;

// ---------------------------------------------------------------------------
// History extraction
// ---------------------------------------------------------------------------

/// Default number of blocks scanned back from the chain head.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 2_500_000;
/// Hard cap on pages fetched from one source in one extraction.
pub const MAX_HISTORY_PAGES: u32 = 1_000;

// ---------------------------------------------------------------------------
// Circuit breaker defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_CB_MAX_OPERATIONS_PER_WINDOW: u32 = 100;
pub const DEFAULT_CB_WINDOW_SECONDS: u64 = 3_600;
pub const DEFAULT_CB_MAX_SCORE_DELTA: u32 = 200;

// ---------------------------------------------------------------------------
// Ledger retention
// ---------------------------------------------------------------------------

/// Events the passport ledger keeps in its log.
pub const LEDGER_EVENT_LOG_CAPACITY: usize = 10_000;
/// Receipts the in-process ledger keeps, oldest evicted first. Must outlive
/// the writer's dedup window at the expected write rate.
pub const LEDGER_RECEIPT_CAPACITY: usize = 100_000;

// ---------------------------------------------------------------------------
// Attestation write path
// ---------------------------------------------------------------------------

/// Upper bound on waiting for a receipt before reporting `Pending`.
pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 2_000;
/// How long a completed submission is remembered for duplicate detection.
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 600;

/// Default JSON-RPC port of the scoring service.
pub const DEFAULT_RPC_PORT: u16 = 8645;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_weights_sum_to_eighty_percent() {
        let sum = WEIGHT_ACTIVITY_BPS
            + WEIGHT_VOLUME_BPS
            + WEIGHT_AVG_TX_VALUE_BPS
            + WEIGHT_STABLECOIN_RATIO_BPS
            + WEIGHT_ACCOUNT_AGE_BPS
            + WEIGHT_CONTRACT_DIVERSITY_BPS;
        assert_eq!(sum, 8_000);
    }

    #[test]
    fn band_thresholds_ordered() {
        assert!(RISK_BAND_MODERATE_MIN_SCORE < RISK_BAND_LOW_MIN_SCORE);
        assert!(RISK_BAND_LOW_MIN_SCORE <= SCORE_MAX);
    }

    #[test]
    fn staking_tiers_monotonic() {
        assert!(STAKING_TIER1_MIN < STAKING_TIER2_MIN);
        assert!(STAKING_TIER2_MIN < STAKING_TIER3_MIN);
        assert!(STAKING_TIER1_BOOST < STAKING_TIER2_BOOST);
        assert!(STAKING_TIER2_BOOST < STAKING_TIER3_BOOST);
    }
}
