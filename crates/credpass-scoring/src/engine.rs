//! The scoring formula.
//!
//! Each feature is normalized into `[0, 1]` by a fixed scale and weighted in
//! basis points. Six factors add, volatility and drawdown subtract:
//!
//! | factor | normalizer | weight |
//! |---|---|---|
//! | activity | `tx_count / 100` | 20 % |
//! | volume | `usd / 50 000` | 18 % |
//! | average value | `usd / 500` | 10 % |
//! | stablecoin ratio | as is | 12 % |
//! | account age | `days / 365` | 12 % |
//! | contract diversity | `contracts / 10` | 8 % |
//! | volatility | `pct / 100` | -20 % |
//! | drawdown | `pct / 100` | -10 % |
//!
//! `base = clamp(round(1000 * sum), 0, 1000)` and
//! `final = clamp(base + boost - penalty, 0, 1000)`.
//!
//! Non-finite inputs earn nothing on the positive factors and take the full
//! weight on volatility and drawdown.
//!
//! An account with no transactions scores base 0 and lands in
//! [`RiskBand::NoConfidence`] whatever its final score.

use credpass_core::constants::{
    BPS_PRECISION, NORM_AVG_TX_VALUE_USD, NORM_DAYS_ACTIVE, NORM_DRAWDOWN_PCT, NORM_TX_COUNT,
    NORM_UNIQUE_CONTRACTS, NORM_VOLATILITY_PCT, NORM_VOLUME_USD, SCORE_MAX, SCORE_MIN,
    WEIGHT_ACCOUNT_AGE_BPS, WEIGHT_ACTIVITY_BPS, WEIGHT_AVG_TX_VALUE_BPS,
    WEIGHT_CONTRACT_DIVERSITY_BPS, WEIGHT_DRAWDOWN_PENALTY_BPS, WEIGHT_STABLECOIN_RATIO_BPS,
    WEIGHT_VOLATILITY_PENALTY_BPS, WEIGHT_VOLUME_BPS,
};
use credpass_core::types::{FeatureVector, RiskBand, ScoreResult, StakingBoost};

/// Scale `value` into `[0, 1]`. Non-finite or negative input counts as 0.
fn normalize(value: f64, scale: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    (value / scale).min(1.0)
}

/// As [`normalize`], but non-finite input counts as 1: an unmeasurable risk
/// takes the full penalty, as it does on the oracle penalty curve.
fn normalize_risk(value: f64, scale: f64) -> f64 {
    if !value.is_finite() {
        return 1.0;
    }
    normalize(value, scale)
}

fn weight(bps: u32) -> f64 {
    f64::from(bps) / f64::from(BPS_PRECISION)
}

/// One weighted term of the base score.
struct Factor {
    name: &'static str,
    normalized: f64,
    weight_bps: u32,
    /// Subtracts from the score.
    penalty: bool,
}

impl Factor {
    fn points(&self) -> f64 {
        let p = weight(self.weight_bps) * self.normalized * f64::from(SCORE_MAX);
        if self.penalty { -p } else { p }
    }
}

fn factors(f: &FeatureVector) -> [Factor; 8] {
    [
        Factor {
            name: "activity",
            normalized: normalize(f.tx_count as f64, NORM_TX_COUNT),
            weight_bps: WEIGHT_ACTIVITY_BPS,
            penalty: false,
        },
        Factor {
            name: "volume",
            normalized: normalize(f.total_volume_usd, NORM_VOLUME_USD),
            weight_bps: WEIGHT_VOLUME_BPS,
            penalty: false,
        },
        Factor {
            name: "avg_tx_value",
            normalized: normalize(f.avg_tx_value_usd, NORM_AVG_TX_VALUE_USD),
            weight_bps: WEIGHT_AVG_TX_VALUE_BPS,
            penalty: false,
        },
        Factor {
            name: "stablecoin_ratio",
            normalized: normalize(f.stablecoin_ratio, 1.0),
            weight_bps: WEIGHT_STABLECOIN_RATIO_BPS,
            penalty: false,
        },
        Factor {
            name: "account_age",
            normalized: normalize(f.days_active as f64, NORM_DAYS_ACTIVE),
            weight_bps: WEIGHT_ACCOUNT_AGE_BPS,
            penalty: false,
        },
        Factor {
            name: "contract_diversity",
            normalized: normalize(f.unique_contracts as f64, NORM_UNIQUE_CONTRACTS),
            weight_bps: WEIGHT_CONTRACT_DIVERSITY_BPS,
            penalty: false,
        },
        Factor {
            name: "volatility",
            normalized: normalize_risk(f.volatility_pct, NORM_VOLATILITY_PCT),
            weight_bps: WEIGHT_VOLATILITY_PENALTY_BPS,
            penalty: true,
        },
        Factor {
            name: "drawdown",
            normalized: normalize_risk(f.max_drawdown_pct, NORM_DRAWDOWN_PCT),
            weight_bps: WEIGHT_DRAWDOWN_PENALTY_BPS,
            penalty: true,
        },
    ]
}

/// The production scoring engine. Stateless; every call is a pure function
/// of its arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringEngine;

impl ScoringEngine {
    pub fn new() -> Self {
        Self
    }

    /// Base score in `[0, 1000]` from features alone.
    pub fn base_score(&self, features: &FeatureVector) -> u32 {
        if features.is_cold_start() {
            return SCORE_MIN;
        }
        let total: f64 = factors(features).iter().map(Factor::points).sum();
        total.round().clamp(f64::from(SCORE_MIN), f64::from(SCORE_MAX)) as u32
    }

    /// Combine features, oracle penalty and staking boost into a score.
    pub fn score(
        &self,
        features: &FeatureVector,
        oracle_penalty: u32,
        staking: &StakingBoost,
        computed_at: u64,
    ) -> ScoreResult {
        let cold = features.is_cold_start();
        let base = self.base_score(features);

        let raw = i64::from(base) + i64::from(staking.boost) - i64::from(oracle_penalty);
        let final_score = raw.clamp(i64::from(SCORE_MIN), i64::from(SCORE_MAX)) as u32;

        let risk_band = if cold {
            RiskBand::NoConfidence
        } else {
            RiskBand::from_score(final_score)
        };

        let mut explanation = Vec::with_capacity(12);
        if cold {
            explanation.push("cold start: no transactions in range, base score 0".to_string());
        } else {
            for f in factors(features) {
                explanation.push(format!(
                    "{}: normalized {:.4} x {} bps = {:+.1} pts",
                    f.name,
                    f.normalized,
                    f.weight_bps,
                    f.points()
                ));
            }
        }
        explanation.push(format!("base score: {base}"));
        explanation.push(format!(
            "staking boost: +{} (tier {})",
            staking.boost,
            staking.tier.as_u8()
        ));
        explanation.push(format!("oracle penalty: -{oracle_penalty}"));
        explanation.push(format!("final score: {final_score}, risk band {risk_band}"));

        ScoreResult {
            base_score: base,
            staking_boost: staking.boost,
            oracle_penalty,
            final_score,
            risk_band,
            explanation,
            computed_at,
        }
    }
}
