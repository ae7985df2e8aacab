//! Volatility to score penalty.
//!
//! `penalty = clamp(round((vol - 20) * 1.0), 0, 100)`: volatility up to 20 %
//! is free, every further percentage point costs one score point, and the
//! penalty never exceeds 100.

use credpass_core::constants::{
    ORACLE_PENALTY_CAP, ORACLE_PENALTY_FREE_VOLATILITY_PCT, ORACLE_PENALTY_POINTS_PER_PCT,
};

/// Score points subtracted for an annualized volatility of `volatility_pct`.
///
/// Non-finite input maps to the cap, the same policy the scoring engine
/// applies to its volatility factor.
pub fn oracle_penalty(volatility_pct: f64) -> u32 {
    if !volatility_pct.is_finite() {
        return ORACLE_PENALTY_CAP;
    }
    let raw = ((volatility_pct - ORACLE_PENALTY_FREE_VOLATILITY_PCT) * ORACLE_PENALTY_POINTS_PER_PCT).round();
    raw.clamp(0.0, f64::from(ORACLE_PENALTY_CAP)) as u32
}
