//! Staked-collateral boost.
//!
//! Tiers are fixed whole-token thresholds (500 / 2 000 / 10 000) scaled by the
//! staking token's decimals. A missing staking contract, a failed read or a
//! timed-out read all resolve to [`StakingBoost::NONE`]: staking never fails
//! a score computation.

use std::sync::Arc;
use std::time::Duration;

use credpass_core::constants::{
    STAKING_TIER1_BOOST, STAKING_TIER1_MIN, STAKING_TIER2_BOOST, STAKING_TIER2_MIN,
    STAKING_TIER3_BOOST, STAKING_TIER3_MIN,
};
use credpass_core::traits::StakingSource;
use credpass_core::types::{Address, StakingBoost, StakingTier};
use tracing::{debug, warn};

/// Threshold in base units; saturates for absurd decimals.
fn threshold(whole_tokens: u128, decimals: u8) -> u128 {
    10u128
        .checked_pow(u32::from(decimals))
        .and_then(|scale| whole_tokens.checked_mul(scale))
        .unwrap_or(u128::MAX)
}

/// Tier for a staked balance given in base units.
pub fn tier_for(staked: u128, decimals: u8) -> StakingTier {
    if staked >= threshold(STAKING_TIER3_MIN, decimals) {
        StakingTier::Tier3
    } else if staked >= threshold(STAKING_TIER2_MIN, decimals) {
        StakingTier::Tier2
    } else if staked >= threshold(STAKING_TIER1_MIN, decimals) {
        StakingTier::Tier1
    } else {
        StakingTier::Unstaked
    }
}

pub fn boost_for(tier: StakingTier) -> u32 {
    match tier {
        StakingTier::Unstaked => 0,
        StakingTier::Tier1 => STAKING_TIER1_BOOST,
        StakingTier::Tier2 => STAKING_TIER2_BOOST,
        StakingTier::Tier3 => STAKING_TIER3_BOOST,
    }
}

pub struct StakingBoostResolver {
    source: Option<Arc<dyn StakingSource>>,
    decimals: u8,
    call_timeout: Duration,
}

impl StakingBoostResolver {
    pub fn new(source: Option<Arc<dyn StakingSource>>, decimals: u8, call_timeout: Duration) -> Self {
        Self {
            source,
            decimals,
            call_timeout,
        }
    }

    /// A resolver with no staking contract.
    pub fn disabled() -> Self {
        Self::new(None, 0, Duration::ZERO)
    }

    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    pub async fn resolve(&self, account: &Address) -> StakingBoost {
        let Some(source) = &self.source else {
            return StakingBoost::NONE;
        };
        let staked = match tokio::time::timeout(self.call_timeout, source.staked_balance(account)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(%account, error = %e, "staking: read failed, no boost");
                return StakingBoost::NONE;
            }
            Err(_) => {
                warn!(%account, timeout_ms = self.call_timeout.as_millis() as u64, "staking: read timed out, no boost");
                return StakingBoost::NONE;
            }
        };
        let tier = tier_for(staked, self.decimals);
        let boost = boost_for(tier);
        debug!(%account, staked = %staked, tier = tier.as_u8(), boost, "staking: resolved");
        StakingBoost {
            staked_amount: staked,
            tier,
            boost,
        }
    }
}
