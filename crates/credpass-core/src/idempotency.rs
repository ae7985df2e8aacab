//! Idempotency keys for attestation writes.
//!
//! The key commits to the account, every feature, and every score component
//! except `computed_at` and the human-readable explanation, so two computations
//! over the same inputs at different times map to the same key. Fields are fed
//! to SHA-256 in a fixed order with fixed-width little-endian encodings; floats
//! are hashed by their IEEE-754 bit pattern.

use sha2::{Digest, Sha256};

use crate::types::{Address, FeatureVector, Hash256, ScoreResult};

const DOMAIN_CONTENT: &[u8] = b"credpass/content/v1";
const DOMAIN_KEY: &[u8] = b"credpass/idempotency/v1";

/// Digest of `FeatureVector ∥ ScoreResult`.
pub fn content_digest(features: &FeatureVector, score: &ScoreResult) -> Hash256 {
    let mut h = Sha256::new();
    h.update(DOMAIN_CONTENT);

    h.update(features.tx_count.to_le_bytes());
    h.update(features.total_volume_usd.to_bits().to_le_bytes());
    h.update(features.avg_tx_value_usd.to_bits().to_le_bytes());
    h.update(features.stablecoin_ratio.to_bits().to_le_bytes());
    h.update(features.days_active.to_le_bytes());
    h.update(features.unique_contracts.to_le_bytes());
    h.update(features.volatility_pct.to_bits().to_le_bytes());
    h.update(features.max_drawdown_pct.to_bits().to_le_bytes());

    h.update(score.base_score.to_le_bytes());
    h.update(score.staking_boost.to_le_bytes());
    h.update(score.oracle_penalty.to_le_bytes());
    h.update(score.final_score.to_le_bytes());
    h.update([score.risk_band.as_u8()]);

    Hash256(h.finalize().into())
}

/// Deterministic key identifying one logical attestation write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyKey(pub Hash256);

impl IdempotencyKey {
    pub fn derive(account: &Address, features: &FeatureVector, score: &ScoreResult) -> Self {
        let digest = content_digest(features, score);
        let mut h = Sha256::new();
        h.update(DOMAIN_KEY);
        h.update(account.as_bytes());
        h.update(digest.as_bytes());
        Self(Hash256(h.finalize().into()))
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
