//! Domain types: accounts, transaction records, feature vectors, scores and
//! the on-ledger passport.
//!
//! Scores are integers in `[SCORE_MIN, SCORE_MAX]`. Monetary feature values
//! are USD as `f64`; every feature is finite and non-negative.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{
    DEFAULT_CB_MAX_OPERATIONS_PER_WINDOW, DEFAULT_CB_MAX_SCORE_DELTA, DEFAULT_CB_WINDOW_SECONDS,
    RISK_BAND_LOW_MIN_SCORE, RISK_BAND_MODERATE_MIN_SCORE, SCORE_MAX,
};
use crate::error::{HexError, InvalidRiskBand};

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], HexError> {
    let body = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if body.len() != N * 2 {
        return Err(HexError::InvalidLength { expected: N, got: body.len() / 2 });
    }
    let bytes = hex::decode(body).map_err(|_| HexError::InvalidHex)?;
    bytes
        .try_into()
        .map_err(|_| HexError::InvalidLength { expected: N, got: 0 })
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte account address, written as `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, bincode::Encode, bincode::Decode)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<20>(s.trim()).map(Self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Hash256
// ---------------------------------------------------------------------------

/// A 32-byte hash: transaction hashes, content digests, idempotency keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, bincode::Encode, bincode::Decode)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({self})")
    }
}

impl FromStr for Hash256 {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s.trim()).map(Self)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Transaction history
// ---------------------------------------------------------------------------

/// What moved in a transaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// The chain's native asset.
    Native,
    Erc20,
    Erc721,
    Erc1155,
    /// Value moved by a contract-internal call.
    Internal,
}

/// One entry of an account's on-chain history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransactionRecord {
    pub hash: Hash256,
    /// Block timestamp (Unix seconds).
    pub timestamp: u64,
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
    /// Amount in whole units of the moved asset.
    pub value: f64,
    /// Contract the account interacted with, when there is one.
    pub counterparty_contract: Option<Address>,
    pub token_kind: TokenKind,
}

impl TransactionRecord {
    /// Whether `account` is the sender.
    pub fn is_outgoing(&self, account: &Address) -> bool {
        self.from == *account
    }
}

// ---------------------------------------------------------------------------
// Feature vector
// ---------------------------------------------------------------------------

/// Normalized description of an account's history, recomputed per request.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct FeatureVector {
    pub tx_count: u64,
    pub total_volume_usd: f64,
    pub avg_tx_value_usd: f64,
    /// Fraction of USD volume touching known stablecoin contracts, in `[0, 1]`.
    pub stablecoin_ratio: f64,
    pub days_active: u64,
    pub unique_contracts: u64,
    /// Annualized volatility of the native asset, in percent.
    pub volatility_pct: f64,
    /// Largest peak-to-trough decline of the running USD balance, in percent.
    pub max_drawdown_pct: f64,
}

impl FeatureVector {
    /// The vector for an account with no history.
    pub fn cold_start() -> Self {
        Self::default()
    }

    pub fn is_cold_start(&self) -> bool {
        self.tx_count == 0
    }

    /// All float features finite and within their documented ranges.
    pub fn is_well_formed(&self) -> bool {
        let floats = [
            self.total_volume_usd,
            self.avg_tx_value_usd,
            self.stablecoin_ratio,
            self.volatility_pct,
            self.max_drawdown_pct,
        ];
        floats.iter().all(|v| v.is_finite() && *v >= 0.0) && self.stablecoin_ratio <= 1.0
    }
}

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

/// Coarse risk classification derived from the final score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[serde(into = "u8", try_from = "u8")]
pub enum RiskBand {
    /// No history to judge: cold-start accounts.
    NoConfidence = 0,
    Low = 1,
    Moderate = 2,
    High = 3,
}

impl RiskBand {
    /// Band for an account with history.
    pub fn from_score(final_score: u32) -> Self {
        if final_score >= RISK_BAND_LOW_MIN_SCORE {
            Self::Low
        } else if final_score >= RISK_BAND_MODERATE_MIN_SCORE {
            Self::Moderate
        } else {
            Self::High
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl From<RiskBand> for u8 {
    fn from(band: RiskBand) -> Self {
        band.as_u8()
    }
}

impl TryFrom<u8> for RiskBand {
    type Error = InvalidRiskBand;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::NoConfidence),
            1 => Ok(Self::Low),
            2 => Ok(Self::Moderate),
            3 => Ok(Self::High),
            other => Err(InvalidRiskBand(other)),
        }
    }
}

/// Output of the scoring engine.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ScoreResult {
    pub base_score: u32,
    pub staking_boost: u32,
    pub oracle_penalty: u32,
    /// `clamp(base + boost - penalty, 0, 1000)`.
    pub final_score: u32,
    pub risk_band: RiskBand,
    /// One line per factor, in a fixed order.
    pub explanation: Vec<String>,
    /// Unix seconds supplied by the caller.
    pub computed_at: u64,
}

impl ScoreResult {
    pub fn is_in_range(&self) -> bool {
        self.base_score <= SCORE_MAX && self.final_score <= SCORE_MAX
    }
}

// ---------------------------------------------------------------------------
// Oracle and staking
// ---------------------------------------------------------------------------

/// A fixed-point price as reported by an oracle.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Price {
    pub answer: i128,
    pub decimals: u8,
}

impl Price {
    pub fn as_f64(&self) -> f64 {
        self.answer as f64 / 10f64.powi(i32::from(self.decimals))
    }
}

/// Discrete bucket derived from the staked amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StakingTier {
    Unstaked = 0,
    Tier1 = 1,
    Tier2 = 2,
    Tier3 = 3,
}

impl StakingTier {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Resolved staking signal for an account.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct StakingBoost {
    /// Staked balance in base units.
    pub staked_amount: u128,
    pub tier: StakingTier,
    pub boost: u32,
}

impl StakingBoost {
    pub const NONE: Self = Self {
        staked_amount: 0,
        tier: StakingTier::Unstaked,
        boost: 0,
    };
}

// ---------------------------------------------------------------------------
// Ledger entities
// ---------------------------------------------------------------------------

/// The soulbound attestation held by one account.
///
/// `window_op_start` / `window_op_count` snapshot the ledger-wide circuit
/// breaker window as of this passport's last write.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PassportState {
    pub token_id: u64,
    pub owner: Address,
    pub score: u32,
    pub risk_band: RiskBand,
    pub last_updated: u64,
    pub window_op_start: u64,
    pub window_op_count: u32,
}

/// Read-only view returned by `getScore`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoreView {
    pub score: u32,
    pub risk_band: RiskBand,
    pub last_updated: u64,
}

impl From<&PassportState> for ScoreView {
    fn from(p: &PassportState) -> Self {
        Self {
            score: p.score,
            risk_band: p.risk_band,
            last_updated: p.last_updated,
        }
    }
}

/// Ledger-side guard on the rate and magnitude of score writes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub max_operations_per_window: u32,
    pub window_seconds: u64,
    pub max_score_delta: u32,
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_operations_per_window: DEFAULT_CB_MAX_OPERATIONS_PER_WINDOW,
            window_seconds: DEFAULT_CB_WINDOW_SECONDS,
            max_score_delta: DEFAULT_CB_MAX_SCORE_DELTA,
            enabled: true,
        }
    }
}
