//! Error types for credpass.
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, Hash256};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("invalid length: expected {expected} bytes, got {got}")] InvalidLength { expected: usize, got: usize },
    #[error("invalid hex")] InvalidHex,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid risk band: {0}")]
pub struct InvalidRiskBand(pub u8);

/// Failure of a single history source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("transport: {0}")] Transport(String),
    #[error("http status {0}")] HttpStatus(u16),
    #[error("decode: {0}")] Decode(String),
    #[error("api error: {0}")] Api(String),
    #[error("page limit reached after {0} pages")] PageLimit(u32),
}

/// Failure to turn an account's history into a feature vector.
///
/// Always propagated to the caller; there is no default vector.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureExtractionError {
    #[error("history sources exhausted for {account} after {attempts} attempt(s): {last}")]
    SourcesExhausted { account: Address, attempts: u32, last: HistoryError },
    #[error("no history source configured")]
    NoSources,
    #[error("pricing: {0}")]
    Pricing(#[from] OracleError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Every configured price source failed and no cached value exists.
    #[error("oracle unavailable for {asset}")] Unavailable { asset: String },
    #[error("{source_name}: {message}")] Source { source_name: String, message: String },
    #[error("{source_name} does not provide {kind}")] Unsupported { source_name: String, kind: &'static str },
    #[error("no feed configured for {0}")] UnknownAsset(String),
    #[error("invalid oracle answer: {0}")] InvalidAnswer(String),
}

/// Non-fatal: the resolver degrades to a zero boost.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StakingReadError {
    #[error("transport: {0}")] Transport(String),
    #[error("decode: {0}")] Decode(String),
}

/// Contract-level reasons the ledger refuses a call.
///
/// The `Display` form is the verbatim reason string carried over the wire.
#[derive(
    Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
    bincode::Encode, bincode::Decode,
)]
pub enum LedgerRejection {
    #[error("RateLimitExceeded")] RateLimitExceeded,
    #[error("AmountLimitExceeded")] AmountLimitExceeded,
    #[error("EnforcedPause")] EnforcedPause,
    #[error("ExpectedPause")] ExpectedPause,
    #[error("Unauthorized")] Unauthorized,
    #[error("Soulbound")] Soulbound,
    #[error("InvalidScore")] InvalidScore,
    #[error("NotFound")] NotFound,
    #[error("InvalidNonce")] InvalidNonce,
    #[error("InvalidSignature")] InvalidSignature,
}

impl LedgerRejection {
    pub const ALL: [LedgerRejection; 10] = [
        Self::RateLimitExceeded,
        Self::AmountLimitExceeded,
        Self::EnforcedPause,
        Self::ExpectedPause,
        Self::Unauthorized,
        Self::Soulbound,
        Self::InvalidScore,
        Self::NotFound,
        Self::InvalidNonce,
        Self::InvalidSignature,
    ];
}

impl FromStr for LedgerRejection {
    type Err = UnknownRejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.to_string() == s)
            .ok_or_else(|| UnknownRejection(s.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown rejection reason: {0}")]
pub struct UnknownRejection(pub String);

/// Error talking to a ledger endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network-level failure; safe to retry on another endpoint.
    #[error("transient: {0}")] Transient(String),
    /// The ledger refused the call.
    #[error("rejected: {0}")] Rejected(LedgerRejection),
    #[error("decode: {0}")] Decode(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttestationError {
    /// Terminal policy rejection reported by the ledger.
    #[error("ledger rejected attestation: {0}")] Rejected(LedgerRejection),
    #[error("retries exhausted after {attempts} attempt(s): {last}")] RetriesExhausted { attempts: u32, last: String },
    #[error("no healthy ledger endpoint")] NoHealthyEndpoint,
    #[error("encoding: {0}")] Encoding(String),
    #[error("score out of range: score={score} band={band}")] OutOfRange { score: u32, band: u8 },
    /// Confirmation was not observed before the deadline. The transaction may
    /// still land and must be reconciled.
    #[error("confirmation timeout for {tx_hash}")] ConfirmationTimeout { tx_hash: Hash256 },
}

impl AttestationError {
    /// Whether a caller may retry the same submission later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetriesExhausted { .. } | Self::NoHealthyEndpoint | Self::ConfirmationTimeout { .. }
        )
    }
}
