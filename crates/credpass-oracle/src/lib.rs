//! # credpass-oracle
//! Market-risk inputs for scoring.
//!
//! - [`cache::SingleFlightCache`]: TTL cache where concurrent misses share one fetch
//! - [`volatility`]: annualized volatility and per-asset-class defaults
//! - [`penalty::oracle_penalty`]: volatility to score penalty
//! - [`adapter::OracleRiskAdapter`]: price and volatility over prioritized sources

pub mod adapter;
pub mod cache;
pub mod penalty;
pub mod volatility;

pub use adapter::{OracleCache, OracleRiskAdapter};
pub use cache::SingleFlightCache;
pub use penalty::oracle_penalty;
pub use volatility::AssetClass;
