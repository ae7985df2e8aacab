//! # credpass-scoring
//! From account history to a score.
//!
//! - [`features::FeatureExtractor`]: paginated history with source failover, then features
//! - [`staking::StakingBoostResolver`]: staked balance to tier and boost
//! - [`engine::ScoringEngine`]: the pure weighted formula

pub mod engine;
pub mod features;
pub mod staking;

pub use engine::ScoringEngine;
pub use features::{ExtractorConfig, FeatureExtractor};
pub use staking::StakingBoostResolver;
