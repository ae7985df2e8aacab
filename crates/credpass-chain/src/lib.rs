//! # credpass-chain
//! Network adapters implementing the credpass-core source traits:
//! - [`rpc::RpcClient`]: JSON-RPC 2.0 over HTTP
//! - [`history::IndexerRpcSource`] / [`history::ExplorerSource`]: transaction history
//! - [`chainlink::ChainlinkFeed`] / [`price_api::HttpPriceApi`]: prices
//! - [`staking::StakingContract`]: staked balances

pub mod abi;
pub mod chainlink;
pub mod history;
pub mod price_api;
pub mod rpc;
pub mod staking;

pub use chainlink::ChainlinkFeed;
pub use history::{ExplorerSource, IndexerRpcSource};
pub use price_api::HttpPriceApi;
pub use rpc::RpcClient;
pub use staking::StakingContract;
