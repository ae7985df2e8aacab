//! Price reads from on-chain aggregator feeds.

use std::collections::HashMap;

use async_trait::async_trait;
use credpass_core::error::OracleError;
use credpass_core::traits::PriceSource;
use credpass_core::types::{Address, Price};
use tracing::debug;

use crate::abi::{self, SELECTOR_DECIMALS, SELECTOR_LATEST_ANSWER};
use crate::rpc::RpcClient;

const NAME: &str = "chainlink";

/// Spot prices from `latestAnswer()` on per-asset aggregator contracts.
///
/// Feeds carry no history, so [`PriceSource::daily_closes`] is unsupported.
pub struct ChainlinkFeed {
    rpc: RpcClient,
    /// Uppercase symbol to aggregator address.
    feeds: HashMap<String, Address>,
}

impl ChainlinkFeed {
    pub fn new(rpc: RpcClient, feeds: impl IntoIterator<Item = (String, Address)>) -> Self {
        Self {
            rpc,
            feeds: feeds
                .into_iter()
                .map(|(sym, addr)| (sym.to_uppercase(), addr))
                .collect(),
        }
    }

    fn feed(&self, asset: &str) -> Result<&Address, OracleError> {
        self.feeds
            .get(&asset.to_uppercase())
            .ok_or_else(|| OracleError::UnknownAsset(asset.to_string()))
    }
}

/// Validate a raw aggregator answer.
fn to_price(answer: i128, decimals: u128) -> Result<Price, OracleError> {
    if answer <= 0 {
        return Err(OracleError::InvalidAnswer(format!("non-positive answer {answer}")));
    }
    let decimals = u8::try_from(decimals)
        .map_err(|_| OracleError::InvalidAnswer(format!("decimals {decimals} out of range")))?;
    Ok(Price { answer, decimals })
}

#[async_trait]
impl PriceSource for ChainlinkFeed {
    fn name(&self) -> &str {
        NAME
    }

    async fn spot_price(&self, asset: &str) -> Result<Price, OracleError> {
        let feed = self.feed(asset)?;
        let answer = self
            .rpc
            .eth_call(feed, &abi::encode_call(SELECTOR_LATEST_ANSWER, &[]))
            .await
            .map_err(|e| e.into_oracle(NAME))?;
        let decimals = self
            .rpc
            .eth_call(feed, &abi::encode_call(SELECTOR_DECIMALS, &[]))
            .await
            .map_err(|e| e.into_oracle(NAME))?;
        let answer = abi::decode_i128(&answer).map_err(|e| OracleError::InvalidAnswer(e.to_string()))?;
        let decimals = abi::decode_u128(&decimals).map_err(|e| OracleError::InvalidAnswer(e.to_string()))?;
        debug!(asset, %feed, %answer, %decimals, "chainlink: answer");
        to_price(answer, decimals)
    }

    async fn daily_closes(&self, _asset: &str, _days: u32) -> Result<Vec<f64>, OracleError> {
        Err(OracleError::Unsupported {
            source_name: NAME.to_string(),
            kind: "daily closes",
        })
    }
}
