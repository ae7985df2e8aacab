//! Staking contract reader.

use async_trait::async_trait;
use credpass_core::error::StakingReadError;
use credpass_core::traits::StakingSource;
use credpass_core::types::Address;

use crate::abi::{self, SELECTOR_BALANCE_OF};
use crate::rpc::RpcClient;

/// Reads `balanceOf(account)` on the staking contract.
pub struct StakingContract {
    rpc: RpcClient,
    contract: Address,
}

impl StakingContract {
    pub fn new(rpc: RpcClient, contract: Address) -> Self {
        Self { rpc, contract }
    }

    pub fn contract(&self) -> &Address {
        &self.contract
    }
}

#[async_trait]
impl StakingSource for StakingContract {
    async fn staked_balance(&self, account: &Address) -> Result<u128, StakingReadError> {
        let data = abi::encode_call(SELECTOR_BALANCE_OF, &[abi::address_word(account)]);
        let out = self.rpc.eth_call(&self.contract, &data).await?;
        abi::decode_u128(&out).map_err(|e| StakingReadError::Decode(e.to_string()))
    }
}
