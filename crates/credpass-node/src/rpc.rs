//! JSON-RPC server for the scoring service.
//!
//! Methods: `computescore`, `attestscore`, `getattestedscore`,
//! `getattestationstatus`. Ledger rejections come back with code -32010 and
//! the bare rejection reason as message.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use credpass_attest::TxStatus;
use credpass_core::types::{Address, FeatureVector, Hash256, PassportState, ScoreResult};
use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::service::{ScoreService, ScoredAccount, ServiceError};

/// Unix seconds as RFC 3339, or empty if out of range.
fn iso8601(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .map(|d| d.to_rfc3339())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreJson {
    pub account: Address,
    pub base_score: u32,
    pub staking_boost: u32,
    pub oracle_penalty: u32,
    pub final_score: u32,
    pub risk_band: u8,
    pub explanation: Vec<String>,
    pub computed_at: u64,
    pub computed_at_iso: String,
    pub features: FeatureVector,
}

impl From<&ScoredAccount> for ScoreJson {
    fn from(s: &ScoredAccount) -> Self {
        let ScoreResult {
            base_score,
            staking_boost,
            oracle_penalty,
            final_score,
            risk_band,
            explanation,
            computed_at,
        } = s.score.clone();
        Self {
            account: s.account,
            base_score,
            staking_boost,
            oracle_penalty,
            final_score,
            risk_band: risk_band.as_u8(),
            explanation,
            computed_at,
            computed_at_iso: iso8601(computed_at),
            features: s.features,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestJson {
    pub score: ScoreJson,
    pub tx_hash: Hash256,
    pub status: TxStatus,
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassportJson {
    pub token_id: u64,
    pub owner: Address,
    pub score: u32,
    pub risk_band: u8,
    pub last_updated: u64,
    pub last_updated_iso: String,
}

impl From<PassportState> for PassportJson {
    fn from(p: PassportState) -> Self {
        Self {
            token_id: p.token_id,
            owner: p.owner,
            score: p.score,
            risk_band: p.risk_band.as_u8(),
            last_updated: p.last_updated,
            last_updated_iso: iso8601(p.last_updated),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusJson {
    pub tx_hash: Hash256,
    pub status: TxStatus,
}

fn rpc_error(e: &ServiceError) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(e.rpc_code(), e.rpc_message(), None::<()>)
}

fn parse<T: std::str::FromStr>(what: &str, s: &str) -> Result<T, ErrorObjectOwned>
where
    T::Err: std::fmt::Display,
{
    s.parse()
        .map_err(|e| rpc_error(&ServiceError::InvalidParams(format!("{what}: {e}"))))
}

/// The credpass JSON-RPC interface.
#[rpc(server)]
pub trait CredpassRpc {
    /// Compute the score of an account without attesting it.
    #[method(name = "computescore")]
    async fn compute_score(&self, account: String) -> Result<ScoreJson, ErrorObjectOwned>;

    /// Compute and attest the score of an account.
    #[method(name = "attestscore")]
    async fn attest_score(&self, account: String) -> Result<AttestJson, ErrorObjectOwned>;

    /// The passport currently on the ledger.
    #[method(name = "getattestedscore")]
    async fn get_attested_score(&self, account: String) -> Result<PassportJson, ErrorObjectOwned>;

    /// Status of an earlier attestation transaction.
    #[method(name = "getattestationstatus")]
    async fn get_attestation_status(&self, tx_hash: String) -> Result<StatusJson, ErrorObjectOwned>;
}

pub struct RpcServerImpl {
    service: Arc<ScoreService>,
}

impl RpcServerImpl {
    pub fn new(service: Arc<ScoreService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl CredpassRpcServer for RpcServerImpl {
    async fn compute_score(&self, account: String) -> Result<ScoreJson, ErrorObjectOwned> {
        let account = parse("account", &account)?;
        let scored = self.service.compute_score(account).await.map_err(|e| rpc_error(&e))?;
        Ok(ScoreJson::from(&scored))
    }

    async fn attest_score(&self, account: String) -> Result<AttestJson, ErrorObjectOwned> {
        let account = parse("account", &account)?;
        let attested = self.service.attest(account).await.map_err(|e| rpc_error(&e))?;
        Ok(AttestJson {
            score: ScoreJson::from(&attested.scored),
            tx_hash: attested.outcome.tx_hash,
            status: attested.outcome.status,
            deduplicated: attested.outcome.deduplicated,
        })
    }

    async fn get_attested_score(&self, account: String) -> Result<PassportJson, ErrorObjectOwned> {
        let account = parse("account", &account)?;
        let passport = self
            .service
            .get_attested_score(account)
            .await
            .map_err(|e| rpc_error(&e))?;
        Ok(passport.into())
    }

    async fn get_attestation_status(&self, tx_hash: String) -> Result<StatusJson, ErrorObjectOwned> {
        let tx_hash: Hash256 = parse("tx_hash", &tx_hash)?;
        let status = self
            .service
            .attestation_status(tx_hash)
            .await
            .map_err(|e| rpc_error(&e))?;
        Ok(StatusJson { tx_hash, status })
    }
}

/// Start the JSON-RPC server. Returns the bound address and the handle that
/// stops it.
pub async fn start_rpc_server(
    addr: &str,
    service: Arc<ScoreService>,
) -> Result<(SocketAddr, ServerHandle), ServiceError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| ServiceError::Setup(format!("rpc server bind {addr}: {e}")))?;
    let local = server
        .local_addr()
        .map_err(|e| ServiceError::Setup(e.to_string()))?;
    let handle = server.start(RpcServerImpl::new(service).into_rpc());
    info!(%local, "rpc: listening");
    Ok((local, handle))
}
