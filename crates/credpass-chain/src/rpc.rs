//! JSON-RPC 2.0 client over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use credpass_core::error::{HistoryError, OracleError, StakingReadError};
use credpass_core::types::Address;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::abi::{self, AbiError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport: {0}")] Transport(String),
    #[error("http status {0}")] HttpStatus(u16),
    #[error("rpc error {code}: {message}")] Rpc { code: i64, message: String },
    #[error("decode: {0}")] Decode(String),
}

impl From<AbiError> for RpcError {
    fn from(e: AbiError) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<RpcError> for HistoryError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Transport(m) => Self::Transport(m),
            RpcError::HttpStatus(s) => Self::HttpStatus(s),
            RpcError::Rpc { code, message } => Self::Api(format!("{code}: {message}")),
            RpcError::Decode(m) => Self::Decode(m),
        }
    }
}

impl From<RpcError> for StakingReadError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Decode(m) => Self::Decode(m),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl RpcError {
    pub fn into_oracle(self, source_name: &str) -> OracleError {
        OracleError::Source {
            source_name: source_name.to_string(),
            message: self.to_string(),
        }
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, String> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .build()
        .map_err(|e| format!("failed to build http client: {e}"))
}

pub struct RpcClient {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Every request is bounded by `timeout`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self {
            client: http_client(timeout).map_err(RpcError::Transport)?,
            endpoint: endpoint.to_owned(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RpcError::HttpStatus(status.as_u16()));
        }

        let resp: Value = resp
            .json()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))?;
        decode_response(resp)
    }

    // ── Convenience wrappers ──────────────────────────────────────────────────

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let q: String = self.call("eth_blockNumber", json!([])).await?;
        Ok(abi::parse_quantity(&q)?)
    }

    /// Read-only contract call against the latest block.
    pub async fn eth_call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let params = json!([
            { "to": to.to_string(), "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        let out: String = self.call("eth_call", params).await?;
        let body = out.strip_prefix("0x").unwrap_or(&out);
        hex::decode(body).map_err(|e| RpcError::Decode(format!("eth_call result: {e}")))
    }
}

/// Split a JSON-RPC response into its result or error.
pub(crate) fn decode_response<T: DeserializeOwned>(resp: Value) -> Result<T, RpcError> {
    if let Some(err) = resp.get("error") {
        if !err.is_null() {
            return Err(RpcError::Rpc {
                code: err["code"].as_i64().unwrap_or(0),
                message: err["message"].as_str().unwrap_or_default().to_string(),
            });
        }
    }
    serde_json::from_value(resp["result"].clone()).map_err(|e| RpcError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_result() {
        let v = json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"});
        let r: String = decode_response(v).unwrap();
        assert_eq!(r, "0x10");
    }

    #[test]
    fn response_error() {
        let v = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "execution reverted"}});
        let err = decode_response::<String>(v).unwrap_err();
        assert_eq!(
            err,
            RpcError::Rpc { code: -32000, message: "execution reverted".into() }
        );
    }

    #[test]
    fn response_null_error_is_ignored() {
        let v = json!({"jsonrpc": "2.0", "id": 1, "error": null, "result": 7});
        let r: u64 = decode_response(v).unwrap();
        assert_eq!(r, 7);
    }

    #[test]
    fn response_wrong_type() {
        let v = json!({"jsonrpc": "2.0", "id": 1, "result": "not a number"});
        assert!(matches!(decode_response::<u64>(v), Err(RpcError::Decode(_))));
    }

    #[test]
    fn history_error_mapping() {
        assert_eq!(HistoryError::from(RpcError::HttpStatus(502)), HistoryError::HttpStatus(502));
        assert!(matches!(
            HistoryError::from(RpcError::Rpc { code: 1, message: "x".into() }),
            HistoryError::Api(_)
        ));
    }

    #[test]
    fn client_builds() {
        let c = RpcClient::new("http://127.0.0.1:8545", Duration::from_secs(3)).unwrap();
        assert_eq!(c.endpoint(), "http://127.0.0.1:8545");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let c = RpcClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let err = c.block_number().await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }
}
