//! Transaction history sources.
//!
//! [`IndexerRpcSource`] talks to an indexing JSON-RPC node exposing
//! `credpass_getTransactions`; [`ExplorerSource`] talks to an Etherscan-style
//! explorer API and is used as the fallback.

use std::time::Duration;

use async_trait::async_trait;
use credpass_core::error::HistoryError;
use credpass_core::traits::{BlockRange, HistoryPage, HistorySource};
use credpass_core::types::{Address, Hash256, TokenKind, TransactionRecord};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::abi::{self, units_to_f64};
use crate::rpc::{http_client, RpcClient};

// ---------------------------------------------------------------------------
// Indexer JSON-RPC
// ---------------------------------------------------------------------------

/// One transaction as returned by `credpass_getTransactions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexedTx {
    hash: Hash256,
    timestamp: u64,
    from: Address,
    to: Option<Address>,
    /// Base units as a decimal string.
    value: String,
    #[serde(default = "default_decimals")]
    decimals: u8,
    contract: Option<Address>,
    kind: TokenKind,
}

fn default_decimals() -> u8 {
    18
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexedPage {
    transactions: Vec<IndexedTx>,
    next_cursor: Option<String>,
}

impl TryFrom<IndexedTx> for TransactionRecord {
    type Error = HistoryError;

    fn try_from(tx: IndexedTx) -> Result<Self, Self::Error> {
        let value = units_to_f64(&tx.value, tx.decimals)
            .ok_or_else(|| HistoryError::Decode(format!("bad value {:?} in {}", tx.value, tx.hash)))?;
        Ok(TransactionRecord {
            hash: tx.hash,
            timestamp: tx.timestamp,
            from: tx.from,
            to: tx.to,
            value,
            counterparty_contract: tx.contract,
            token_kind: tx.kind,
        })
    }
}

fn parse_indexed_page(v: Value) -> Result<HistoryPage, HistoryError> {
    let page: IndexedPage =
        serde_json::from_value(v).map_err(|e| HistoryError::Decode(e.to_string()))?;
    let records = page
        .transactions
        .into_iter()
        .map(TransactionRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(HistoryPage {
        records,
        next_cursor: page.next_cursor,
    })
}

/// History from an indexing RPC node.
pub struct IndexerRpcSource {
    rpc: RpcClient,
    name: String,
}

impl IndexerRpcSource {
    pub fn new(rpc: RpcClient) -> Self {
        let name = format!("rpc:{}", rpc.endpoint());
        Self { rpc, name }
    }
}

#[async_trait]
impl HistorySource for IndexerRpcSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head_block(&self) -> Result<u64, HistoryError> {
        Ok(self.rpc.block_number().await?)
    }

    async fn fetch_page(
        &self,
        account: &Address,
        range: BlockRange,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, HistoryError> {
        let params = json!([account.to_string(), range.from, range.to, cursor]);
        let v: Value = self.rpc.call("credpass_getTransactions", params).await?;
        parse_indexed_page(v)
    }
}

// ---------------------------------------------------------------------------
// Etherscan-style explorer
// ---------------------------------------------------------------------------

/// Explorer pages cover plain transactions first, then token transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Transactions,
    TokenTransfers,
}

impl Phase {
    fn action(self) -> &'static str {
        match self {
            Self::Transactions => "txlist",
            Self::TokenTransfers => "tokentx",
        }
    }
}

/// Cursor format: `"tx:<page>"` or `"token:<page>"`, pages 1-based.
fn parse_cursor(cursor: Option<&str>) -> Result<(Phase, u32), HistoryError> {
    let Some(c) = cursor else {
        return Ok((Phase::Transactions, 1));
    };
    let (phase, page) = c
        .split_once(':')
        .ok_or_else(|| HistoryError::Decode(format!("bad cursor {c:?}")))?;
    let phase = match phase {
        "tx" => Phase::Transactions,
        "token" => Phase::TokenTransfers,
        _ => return Err(HistoryError::Decode(format!("bad cursor {c:?}"))),
    };
    let page = page
        .parse()
        .map_err(|_| HistoryError::Decode(format!("bad cursor {c:?}")))?;
    Ok((phase, page))
}

fn next_cursor(phase: Phase, page: u32, returned: usize, page_size: u32) -> Option<String> {
    if returned >= page_size as usize {
        let tag = if phase == Phase::Transactions { "tx" } else { "token" };
        Some(format!("{tag}:{}", page + 1))
    } else if phase == Phase::Transactions {
        Some("token:1".to_string())
    } else {
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerTx {
    hash: Hash256,
    time_stamp: String,
    from: Address,
    #[serde(default)]
    to: String,
    value: String,
    #[serde(default)]
    input: String,
    #[serde(default)]
    contract_address: String,
    #[serde(default)]
    token_decimal: Option<String>,
}

fn optional_address(s: &str) -> Result<Option<Address>, HistoryError> {
    if s.is_empty() {
        return Ok(None);
    }
    s.parse()
        .map(Some)
        .map_err(|e| HistoryError::Decode(format!("address {s:?}: {e}")))
}

fn explorer_record(tx: ExplorerTx, phase: Phase) -> Result<TransactionRecord, HistoryError> {
    let timestamp = tx
        .time_stamp
        .parse()
        .map_err(|_| HistoryError::Decode(format!("bad timeStamp {:?}", tx.time_stamp)))?;
    let to = optional_address(&tx.to)?;
    let contract = optional_address(&tx.contract_address)?;

    let (decimals, kind, counterparty) = match phase {
        Phase::Transactions => {
            let calls_contract = !tx.input.is_empty() && tx.input != "0x";
            let counterparty = if calls_contract { to.or(contract) } else { contract };
            (18, TokenKind::Native, counterparty)
        }
        Phase::TokenTransfers => {
            let decimals = tx
                .token_decimal
                .as_deref()
                .unwrap_or("18")
                .parse()
                .map_err(|_| HistoryError::Decode("bad tokenDecimal".into()))?;
            (decimals, TokenKind::Erc20, contract)
        }
    };

    let value = units_to_f64(&tx.value, decimals)
        .ok_or_else(|| HistoryError::Decode(format!("bad value {:?}", tx.value)))?;

    Ok(TransactionRecord {
        hash: tx.hash,
        timestamp,
        from: tx.from,
        to,
        value,
        counterparty_contract: counterparty,
        token_kind: kind,
    })
}

/// Parse an explorer `{status, message, result}` envelope.
fn parse_explorer_list(v: Value, phase: Phase) -> Result<Vec<TransactionRecord>, HistoryError> {
    let status = v["status"].as_str().unwrap_or_default();
    let message = v["message"].as_str().unwrap_or_default();
    if status != "1" {
        // The explorer reports an empty history as an error status.
        if message.starts_with("No transactions found") || message.starts_with("No token transfers") {
            return Ok(Vec::new());
        }
        let detail = v["result"].as_str().unwrap_or(message);
        return Err(HistoryError::Api(detail.to_string()));
    }
    let list: Vec<ExplorerTx> = serde_json::from_value(v["result"].clone())
        .map_err(|e| HistoryError::Decode(e.to_string()))?;
    list.into_iter().map(|tx| explorer_record(tx, phase)).collect()
}

/// History from an Etherscan-compatible explorer API.
pub struct ExplorerSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    page_size: u32,
}

impl ExplorerSource {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, HistoryError> {
        Ok(Self {
            client: http_client(timeout).map_err(HistoryError::Transport)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            page_size: page_size.max(1),
        })
    }

    async fn get(&self, query: &[(&str, String)]) -> Result<Value, HistoryError> {
        let mut req = self.client.get(&self.base_url).query(query);
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.query(&[("apikey", key)]);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| HistoryError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HistoryError::HttpStatus(status.as_u16()));
        }
        resp.json()
            .await
            .map_err(|e| HistoryError::Decode(e.to_string()))
    }
}

#[async_trait]
impl HistorySource for ExplorerSource {
    fn name(&self) -> &str {
        "explorer"
    }

    async fn head_block(&self) -> Result<u64, HistoryError> {
        let v = self
            .get(&[("module", "proxy".into()), ("action", "eth_blockNumber".into())])
            .await?;
        let q = v["result"]
            .as_str()
            .ok_or_else(|| HistoryError::Decode("missing result".into()))?;
        abi::parse_quantity(q).map_err(|e| HistoryError::Decode(e.to_string()))
    }

    async fn fetch_page(
        &self,
        account: &Address,
        range: BlockRange,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, HistoryError> {
        let (phase, page) = parse_cursor(cursor)?;
        debug!(%account, action = phase.action(), page, "explorer: fetching page");
        let v = self
            .get(&[
                ("module", "account".into()),
                ("action", phase.action().into()),
                ("address", account.to_string()),
                ("startblock", range.from.to_string()),
                ("endblock", range.to.to_string()),
                ("page", page.to_string()),
                ("offset", self.page_size.to_string()),
                ("sort", "asc".into()),
            ])
            .await?;
        let records = parse_explorer_list(v, phase)?;
        let next = next_cursor(phase, page, records.len(), self.page_size);
        Ok(HistoryPage {
            records,
            next_cursor: next,
        })
    }
}
