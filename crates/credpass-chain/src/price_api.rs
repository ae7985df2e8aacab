//! HTTP price API client.
//!
//! `GET {base}/price/{symbol}` returns `{"price": "<fixed-point>", "decimals": n}`
//! and `GET {base}/history/{symbol}?days=n` returns `{"prices": [f64, ...]}`,
//! oldest first.

use std::time::Duration;

use async_trait::async_trait;
use credpass_core::error::OracleError;
use credpass_core::traits::PriceSource;
use credpass_core::types::Price;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::rpc::http_client;

const NAME: &str = "price-api";

#[derive(Debug, Deserialize)]
struct SpotResponse {
    price: Value,
    decimals: u8,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    prices: Vec<f64>,
}

fn source_err(message: impl Into<String>) -> OracleError {
    OracleError::Source {
        source_name: NAME.to_string(),
        message: message.into(),
    }
}

/// The price may be sent as a JSON string or integer.
fn parse_spot(resp: SpotResponse) -> Result<Price, OracleError> {
    let answer: i128 = match &resp.price {
        Value::String(s) => s
            .parse()
            .map_err(|_| OracleError::InvalidAnswer(format!("price {s:?}")))?,
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .ok_or_else(|| OracleError::InvalidAnswer(format!("price {n}")))?,
        other => return Err(OracleError::InvalidAnswer(format!("price {other}"))),
    };
    if answer <= 0 {
        return Err(OracleError::InvalidAnswer(format!("non-positive price {answer}")));
    }
    Ok(Price {
        answer,
        decimals: resp.decimals,
    })
}

fn parse_history(resp: HistoryResponse) -> Result<Vec<f64>, OracleError> {
    if let Some(bad) = resp.prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
        return Err(OracleError::InvalidAnswer(format!("close {bad}")));
    }
    Ok(resp.prices)
}

pub struct HttpPriceApi {
    client: Client,
    base_url: String,
}

impl HttpPriceApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        Ok(Self {
            client: http_client(timeout).map_err(source_err)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, OracleError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| source_err(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(source_err(format!("http status {}", status.as_u16())));
        }
        resp.json().await.map_err(|e| source_err(format!("decode: {e}")))
    }
}

#[async_trait]
impl PriceSource for HttpPriceApi {
    fn name(&self) -> &str {
        NAME
    }

    async fn spot_price(&self, asset: &str) -> Result<Price, OracleError> {
        let resp: SpotResponse = self
            .get(&format!("/price/{}", asset.to_uppercase()), &[])
            .await?;
        parse_spot(resp)
    }

    async fn daily_closes(&self, asset: &str, days: u32) -> Result<Vec<f64>, OracleError> {
        let resp: HistoryResponse = self
            .get(&format!("/history/{}", asset.to_uppercase()), &[("days", days.to_string())])
            .await?;
        parse_history(resp)
    }
}
