//! Service configuration.
//!
//! [`ServiceConfig`] is read from an optional TOML file overlaid by
//! `CREDPASS__SECTION__KEY` environment variables. Every field has a default,
//! so an empty file (or none) yields a runnable local configuration.
//!
//! The signer secret never lives in the file: `ledger.signer_key_env` names
//! the environment variable that holds it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use credpass_attest::WriterConfig;
use credpass_core::constants::{
    DEFAULT_DEDUP_WINDOW_SECS, DEFAULT_MAX_BLOCK_RANGE, DEFAULT_ORACLE_CACHE_TTL_SECS,
    DEFAULT_RECEIPT_POLL_INTERVAL_MS, DEFAULT_RECEIPT_TIMEOUT_SECS, DEFAULT_RPC_PORT, DEFAULT_STAKING_DECIMALS,
    DEFAULT_VOLATILITY_DAYS, MAX_HISTORY_PAGES,
};
use credpass_core::retry::RetryPolicy;
use credpass_core::types::{Address, CircuitBreakerConfig};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "CREDPASS";
const LIST_KEYS: [&str; 3] = ["history.rpc_endpoints", "ledger.endpoints", "oracle.stablecoins"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub history: HistoryConfig,
    pub oracle: OracleConfig,
    pub staking: StakingConfig,
    pub ledger: LedgerConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Log filter, e.g. `"info"` or `"credpass_attest=debug"`.
    pub log_level: String,
    /// `"text"` or `"json"`.
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_RPC_PORT,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Indexer JSON-RPC endpoints, tried in order.
    pub rpc_endpoints: Vec<String>,
    /// Etherscan-style explorer API, used after the RPC endpoints.
    pub explorer_url: Option<String>,
    /// Environment variable holding the explorer API key.
    pub explorer_api_key_env: Option<String>,
    pub explorer_page_size: u32,
    pub call_timeout_secs: u64,
    pub max_pages: u32,
    pub retry: RetryPolicy,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            rpc_endpoints: Vec::new(),
            explorer_url: None,
            explorer_api_key_env: None,
            explorer_page_size: 1_000,
            call_timeout_secs: 10,
            max_pages: MAX_HISTORY_PAGES,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub native_asset: String,
    /// RPC endpoint for Chainlink-style feeds.
    pub rpc_endpoint: Option<String>,
    /// Symbol to aggregator address.
    pub chainlink_feeds: HashMap<String, Address>,
    /// HTTP price API used after the feeds.
    pub price_api_url: Option<String>,
    /// Stablecoin contracts valued at par.
    pub stablecoins: Vec<Address>,
    pub cache_ttl_secs: u64,
    pub volatility_days: u32,
    pub call_timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            native_asset: "ETH".to_string(),
            rpc_endpoint: None,
            chainlink_feeds: HashMap::new(),
            price_api_url: None,
            stablecoins: Vec::new(),
            cache_ttl_secs: DEFAULT_ORACLE_CACHE_TTL_SECS,
            volatility_days: DEFAULT_VOLATILITY_DAYS,
            call_timeout_secs: 5,
        }
    }
}

/// Staking is optional; without both fields every boost is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingConfig {
    pub rpc_endpoint: Option<String>,
    pub contract: Option<Address>,
    pub decimals: u8,
    pub call_timeout_secs: u64,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: None,
            contract: None,
            decimals: DEFAULT_STAKING_DECIMALS,
            call_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Ledger gateway JSON-RPC endpoints.
    pub endpoints: Vec<String>,
    /// Environment variable holding the hex signer seed.
    pub signer_key_env: String,
    pub max_connections: usize,
    pub request_timeout_secs: u64,
    pub receipt_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub dedup_window_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            signer_key_env: "CREDPASS_SIGNER_KEY".to_string(),
            max_connections: 8,
            request_timeout_secs: 10,
            receipt_timeout_secs: DEFAULT_RECEIPT_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_RECEIPT_POLL_INTERVAL_MS,
            dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            dedup_window: Duration::from_secs(self.dedup_window_secs),
            retry: self.retry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// History lookback in blocks.
    pub max_block_range: u64,
    /// Caller-side deadline for score computation and passport reads.
    pub deadline_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            deadline_secs: 30,
        }
    }
}

impl ServiceConfig {
    /// `<config_dir>/credpass/credpass.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("credpass").join("credpass.toml"))
    }

    /// Load from `path` (required if given, else the optional default path)
    /// and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// As [`load`](Self::load), reading variables from `env` instead of the
    /// process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => Some(File::from(p).required(true)),
            None => Self::default_path().map(|p| File::from(p).required(false)),
        };
        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .source(env);
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(file);
        }
        let cfg: ServiceConfig = builder.add_source(environment).build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cb = &self.circuit_breaker;
        if cb.enabled && (cb.window_seconds == 0 || cb.max_operations_per_window == 0) {
            return Err(ConfigError::Message(
                "circuit_breaker: window_seconds and max_operations_per_window must be positive".into(),
            ));
        }
        if self.oracle.volatility_days < 3 {
            return Err(ConfigError::Message("oracle.volatility_days must be at least 3".into()));
        }
        if self.ledger.max_connections == 0 {
            return Err(ConfigError::Message("ledger.max_connections must be positive".into()));
        }
        if !matches!(self.server.log_format.as_str(), "text" | "json") {
            return Err(ConfigError::Message(format!(
                "server.log_format must be text or json, got {}",
                self.server.log_format
            )));
        }
        Ok(())
    }

    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.scoring.deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    fn write_toml(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.rpc_addr(), format!("127.0.0.1:{DEFAULT_RPC_PORT}"));
        assert_eq!(cfg.ledger.signer_key_env, "CREDPASS_SIGNER_KEY");
        assert_eq!(cfg.ledger.writer_config(), WriterConfig::default());
        assert_eq!(cfg.circuit_breaker, CircuitBreakerConfig::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_path_ends_with_file_name() {
        if let Some(p) = ServiceConfig::default_path() {
            assert!(p.ends_with("credpass/credpass.toml"));
        }
    }

    #[test]
    fn loads_toml_file() {
        let f = write_toml(
            r#"
            [server]
            port = 9100

            [history]
            rpc_endpoints = ["http://a:8545", "http://b:8545"]
            explorer_url = "https://explorer.example/api"

            [oracle]
            native_asset = "MATIC"
            stablecoins = ["0x1111111111111111111111111111111111111111"]

            [oracle.chainlink_feeds]
            MATIC = "0x2222222222222222222222222222222222222222"

            [staking]
            rpc_endpoint = "http://a:8545"
            contract = "0x3333333333333333333333333333333333333333"

            [circuit_breaker]
            max_operations_per_window = 10
            max_score_delta = 150
            "#,
        );
        let cfg = ServiceConfig::load_with_env(Some(f.path()), env(&[])).unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.history.rpc_endpoints.len(), 2);
        assert_eq!(cfg.oracle.native_asset, "MATIC");
        assert_eq!(cfg.oracle.stablecoins, vec![Address([0x11; 20])]);
        assert_eq!(cfg.oracle.chainlink_feeds.len(), 1);
        assert_eq!(cfg.staking.contract, Some(Address([0x33; 20])));
        assert_eq!(cfg.circuit_breaker.max_operations_per_window, 10);
        assert_eq!(cfg.circuit_breaker.max_score_delta, 150);
        // Unset fields keep their defaults.
        assert_eq!(cfg.circuit_breaker.window_seconds, CircuitBreakerConfig::default().window_seconds);
        assert_eq!(cfg.ledger.receipt_timeout_secs, DEFAULT_RECEIPT_TIMEOUT_SECS);
    }

    #[test]
    fn environment_overrides_file() {
        let f = write_toml("[ledger]\nreceipt_timeout_secs = 120\n");
        let cfg = ServiceConfig::load_with_env(
            Some(f.path()),
            env(&[
                ("CREDPASS__LEDGER__RECEIPT_TIMEOUT_SECS", "60"),
                ("CREDPASS__LEDGER__ENDPOINTS", "http://l1:9000,http://l2:9000"),
                ("CREDPASS__SERVER__LOG_FORMAT", "json"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.ledger.receipt_timeout_secs, 60);
        assert_eq!(cfg.ledger.endpoints, vec!["http://l1:9000", "http://l2:9000"]);
        assert_eq!(cfg.server.log_format, "json");
        assert_eq!(cfg.ledger.writer_config().receipt_timeout, Duration::from_secs(60));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(ServiceConfig::load_with_env(Some(&missing), env(&[])).is_err());
    }

    #[test]
    fn invalid_values_rejected() {
        let f = write_toml("[circuit_breaker]\nwindow_seconds = 0\n");
        assert!(ServiceConfig::load_with_env(Some(f.path()), env(&[])).is_err());

        let f = write_toml("[server]\nlog_format = \"xml\"\n");
        assert!(ServiceConfig::load_with_env(Some(f.path()), env(&[])).is_err());

        let f = write_toml("[oracle]\nstablecoins = [\"0x12\"]\n");
        assert!(ServiceConfig::load_with_env(Some(f.path()), env(&[])).is_err());
    }
}
