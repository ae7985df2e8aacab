//! credpass service binary.
//!
//! Loads configuration, builds the scoring service and serves JSON-RPC until
//! Ctrl+C. With `--local-ledger` the service writes to an in-process ledger
//! instead of remote gateways.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use credpass_attest::{AttestationSigner, InProcessLedger, InProcessTransport, LedgerTransport};
use credpass_core::traits::SystemClock;
use credpass_ledger::PassportLedger;
use credpass_node_lib::{json_rpc_transports, start_rpc_server, ScoreService, ServiceConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "credpass-node", version, about = "credpass scoring and attestation service")]
struct Args {
    /// Config file (default: <config_dir>/credpass/credpass.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// RPC server port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,

    /// Write attestations to an in-process development ledger
    #[arg(long)]
    local_ledger: bool,
}

impl Args {
    /// Load the layered config and apply CLI overrides.
    fn into_config(self) -> Result<(ServiceConfig, bool)> {
        let mut config = ServiceConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        if let Some(bind) = self.rpc_bind {
            config.server.bind = bind;
        }
        if let Some(port) = self.rpc_port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.server.log_format = format;
        }
        config.validate().context("invalid configuration")?;
        Ok((config, self.local_ledger))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, local_ledger) = Args::parse().into_config()?;
    init_logging(&config.server.log_level, &config.server.log_format);

    info!("credpass node v{}", env!("CARGO_PKG_VERSION"));
    info!(rpc_addr = %config.rpc_addr(), local_ledger, "starting");

    let signer = load_signer(&config, local_ledger)?;
    info!(signer = %signer.address(), "signer loaded");

    let transports = if local_ledger {
        local_transports(&config, &signer)
    } else {
        if config.ledger.endpoints.is_empty() {
            bail!("ledger.endpoints is empty; configure gateways or pass --local-ledger");
        }
        json_rpc_transports(&config).context("failed to build ledger transports")?
    };

    let service = Arc::new(
        ScoreService::from_config(&config, signer, transports).context("failed to build scoring service")?,
    );
    let (addr, handle) = start_rpc_server(&config.rpc_addr(), service)
        .await
        .context("failed to start RPC server")?;
    info!(%addr, "credpass node running (Ctrl+C to stop)");

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;
    info!("shutdown signal received");

    handle.stop().ok();
    handle.stopped().await;
    info!("credpass node shutdown complete");
    Ok(())
}

/// The signer seed comes from the environment variable named in config. The
/// local ledger falls back to an ephemeral key.
fn load_signer(config: &ServiceConfig, local_ledger: bool) -> Result<AttestationSigner> {
    let var = &config.ledger.signer_key_env;
    match std::env::var(var) {
        Ok(secret) => AttestationSigner::from_hex(&secret).with_context(|| format!("invalid signer key in {var}")),
        Err(_) if local_ledger => {
            warn!(%var, "signer key not set, using an ephemeral key for the local ledger");
            Ok(AttestationSigner::generate())
        }
        Err(_) => bail!("signer key environment variable {var} is not set"),
    }
}

/// An in-process ledger administered by the signer. The admin holds every
/// capability, `SCORE_UPDATER` included.
fn local_transports(config: &ServiceConfig, signer: &AttestationSigner) -> Vec<Arc<dyn LedgerTransport>> {
    let admin = signer.address();
    let ledger = PassportLedger::new(admin, config.circuit_breaker, Arc::new(SystemClock));
    info!(
        max_ops = config.circuit_breaker.max_operations_per_window,
        window_secs = config.circuit_breaker.window_seconds,
        max_delta = config.circuit_breaker.max_score_delta,
        "local ledger ready"
    );
    let ledger = Arc::new(InProcessLedger::new(ledger));
    let transport: Arc<dyn LedgerTransport> = Arc::new(InProcessTransport::new("local", ledger));
    vec![transport]
}

/// Initialize tracing with the given level and output format.
///
/// `RUST_LOG`, when set, takes precedence over `level_str`.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
