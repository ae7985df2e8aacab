//! # credpass-node
//! Service composition, configuration and JSON-RPC.
//!
//! - [`config::ServiceConfig`]: layered TOML + environment configuration
//! - [`service::ScoreService`]: compute, attest and read passports
//! - [`rpc`]: JSON-RPC server for external access

pub mod config;
pub mod rpc;
pub mod service;

pub use config::ServiceConfig;
pub use rpc::start_rpc_server;
pub use service::{json_rpc_transports, Attested, ScoreService, ScoredAccount, ServiceError, ServiceSettings};
