//! # credpass-ledger
//! The attestation ledger as a state machine.
//!
//! - [`roles`]: capabilities and the role table
//! - [`breaker`]: the ledger-wide write window and delta guard
//! - [`ledger::PassportLedger`]: soulbound passports, pause, burn, upgrade authorization
//!
//! The same state machine backs the in-process transport used by tests and
//! the local development ledger.

pub mod breaker;
pub mod ledger;
pub mod roles;

pub use breaker::CircuitBreaker;
pub use ledger::{LedgerEvent, PassportLedger, WriteOutcome};
pub use roles::{Capability, RoleTable};
