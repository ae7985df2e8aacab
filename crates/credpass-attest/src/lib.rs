//! # credpass-attest
//! The write path from a computed score to a ledger passport.
//!
//! - [`envelope`]: the signed attestation transaction and its hash
//! - [`signer::AttestationSigner`]: the single Ed25519 signing key
//! - [`transport`]: the [`transport::LedgerTransport`] seam, JSON-RPC and in-process implementations
//! - [`gateway`]: JSON-RPC gateway serving an in-process ledger
//! - [`pool::EndpointPool`]: round-robin endpoints with health tracking
//! - [`writer::AttestationWriter`]: idempotent, serialized submit with receipt polling

pub mod envelope;
pub mod gateway;
pub mod pool;
pub mod signer;
pub mod transport;
pub mod writer;

pub use envelope::{AttestationCall, SignedAttestation, UnsignedAttestation};
pub use pool::EndpointPool;
pub use signer::AttestationSigner;
pub use transport::{InProcessLedger, InProcessTransport, JsonRpcTransport, LedgerTransport, Receipt, ReceiptStatus};
pub use writer::{AttestationWriter, SubmitOutcome, TxStatus, WriterConfig};
