//! JSON-RPC gateway in front of an [`InProcessLedger`].
//!
//! Serves the methods [`JsonRpcTransport`](crate::transport::JsonRpcTransport)
//! calls. Ledger rejections are returned with code [`REJECTION_CODE`] and the
//! bare rejection reason as message.

use std::net::SocketAddr;
use std::sync::Arc;

use credpass_core::error::TransportError;
use credpass_core::types::{Address, Hash256, PassportState};
use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;

use crate::envelope::SignedAttestation;
use crate::transport::{InProcessLedger, Receipt, REJECTION_CODE};

fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

fn parse_address(s: &str) -> Result<Address, ErrorObjectOwned> {
    s.parse().map_err(|e| rpc_error(-32602, &format!("invalid address: {e}")))
}

#[rpc(server)]
pub trait PassportRpc {
    #[method(name = "passport_getNonce")]
    async fn get_nonce(&self, signer: String) -> Result<u64, ErrorObjectOwned>;

    /// Accepts a hex-encoded bincode [`SignedAttestation`], returns the tx hash.
    #[method(name = "passport_sendAttestation")]
    async fn send_attestation(&self, raw: String) -> Result<String, ErrorObjectOwned>;

    #[method(name = "passport_getReceipt")]
    async fn get_receipt(&self, tx_hash: String) -> Result<Option<Receipt>, ErrorObjectOwned>;

    #[method(name = "passport_getScore")]
    async fn get_score(&self, account: String) -> Result<Option<PassportState>, ErrorObjectOwned>;
}

pub struct GatewayImpl {
    ledger: Arc<InProcessLedger>,
}

impl GatewayImpl {
    pub fn new(ledger: Arc<InProcessLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl PassportRpcServer for GatewayImpl {
    async fn get_nonce(&self, signer: String) -> Result<u64, ErrorObjectOwned> {
        Ok(self.ledger.nonce(&parse_address(&signer)?))
    }

    async fn send_attestation(&self, raw: String) -> Result<String, ErrorObjectOwned> {
        let tx = SignedAttestation::from_hex(&raw).map_err(|e| rpc_error(-32602, &e))?;
        match self.ledger.submit(&tx) {
            Ok(hash) => Ok(hash.to_string()),
            Err(TransportError::Rejected(r)) => Err(rpc_error(REJECTION_CODE, &r.to_string())),
            Err(e) => Err(rpc_error(-32603, &e.to_string())),
        }
    }

    async fn get_receipt(&self, tx_hash: String) -> Result<Option<Receipt>, ErrorObjectOwned> {
        let hash: Hash256 = tx_hash
            .parse()
            .map_err(|e| rpc_error(-32602, &format!("invalid tx hash: {e}")))?;
        Ok(self.ledger.receipt(&hash))
    }

    async fn get_score(&self, account: String) -> Result<Option<PassportState>, ErrorObjectOwned> {
        Ok(self.ledger.passport(&parse_address(&account)?))
    }
}

/// Start the gateway. Bind to port 0 to pick a free port; the bound address
/// is returned alongside the handle.
pub async fn serve_gateway(
    addr: &str,
    ledger: Arc<InProcessLedger>,
) -> Result<(SocketAddr, ServerHandle), TransportError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| TransportError::Transient(format!("gateway bind {addr}: {e}")))?;
    let local = server
        .local_addr()
        .map_err(|e| TransportError::Transient(e.to_string()))?;
    let handle = server.start(GatewayImpl::new(ledger).into_rpc());
    tracing::info!(%local, "gateway: listening");
    Ok((local, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::envelope::AttestationCall;
    use crate::signer::AttestationSigner;
    use crate::transport::{JsonRpcTransport, LedgerTransport, ReceiptStatus};
    use credpass_core::error::LedgerRejection;
    use credpass_core::traits::ManualClock;
    use credpass_core::types::{CircuitBreakerConfig, RiskBand};
    use credpass_ledger::{Capability, PassportLedger};

    async fn start() -> (Arc<InProcessLedger>, AttestationSigner, JsonRpcTransport, ServerHandle) {
        let admin = Address([0xAD; 20]);
        let signer = AttestationSigner::from_secret_bytes([6; 32]);
        let mut inner = PassportLedger::new(admin, CircuitBreakerConfig::default(), Arc::new(ManualClock::new(0)));
        inner.grant_role(&admin, Capability::ScoreUpdater, signer.address()).unwrap();
        let ledger = Arc::new(InProcessLedger::new(inner));
        let (addr, handle) = serve_gateway("127.0.0.1:0", ledger.clone()).await.unwrap();
        let client = JsonRpcTransport::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
        (ledger, signer, client, handle)
    }

    #[tokio::test]
    async fn attestation_over_json_rpc() {
        let (ledger, signer, client, handle) = start().await;
        let account = Address([0x33; 20]);

        assert_eq!(client.nonce(&signer.address()).await.unwrap(), 0);
        let tx = signer
            .sign(0, AttestationCall { account, score: 640, risk_band: RiskBand::Low })
            .unwrap();
        let hash = client.send(&tx).await.unwrap();
        assert_eq!(hash, tx.tx_hash().unwrap());

        let receipt = client.receipt(&hash).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Success);
        let p = client.passport(&account).await.unwrap().unwrap();
        assert_eq!((p.score, p.risk_band), (640, RiskBand::Low));
        assert_eq!(ledger.executed_count(), 1);
        assert!(client.passport(&Address([1; 20])).await.unwrap().is_none());

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn rejection_reason_survives_the_wire() {
        let (_ledger, signer, client, handle) = start().await;
        let tx = signer
            .sign(9, AttestationCall { account: Address([1; 20]), score: 1, risk_band: RiskBand::High })
            .unwrap();
        assert_eq!(
            client.send(&tx).await,
            Err(TransportError::Rejected(LedgerRejection::InvalidNonce))
        );
        handle.stop().unwrap();
    }
}
