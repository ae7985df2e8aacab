//! Ledger transports.
//!
//! [`LedgerTransport`] is the seam between the writer and a ledger endpoint.
//! [`JsonRpcTransport`] talks to a remote gateway; [`InProcessTransport`]
//! drives an [`InProcessLedger`] directly and can inject faults.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use credpass_core::constants::LEDGER_RECEIPT_CAPACITY;
use credpass_core::error::{LedgerRejection, TransportError};
use credpass_core::types::{Address, Hash256, PassportState};
use credpass_ledger::PassportLedger;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::envelope::SignedAttestation;

/// Error code the gateway uses for ledger rejections. The message is the
/// verbatim rejection reason.
pub const REJECTION_CODE: i32 = -32010;
const INVALID_PARAMS_CODE: i32 = -32602;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    /// Executed but refused by contract policy.
    Reverted(LedgerRejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash256,
    pub status: ReceiptStatus,
    pub block: u64,
}

/// One ledger endpoint.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Endpoint name used in logs.
    fn endpoint(&self) -> &str;

    /// Next nonce the ledger expects from `signer`.
    async fn nonce(&self, signer: &Address) -> Result<u64, TransportError>;

    /// Broadcast a signed attestation. Resending an already-accepted
    /// transaction returns its hash again.
    async fn send(&self, tx: &SignedAttestation) -> Result<Hash256, TransportError>;

    /// `None` while the transaction is unknown or not yet confirmed.
    async fn receipt(&self, tx_hash: &Hash256) -> Result<Option<Receipt>, TransportError>;

    async fn passport(&self, account: &Address) -> Result<Option<PassportState>, TransportError>;
}

// ---------------------------------------------------------------------------
// JSON-RPC
// ---------------------------------------------------------------------------

/// Client for the `passport_*` JSON-RPC methods.
pub struct JsonRpcTransport {
    endpoint: String,
    client: HttpClient,
}

impl JsonRpcTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .map_err(|e| TransportError::Transient(format!("failed to build rpc client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.to_owned(),
            client,
        })
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, arg: impl Serialize) -> Result<R, TransportError> {
        let mut params = ArrayParams::new();
        params.insert(arg).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.client.request(method, params).await.map_err(map_client_error)
    }
}

fn map_client_error(e: ClientError) -> TransportError {
    match e {
        ClientError::Call(obj) => match obj.message().parse::<LedgerRejection>() {
            Ok(r) => TransportError::Rejected(r),
            Err(_) if obj.code() == INVALID_PARAMS_CODE => TransportError::Decode(obj.message().to_owned()),
            Err(_) => TransportError::Transient(format!("rpc error {}: {}", obj.code(), obj.message())),
        },
        ClientError::ParseError(e) => TransportError::Decode(e.to_string()),
        other => TransportError::Transient(other.to_string()),
    }
}

#[async_trait]
impl LedgerTransport for JsonRpcTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn nonce(&self, signer: &Address) -> Result<u64, TransportError> {
        self.call("passport_getNonce", signer.to_string()).await
    }

    async fn send(&self, tx: &SignedAttestation) -> Result<Hash256, TransportError> {
        let raw = tx.to_hex().map_err(|e| TransportError::Decode(e.to_string()))?;
        let hash: String = self.call("passport_sendAttestation", raw).await?;
        hash.parse().map_err(|e| TransportError::Decode(format!("tx hash: {e}")))
    }

    async fn receipt(&self, tx_hash: &Hash256) -> Result<Option<Receipt>, TransportError> {
        self.call("passport_getReceipt", tx_hash.to_string()).await
    }

    async fn passport(&self, account: &Address) -> Result<Option<PassportState>, TransportError> {
        self.call("passport_getScore", account.to_string()).await
    }
}

// ---------------------------------------------------------------------------
// In-process ledger
// ---------------------------------------------------------------------------

struct LedgerState {
    ledger: PassportLedger,
    nonces: HashMap<Address, u64>,
    /// Receipt and the instant it becomes visible.
    receipts: HashMap<Hash256, (Receipt, Instant)>,
    /// Receipt hashes in execution order, for eviction.
    order: VecDeque<Hash256>,
    executed: usize,
    block: u64,
}

/// A [`PassportLedger`] that accepts signed attestations.
///
/// Transactions execute immediately; receipts become visible after the
/// configured confirmation delay. Only the most recent `receipt_capacity`
/// receipts are kept.
pub struct InProcessLedger {
    state: Mutex<LedgerState>,
    confirmation_delay: Duration,
    receipt_capacity: usize,
}

impl InProcessLedger {
    pub fn new(ledger: PassportLedger) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                ledger,
                nonces: HashMap::new(),
                receipts: HashMap::new(),
                order: VecDeque::new(),
                executed: 0,
                block: 0,
            }),
            confirmation_delay: Duration::ZERO,
            receipt_capacity: LEDGER_RECEIPT_CAPACITY,
        }
    }

    pub fn with_receipt_capacity(mut self, capacity: usize) -> Self {
        self.receipt_capacity = capacity.max(1);
        self
    }

    pub fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    /// Run `f` against the underlying ledger, e.g. for admin calls.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&mut PassportLedger) -> R) -> R {
        f(&mut self.state.lock().ledger)
    }

    pub fn nonce(&self, signer: &Address) -> u64 {
        self.state.lock().nonces.get(signer).copied().unwrap_or(0)
    }

    /// Number of distinct transactions executed.
    pub fn executed_count(&self) -> usize {
        self.state.lock().executed
    }

    pub fn submit(&self, tx: &SignedAttestation) -> Result<Hash256, TransportError> {
        let hash = tx.verify().map_err(TransportError::Rejected)?;
        let signer = tx.signer_address();
        let mut st = self.state.lock();
        if st.receipts.contains_key(&hash) {
            debug!(%hash, "ledger: duplicate transaction");
            return Ok(hash);
        }
        let expected = st.nonces.get(&signer).copied().unwrap_or(0);
        if tx.unsigned.nonce != expected {
            debug!(%signer, got = tx.unsigned.nonce, expected, "ledger: bad nonce");
            return Err(TransportError::Rejected(LedgerRejection::InvalidNonce));
        }

        let call = tx.unsigned.call;
        let status = match st.ledger.mint_or_update(&signer, call.account, call.score, call.risk_band) {
            Ok(_) => ReceiptStatus::Success,
            Err(r) => ReceiptStatus::Reverted(r),
        };
        st.nonces.insert(signer, expected + 1);
        st.block += 1;
        let receipt = Receipt {
            tx_hash: hash,
            status,
            block: st.block,
        };
        st.receipts.insert(hash, (receipt, Instant::now() + self.confirmation_delay));
        st.order.push_back(hash);
        st.executed += 1;
        while st.order.len() > self.receipt_capacity {
            if let Some(old) = st.order.pop_front() {
                st.receipts.remove(&old);
            }
        }
        info!(%hash, account = %call.account, score = call.score, ?status, "ledger: executed attestation");
        Ok(hash)
    }

    pub fn receipt(&self, tx_hash: &Hash256) -> Option<Receipt> {
        let st = self.state.lock();
        st.receipts
            .get(tx_hash)
            .filter(|(_, visible_at)| Instant::now() >= *visible_at)
            .map(|(r, _)| *r)
    }

    pub fn passport(&self, account: &Address) -> Option<PassportState> {
        self.state.lock().ledger.passport(account).copied()
    }
}

/// In-process endpoint with fault injection.
pub struct InProcessTransport {
    name: String,
    ledger: Arc<InProcessLedger>,
    offline: AtomicBool,
    fail_sends: AtomicU32,
    lose_responses: AtomicU32,
}

impl InProcessTransport {
    pub fn new(name: &str, ledger: Arc<InProcessLedger>) -> Self {
        Self {
            name: name.to_owned(),
            ledger,
            offline: AtomicBool::new(false),
            fail_sends: AtomicU32::new(0),
            lose_responses: AtomicU32::new(0),
        }
    }

    /// While offline every call fails transiently.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` sends before they reach the ledger.
    pub fn fail_next_sends(&self, n: u32) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Execute the next `n` sends but report a transient failure.
    pub fn lose_next_responses(&self, n: u32) {
        self.lose_responses.store(n, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(TransportError::Transient(format!("{} offline", self.name)))
        } else {
            Ok(())
        }
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl LedgerTransport for InProcessTransport {
    fn endpoint(&self) -> &str {
        &self.name
    }

    async fn nonce(&self, signer: &Address) -> Result<u64, TransportError> {
        self.check_online()?;
        Ok(self.ledger.nonce(signer))
    }

    async fn send(&self, tx: &SignedAttestation) -> Result<Hash256, TransportError> {
        self.check_online()?;
        if take_one(&self.fail_sends) {
            return Err(TransportError::Transient(format!("{}: connection reset", self.name)));
        }
        let hash = self.ledger.submit(tx)?;
        if take_one(&self.lose_responses) {
            return Err(TransportError::Transient(format!("{}: response lost", self.name)));
        }
        Ok(hash)
    }

    async fn receipt(&self, tx_hash: &Hash256) -> Result<Option<Receipt>, TransportError> {
        self.check_online()?;
        Ok(self.ledger.receipt(tx_hash))
    }

    async fn passport(&self, account: &Address) -> Result<Option<PassportState>, TransportError> {
        self.check_online()?;
        Ok(self.ledger.passport(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::AttestationCall;
    use crate::signer::AttestationSigner;
    use credpass_core::traits::ManualClock;
    use credpass_core::types::{CircuitBreakerConfig, RiskBand};
    use credpass_ledger::Capability;

    fn setup() -> (Arc<InProcessLedger>, AttestationSigner) {
        let admin = Address([0xAD; 20]);
        let signer = AttestationSigner::from_secret_bytes([4; 32]);
        let mut ledger = PassportLedger::new(admin, CircuitBreakerConfig::default(), Arc::new(ManualClock::new(1_000)));
        ledger.grant_role(&admin, Capability::ScoreUpdater, signer.address()).unwrap();
        (Arc::new(InProcessLedger::new(ledger)), signer)
    }

    fn call(score: u32) -> AttestationCall {
        AttestationCall {
            account: Address([7; 20]),
            score,
            risk_band: RiskBand::from_score(score),
        }
    }

    #[test]
    fn executes_and_advances_nonce() {
        let (ledger, signer) = setup();
        let tx = signer.sign(0, call(600)).unwrap();
        let hash = ledger.submit(&tx).unwrap();
        assert_eq!(ledger.nonce(&signer.address()), 1);
        let r = ledger.receipt(&hash).unwrap();
        assert_eq!(r.status, ReceiptStatus::Success);
        assert_eq!(ledger.passport(&Address([7; 20])).unwrap().score, 600);
    }

    #[test]
    fn resubmission_is_idempotent() {
        let (ledger, signer) = setup();
        let tx = signer.sign(0, call(600)).unwrap();
        let h1 = ledger.submit(&tx).unwrap();
        let h2 = ledger.submit(&tx).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(ledger.executed_count(), 1);
        assert_eq!(ledger.nonce(&signer.address()), 1);
    }

    #[test]
    fn oldest_receipts_are_evicted() {
        let (ledger, signer) = setup();
        let ledger = Arc::try_unwrap(ledger).ok().unwrap().with_receipt_capacity(2);
        let hashes: Vec<_> = (0..3)
            .map(|n| ledger.submit(&signer.sign(n, call(600 + n as u32)).unwrap()).unwrap())
            .collect();
        assert!(ledger.receipt(&hashes[0]).is_none());
        assert!(ledger.receipt(&hashes[1]).is_some());
        assert!(ledger.receipt(&hashes[2]).is_some());
        assert_eq!(ledger.executed_count(), 3);
        assert_eq!(ledger.nonce(&signer.address()), 3);
    }

    #[test]
    fn wrong_nonce_rejected() {
        let (ledger, signer) = setup();
        let tx = signer.sign(5, call(600)).unwrap();
        assert_eq!(
            ledger.submit(&tx),
            Err(TransportError::Rejected(LedgerRejection::InvalidNonce))
        );
        assert_eq!(ledger.executed_count(), 0);
    }

    #[test]
    fn policy_failure_reverts_but_consumes_nonce() {
        let (ledger, _) = setup();
        let outsider = AttestationSigner::from_secret_bytes([8; 32]);
        let hash = ledger.submit(&outsider.sign(0, call(600)).unwrap()).unwrap();
        assert_eq!(
            ledger.receipt(&hash).unwrap().status,
            ReceiptStatus::Reverted(LedgerRejection::Unauthorized)
        );
        assert_eq!(ledger.nonce(&outsider.address()), 1);
        assert!(ledger.passport(&Address([7; 20])).is_none());
    }

    #[test]
    fn receipts_hidden_until_confirmed() {
        let admin = Address([0xAD; 20]);
        let signer = AttestationSigner::from_secret_bytes([4; 32]);
        let mut inner = PassportLedger::new(admin, CircuitBreakerConfig::default(), Arc::new(ManualClock::new(0)));
        inner.grant_role(&admin, Capability::ScoreUpdater, signer.address()).unwrap();
        let ledger = InProcessLedger::new(inner).with_confirmation_delay(Duration::from_secs(3_600));
        let hash = ledger.submit(&signer.sign(0, call(1)).unwrap()).unwrap();
        assert!(ledger.receipt(&hash).is_none());
    }

    #[tokio::test]
    async fn fault_injection() {
        let (ledger, signer) = setup();
        let t = InProcessTransport::new("a", ledger.clone());
        t.set_offline(true);
        assert!(t.nonce(&signer.address()).await.unwrap_err().is_transient());
        t.set_offline(false);

        t.fail_next_sends(1);
        let tx = signer.sign(0, call(600)).unwrap();
        assert!(t.send(&tx).await.unwrap_err().is_transient());
        assert_eq!(ledger.executed_count(), 0);

        t.lose_next_responses(1);
        assert!(t.send(&tx).await.unwrap_err().is_transient());
        assert_eq!(ledger.executed_count(), 1);
        assert_eq!(t.send(&tx).await.unwrap(), tx.tx_hash().unwrap());
    }

    #[test]
    fn client_error_mapping() {
        use jsonrpsee::types::ErrorObjectOwned;
        let rejected = ClientError::Call(ErrorObjectOwned::owned(REJECTION_CODE, "EnforcedPause", None::<()>));
        assert_eq!(
            map_client_error(rejected),
            TransportError::Rejected(LedgerRejection::EnforcedPause)
        );
        let bad = ClientError::Call(ErrorObjectOwned::owned(INVALID_PARAMS_CODE, "invalid hex", None::<()>));
        assert!(matches!(map_client_error(bad), TransportError::Decode(_)));
        let other = ClientError::Call(ErrorObjectOwned::owned(-32603, "boom", None::<()>));
        assert!(map_client_error(other).is_transient());
    }

    #[test]
    fn receipt_status_json() {
        let s = serde_json::to_string(&ReceiptStatus::Reverted(LedgerRejection::RateLimitExceeded)).unwrap();
        assert_eq!(s, r#"{"reverted":"RateLimitExceeded"}"#);
        assert_eq!(serde_json::to_string(&ReceiptStatus::Success).unwrap(), r#""success""#);
    }
}
