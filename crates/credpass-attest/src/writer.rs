//! Attestation writer.
//!
//! Turns a [`ScoreResult`] into a confirmed ledger write:
//! build → sign → broadcast → wait for receipt.
//!
//! - Submissions are deduplicated by [`IdempotencyKey`] for
//!   `dedup_window`. A concurrent duplicate waits for the first and returns
//!   its outcome. Failed submissions are not remembered, except a signed
//!   transaction whose broadcast may have reached the ledger: the next
//!   submission for the key resends that exact transaction.
//! - Everything from nonce lookup to accepted broadcast runs under the single
//!   signer lock, so nonces are strictly sequential.
//! - A transient broadcast failure resends the *same* signed transaction on
//!   another endpoint; the ledger treats a resend as a no-op, so a lost
//!   response cannot cause a second mutation.
//! - Policy rejections are terminal and never retried.
//! - Receipt waiting is bounded; on timeout the outcome is
//!   [`TxStatus::Pending`] and [`AttestationWriter::reconcile`] settles it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use credpass_core::constants::{
    DEFAULT_DEDUP_WINDOW_SECS, DEFAULT_RECEIPT_POLL_INTERVAL_MS, DEFAULT_RECEIPT_TIMEOUT_SECS,
};
use credpass_core::error::{AttestationError, LedgerRejection, TransportError};
use credpass_core::idempotency::IdempotencyKey;
use credpass_core::retry::RetryPolicy;
use credpass_core::types::{Address, FeatureVector, Hash256, PassportState, ScoreResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::envelope::{AttestationCall, SignedAttestation};
use crate::pool::EndpointPool;
use crate::signer::AttestationSigner;
use crate::transport::{Receipt, ReceiptStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// Bound on waiting for a receipt after broadcast.
    pub receipt_timeout: Duration,
    pub poll_interval: Duration,
    pub dedup_window: Duration,
    pub retry: RetryPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            receipt_timeout: Duration::from_secs(DEFAULT_RECEIPT_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_RECEIPT_POLL_INTERVAL_MS),
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Confirmed,
    /// Broadcast but not yet confirmed. Poll with `reconcile`.
    Pending,
    Reverted(LedgerRejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub tx_hash: Hash256,
    pub status: TxStatus,
    /// `true` when served from an earlier identical submission.
    pub deduplicated: bool,
}

struct SignerState {
    signer: AttestationSigner,
    /// `None` until fetched, and after a failure that leaves it uncertain.
    next_nonce: Option<u64>,
}

enum SlotState {
    Done { outcome: SubmitOutcome, at: Instant },
    /// Broadcast with no answer from any endpoint; may or may not have
    /// executed.
    InDoubt { tx: SignedAttestation, at: Instant },
}

impl SlotState {
    fn at(&self) -> Instant {
        match self {
            SlotState::Done { at, .. } | SlotState::InDoubt { at, .. } => *at,
        }
    }
}

type Slot = Arc<Mutex<Option<SlotState>>>;

pub struct AttestationWriter {
    signer: Mutex<SignerState>,
    address: Address,
    pool: Arc<EndpointPool>,
    inflight: DashMap<IdempotencyKey, Slot>,
    config: WriterConfig,
}

impl AttestationWriter {
    pub fn new(signer: AttestationSigner, pool: Arc<EndpointPool>, config: WriterConfig) -> Self {
        let address = signer.address();
        info!(signer = %address, endpoints = pool.len(), "writer: initialized");
        Self {
            signer: Mutex::new(SignerState {
                signer,
                next_nonce: None,
            }),
            address,
            pool,
            inflight: DashMap::new(),
            config,
        }
    }

    pub fn signer_address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Attest `score` for `account`.
    pub async fn submit(
        &self,
        account: Address,
        features: &FeatureVector,
        score: &ScoreResult,
    ) -> Result<SubmitOutcome, AttestationError> {
        if !score.is_in_range() {
            return Err(AttestationError::OutOfRange {
                score: score.final_score,
                band: score.risk_band.as_u8(),
            });
        }
        let key = IdempotencyKey::derive(&account, features, score);
        self.prune();
        let slot = self.inflight.entry(key).or_default().clone();
        let mut cached = slot.lock().await;
        let window = self.config.dedup_window;

        let mut in_doubt = None;
        match cached.as_mut() {
            Some(SlotState::Done { outcome, at }) if at.elapsed() < window => {
                if outcome.status == TxStatus::Pending {
                    match self.reconcile(&outcome.tx_hash).await {
                        Ok(TxStatus::Reverted(r)) => {
                            *cached = None;
                            return Err(AttestationError::Rejected(r));
                        }
                        Ok(status) => outcome.status = status,
                        Err(e) => debug!(%key, error = %e, "writer: reconcile failed, still pending"),
                    }
                }
                debug!(%key, tx = %outcome.tx_hash, "writer: duplicate submission");
                return Ok(SubmitOutcome {
                    deduplicated: true,
                    ..*outcome
                });
            }
            Some(SlotState::InDoubt { tx, at }) if at.elapsed() < window => {
                debug!(%key, nonce = tx.unsigned.nonce, "writer: resending unanswered transaction");
                in_doubt = Some(*tx);
            }
            _ => {}
        }

        match self.write(account, score, &mut in_doubt).await {
            Ok(outcome) => {
                *cached = Some(SlotState::Done {
                    outcome,
                    at: Instant::now(),
                });
                Ok(outcome)
            }
            Err(e) => {
                *cached = in_doubt.map(|tx| SlotState::InDoubt { tx, at: Instant::now() });
                Err(e)
            }
        }
    }

    /// Drop expired and failed entries nobody is waiting on.
    fn prune(&self) {
        let window = self.config.dedup_window;
        self.inflight.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(g) => g.as_ref().is_some_and(|st| st.at().elapsed() < window),
                Err(_) => true,
            }
        });
    }

    async fn write(
        &self,
        account: Address,
        score: &ScoreResult,
        in_doubt: &mut Option<SignedAttestation>,
    ) -> Result<SubmitOutcome, AttestationError> {
        let call = AttestationCall {
            account,
            score: score.final_score,
            risk_band: score.risk_band,
        };
        let tx_hash = self.broadcast(call, in_doubt).await?;

        let status = match self.await_receipt(&tx_hash, self.config.receipt_timeout).await {
            Some(Receipt { status: ReceiptStatus::Success, block, .. }) => {
                info!(%account, tx = %tx_hash, block, score = call.score, "writer: attestation confirmed");
                TxStatus::Confirmed
            }
            Some(Receipt { status: ReceiptStatus::Reverted(r), .. }) => {
                warn!(%account, tx = %tx_hash, reason = %r, "writer: attestation reverted");
                return Err(AttestationError::Rejected(r));
            }
            None => {
                warn!(%account, tx = %tx_hash, "writer: receipt timeout, pending");
                TxStatus::Pending
            }
        };
        Ok(SubmitOutcome {
            tx_hash,
            status,
            deduplicated: false,
        })
    }

    /// Sign and broadcast under the signer lock. Returns once an endpoint
    /// accepted the transaction.
    ///
    /// `in_doubt` holds a transaction from an earlier unanswered broadcast,
    /// which is resent instead of signing a new one. On failure it holds the
    /// transaction if any send may have reached the ledger.
    async fn broadcast(
        &self,
        call: AttestationCall,
        in_doubt: &mut Option<SignedAttestation>,
    ) -> Result<Hash256, AttestationError> {
        let mut st = self.signer.lock().await;
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut tx = in_doubt.take();
        let mut maybe_delivered = tx.is_some();
        let mut avoid = None;
        let mut reached_endpoint = false;
        let mut last = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry.delay(attempt - 1)).await;
            }
            let lease = match self.pool.acquire(avoid).await {
                Ok(l) => l,
                Err(e) => {
                    last = e.to_string();
                    continue;
                }
            };
            reached_endpoint = true;
            avoid = Some(lease.index);
            let endpoint = lease.transport.endpoint().to_owned();

            let signed = match tx {
                Some(t) => t,
                None => {
                    let nonce = match st.next_nonce {
                        Some(n) => n,
                        None => match lease.transport.nonce(&self.address).await {
                            Ok(n) => n,
                            Err(e) => {
                                self.pool.report_failure(lease.index);
                                warn!(%endpoint, attempt, error = %e, "writer: nonce lookup failed");
                                last = e.to_string();
                                continue;
                            }
                        },
                    };
                    st.next_nonce = Some(nonce);
                    let t = st.signer.sign(nonce, call)?;
                    tx = Some(t);
                    t
                }
            };

            match lease.transport.send(&signed).await {
                Ok(hash) => {
                    self.pool.report_success(lease.index);
                    st.next_nonce = Some(signed.unsigned.nonce + 1);
                    debug!(%endpoint, tx = %hash, nonce = signed.unsigned.nonce, "writer: broadcast accepted");
                    return Ok(hash);
                }
                Err(TransportError::Rejected(LedgerRejection::InvalidNonce)) => {
                    self.pool.report_success(lease.index);
                    st.next_nonce = None;
                    if maybe_delivered {
                        // The nonce may be spent by this very transaction.
                        let hash = signed.tx_hash()?;
                        if let Ok(Some(_)) = lease.transport.receipt(&hash).await {
                            debug!(%endpoint, tx = %hash, "writer: earlier broadcast already executed");
                            return Ok(hash);
                        }
                    }
                    warn!(%endpoint, nonce = signed.unsigned.nonce, "writer: nonce out of sync, resyncing");
                    tx = None;
                    maybe_delivered = false;
                    last = LedgerRejection::InvalidNonce.to_string();
                }
                Err(TransportError::Rejected(r)) => {
                    self.pool.report_success(lease.index);
                    warn!(%endpoint, reason = %r, "writer: broadcast rejected");
                    st.next_nonce = None;
                    return Err(AttestationError::Rejected(r));
                }
                Err(e) => {
                    self.pool.report_failure(lease.index);
                    warn!(%endpoint, attempt, error = %e, "writer: broadcast failed");
                    maybe_delivered = true;
                    last = e.to_string();
                }
            }
        }

        st.next_nonce = None;
        if maybe_delivered {
            if let Some(t) = tx {
                warn!(nonce = t.unsigned.nonce, "writer: broadcast unanswered, keeping transaction for resend");
                *in_doubt = Some(t);
            }
        }
        if !reached_endpoint {
            return Err(AttestationError::NoHealthyEndpoint);
        }
        Err(AttestationError::RetriesExhausted {
            attempts: max_attempts,
            last,
        })
    }

    async fn fetch_receipt(&self, tx_hash: &Hash256) -> Result<Option<Receipt>, AttestationError> {
        let lease = self.pool.acquire(None).await?;
        match lease.transport.receipt(tx_hash).await {
            Ok(r) => {
                self.pool.report_success(lease.index);
                Ok(r)
            }
            Err(e) => {
                self.pool.report_failure(lease.index);
                Err(AttestationError::RetriesExhausted {
                    attempts: 1,
                    last: e.to_string(),
                })
            }
        }
    }

    async fn await_receipt(&self, tx_hash: &Hash256, deadline: Duration) -> Option<Receipt> {
        let poll = async {
            loop {
                match self.fetch_receipt(tx_hash).await {
                    Ok(Some(r)) => return r,
                    Ok(None) => {}
                    Err(e) => debug!(tx = %tx_hash, error = %e, "writer: receipt poll failed"),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };
        tokio::time::timeout(deadline, poll).await.ok()
    }

    /// One receipt lookup.
    pub async fn reconcile(&self, tx_hash: &Hash256) -> Result<TxStatus, AttestationError> {
        Ok(match self.fetch_receipt(tx_hash).await? {
            None => TxStatus::Pending,
            Some(Receipt { status: ReceiptStatus::Success, .. }) => TxStatus::Confirmed,
            Some(Receipt { status: ReceiptStatus::Reverted(r), .. }) => TxStatus::Reverted(r),
        })
    }

    /// Poll until the receipt appears or `deadline` passes.
    pub async fn confirm(&self, tx_hash: &Hash256, deadline: Duration) -> Result<Receipt, AttestationError> {
        self.await_receipt(tx_hash, deadline)
            .await
            .ok_or(AttestationError::ConfirmationTimeout { tx_hash: *tx_hash })
    }

    /// Read `account`'s passport, failing over across endpoints.
    pub async fn read_passport(&self, account: &Address) -> Result<Option<PassportState>, AttestationError> {
        let mut avoid = None;
        let mut last = String::new();
        let attempts = self.pool.len().max(1) as u32;
        for _ in 0..attempts {
            let lease = self.pool.acquire(avoid).await?;
            avoid = Some(lease.index);
            match lease.transport.passport(account).await {
                Ok(p) => {
                    self.pool.report_success(lease.index);
                    return Ok(p);
                }
                Err(e) => {
                    self.pool.report_failure(lease.index);
                    warn!(endpoint = lease.transport.endpoint(), error = %e, "writer: passport read failed");
                    last = e.to_string();
                }
            }
        }
        Err(AttestationError::RetriesExhausted { attempts, last })
    }
}
