//! Ledger-side guards seen through the scoring service: the circuit breaker,
//! pause and role checks.

use credpass_attest::TxStatus;
use credpass_core::error::{AttestationError, LedgerRejection};
use credpass_core::types::{CircuitBreakerConfig, FeatureVector, RiskBand, ScoreResult};
use credpass_ledger::Capability;
use credpass_node_lib::ServiceError;
use credpass_tests::helpers::*;

fn rejection(r: Result<credpass_node_lib::Attested, ServiceError>) -> Option<LedgerRejection> {
    r.err().and_then(|e| e.rejection())
}

/// A hand-made score for writing straight through the writer.
fn score(final_score: u32) -> (FeatureVector, ScoreResult) {
    let features = FeatureVector {
        tx_count: u64::from(final_score),
        ..FeatureVector::default()
    };
    let result = ScoreResult {
        base_score: final_score,
        staking_boost: 0,
        oracle_penalty: 0,
        final_score,
        risk_band: RiskBand::from_score(final_score),
        explanation: Vec::new(),
        computed_at: NOW,
    };
    (features, result)
}

#[tokio::test]
async fn eleventh_write_in_window_is_rate_limited() {
    let h = Harness::builder()
        .circuit_breaker(CircuitBreakerConfig {
            max_operations_per_window: 10,
            window_seconds: 3_600,
            ..CircuitBreakerConfig::default()
        })
        .build();

    for seed in 1..=10u8 {
        let a = account(seed);
        h.with_steady(a);
        assert_eq!(h.service.attest(a).await.unwrap().outcome.status, TxStatus::Confirmed);
    }

    let eleventh = account(11);
    h.with_steady(eleventh);
    let err = h.service.attest(eleventh).await.unwrap_err();
    assert_eq!(err.rejection(), Some(LedgerRejection::RateLimitExceeded));
    assert_eq!(err.rpc_code(), -32010);
    assert_eq!(err.rpc_message(), "RateLimitExceeded");
    assert!(matches!(h.service.get_attested_score(eleventh).await, Err(ServiceError::NotFound(_))));

    // The reverted write consumed a nonce but left no passport; the next
    // window admits it.
    h.clock.advance(3_601);
    assert_eq!(h.service.attest(eleventh).await.unwrap().outcome.status, TxStatus::Confirmed);
    assert_eq!(h.ledger.nonce(&h.signer_address), 12);
}

#[tokio::test]
async fn score_jump_above_limit_is_refused() {
    let h = Harness::builder()
        .circuit_breaker(CircuitBreakerConfig {
            max_score_delta: 200,
            ..CircuitBreakerConfig::default()
        })
        .build();
    let writer = h.service.writer();
    let a = account(0x42);

    let (fv, s) = score(500);
    writer.submit(a, &fv, &s).await.unwrap();

    let (fv, s) = score(750);
    assert_eq!(
        writer.submit(a, &fv, &s).await,
        Err(AttestationError::Rejected(LedgerRejection::AmountLimitExceeded))
    );
    assert_eq!(h.service.get_attested_score(a).await.unwrap().score, 500);

    let (fv, s) = score(700);
    assert_eq!(writer.submit(a, &fv, &s).await.unwrap().status, TxStatus::Confirmed);
    assert_eq!(h.service.get_attested_score(a).await.unwrap().score, 700);
}

#[tokio::test]
async fn first_mint_is_exempt_from_delta_limit() {
    let h = Harness::builder()
        .circuit_breaker(CircuitBreakerConfig {
            max_score_delta: 50,
            ..CircuitBreakerConfig::default()
        })
        .build();
    let (fv, s) = score(900);
    let out = h.service.writer().submit(account(0x43), &fv, &s).await.unwrap();
    assert_eq!(out.status, TxStatus::Confirmed);
}

#[tokio::test]
async fn disabled_breaker_admits_everything() {
    let h = Harness::builder()
        .circuit_breaker(CircuitBreakerConfig {
            max_operations_per_window: 1,
            max_score_delta: 1,
            enabled: false,
            ..CircuitBreakerConfig::default()
        })
        .build();
    let a = account(0x44);
    for v in [100, 900, 50] {
        let (fv, s) = score(v);
        assert_eq!(h.service.writer().submit(a, &fv, &s).await.unwrap().status, TxStatus::Confirmed);
    }
}

#[tokio::test]
async fn paused_ledger_refuses_attestations() {
    let h = Harness::new();
    let a = account(0x50);
    h.with_steady(a);
    h.ledger.with_ledger(|l| l.pause(&ADMIN)).unwrap();

    assert_eq!(rejection(h.service.attest(a).await), Some(LedgerRejection::EnforcedPause));
    assert!(matches!(h.service.get_attested_score(a).await, Err(ServiceError::NotFound(_))));

    // Pausing twice is an error; unpausing restores writes.
    assert_eq!(h.ledger.with_ledger(|l| l.pause(&ADMIN)), Err(LedgerRejection::EnforcedPause));
    h.ledger.with_ledger(|l| l.unpause(&ADMIN)).unwrap();
    assert_eq!(h.service.attest(a).await.unwrap().outcome.status, TxStatus::Confirmed);
}

#[tokio::test]
async fn revoked_updater_is_unauthorized() {
    let h = Harness::new();
    let a = account(0x51);
    h.with_steady(a);
    let signer = h.signer_address;
    h.ledger
        .with_ledger(|l| l.revoke_role(&ADMIN, Capability::ScoreUpdater, &signer))
        .unwrap();

    assert_eq!(rejection(h.service.attest(a).await), Some(LedgerRejection::Unauthorized));

    h.ledger
        .with_ledger(|l| l.grant_role(&ADMIN, Capability::ScoreUpdater, signer))
        .unwrap();
    assert_eq!(h.service.attest(a).await.unwrap().outcome.status, TxStatus::Confirmed);
}

#[tokio::test]
async fn breaker_config_is_admin_only() {
    let h = Harness::builder()
        .circuit_breaker(CircuitBreakerConfig {
            max_operations_per_window: 1,
            ..CircuitBreakerConfig::default()
        })
        .build();
    let signer = h.signer_address;
    let relaxed = CircuitBreakerConfig::default();

    let (fv, s) = score(400);
    h.service.writer().submit(account(0x60), &fv, &s).await.unwrap();
    assert_eq!(
        h.service.writer().submit(account(0x61), &fv, &s).await,
        Err(AttestationError::Rejected(LedgerRejection::RateLimitExceeded))
    );

    // The score updater cannot loosen its own limits.
    assert_eq!(
        h.ledger.with_ledger(|l| l.set_circuit_breaker_config(&signer, relaxed)),
        Err(LedgerRejection::Unauthorized)
    );
    h.ledger
        .with_ledger(|l| l.set_circuit_breaker_config(&ADMIN, relaxed))
        .unwrap();
    assert_eq!(
        h.service.writer().submit(account(0x61), &fv, &s).await.unwrap().status,
        TxStatus::Confirmed
    );
}

#[tokio::test]
async fn passports_are_soulbound() {
    let h = Harness::new();
    let a = account(0x70);
    h.with_steady(a);
    h.service.attest(a).await.unwrap();

    let b = account(0x71);
    assert_eq!(
        h.ledger.with_ledger(|l| l.transfer(&a, &a, &b)),
        Err(LedgerRejection::Soulbound)
    );
    assert_eq!(h.ledger.passport(&a).map(|p| p.owner), Some(a));
}
