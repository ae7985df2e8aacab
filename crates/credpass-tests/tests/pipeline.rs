//! End-to-end tests of the score pipeline: extraction, oracle penalty,
//! staking boost, scoring, attestation and read-back.

use std::time::Duration;

use credpass_attest::TxStatus;
use credpass_core::error::{AttestationError, FeatureExtractionError};
use credpass_core::types::{RiskBand, StakingTier, TokenKind};
use credpass_node_lib::ServiceError;
use credpass_tests::helpers::*;

#[tokio::test]
async fn steady_account_scores_and_attests() {
    let h = Harness::new();
    let alice = account(0xA1);
    h.with_steady(alice);
    h.staking.stake(alice, 2_000);

    let scored = h.service.compute_score(alice).await.unwrap();
    let f = scored.features;
    assert_eq!(f.tx_count, 50);
    assert!((f.total_volume_usd - 10_000.0).abs() < 1e-6);
    assert!((f.stablecoin_ratio - 0.4).abs() < 1e-9);
    assert_eq!(f.days_active, 400);
    assert_eq!(f.unique_contracts, 8);
    assert_eq!(f.volatility_pct, 0.0);
    assert_eq!(f.max_drawdown_pct, 0.0);

    let s = &scored.score;
    assert_eq!(s.base_score, 408);
    assert_eq!(s.staking_boost, 150);
    assert_eq!(s.oracle_penalty, 0);
    assert_eq!(s.final_score, 558);
    assert_eq!(s.risk_band, RiskBand::Moderate);
    assert_eq!(s.computed_at, NOW);
    assert!(s.explanation.iter().any(|l| l.contains("final score: 558")));

    let attested = h.service.attest(alice).await.unwrap();
    assert_eq!(attested.outcome.status, TxStatus::Confirmed);
    assert!(!attested.outcome.deduplicated);

    let passport = h.service.get_attested_score(alice).await.unwrap();
    assert_eq!(passport.owner, alice);
    assert_eq!(passport.score, 558);
    assert_eq!(passport.risk_band, RiskBand::Moderate);
    assert_eq!(passport.last_updated, NOW);
    assert_eq!(
        h.service.attestation_status(attested.outcome.tx_hash).await.unwrap(),
        TxStatus::Confirmed
    );
}

#[tokio::test]
async fn repeated_attest_is_deduplicated() {
    let h = Harness::new();
    let bob = account(0xB0);
    h.with_steady(bob);

    let first = h.service.attest(bob).await.unwrap();
    // A later computation yields the same score; only its timestamp moves.
    h.clock.advance(30);
    let second = h.service.attest(bob).await.unwrap();

    assert!(second.outcome.deduplicated);
    assert_eq!(second.outcome.tx_hash, first.outcome.tx_hash);
    assert_eq!(second.scored.score.final_score, first.scored.score.final_score);
    assert_ne!(second.scored.score.computed_at, first.scored.score.computed_at);
    assert_eq!(h.ledger.executed_count(), 1);
}

#[tokio::test]
async fn concurrent_attests_write_once() {
    let h = Harness::new();
    let carol = account(0xC0);
    h.with_steady(carol);

    let (a, b, c) = tokio::join!(
        h.service.attest(carol),
        h.service.attest(carol),
        h.service.attest(carol),
    );
    let outcomes = [a.unwrap().outcome, b.unwrap().outcome, c.unwrap().outcome];
    assert!(outcomes.iter().all(|o| o.tx_hash == outcomes[0].tx_hash));
    assert_eq!(outcomes.iter().filter(|o| !o.deduplicated).count(), 1);
    assert_eq!(h.ledger.executed_count(), 1);
}

#[tokio::test]
async fn changed_history_is_rewritten() {
    let h = Harness::new();
    let dave = account(0xD0);
    h.with_steady(dave);
    let first = h.service.attest(dave).await.unwrap();

    let mut history = steady_history(&dave);
    history.push(incoming(&dave, 50, NOW, 5.0, TokenKind::Native, None));
    h.history.insert(dave, history);
    let second = h.service.attest(dave).await.unwrap();

    assert!(!second.outcome.deduplicated);
    assert_ne!(second.outcome.tx_hash, first.outcome.tx_hash);
    assert_eq!(h.ledger.executed_count(), 2);
    let passport = h.service.get_attested_score(dave).await.unwrap();
    assert_eq!(passport.score, second.scored.score.final_score);
}

#[tokio::test]
async fn cold_start_account() {
    let h = Harness::new();
    let eve = account(0xE0);

    let scored = h.service.compute_score(eve).await.unwrap();
    assert!(scored.features.is_cold_start());
    assert_eq!(scored.score.base_score, 0);
    assert_eq!(scored.score.final_score, 0);
    assert_eq!(scored.score.risk_band, RiskBand::NoConfidence);

    // Staking alone never lifts a cold start out of NoConfidence.
    h.staking.stake(eve, 10_000);
    let boosted = h.service.compute_score(eve).await.unwrap();
    assert_eq!(boosted.score.final_score, 300);
    assert_eq!(boosted.score.risk_band, RiskBand::NoConfidence);

    h.service.attest(eve).await.unwrap();
    let passport = h.service.get_attested_score(eve).await.unwrap();
    assert_eq!((passport.score, passport.risk_band), (300, RiskBand::NoConfidence));
}

#[tokio::test]
async fn history_failure_propagates_without_writing() {
    let h = Harness::new();
    let frank = account(0xF0);
    h.with_steady(frank);
    h.history.set_failing(true);

    let err = h.service.compute_score(frank).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Extraction(FeatureExtractionError::SourcesExhausted { attempts: 2, .. })
    ));
    assert_eq!(err.rpc_code(), -32001);

    assert!(h.service.attest(frank).await.is_err());
    assert_eq!(h.ledger.executed_count(), 0);

    h.history.set_failing(false);
    assert_eq!(h.service.attest(frank).await.unwrap().outcome.status, TxStatus::Confirmed);
}

#[tokio::test]
async fn staking_tiers_and_failures() {
    let h = Harness::new();
    let gina = account(0x61);
    h.with_steady(gina);

    let unstaked = h.service.compute_score(gina).await.unwrap().score;
    assert_eq!(unstaked.staking_boost, 0);
    assert_eq!(unstaked.final_score, 408);

    for (tokens, boost) in [(499, 0), (500, 50), (2_000, 150), (10_000, 300)] {
        h.staking.stake(gina, tokens);
        let s = h.service.compute_score(gina).await.unwrap().score;
        assert_eq!(s.staking_boost, boost, "{tokens} tokens");
        assert_eq!(s.final_score, 408 + boost);
    }

    // A failing staking read degrades to no boost instead of failing the score.
    h.staking.set_failing(true);
    let s = h.service.compute_score(gina).await.unwrap().score;
    assert_eq!(s.staking_boost, 0);
}

#[tokio::test]
async fn absent_staking_contract_means_no_boost() {
    let h = Harness::builder().without_staking().build();
    let hal = account(0x70);
    h.with_steady(hal);
    h.staking.stake(hal, 10_000);

    let s = h.service.compute_score(hal).await.unwrap().score;
    assert_eq!(s.staking_boost, 0);
    assert!(s.explanation.iter().any(|l| l.contains(&format!("tier {}", StakingTier::Unstaked.as_u8()))));
}

#[tokio::test]
async fn volatile_market_costs_points() {
    // 10 % daily swings: far above the free threshold, so the penalty caps.
    let closes: Vec<f64> = (0..31).map(|i| if i % 2 == 0 { 2_000.0 } else { 2_200.0 }).collect();
    let prices = FixedPrices::new().with_spot("ETH", 200.0).with_closes("ETH", closes);
    let h = Harness::builder().prices(prices).build();
    let ivy = account(0x80);
    h.with_steady(ivy);

    let scored = h.service.compute_score(ivy).await.unwrap();
    assert!(scored.features.volatility_pct > 120.0);
    assert_eq!(scored.score.oracle_penalty, 100);
    // The volatility factor saturates too.
    assert_eq!(scored.score.base_score, 208);
    assert_eq!(scored.score.final_score, 108);
    assert_eq!(scored.score.risk_band, RiskBand::High);
}

#[tokio::test]
async fn missing_price_history_uses_class_default() {
    let h = Harness::builder().prices(FixedPrices::new().with_spot("ETH", 200.0)).build();
    let jo = account(0x90);
    h.with_steady(jo);

    let scored = h.service.compute_score(jo).await.unwrap();
    // Majors default to 60 % annualized volatility.
    assert_eq!(scored.features.volatility_pct, 60.0);
    assert_eq!(scored.score.oracle_penalty, 40);
    assert_eq!(scored.score.base_score, 408 - 120);
}

#[tokio::test]
async fn slow_history_hits_deadline() {
    let h = Harness::builder().deadline(Duration::from_millis(100)).build();
    let kim = account(0x99);
    h.with_steady(kim);
    h.history.set_delay(Duration::from_millis(400));

    let err = h.service.compute_score(kim).await.unwrap_err();
    assert!(matches!(err, ServiceError::Timeout(_)));
    assert_eq!(err.rpc_code(), -32008);
    assert_eq!(h.ledger.executed_count(), 0);
}

#[tokio::test]
async fn history_is_paged_to_completion() {
    let h = Harness::new();
    let lee = account(0x9A);
    h.with_steady(lee);

    let scored = h.service.compute_score(lee).await.unwrap();
    assert_eq!(scored.features.tx_count, 50);
    // 50 records in pages of 16.
    assert_eq!(h.history.pages_served(), 4);
}

#[tokio::test]
async fn unknown_passport_is_not_found() {
    let h = Harness::new();
    let err = h.service.get_attested_score(account(0x01)).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(a) if a == account(0x01)));
    assert_eq!(err.rpc_code(), -32004);
}

#[tokio::test]
async fn endpoint_failover_keeps_single_write() {
    let h = Harness::builder().endpoints(2).build();
    let max = account(0x9B);
    h.with_steady(max);
    h.endpoints[0].set_offline(true);

    let attested = h.service.attest(max).await.unwrap();
    assert_eq!(attested.outcome.status, TxStatus::Confirmed);
    assert_eq!(h.ledger.executed_count(), 1);

    // Reads fail over as well.
    assert_eq!(h.service.get_attested_score(max).await.unwrap().score, 408);
}

#[tokio::test]
async fn lost_response_is_not_written_twice() {
    let h = Harness::builder().endpoints(2).build();
    let ned = account(0x9C);
    h.with_steady(ned);
    // The first send executes but its response never arrives; the retry
    // resends the same signed transaction elsewhere.
    h.endpoints[0].lose_next_responses(1);

    let attested = h.service.attest(ned).await.unwrap();
    assert_eq!(attested.outcome.status, TxStatus::Confirmed);
    assert_eq!(h.ledger.executed_count(), 1);
    assert_eq!(h.ledger.nonce(&h.signer_address), 1);
}

#[tokio::test]
async fn unanswered_attestation_is_resent_on_retry() {
    let h = Harness::new();
    let una = account(0xA9);
    h.with_steady(una);
    // The only endpoint executes the write but the answer is lost, and the
    // endpoint then sits out its cooldown for the remaining attempts.
    h.endpoints[0].lose_next_responses(1);

    let err = h.service.attest(una).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Attestation(AttestationError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(h.ledger.executed_count(), 1);

    tokio::time::sleep(ENDPOINT_COOLDOWN * 3).await;
    let retried = h.service.attest(una).await.unwrap();
    assert_eq!(retried.outcome.status, TxStatus::Confirmed);
    assert_eq!(h.ledger.executed_count(), 1);
    assert_eq!(h.ledger.nonce(&h.signer_address), 1);
    assert_eq!(h.service.get_attested_score(una).await.unwrap().score, 408);
}

#[tokio::test]
async fn all_endpoints_down_is_reported() {
    let h = Harness::builder().endpoints(2).build();
    let oli = account(0x9D);
    h.with_steady(oli);
    for e in &h.endpoints {
        e.set_offline(true);
    }

    let err = h.service.attest(oli).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Attestation(AttestationError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(err.rpc_code(), -32011);
    assert_eq!(h.ledger.executed_count(), 0);

    for e in &h.endpoints {
        e.set_offline(false);
    }
    // Failures are not cached: a retry goes through once the endpoints are
    // out of cooldown.
    tokio::time::sleep(ENDPOINT_COOLDOWN * 3).await;
    assert_eq!(h.service.attest(oli).await.unwrap().outcome.status, TxStatus::Confirmed);
}

#[tokio::test]
async fn slow_confirmation_is_pending_then_confirmed() {
    let h = Harness::builder()
        .confirmation_delay(Duration::from_millis(300))
        .writer(credpass_attest::WriterConfig {
            receipt_timeout: Duration::from_millis(50),
            ..fast_writer()
        })
        .build();
    let pat = account(0x9E);
    h.with_steady(pat);

    let attested = h.service.attest(pat).await.unwrap();
    assert_eq!(attested.outcome.status, TxStatus::Pending);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        h.service.attestation_status(attested.outcome.tx_hash).await.unwrap(),
        TxStatus::Confirmed
    );
    assert_eq!(h.ledger.executed_count(), 1);
}

#[tokio::test]
async fn spending_down_shows_as_drawdown() {
    let h = Harness::new();
    let quinn = account(0x9F);
    let mut history = steady_history(&quinn);
    // Send 15 of the 30 ETH received: a 30 % fall from the $10 000 peak.
    history.push(outgoing(&quinn, 50, NOW + 60, 15.0, TokenKind::Native, None));
    h.history.insert(quinn, history);

    let f = h.service.compute_score(quinn).await.unwrap().features;
    assert_eq!(f.tx_count, 51);
    assert!((f.max_drawdown_pct - 30.0).abs() < 1e-9);
}
