//! Passport ledger.
//!
//! Mirrors the on-chain attestation contract: one soulbound passport per
//! account, written only by [`Capability::ScoreUpdater`] holders, guarded by
//! the pause switch and the [`CircuitBreaker`].
//!
//! Not thread-safe. Wrap in a `Mutex` for shared use.

use std::collections::HashMap;
use std::sync::Arc;

use credpass_core::constants::{LEDGER_EVENT_LOG_CAPACITY, SCORE_MAX};
use credpass_core::error::LedgerRejection;
use credpass_core::traits::Clock;
use credpass_core::types::{Address, CircuitBreakerConfig, Hash256, PassportState, RiskBand, ScoreView};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::roles::{Capability, RoleTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    Minted { token_id: u64, owner: Address, score: u32, risk_band: RiskBand, at: u64 },
    Updated { token_id: u64, owner: Address, old_score: u32, new_score: u32, risk_band: RiskBand, at: u64 },
    Burned { token_id: u64, owner: Address },
    Paused { by: Address },
    Unpaused { by: Address },
    CircuitBreakerConfigured { config: CircuitBreakerConfig, by: Address },
    RoleGranted { role: Capability, account: Address, by: Address },
    RoleRevoked { role: Capability, account: Address, by: Address },
    UpgradeAuthorized { implementation: Hash256, by: Address },
}

/// Result of an accepted `mint_or_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub token_id: u64,
    /// `true` when the write created the passport.
    pub minted: bool,
}

pub struct PassportLedger {
    roles: RoleTable,
    passports: HashMap<Address, PassportState>,
    next_token_id: u64,
    paused: bool,
    breaker: CircuitBreaker,
    upgrade_target: Option<Hash256>,
    events: Vec<LedgerEvent>,
    event_capacity: usize,
    clock: Arc<dyn Clock>,
}

impl PassportLedger {
    pub fn new(admin: Address, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            roles: RoleTable::new(admin),
            passports: HashMap::new(),
            next_token_id: 1,
            paused: false,
            breaker: CircuitBreaker::new(config, now),
            upgrade_target: None,
            events: Vec::new(),
            event_capacity: LEDGER_EVENT_LOG_CAPACITY,
            clock,
        }
    }

    /// Keep at most `capacity` events; the oldest half is dropped when full.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    fn record(&mut self, event: LedgerEvent) {
        if self.events.len() >= self.event_capacity {
            let keep = self.event_capacity / 2;
            self.events.drain(..self.events.len() - keep);
        }
        self.events.push(event);
    }

    fn require(&self, cap: Capability, caller: &Address) -> Result<(), LedgerRejection> {
        if self.roles.has(cap, caller) {
            Ok(())
        } else {
            warn!(%caller, role = %cap, "ledger: missing capability");
            Err(LedgerRejection::Unauthorized)
        }
    }

    fn require_admin(&self, caller: &Address) -> Result<(), LedgerRejection> {
        if self.roles.is_admin(caller) {
            Ok(())
        } else {
            warn!(%caller, "ledger: admin only");
            Err(LedgerRejection::Unauthorized)
        }
    }

    // ------------------------------------------------------------------
    // Score writes and reads
    // ------------------------------------------------------------------

    /// Create or update `account`'s passport.
    ///
    /// Checks run in order: capability, pause, score range, circuit breaker.
    /// Nothing changes unless every check passes.
    pub fn mint_or_update(
        &mut self,
        caller: &Address,
        account: Address,
        score: u32,
        risk_band: RiskBand,
    ) -> Result<WriteOutcome, LedgerRejection> {
        self.require(Capability::ScoreUpdater, caller)?;
        if self.paused {
            return Err(LedgerRejection::EnforcedPause);
        }
        if score > SCORE_MAX {
            return Err(LedgerRejection::InvalidScore);
        }

        let now = self.clock.now();
        let previous = self.passports.get(&account).copied();
        let admission = self
            .breaker
            .admit(now, previous.map(|p| p.score), score)
            .inspect_err(|r| warn!(%account, score, reason = %r, "ledger: circuit breaker tripped"))?;
        self.breaker.commit(admission);

        let outcome = match previous {
            Some(old) => {
                let state = PassportState {
                    score,
                    risk_band,
                    last_updated: now,
                    window_op_start: admission.window_start,
                    window_op_count: admission.window_count,
                    ..old
                };
                self.passports.insert(account, state);
                self.record(LedgerEvent::Updated {
                    token_id: old.token_id,
                    owner: account,
                    old_score: old.score,
                    new_score: score,
                    risk_band,
                    at: now,
                });
                debug!(%account, token_id = old.token_id, old = old.score, new = score, "ledger: passport updated");
                WriteOutcome { token_id: old.token_id, minted: false }
            }
            None => {
                let token_id = self.next_token_id;
                self.next_token_id += 1;
                self.passports.insert(
                    account,
                    PassportState {
                        token_id,
                        owner: account,
                        score,
                        risk_band,
                        last_updated: now,
                        window_op_start: admission.window_start,
                        window_op_count: admission.window_count,
                    },
                );
                self.record(LedgerEvent::Minted { token_id, owner: account, score, risk_band, at: now });
                info!(%account, token_id, score, "ledger: passport minted");
                WriteOutcome { token_id, minted: true }
            }
        };
        Ok(outcome)
    }

    pub fn get_score(&self, account: &Address) -> Option<ScoreView> {
        self.passports.get(account).map(ScoreView::from)
    }

    pub fn passport(&self, account: &Address) -> Option<&PassportState> {
        self.passports.get(account)
    }

    pub fn passport_count(&self) -> usize {
        self.passports.len()
    }

    /// Passports cannot change hands.
    pub fn transfer(&mut self, _caller: &Address, _from: &Address, _to: &Address) -> Result<(), LedgerRejection> {
        Err(LedgerRejection::Soulbound)
    }

    /// Delete `account`'s passport. Admin only.
    pub fn burn(&mut self, caller: &Address, account: &Address) -> Result<u64, LedgerRejection> {
        self.require_admin(caller)?;
        let state = self.passports.remove(account).ok_or(LedgerRejection::NotFound)?;
        self.record(LedgerEvent::Burned { token_id: state.token_id, owner: *account });
        info!(%account, token_id = state.token_id, "ledger: passport burned");
        Ok(state.token_id)
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    pub fn circuit_breaker_config(&self) -> &CircuitBreakerConfig {
        self.breaker.config()
    }

    pub fn set_circuit_breaker_config(
        &mut self,
        caller: &Address,
        config: CircuitBreakerConfig,
    ) -> Result<(), LedgerRejection> {
        self.require(Capability::CircuitBreakerAdmin, caller)?;
        self.breaker.set_config(config);
        self.record(LedgerEvent::CircuitBreakerConfigured { config, by: *caller });
        info!(
            max_ops = config.max_operations_per_window,
            window_secs = config.window_seconds,
            max_delta = config.max_score_delta,
            enabled = config.enabled,
            "ledger: circuit breaker reconfigured"
        );
        Ok(())
    }

    /// Ledger-wide `(window_start, window_count)`.
    pub fn window(&self) -> (u64, u32) {
        self.breaker.window()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self, caller: &Address) -> Result<(), LedgerRejection> {
        self.require(Capability::Pauser, caller)?;
        if self.paused {
            return Err(LedgerRejection::EnforcedPause);
        }
        self.paused = true;
        self.record(LedgerEvent::Paused { by: *caller });
        warn!(%caller, "ledger: paused");
        Ok(())
    }

    pub fn unpause(&mut self, caller: &Address) -> Result<(), LedgerRejection> {
        self.require(Capability::Pauser, caller)?;
        if !self.paused {
            return Err(LedgerRejection::ExpectedPause);
        }
        self.paused = false;
        self.record(LedgerEvent::Unpaused { by: *caller });
        info!(%caller, "ledger: unpaused");
        Ok(())
    }

    pub fn has_role(&self, cap: Capability, who: &Address) -> bool {
        self.roles.has(cap, who)
    }

    pub fn grant_role(&mut self, caller: &Address, cap: Capability, account: Address) -> Result<(), LedgerRejection> {
        self.require_admin(caller)?;
        if self.roles.grant(cap, account) {
            self.record(LedgerEvent::RoleGranted { role: cap, account, by: *caller });
            info!(%account, role = %cap, "ledger: role granted");
        }
        Ok(())
    }

    pub fn revoke_role(&mut self, caller: &Address, cap: Capability, account: &Address) -> Result<(), LedgerRejection> {
        self.require_admin(caller)?;
        if self.roles.revoke(cap, account) {
            self.record(LedgerEvent::RoleRevoked { role: cap, account: *account, by: *caller });
            info!(%account, role = %cap, "ledger: role revoked");
        }
        Ok(())
    }

    /// Record approval of a new implementation.
    pub fn authorize_upgrade(&mut self, caller: &Address, implementation: Hash256) -> Result<(), LedgerRejection> {
        self.require(Capability::Upgrader, caller)?;
        self.upgrade_target = Some(implementation);
        self.record(LedgerEvent::UpgradeAuthorized { implementation, by: *caller });
        info!(%implementation, "ledger: upgrade authorized");
        Ok(())
    }

    pub fn upgrade_target(&self) -> Option<&Hash256> {
        self.upgrade_target.as_ref()
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }
}
