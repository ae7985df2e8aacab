//! Role capabilities.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use credpass_core::types::Address;
use serde::{Deserialize, Serialize};

/// A privilege a caller may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// Mint and update passports.
    ScoreUpdater,
    /// Change the circuit-breaker configuration.
    CircuitBreakerAdmin,
    Pauser,
    Upgrader,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Self::ScoreUpdater,
        Self::CircuitBreakerAdmin,
        Self::Pauser,
        Self::Upgrader,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScoreUpdater => "SCORE_UPDATER",
            Self::CircuitBreakerAdmin => "CIRCUIT_BREAKER_ADMIN",
            Self::Pauser => "PAUSER",
            Self::Upgrader => "UPGRADER",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown capability: {s}"))
    }
}

/// Holders per capability, plus the single admin who manages them.
#[derive(Debug, Clone)]
pub struct RoleTable {
    admin: Address,
    holders: HashMap<Capability, HashSet<Address>>,
}

impl RoleTable {
    /// The admin starts out holding every capability.
    pub fn new(admin: Address) -> Self {
        let holders = Capability::ALL
            .into_iter()
            .map(|c| (c, HashSet::from([admin])))
            .collect();
        Self { admin, holders }
    }

    pub fn admin(&self) -> &Address {
        &self.admin
    }

    pub fn is_admin(&self, who: &Address) -> bool {
        self.admin == *who
    }

    pub fn has(&self, cap: Capability, who: &Address) -> bool {
        self.holders.get(&cap).is_some_and(|s| s.contains(who))
    }

    /// Returns `false` if `who` already held `cap`.
    pub fn grant(&mut self, cap: Capability, who: Address) -> bool {
        self.holders.entry(cap).or_default().insert(who)
    }

    /// Returns `false` if `who` did not hold `cap`.
    pub fn revoke(&mut self, cap: Capability, who: &Address) -> bool {
        self.holders.get_mut(&cap).is_some_and(|s| s.remove(who))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_holds_everything() {
        let admin = Address([1; 20]);
        let t = RoleTable::new(admin);
        for c in Capability::ALL {
            assert!(t.has(c, &admin));
        }
        assert!(!t.has(Capability::Pauser, &Address([2; 20])));
    }

    #[test]
    fn grant_and_revoke() {
        let mut t = RoleTable::new(Address([1; 20]));
        let bot = Address([9; 20]);
        assert!(t.grant(Capability::ScoreUpdater, bot));
        assert!(!t.grant(Capability::ScoreUpdater, bot));
        assert!(t.has(Capability::ScoreUpdater, &bot));
        assert!(t.revoke(Capability::ScoreUpdater, &bot));
        assert!(!t.revoke(Capability::ScoreUpdater, &bot));
        assert!(!t.has(Capability::ScoreUpdater, &bot));
    }

    #[test]
    fn capability_names() {
        assert_eq!(Capability::CircuitBreakerAdmin.to_string(), "CIRCUIT_BREAKER_ADMIN");
        assert_eq!("score_updater".parse::<Capability>().unwrap(), Capability::ScoreUpdater);
        assert!("ROOT".parse::<Capability>().is_err());
        assert_eq!(serde_json::to_string(&Capability::Pauser).unwrap(), "\"PAUSER\"");
    }
}
