use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Public-key-like string that joins measurement rows to users.
pub type Identity = String;

/// Cumulative counters reported by the measurement agent.
pub type UsageSnapshot = BTreeMap<Identity, Counters>;

/// The whole persisted ledger.
pub type Ledger = BTreeMap<Identity, LedgerEntry>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default, deserialize_with = "nullable_counter")]
    pub up: u64,
    #[serde(default, deserialize_with = "nullable_counter")]
    pub down: u64,
}

impl Counters {
    pub fn new(up: u64, down: u64) -> Self {
        Self { up, down }
    }

    /// Per-side difference, clamped at zero when the counter went backwards.
    pub fn saturating_sub(self, baseline: Counters) -> Counters {
        Counters {
            up: self.up.saturating_sub(baseline.up),
            down: self.down.saturating_sub(baseline.down),
        }
    }

    pub fn total(self) -> u64 {
        self.up.saturating_add(self.down)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(default, deserialize_with = "nullable_counter")]
    pub up: u64,
    #[serde(default, deserialize_with = "nullable_counter")]
    pub down: u64,
    /// Raw counters captured right before the last detected reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_usage: Option<Counters>,
}

impl LedgerEntry {
    pub fn counters(&self) -> Counters {
        Counters::new(self.up, self.down)
    }

    pub fn set_counters(&mut self, counters: Counters) {
        self.up = counters.up;
        self.down = counters.down;
    }
}

impl From<Counters> for LedgerEntry {
    fn from(c: Counters) -> Self {
        Self {
            up: c.up,
            down: c.down,
            last_usage: None,
        }
    }
}

// Older ledgers wrote `null` for a side that was never reported.
fn nullable_counter<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    Ok(Option::<u64>::deserialize(de)?.unwrap_or(0))
}
