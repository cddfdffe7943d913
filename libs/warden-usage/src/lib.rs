//! WireGuard usage accounting.
//!
//! Raw cumulative counters come from the manager's usage report
//! ([`source`]), are merged into a locally persisted ledger ([`ledger`])
//! by the [`reconciler`], and are joined to panel users through their
//! WireGuard public key ([`directory`]).

pub mod directory;
pub mod error;
pub mod ledger;
pub mod models;
pub mod reconciler;
pub mod source;

pub use directory::{JsonUserDirectory, UserDirectory};
pub use error::{ParseError, UsageError};
pub use ledger::{InMemoryLedgerStore, JsonLedgerStore, LedgerStore};
pub use models::{Counters, Identity, Ledger, LedgerEntry, UsageSnapshot};
pub use reconciler::{apply_snapshot, ReconcileReport, UsageReconciler};
pub use source::{parse_report, parse_report_bytes, CommandRefresher, ReportRefresher, UsageSource, WgUsageSource};
