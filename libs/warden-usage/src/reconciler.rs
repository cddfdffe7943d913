use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::directory::UserDirectory;
use crate::error::UsageError;
use crate::ledger::LedgerStore;
use crate::models::{Identity, Ledger, LedgerEntry, UsageSnapshot};
use crate::source::UsageSource;

/// What one merge did to the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub checkpoints: usize,
}

impl ReconcileReport {
    pub fn touched(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Merges `snapshot` into `ledger`.
///
/// Identities seen for the first time copy the raw counters. Without
/// `reset` known identities take the raw counters too. With `reset` the
/// entry is checkpointed into `last_usage` (when both sides are non-zero)
/// and replaced by the clamped difference between the snapshot and that
/// checkpoint. The result is the usage of the current counting epoch; it
/// replaces rather than accumulates earlier epochs.
///
/// Entries missing from the snapshot are left as they are.
pub fn apply_snapshot(ledger: &mut Ledger, snapshot: &UsageSnapshot, reset: bool) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for (identity, current) in snapshot {
        let Some(entry) = ledger.get_mut(identity) else {
            ledger.insert(identity.clone(), LedgerEntry::from(*current));
            report.inserted += 1;
            continue;
        };

        if !reset {
            entry.set_counters(*current);
            report.updated += 1;
            continue;
        }

        if entry.up != 0 && entry.down != 0 {
            entry.last_usage = Some(entry.counters());
            report.checkpoints += 1;
        }
        // No checkpoint yet: the whole snapshot belongs to this epoch.
        let baseline = entry.last_usage.unwrap_or_default();
        entry.set_counters(current.saturating_sub(baseline));
        report.updated += 1;
    }

    report
}

/// Keeps the ledger in step with the measurement source.
pub struct UsageReconciler<S, L> {
    source: S,
    store: L,
}

impl<S: UsageSource, L: LedgerStore> UsageReconciler<S, L> {
    pub fn new(source: S, store: L) -> Self {
        Self { source, store }
    }

    pub fn store(&self) -> &L {
        &self.store
    }

    /// Loads the ledger, merges a fresh snapshot and writes the result back.
    ///
    /// A corrupt ledger aborts before anything is written.
    pub fn reconcile(&self, reset: bool) -> Result<ReconcileReport, UsageError> {
        let mut ledger = self.store.load()?;
        let snapshot = self.source.fetch()?;

        if snapshot.is_empty() {
            debug!("Empty usage snapshot, ledger left as is");
            return Ok(ReconcileReport::default());
        }

        let report = apply_snapshot(&mut ledger, &snapshot, reset);
        self.store.save(&ledger)?;

        info!(
            "Usage reconciled (reset={}): {} new, {} updated, {} checkpoints",
            reset, report.inserted, report.updated, report.checkpoints
        );
        Ok(report)
    }

    /// Identities currently provisioned on the measurement side.
    pub fn enabled_identities(&self) -> Result<BTreeSet<Identity>, UsageError> {
        self.reconcile(false)?;
        Ok(self.store.load()?.into_keys().collect())
    }

    /// user uuid -> whether its WireGuard key is known to the ledger.
    pub fn enabled_users<D: UserDirectory + ?Sized>(
        &self,
        directory: &D,
    ) -> Result<BTreeMap<String, bool>, UsageError> {
        let users = directory.list_all_users().map_err(UsageError::Directory)?;
        let enabled = self.enabled_identities()?;
        Ok(users
            .iter()
            .map(|u| {
                let on = u.wg_pub.as_ref().is_some_and(|k| enabled.contains(k));
                (u.uuid.clone(), on)
            })
            .collect())
    }

    /// Total bytes (down + up) recorded for one identity, 0 when unknown.
    pub fn usage_for(&self, identity: &str) -> Result<u64, UsageError> {
        let ledger = self.store.load()?;
        Ok(ledger.get(identity).map(|e| e.counters().total()).unwrap_or(0))
    }

    /// Syncs once, then reports usage per user uuid.
    pub fn all_usage<D: UserDirectory + ?Sized>(
        &self,
        directory: &D,
        reset: bool,
    ) -> Result<BTreeMap<String, u64>, UsageError> {
        let users = directory.list_all_users().map_err(UsageError::Directory)?;
        self.reconcile(reset)?;
        let ledger = self.store.load()?;

        Ok(users
            .iter()
            .map(|u| {
                let bytes = u
                    .wg_pub
                    .as_ref()
                    .and_then(|k| ledger.get(k))
                    .map(|e| e.counters().total())
                    .unwrap_or(0);
                if bytes > 0 {
                    debug!("WireGuard usage {} = {} bytes", u.uuid, bytes);
                }
                (u.uuid.clone(), bytes)
            })
            .collect())
    }
}

impl<S: UsageSource> UsageSource for &S {
    fn fetch(&self) -> Result<UsageSnapshot, UsageError> {
        (**self).fetch()
    }
}

impl<L: LedgerStore> LedgerStore for &L {
    fn load(&self) -> Result<Ledger, UsageError> {
        (**self).load()
    }

    fn save(&self, ledger: &Ledger) -> Result<(), UsageError> {
        (**self).save(ledger)
    }
}

/// Fixed snapshot, mostly for tests and replays.
impl UsageSource for UsageSnapshot {
    fn fetch(&self) -> Result<UsageSnapshot, UsageError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedgerStore;
    use crate::models::Counters;
    use warden_shared::api::DirectoryUser;

    fn snapshot(rows: &[(&str, u64, u64)]) -> UsageSnapshot {
        rows.iter()
            .map(|(k, up, down)| (k.to_string(), Counters::new(*up, *down)))
            .collect()
    }

    fn ledger(rows: &[(&str, u64, u64)]) -> Ledger {
        rows.iter()
            .map(|(k, up, down)| (k.to_string(), LedgerEntry::from(Counters::new(*up, *down))))
            .collect()
    }

    #[test]
    fn first_sighting_copies_raw_counters() {
        let mut l = Ledger::new();
        let report = apply_snapshot(&mut l, &snapshot(&[("abc", 50, 100)]), false);

        assert_eq!(report.inserted, 1);
        assert_eq!(serde_json::to_value(&l).unwrap(), serde_json::json!({"abc": {"up": 50, "down": 100}}));
    }

    #[test]
    fn first_sighting_ignores_reset_mode() {
        let mut l = Ledger::new();
        apply_snapshot(&mut l, &snapshot(&[("abc", 50, 100)]), true);
        assert_eq!(l["abc"], LedgerEntry::from(Counters::new(50, 100)));
    }

    #[test]
    fn non_reset_overwrites_with_raw_values() {
        let mut l = ledger(&[("abc", 500, 900)]);
        apply_snapshot(&mut l, &snapshot(&[("abc", 5, 10)]), false);
        assert_eq!(l["abc"].counters(), Counters::new(5, 10));
        assert_eq!(l["abc"].last_usage, None);
    }

    #[test]
    fn reset_after_counter_drop_checkpoints_and_clamps() {
        let mut l = ledger(&[("abc", 50, 100)]);
        let report = apply_snapshot(&mut l, &snapshot(&[("abc", 5, 10)]), true);

        assert_eq!(report.checkpoints, 1);
        let entry = &l["abc"];
        assert_eq!(entry.last_usage, Some(Counters::new(50, 100)));
        assert_eq!(entry.counters(), Counters::new(0, 0));
    }

    #[test]
    fn reset_counts_growth_past_the_checkpoint() {
        let mut l = ledger(&[("abc", 50, 100)]);
        apply_snapshot(&mut l, &snapshot(&[("abc", 80, 130)]), true);
        assert_eq!(l["abc"].counters(), Counters::new(30, 30));
    }

    #[test]
    fn reset_without_checkpoint_uses_zero_baseline() {
        // one side zero: no checkpoint is taken and none existed before
        let mut l = ledger(&[("abc", 0, 100)]);
        let report = apply_snapshot(&mut l, &snapshot(&[("abc", 7, 9)]), true);

        assert_eq!(report.checkpoints, 0);
        assert_eq!(l["abc"].last_usage, None);
        assert_eq!(l["abc"].counters(), Counters::new(7, 9));
    }

    #[test]
    fn reset_keeps_old_checkpoint_when_entry_is_zero() {
        let mut l = Ledger::new();
        l.insert(
            "abc".to_string(),
            LedgerEntry {
                up: 0,
                down: 0,
                last_usage: Some(Counters::new(50, 100)),
            },
        );
        apply_snapshot(&mut l, &snapshot(&[("abc", 60, 90)]), true);

        assert_eq!(l["abc"].last_usage, Some(Counters::new(50, 100)));
        assert_eq!(l["abc"].counters(), Counters::new(10, 0));
    }

    #[test]
    fn identities_missing_from_snapshot_are_untouched() {
        let mut l = ledger(&[("abc", 1, 2), ("gone", 30, 40)]);
        l.get_mut("gone").unwrap().last_usage = Some(Counters::new(9, 9));
        let before = l["gone"].clone();

        apply_snapshot(&mut l, &snapshot(&[("abc", 5, 6)]), true);
        assert_eq!(l["gone"], before);
    }

    #[test]
    fn merge_is_a_pure_function_of_its_inputs() {
        let base = ledger(&[("a", 10, 20), ("b", 0, 5)]);
        let snap = snapshot(&[("a", 3, 4), ("b", 8, 8), ("c", 1, 1)]);

        for reset in [false, true] {
            let mut first = base.clone();
            let mut second = base.clone();
            apply_snapshot(&mut first, &snap, reset);
            apply_snapshot(&mut second, &snap, reset);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn replaying_an_unchanged_snapshot_without_reset_is_stable() {
        let mut l = ledger(&[("a", 10, 20)]);
        let snap = snapshot(&[("a", 11, 21), ("b", 1, 2)]);
        apply_snapshot(&mut l, &snap, false);
        let once = l.clone();
        apply_snapshot(&mut l, &snap, false);
        assert_eq!(l, once);
    }

    #[test]
    fn reconcile_persists_and_reports() {
        let store = InMemoryLedgerStore::new(ledger(&[("abc", 50, 100)]));
        let source = snapshot(&[("abc", 5, 10), ("new", 1, 2)]);
        let reconciler = UsageReconciler::new(&source, &store);

        let report = reconciler.reconcile(true).unwrap();
        assert_eq!(report, ReconcileReport { inserted: 1, updated: 1, checkpoints: 1 });

        let saved = store.snapshot();
        assert_eq!(saved["abc"].last_usage, Some(Counters::new(50, 100)));
        assert_eq!(saved["new"].counters(), Counters::new(1, 2));
    }

    #[test]
    fn empty_snapshot_leaves_ledger_alone() {
        let store = InMemoryLedgerStore::new(ledger(&[("abc", 50, 100)]));
        let reconciler = UsageReconciler::new(UsageSnapshot::new(), &store);

        assert_eq!(reconciler.reconcile(true).unwrap().touched(), 0);
        assert_eq!(store.snapshot()["abc"].counters(), Counters::new(50, 100));
    }

    #[test]
    fn corrupt_ledger_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usages.json");
        std::fs::write(&path, "not json").unwrap();

        let reconciler = UsageReconciler::new(
            snapshot(&[("abc", 1, 1)]),
            crate::ledger::JsonLedgerStore::new(&path),
        );
        assert!(matches!(reconciler.reconcile(false), Err(UsageError::LedgerCorrupt { .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    }

    #[test]
    fn usage_queries_join_users_on_wg_key() {
        let store = InMemoryLedgerStore::new(ledger(&[("key-a", 50, 100)]));
        let reconciler = UsageReconciler::new(snapshot(&[("key-b", 3, 4)]), &store);

        let users = vec![
            DirectoryUser { uuid: "u-a".into(), wg_pub: Some("key-a".into()) },
            DirectoryUser { uuid: "u-b".into(), wg_pub: Some("key-b".into()) },
            DirectoryUser { uuid: "u-c".into(), wg_pub: None },
        ];

        let enabled = reconciler.enabled_users(&users).unwrap();
        assert_eq!(enabled["u-a"], true);
        assert_eq!(enabled["u-b"], true);
        assert_eq!(enabled["u-c"], false);

        assert_eq!(reconciler.usage_for("key-a").unwrap(), 150);
        assert_eq!(reconciler.usage_for("unknown").unwrap(), 0);

        let usage = reconciler.all_usage(&users, false).unwrap();
        assert_eq!(usage["u-a"], 150);
        assert_eq!(usage["u-b"], 7);
        assert_eq!(usage["u-c"], 0);
    }

    #[test]
    fn unreadable_directory_is_reported() {
        let store = InMemoryLedgerStore::new(Ledger::new());
        let reconciler = UsageReconciler::new(UsageSnapshot::new(), &store);
        let directory = crate::directory::JsonUserDirectory::new("/nonexistent/users.json");

        assert!(matches!(
            reconciler.enabled_users(&directory),
            Err(UsageError::Directory(_))
        ));
    }
}
