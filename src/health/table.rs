//! Health table shared by the monitor, the selection policy and the front-end.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::health::state::{FailureReason, HealthRecord, HealthState, Hysteresis, Source, Transition};

/// Health records keyed by backend alias.
///
/// `epoch` increases on every mutation, so a selection snapshot can tell
/// which health view it was ranked from. Selection stamps are not
/// mutations and leave the epoch alone.
#[derive(Debug, Default)]
pub struct HealthTable {
    records: HashMap<String, HealthRecord>,
    epoch: u64,
    policy: Hysteresis,
    selections: AtomicU64,
}

impl HealthTable {
    pub fn new(policy: Hysteresis) -> Self {
        Self {
            records: HashMap::new(),
            epoch: 0,
            policy,
            selections: AtomicU64::new(0),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn get(&self, alias: &str) -> Option<&HealthRecord> {
        self.records.get(alias)
    }

    /// State of a backend; a backend without a record is `Unknown`.
    pub fn state(&self, alias: &str) -> HealthState {
        self.records.get(alias).map_or(HealthState::Unknown, |r| r.state)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert an `Unknown` record unless one exists, and apply whether the
    /// backend is actively probed. Returns true if a record was inserted.
    pub fn track(&mut self, alias: &str, probed: bool) -> bool {
        if let Some(record) = self.records.get_mut(alias) {
            if record.probed != probed {
                if let Some(to) = record.set_probed(probed) {
                    tracing::info!(backend = %alias, to = %to, "Backend no longer probed");
                }
                self.epoch += 1;
            }
            return false;
        }
        let mut record = HealthRecord::default();
        record.probed = probed;
        self.records.insert(alias.to_string(), record);
        self.epoch += 1;
        true
    }

    /// Drop every record whose alias is not in `keep`. Returns the dropped aliases.
    pub fn prune(&mut self, keep: &HashSet<&str>) -> Vec<String> {
        let stale: Vec<String> = self
            .records
            .keys()
            .filter(|alias| !keep.contains(alias.as_str()))
            .cloned()
            .collect();
        for alias in &stale {
            self.records.remove(alias);
        }
        if !stale.is_empty() {
            self.epoch += 1;
        }
        stale
    }

    pub fn record_success(&mut self, alias: &str, latency: Duration, source: Source) -> Option<Transition> {
        let policy = self.policy;
        let record = self.records.get_mut(alias)?;
        let from = record.state;
        let changed = record.record_success(latency, source, &policy);
        self.epoch += 1;
        changed.map(|to| Transition {
            alias: alias.to_string(),
            from,
            to,
        })
    }

    pub fn record_failure(&mut self, alias: &str, reason: FailureReason, source: Source) -> Option<Transition> {
        let policy = self.policy;
        let record = self.records.get_mut(alias)?;
        let from = record.state;
        let changed = record.record_failure(reason, source, &policy);
        self.epoch += 1;
        changed.map(|to| Transition {
            alias: alias.to_string(),
            from,
            to,
        })
    }

    /// Mark `alias` as having its first probe in flight.
    pub fn mark_probing(&mut self, alias: &str) -> bool {
        let marked = self.records.get_mut(alias).is_some_and(HealthRecord::mark_probing);
        if marked {
            self.epoch += 1;
        }
        marked
    }

    /// Stamp `alias` as just handed out, provided its stamp still reads
    /// `seen`. A false return means a concurrent selection won the backend.
    pub fn claim_selection(&self, alias: &str, seen: u64) -> bool {
        let Some(record) = self.records.get(alias) else {
            return false;
        };
        let next = self.selections.fetch_add(1, Ordering::AcqRel) + 1;
        record.last_selected.claim(seen, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_alias_is_ignored() {
        let mut table = HealthTable::default();
        assert_eq!(table.record_failure("ghost", FailureReason::Timeout, Source::Probe), None);
        assert_eq!(table.state("ghost"), HealthState::Unknown);
        assert!(table.is_empty());
    }

    #[test]
    fn track_and_prune() {
        let mut table = HealthTable::default();
        assert!(table.track("a", true));
        assert!(table.track("b", true));
        assert!(!table.track("a", true));
        let epoch = table.epoch();

        let keep: HashSet<&str> = ["a"].into_iter().collect();
        assert_eq!(table.prune(&keep), vec!["b".to_string()]);
        assert!(table.epoch() > epoch);
        assert_eq!(table.aliases().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn transitions_are_reported() {
        let mut table = HealthTable::new(Hysteresis {
            degraded_after: 1,
            down_after: 1,
            recover_after: 1,
        });
        table.track("a", true);

        let t = table.record_failure("a", FailureReason::Timeout, Source::Request).unwrap();
        assert_eq!((t.from, t.to), (HealthState::Unknown, HealthState::Down));

        let t = table.record_success("a", Duration::from_millis(5), Source::Probe).unwrap();
        assert_eq!((t.from, t.to), (HealthState::Down, HealthState::Healthy));
    }

    #[test]
    fn untracking_probes_demotes_down_backend() {
        let mut table = HealthTable::default();
        table.track("a", true);
        for _ in 0..3 {
            table.record_failure("a", FailureReason::Timeout, Source::Probe);
        }
        assert_eq!(table.state("a"), HealthState::Down);

        let epoch = table.epoch();
        assert!(!table.track("a", false));
        assert_eq!(table.state("a"), HealthState::Degraded);
        assert!(table.epoch() > epoch);
    }

    #[test]
    fn concurrent_claims_hand_out_a_backend_once() {
        let mut table = HealthTable::default();
        table.track("a", true);
        let seen = table.get("a").unwrap().last_selected.get();

        assert!(table.claim_selection("a", seen));
        assert!(!table.claim_selection("a", seen));
        assert!(!table.claim_selection("ghost", 0));
        assert!(table.get("a").unwrap().last_selected.get() > seen);
    }
}
