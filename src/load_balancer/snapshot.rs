//! Ranked view of the selectable backends.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::health::state::HealthState;
use crate::health::table::HealthTable;
use crate::registry::{BackendDescriptor, RegistrySnapshot};

/// Which backends a caller accepts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionFilter<'a> {
    /// Aliases already tried for this call.
    pub exclude: &'a [String],
    /// Only backends with a WebSocket endpoint.
    pub require_ws: bool,
}

impl SelectionFilter<'_> {
    fn accepts(&self, backend: &BackendDescriptor) -> bool {
        backend.enabled
            && backend.selectable
            && !(self.require_ws && backend.ws.is_none())
            && !self.exclude.iter().any(|alias| *alias == backend.alias)
    }
}

/// A selectable backend with the health facts it was ranked by.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub backend: Arc<BackendDescriptor>,
    pub state: HealthState,
    pub score: u8,
    /// Selection stamp seen while ranking, 0 if never selected.
    pub last_selected: u64,
}

impl Candidate {
    fn preference(&self, other: &Self) -> Ordering {
        self.backend
            .priority
            .cmp(&other.backend.priority)
            .then_with(|| other.score.cmp(&self.score))
            .then_with(|| self.last_selected.cmp(&other.last_selected))
            .then_with(|| self.backend.position.cmp(&other.backend.position))
    }
}

/// Immutable ranking, best candidate first.
#[derive(Debug, Clone)]
pub struct SelectionSnapshot {
    pub registry_version: u64,
    pub health_epoch: u64,
    pub ranked: Vec<Candidate>,
}

impl SelectionSnapshot {
    pub fn best(&self) -> Option<&Candidate> {
        self.ranked.first()
    }
}

/// Rank every backend of `registry` that `filter` accepts and that is not Down.
pub fn rank(registry: &RegistrySnapshot, health: &HealthTable, filter: &SelectionFilter<'_>) -> SelectionSnapshot {
    let mut ranked: Vec<Candidate> = registry
        .backends
        .iter()
        .filter(|b| filter.accepts(b))
        .filter_map(|backend| {
            let record = health.get(&backend.alias);
            let state = record.map_or(HealthState::Unknown, |r| r.state);
            state.is_selectable().then(|| Candidate {
                backend: backend.clone(),
                state,
                score: record.map_or(50, |r| r.score()),
                last_selected: record.map_or(0, |r| r.last_selected.get()),
            })
        })
        .collect();
    ranked.sort_by(Candidate::preference);

    SelectionSnapshot {
        registry_version: registry.version,
        health_epoch: health.epoch(),
        ranked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::schema::{LinkConfig, ProxyConfig};
    use crate::health::state::{FailureReason, Source};
    use crate::registry::build_snapshot;

    fn registry(links: Vec<LinkConfig>) -> RegistrySnapshot {
        build_snapshot(
            &ProxyConfig {
                links,
                ..ProxyConfig::default()
            },
            1,
        )
        .unwrap()
    }

    fn table(registry: &RegistrySnapshot) -> HealthTable {
        let mut table = HealthTable::default();
        for b in &registry.backends {
            table.track(&b.alias, true);
        }
        table
    }

    fn down(table: &mut HealthTable, alias: &str) {
        for _ in 0..3 {
            table.record_failure(alias, FailureReason::Timeout, Source::Probe);
        }
    }

    fn aliases(snapshot: &SelectionSnapshot) -> Vec<&str> {
        snapshot.ranked.iter().map(|c| c.backend.alias.as_str()).collect()
    }

    #[test]
    fn lower_tier_wins_then_failover() {
        let reg = registry(vec![
            LinkConfig::new("b", "http://127.0.0.1:9002").with_priority(20),
            LinkConfig::new("a", "http://127.0.0.1:9001").with_priority(10),
        ]);
        let mut health = table(&reg);
        let filter = SelectionFilter::default();

        assert_eq!(aliases(&rank(&reg, &health, &filter)), vec!["a", "b"]);

        down(&mut health, "a");
        assert_eq!(aliases(&rank(&reg, &health, &filter)), vec!["b"]);

        down(&mut health, "b");
        assert!(rank(&reg, &health, &filter).best().is_none());
    }

    #[test]
    fn within_tier_score_then_recency_then_position() {
        let reg = registry(vec![
            LinkConfig::new("x", "http://127.0.0.1:9001"),
            LinkConfig::new("y", "http://127.0.0.1:9002"),
            LinkConfig::new("z", "http://127.0.0.1:9003"),
        ]);
        let mut health = table(&reg);
        assert_eq!(aliases(&rank(&reg, &health, &SelectionFilter::default())), vec!["x", "y", "z"]);

        assert!(health.claim_selection("x", 0));
        assert_eq!(aliases(&rank(&reg, &health, &SelectionFilter::default())), vec!["y", "z", "x"]);

        health.record_success("z", Duration::from_millis(1), Source::Probe);
        let ranked = rank(&reg, &health, &SelectionFilter::default());
        assert_eq!(aliases(&ranked), vec!["z", "y", "x"]);
        assert_eq!(ranked.best().unwrap().state, HealthState::Healthy);
    }

    #[test]
    fn filter_excludes_disabled_tried_and_ws_less() {
        let mut disabled = LinkConfig::new("off", "http://127.0.0.1:9000");
        disabled.enabled = false;
        let mut watch_only = LinkConfig::new("watch", "http://127.0.0.1:9005");
        watch_only.selectable = false;
        let reg = registry(vec![
            disabled,
            watch_only,
            LinkConfig::new("a", "http://127.0.0.1:9001"),
            LinkConfig::new("b", "http://127.0.0.1:9002").with_ws("ws://127.0.0.1:9002"),
        ]);
        let health = table(&reg);

        let tried = vec!["b".to_string()];
        let filter = SelectionFilter {
            exclude: &tried,
            require_ws: false,
        };
        assert_eq!(aliases(&rank(&reg, &health, &filter)), vec!["a"]);

        let ws = SelectionFilter {
            exclude: &[],
            require_ws: true,
        };
        assert_eq!(aliases(&rank(&reg, &health, &ws)), vec!["b"]);
    }

    #[test]
    fn selected_tier_is_never_worse_than_any_other() {
        let reg = registry(vec![
            LinkConfig::new("a", "http://127.0.0.1:9001").with_priority(5),
            LinkConfig::new("b", "http://127.0.0.1:9002").with_priority(1),
            LinkConfig::new("c", "http://127.0.0.1:9003"),
            LinkConfig::new("d", "http://127.0.0.1:9004").with_priority(1),
        ]);
        let mut health = table(&reg);
        down(&mut health, "b");

        let ranked = rank(&reg, &health, &SelectionFilter::default());
        let best = ranked.best().unwrap();
        assert_eq!(best.backend.alias, "d");
        assert!(ranked.ranked.iter().all(|c| best.backend.priority <= c.backend.priority));
        assert_eq!(ranked.registry_version, 1);
    }
}
