//! Backend selection for one forwarding attempt.

use std::sync::Arc;

use thiserror::Error;

use crate::load_balancer::snapshot::{rank, Candidate, SelectionFilter};
use crate::registry::RegistrySnapshot;
use crate::state::SharedState;

/// No backend passes the filter. Recoverable: the caller may retry later.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("no backend available")]
pub struct NoBackendAvailable;

/// Pick the best backend of `registry` for `filter`.
///
/// Ranking and stamping both run under a read lock of the health table.
/// Concurrent callers race on the selection stamp: a caller that loses a
/// candidate moves on to the next one, so simultaneous calls spread across
/// the tier. When every claim is lost the best candidate is used anyway.
pub async fn select(
    state: &SharedState,
    registry: &Arc<RegistrySnapshot>,
    filter: &SelectionFilter<'_>,
) -> Result<Candidate, NoBackendAvailable> {
    let health = state.health.read().await;
    let snapshot = rank(registry, &health, filter);
    tracing::trace!(
        registry_version = snapshot.registry_version,
        health_epoch = snapshot.health_epoch,
        candidates = snapshot.ranked.len(),
        "Ranked backends"
    );

    let claimed = snapshot
        .ranked
        .iter()
        .position(|c| health.claim_selection(&c.backend.alias, c.last_selected))
        .unwrap_or(0);
    snapshot.ranked.into_iter().nth(claimed).ok_or(NoBackendAvailable)
}
