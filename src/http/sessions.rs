//! Registry of open WebSocket sessions.
//!
//! Every session is pinned to one backend. Closing a session only signals
//! it; the session task itself sends the close frame and deregisters.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::observability::metrics;

#[derive(Debug)]
struct SessionEntry {
    alias: String,
    close: Arc<Notify>,
}

/// Open sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionEntry>,
    emptied: Notify,
}

/// Handle kept by a session task.
#[derive(Debug)]
pub struct SessionTicket {
    pub id: Uuid,
    pub close: Arc<Notify>,
}

impl SessionRegistry {
    /// Register a session pinned to `alias`.
    pub fn open(&self, alias: &str) -> SessionTicket {
        let id = Uuid::new_v4();
        let close = Arc::new(Notify::new());
        self.sessions.insert(
            id,
            SessionEntry {
                alias: alias.to_string(),
                close: close.clone(),
            },
        );
        metrics::record_sessions(self.sessions.len());
        SessionTicket { id, close }
    }

    /// Forget a session once its task ended.
    pub fn remove(&self, id: Uuid) {
        self.sessions.remove(&id);
        metrics::record_sessions(self.sessions.len());
        if self.sessions.is_empty() {
            self.emptied.notify_waiters();
        }
    }

    /// Resolve once no session is open.
    pub async fn wait_empty(&self) {
        loop {
            let emptied = self.emptied.notified();
            tokio::pin!(emptied);
            // Registered before the check, so a removal in between is not lost.
            emptied.as_mut().enable();
            if self.sessions.is_empty() {
                return;
            }
            emptied.await;
        }
    }

    /// Ask every session pinned to `alias` to close. Returns how many.
    pub fn close_alias(&self, alias: &str) -> usize {
        let mut closed = 0;
        for entry in self.sessions.iter().filter(|e| e.alias == alias) {
            entry.close.notify_one();
            closed += 1;
        }
        closed
    }

    /// Ask the given sessions to close. Returns how many were still open.
    pub fn close(&self, ids: &[Uuid]) -> usize {
        ids.iter()
            .filter_map(|id| self.sessions.get(id))
            .map(|entry| entry.close.notify_one())
            .count()
    }

    /// `(session id, backend alias)` of every open session.
    pub fn pinned(&self) -> Vec<(Uuid, String)> {
        self.sessions
            .iter()
            .map(|e| (*e.key(), e.alias.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn close_alias_signals_only_pinned_sessions() {
        let registry = SessionRegistry::default();
        let a = registry.open("a");
        let b = registry.open("b");

        assert_eq!(registry.close_alias("a"), 1);
        tokio::time::timeout(Duration::from_millis(100), a.close.notified())
            .await
            .expect("session pinned to a is signalled");
        assert!(tokio::time::timeout(Duration::from_millis(50), b.close.notified())
            .await
            .is_err());

        registry.remove(a.id);
        assert_eq!(registry.close(&[a.id, b.id]), 1);
        assert_eq!(registry.pinned(), vec![(b.id, "b".to_string())]);
    }

    #[tokio::test]
    async fn wait_empty_resolves_after_last_removal() {
        let registry = Arc::new(SessionRegistry::default());
        tokio::time::timeout(Duration::from_millis(50), registry.wait_empty())
            .await
            .expect("empty registry resolves at once");

        let a = registry.open("a");
        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move { registry.wait_empty().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        registry.remove(a.id);
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter woken")
            .unwrap();
    }
}
