//! Worker Registry (R), `spec.md` §4.4.
//!
//! A process-wide map from worker identity to session record, guarded
//! by a single reader-writer lock. Not consulted for dispatch decisions
//! — it exists for observability snapshots, except for the one piece of
//! dispatch-relevant state it does own: eviction. `spec.md` §3 requires
//! a second handshake by the same identity to evict the first live
//! session, so each entry carries a `watch` sender the prior
//! `handle_connection` task selects on to know when to tear itself down.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use core_protocol::WorkerHealth;
use tokio::sync::{watch, RwLock};

#[derive(Debug, Clone)]
pub struct WorkerSession {
    pub identity: String,
    pub current_task_id: Option<String>,
    pub health: WorkerHealth,
    pub last_heartbeat_at: DateTime<Utc>,
}

struct SessionEntry {
    session: WorkerSession,
    evict_tx: watch::Sender<bool>,
}

#[derive(Default)]
pub struct WorkerRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh session for `identity`, evicting any live
    /// session already registered under it (`spec.md` §3). Returns a
    /// receiver the caller's connection task must select on: when it
    /// observes `true`, a later handshake has taken over this identity
    /// and the caller must tear its own session down.
    pub async fn register(&self, identity: &str) -> watch::Receiver<bool> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(identity) {
            let _ = existing.evict_tx.send(true);
        }

        let (evict_tx, evict_rx) = watch::channel(false);
        sessions.insert(
            identity.to_string(),
            SessionEntry {
                session: WorkerSession {
                    identity: identity.to_string(),
                    current_task_id: None,
                    health: WorkerHealth::Connected,
                    last_heartbeat_at: Utc::now(),
                },
                evict_tx,
            },
        );
        evict_rx
    }

    pub async fn update_task(&self, identity: &str, task_id: Option<String>) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(identity) {
            entry.session.current_task_id = task_id;
        }
    }

    pub async fn set_health(&self, identity: &str, health: WorkerHealth) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(identity) {
            entry.session.health = health;
        }
    }

    pub async fn touch_heartbeat(&self, identity: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(identity) {
            entry.session.last_heartbeat_at = Utc::now();
        }
    }

    pub async fn remove(&self, identity: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(identity);
    }

    pub async fn snapshot(&self) -> Vec<WorkerSession> {
        self.sessions.read().await.values().map(|e| e.session.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_is_idempotent_and_resets_health() {
        let registry = WorkerRegistry::new();
        registry.register("w1").await;
        registry.set_health("w1", WorkerHealth::Error).await;
        registry.register("w1").await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!(matches!(snapshot[0].health, WorkerHealth::Connected));
    }

    #[tokio::test]
    async fn a_second_handshake_evicts_the_first_live_session() {
        let registry = WorkerRegistry::new();
        let first_evicted = registry.register("w1").await;
        registry
            .update_task("w1", Some("task-1".to_string()))
            .await;

        registry.register("w1").await;

        assert!(*first_evicted.borrow(), "first session should have been signaled to evict");
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].current_task_id, None);
    }
}
