//! FIFO deferred-request backlog (`spec.md` §4.6), grounded on
//! `queue/netbox_queue.go`'s `NetboxQueue`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::GatekeeperError;

/// Initial delay before a deferred request's first retry attempt.
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Attempts exhausted after this many retries (`spec.md` §4.6).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

pub struct DeferredRequest {
    pub method: reqwest::Method,
    pub endpoint: String,
    pub body: Option<Value>,
    pub retry_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub sink: oneshot::Sender<Result<Vec<u8>, GatekeeperError>>,
}

#[derive(Default)]
pub struct Backlog {
    queue: Mutex<VecDeque<DeferredRequest>>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, request: DeferredRequest) {
        self.queue.lock().unwrap().push_back(request);
    }

    /// Pops the first entry whose `retry_at` has arrived, per the
    /// ticker-driven scan in the original (`spec.md` §4.6: "the first
    /// entry whose retry_at ≤ now").
    pub fn pop_due(&self) -> Option<DeferredRequest> {
        let mut queue = self.queue.lock().unwrap();
        let now = Utc::now();
        let index = queue.iter().position(|r| r.retry_at <= now)?;
        queue.remove(index)
    }

    pub fn requeue(&self, request: DeferredRequest) {
        self.queue.lock().unwrap().push_back(request);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Linear `attempts × 5s` backoff, mirroring the queue crate's policy
/// (`spec.md` §4.2/§4.6 share the same coefficient).
pub fn retry_backoff(attempts: u32) -> Duration {
    Duration::from_secs(attempts as u64 * 5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pop_due_skips_entries_not_yet_due() {
        let backlog = Backlog::new();
        let (tx, _rx) = oneshot::channel();
        backlog.push(DeferredRequest {
            method: reqwest::Method::GET,
            endpoint: "status/".into(),
            body: None,
            retry_at: Utc::now() + chrono::Duration::seconds(60),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sink: tx,
        });
        assert!(backlog.pop_due().is_none());
        assert_eq!(backlog.len(), 1);
    }

    #[tokio::test]
    async fn pop_due_returns_an_overdue_entry() {
        let backlog = Backlog::new();
        let (tx, _rx) = oneshot::channel();
        backlog.push(DeferredRequest {
            method: reqwest::Method::GET,
            endpoint: "status/".into(),
            body: None,
            retry_at: Utc::now() - chrono::Duration::seconds(1),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sink: tx,
        });
        assert!(backlog.pop_due().is_some());
        assert!(backlog.is_empty());
    }
}
