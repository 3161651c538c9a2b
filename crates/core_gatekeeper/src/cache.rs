//! Response cache keyed by `(method, endpoint)` (`spec.md` §3/§4.6),
//! grounded on `netbox/gatekeeper.go`'s `cache map[string]CachedResponse`.
//! Only GET/2xx responses are ever inserted; that policy lives at the
//! call site in [`crate::Gatekeeper`], not here.
//!
//! Expiry is checked against an injectable [`Clock`] rather than
//! `Utc::now()` directly, so expiry can be exercised in tests by
//! advancing a fake clock instead of sleeping real wall-clock time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

/// Seam for "what time is it" so cache-expiry tests don't sleep.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct Entry {
    bytes: Vec<u8>,
    stored_at: DateTime<Utc>,
}

pub struct ResponseCache {
    entries: RwLock<HashMap<String, Entry>>,
    expiry: RwLock<chrono::Duration>,
    clock: Arc<dyn Clock>,
}

fn key(method: &str, endpoint: &str) -> String {
    format!("{method}:{endpoint}")
}

impl ResponseCache {
    pub fn new(expiry: std::time::Duration) -> Self {
        Self::with_clock(expiry, Arc::new(SystemClock))
    }

    pub fn with_clock(expiry: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            expiry: RwLock::new(chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::minutes(5))),
            clock,
        }
    }

    pub fn set_expiry(&self, expiry: std::time::Duration) {
        *self.expiry.write().unwrap() =
            chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::minutes(5));
    }

    pub fn get(&self, method: &str, endpoint: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(&key(method, endpoint))?;
        let expiry = *self.expiry.read().unwrap();
        if self.clock.now() - entry.stored_at < expiry {
            Some(entry.bytes.clone())
        } else {
            None
        }
    }

    pub fn set(&self, method: &str, endpoint: &str, bytes: Vec<u8>) {
        self.entries.write().unwrap().insert(
            key(method, endpoint),
            Entry {
                bytes,
                stored_at: self.clock.now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeClock(Mutex<DateTime<Utc>>);

    impl FakeClock {
        fn new(at: DateTime<Utc>) -> Self {
            Self(Mutex::new(at))
        }

        fn advance(&self, by: chrono::Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn hit_within_expiry_returns_the_stored_value() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache.set("GET", "/api/status/", b"payload".to_vec());
        assert_eq!(cache.get("GET", "/api/status/"), Some(b"payload".to_vec()));
    }

    #[test]
    fn miss_after_expiry() {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let cache = ResponseCache::with_clock(Duration::from_secs(60), clock.clone());
        cache.set("GET", "/api/status/", b"payload".to_vec());

        clock.advance(chrono::Duration::seconds(61));

        assert_eq!(cache.get("GET", "/api/status/"), None);
    }

    #[test]
    fn clear_empties_every_entry() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache.set("GET", "/api/status/", b"payload".to_vec());
        cache.clear();
        assert_eq!(cache.get("GET", "/api/status/"), None);
    }
}
