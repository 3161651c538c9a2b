//! Gatekeeper (G), `spec.md` §4.6.
//!
//! Single chokepoint for egress calls to the upstream inventory
//! service: a GET/2xx response cache, a sliding-window rate counter,
//! and a FIFO deferred backlog for requests that would exceed budget.
//! Grounded on `netbox/gatekeeper.go` and `queue/netbox_queue.go`.

pub mod backlog;
pub mod cache;
pub mod client;
pub mod error;
pub mod rate_limiter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub use client::NetboxClient;
pub use error::GatekeeperError;

use backlog::{Backlog, DeferredRequest, DEFAULT_MAX_ATTEMPTS, INITIAL_RETRY_DELAY};
use cache::ResponseCache;
use rate_limiter::RateLimiter;

const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(5 * 60);
/// Backlog processor cadence (`spec.md` §4.6).
const BACKLOG_TICK: Duration = Duration::from_secs(1);

struct Inner {
    client: NetboxClient,
    rate_limiter: RateLimiter,
    cache: ResponseCache,
    cache_enabled: AtomicBool,
    backlog: Backlog,
}

/// Owns the rate budget, the response cache, and the deferred backlog
/// for one upstream NetBox instance. Cheap to clone; internals are
/// reference-counted.
#[derive(Clone)]
pub struct Gatekeeper {
    inner: Arc<Inner>,
}

impl Gatekeeper {
    pub fn new(client: NetboxClient) -> Self {
        let gatekeeper = Self {
            inner: Arc::new(Inner {
                client,
                rate_limiter: RateLimiter::new(),
                cache: ResponseCache::new(DEFAULT_CACHE_EXPIRY),
                cache_enabled: AtomicBool::new(true),
                backlog: Backlog::new(),
            }),
        };
        tokio::spawn(backlog_processor(gatekeeper.inner.clone()));
        gatekeeper
    }

    pub fn set_rate_limit(&self, requests_per_minute: u32) {
        self.inner.rate_limiter.set_limit(requests_per_minute);
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.inner.cache_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_cache_expiry(&self, expiry: Duration) {
        self.inner.cache.set_expiry(expiry);
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// One-shot startup check (`spec.md` §6); the Core should refuse to
    /// serve Gatekeeper traffic if this fails.
    pub async fn verify_upstream(&self) -> Result<(), GatekeeperError> {
        self.inner.client.verify_upstream().await
    }

    /// May return synchronously from cache, synchronously after a live
    /// call, or by waiting on a deferred request's result sink
    /// (`spec.md` §4.6).
    pub async fn request(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Vec<u8>, GatekeeperError> {
        if method == reqwest::Method::GET && self.inner.cache_enabled.load(Ordering::SeqCst) {
            if let Some(cached) = self.inner.cache.get(method.as_str(), endpoint) {
                return Ok(cached);
            }
        }

        if self.inner.rate_limiter.try_acquire() {
            return self.execute_direct(method, endpoint, body).await;
        }

        debug!(%method, endpoint, "rate limit reached, deferring request");
        let (tx, rx) = oneshot::channel();
        self.inner.backlog.push(DeferredRequest {
            method,
            endpoint: endpoint.to_string(),
            body,
            retry_at: Utc::now() + chrono::Duration::from_std(INITIAL_RETRY_DELAY).unwrap(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sink: tx,
        });

        rx.await
            .unwrap_or(Err(GatekeeperError::RetriesExhausted(DEFAULT_MAX_ATTEMPTS)))
    }

    /// Executes against the upstream directly, bypassing the cache
    /// pre-flight check but still populating it post-flight for
    /// GET/2xx (`spec.md` §4.6). Used both by `request` on a rate-limit
    /// pass and by the backlog processor.
    pub async fn execute_direct(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Vec<u8>, GatekeeperError> {
        let bytes = self.inner.client.execute(method.clone(), endpoint, body.as_ref()).await?;

        if method == reqwest::Method::GET && self.inner.cache_enabled.load(Ordering::SeqCst) {
            self.inner.cache.set(method.as_str(), endpoint, bytes.clone());
        }

        Ok(bytes)
    }
}

async fn backlog_processor(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(BACKLOG_TICK);
    loop {
        ticker.tick().await;
        let Some(mut request) = inner.backlog.pop_due() else {
            continue;
        };

        if !inner.rate_limiter.try_acquire() {
            // Still over budget: this counts as an attempt the same as an
            // upstream error does (`spec.md` §4.6), so a sustained
            // rate-limit condition still backs off and eventually
            // exhausts instead of spinning every tick forever.
            if request.attempts + 1 >= request.max_attempts {
                warn!(endpoint = %request.endpoint, "deferred request exhausted retries under sustained rate limiting");
                let _ = request.sink.send(Err(GatekeeperError::RetriesExhausted(request.max_attempts)));
            } else {
                request.attempts += 1;
                request.retry_at =
                    Utc::now() + chrono::Duration::from_std(backlog::retry_backoff(request.attempts)).unwrap();
                inner.backlog.requeue(request);
            }
            continue;
        }

        let result = inner
            .client
            .execute(request.method.clone(), &request.endpoint, request.body.as_ref())
            .await;

        match result {
            Ok(bytes) => {
                if request.method == reqwest::Method::GET {
                    inner.cache.set(request.method.as_str(), &request.endpoint, bytes.clone());
                }
                let _ = request.sink.send(Ok(bytes));
            }
            Err(err) => {
                let terminal = matches!(
                    err,
                    GatekeeperError::Upstream { status, .. } if status == 401 || status == 403
                );
                if terminal || request.attempts + 1 >= request.max_attempts {
                    warn!(endpoint = %request.endpoint, error = %err, "deferred request exhausted retries");
                    let _ = request.sink.send(Err(err));
                } else {
                    request.attempts += 1;
                    request.retry_at =
                        Utc::now() + chrono::Duration::from_std(backlog::retry_backoff(request.attempts)).unwrap();
                    inner.backlog.requeue(request);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn a_cache_hit_short_circuits_the_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/widgets/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("cached-body"))
            .expect(1)
            .mount(&server)
            .await;

        let client = NetboxClient::new(server.uri(), "token");
        let gatekeeper = Gatekeeper::new(client);

        let first = gatekeeper
            .request(reqwest::Method::GET, "widgets/", None)
            .await
            .unwrap();
        let second = gatekeeper
            .request(reqwest::Method::GET, "widgets/", None)
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn an_over_budget_request_lands_in_the_backlog_instead_of_executing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/widgets/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(0)
            .mount(&server)
            .await;

        let client = NetboxClient::new(server.uri(), "token");
        let gatekeeper = Gatekeeper::new(client);
        gatekeeper.set_rate_limit(1);
        // Burn the one slot in the window so the next call must defer.
        assert!(gatekeeper.inner.rate_limiter.try_acquire());

        let deferred = gatekeeper.request(reqwest::Method::GET, "widgets/", None);
        // The window takes up to a minute to reset, so within a short
        // window the call must still be parked in the backlog rather
        // than having executed against the upstream.
        let result = tokio::time::timeout(Duration::from_millis(200), deferred).await;
        assert!(result.is_err(), "request should still be deferred");
        assert_eq!(gatekeeper.inner.backlog.len(), 1);
    }
}
