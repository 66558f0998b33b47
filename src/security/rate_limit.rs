//! Rolling-window rate limiting for sensitive endpoints.
//!
//! Only paths under a configured prefix are counted; everything else passes
//! through untouched. Each (client, path) pair keeps the arrival times of
//! its admitted requests. A request is denied once `max_requests` arrivals
//! fall inside the window; denied requests are not recorded.
//!
//! The window is the closed interval `[now - window, now]`: an arrival
//! exactly one window old still counts. Paths are lowercased before keying,
//! so case variants of one endpoint share a quota.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::RateLimitConfig;
use crate::http::identity::request_client_identity;
use crate::observability::metrics;
use crate::security::clock::{Clock, SystemClock};
use crate::security::store::{InMemoryStore, RateLimitStore};

const LOCK_STRIPES: usize = 64;

/// Immutable quota: `max_requests` per rolling `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_secs(15 * 60),
        }
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { retry_after: Duration },
}

/// Per-(client, endpoint) rolling-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    /// Lowercased prefixes.
    protected: Vec<String>,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    stripes: Box<[Mutex<()>]>,
}

impl RateLimiter {
    pub fn new(
        policy: RateLimitPolicy,
        protected_paths: impl IntoIterator<Item = impl AsRef<str>>,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let protected = protected_paths
            .into_iter()
            .map(|p| p.as_ref().to_lowercase())
            .collect();
        let stripes = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();
        Self {
            policy,
            protected,
            store,
            clock,
            stripes,
        }
    }

    /// Limiter with an in-memory store and the system clock.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            RateLimitPolicy {
                max_requests: config.max_requests,
                window: config.window(),
            },
            &config.protected_paths,
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// The protected prefix `path` falls under, matched case-insensitively.
    pub fn matched_prefix(&self, path: &str) -> Option<&str> {
        if path.is_empty() {
            return None;
        }
        let path = path.to_lowercase();
        self.protected
            .iter()
            .find(|prefix| path.starts_with(prefix.as_str()))
            .map(String::as_str)
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.matched_prefix(path).is_some()
    }

    /// Check and, when admitted, record one request.
    pub fn check(&self, client_id: &str, path: &str, now: Instant) -> Decision {
        if !self.is_protected(path) {
            return Decision::Allow;
        }

        let key = format!("{client_id}{}", path.to_lowercase());
        let _guard = self.stripe(&key).lock().unwrap_or_else(PoisonError::into_inner);

        let mut timestamps = self.store.get(&key, now).unwrap_or_default();
        let window = self.policy.window;
        timestamps.retain(|t| now.saturating_duration_since(*t) <= window);

        if timestamps.len() >= self.policy.max_requests as usize {
            return Decision::Deny { retry_after: window };
        }

        timestamps.push(now);
        self.store.set(&key, timestamps, window, now);
        metrics::record_rate_limit_keys(self.store.len());
        Decision::Allow
    }

    /// Remove idle entries from the store.
    pub fn purge(&self) -> usize {
        let removed = self.store.purge_expired(self.clock.now());
        metrics::record_rate_limit_keys(self.store.len());
        removed
    }

    /// Sweep idle entries every `interval` until shutdown.
    pub async fn run_purge(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.purge();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.store.len(), "Purged idle rate-limit windows");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    fn stripe(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }
}

/// Body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceeded {
    pub error: &'static str,
    pub message: String,
    pub retry_after: u64,
}

impl RateLimitExceeded {
    pub fn new(retry_after: Duration) -> Self {
        let minutes = retry_after.as_secs().div_ceil(60);
        Self {
            error: "Rate limit exceeded",
            message: format!("Too many requests. Please try again in {minutes} minute(s)."),
            retry_after: retry_after.as_secs(),
        }
    }
}

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let retry_after = HeaderValue::from(self.retry_after);
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response();
        response.headers_mut().insert(header::RETRY_AFTER, retry_after);
        response
    }
}

/// Middleware function for endpoint rate limiting.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let Some(endpoint) = limiter.matched_prefix(&path) else {
        return next.run(request).await;
    };

    let client = request_client_identity(&request);
    match limiter.check(&client, &path, limiter.now()) {
        Decision::Allow => next.run(request).await,
        Decision::Deny { retry_after } => {
            tracing::warn!(
                client = %client,
                endpoint = %path,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(endpoint);
            RateLimitExceeded::new(retry_after).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PROTECTED_PATHS;
    use crate::security::clock::ManualClock;
    use ::metrics::{
        Counter, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };

    const SEND: &str = "/api/auth/send-sms";

    fn limiter(max_requests: u32, window_secs: u64) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::default();
        let limiter = RateLimiter::new(
            RateLimitPolicy {
                max_requests,
                window: Duration::from_secs(window_secs),
            },
            DEFAULT_PROTECTED_PATHS,
            Arc::new(InMemoryStore::new()),
            Arc::new(clock.clone()),
        );
        (limiter, clock)
    }

    #[test]
    fn test_denies_request_over_quota() {
        let (limiter, clock) = limiter(5, 900);
        for _ in 0..5 {
            assert_eq!(limiter.check("1.2.3.4", SEND, clock.now()), Decision::Allow);
            clock.advance(Duration::from_secs(10));
        }
        assert_eq!(
            limiter.check("1.2.3.4", SEND, clock.now()),
            Decision::Deny { retry_after: Duration::from_secs(900) }
        );
    }

    #[test]
    fn test_window_elapse_resets_quota() {
        let (limiter, clock) = limiter(2, 60);
        limiter.check("c", SEND, clock.now());
        limiter.check("c", SEND, clock.now());
        assert!(matches!(limiter.check("c", SEND, clock.now()), Decision::Deny { .. }));

        clock.advance(Duration::from_secs(61));
        assert_eq!(limiter.check("c", SEND, clock.now()), Decision::Allow);
    }

    #[test]
    fn test_arrival_exactly_one_window_old_still_counts() {
        let (limiter, clock) = limiter(1, 60);
        limiter.check("c", SEND, clock.now());

        clock.advance(Duration::from_secs(60));
        assert!(matches!(limiter.check("c", SEND, clock.now()), Decision::Deny { .. }));

        clock.advance(Duration::from_millis(1));
        assert_eq!(limiter.check("c", SEND, clock.now()), Decision::Allow);
    }

    #[test]
    fn test_rolling_window_frees_oldest_slot_first() {
        let (limiter, clock) = limiter(2, 60);
        limiter.check("c", SEND, clock.now());
        clock.advance(Duration::from_secs(30));
        limiter.check("c", SEND, clock.now());

        clock.advance(Duration::from_secs(31));
        assert_eq!(limiter.check("c", SEND, clock.now()), Decision::Allow);
        assert!(matches!(limiter.check("c", SEND, clock.now()), Decision::Deny { .. }));
    }

    #[test]
    fn test_denials_are_not_recorded() {
        let (limiter, clock) = limiter(1, 60);
        limiter.check("c", SEND, clock.now());
        clock.advance(Duration::from_secs(30));
        for _ in 0..10 {
            assert!(matches!(limiter.check("c", SEND, clock.now()), Decision::Deny { .. }));
        }
        clock.advance(Duration::from_secs(31));
        assert_eq!(limiter.check("c", SEND, clock.now()), Decision::Allow);
    }

    #[test]
    fn test_unprotected_paths_are_never_recorded() {
        let (limiter, clock) = limiter(1, 60);
        for _ in 0..100 {
            assert_eq!(limiter.check("c", "/api/children", clock.now()), Decision::Allow);
        }
        assert_eq!(limiter.check("c", "", clock.now()), Decision::Allow);
        assert!(limiter.store().is_empty());
    }

    #[test]
    fn test_prefix_match_is_case_insensitive() {
        let (limiter, _) = limiter(1, 60);
        assert!(limiter.is_protected("/API/Auth/Send-SMS"));
        assert!(limiter.is_protected("/api/auth/verify-sms/extra"));
        assert!(!limiter.is_protected("/api/auth/login"));
        assert!(!limiter.is_protected(""));
    }

    #[test]
    fn test_matched_prefix_is_the_configured_prefix() {
        let (limiter, _) = limiter(1, 60);
        assert_eq!(
            limiter.matched_prefix("/API/Auth/Send-SMS/resend"),
            Some("/api/auth/send-sms")
        );
        assert_eq!(limiter.matched_prefix("/api/children"), None);
    }

    #[test]
    fn test_case_variants_share_a_quota() {
        let (limiter, clock) = limiter(2, 60);
        assert_eq!(limiter.check("c", "/api/auth/send-sms", clock.now()), Decision::Allow);
        assert_eq!(limiter.check("c", "/API/auth/send-sms", clock.now()), Decision::Allow);
        assert!(matches!(
            limiter.check("c", "/Api/Auth/Send-Sms", clock.now()),
            Decision::Deny { .. }
        ));
        assert_eq!(limiter.store().len(), 1);
    }

    #[test]
    fn test_keys_are_per_client_and_endpoint() {
        let (limiter, clock) = limiter(1, 60);
        assert_eq!(limiter.check("a", SEND, clock.now()), Decision::Allow);
        assert_eq!(limiter.check("b", SEND, clock.now()), Decision::Allow);
        assert_eq!(limiter.check("a", "/api/auth/verify-sms", clock.now()), Decision::Allow);
        assert!(matches!(limiter.check("a", SEND, clock.now()), Decision::Deny { .. }));
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_quota() {
        let (limiter, clock) = limiter(5, 900);
        let limiter = Arc::new(limiter);
        let now = clock.now();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.check("1.2.3.4", SEND, now) == Decision::Allow)
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_purge_drops_idle_windows() {
        let (limiter, clock) = limiter(5, 60);
        limiter.check("a", SEND, clock.now());
        limiter.check("b", SEND, clock.now());
        assert_eq!(limiter.store().len(), 2);

        clock.advance(Duration::from_secs(61));
        assert_eq!(limiter.purge(), 2);
        assert!(limiter.store().is_empty());
    }

    /// Recorder that keeps the last value set on the key-count gauge.
    #[derive(Default)]
    struct KeyCountRecorder(Arc<KeyCount>);

    impl KeyCountRecorder {
        fn last(&self) -> Option<f64> {
            *self.0 .0.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct KeyCount(Mutex<Option<f64>>);

    impl GaugeFn for KeyCount {
        fn increment(&self, _: f64) {}
        fn decrement(&self, _: f64) {}
        fn set(&self, value: f64) {
            *self.0.lock().unwrap() = Some(value);
        }
    }

    impl Recorder for KeyCountRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
            if key.name() == "gateway_rate_limit_keys" {
                Gauge::from_arc(self.0.clone())
            } else {
                Gauge::noop()
            }
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_key_gauge_tracks_admits_between_purges() {
        let recorder = KeyCountRecorder::default();
        let (limiter, clock) = limiter(5, 60);

        ::metrics::with_local_recorder(&recorder, || {
            limiter.check("a", SEND, clock.now());
            limiter.check("b", SEND, clock.now());
        });
        assert_eq!(recorder.last(), Some(2.0));

        clock.advance(Duration::from_secs(61));
        ::metrics::with_local_recorder(&recorder, || limiter.purge());
        assert_eq!(recorder.last(), Some(0.0));
    }

    #[test]
    fn test_exceeded_body() {
        let body = RateLimitExceeded::new(Duration::from_secs(900));
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "error": "Rate limit exceeded",
                "message": "Too many requests. Please try again in 15 minute(s).",
                "retryAfter": 900
            })
        );
    }
}
