//! Per-client rate limiting.
//!
//! Authenticated callers are keyed by user id, anonymous callers by IP.
//! Buckets that have refilled to capacity are swept periodically; a fresh
//! bucket starts full, so dropping one changes nothing for its client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;

use crate::auth::Identity;
use crate::config::schema::RateLimitConfig;
use crate::error::GatewayError;
use crate::observability::metrics;

/// A simple token bucket.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// Tokens available at `now`, without consuming any.
    fn available(&self, capacity: f64, refill_rate: f64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        (self.tokens + elapsed * refill_rate).min(capacity)
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        self.tokens = self.available(capacity, refill_rate, now);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// How often `check` sweeps full buckets by default.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct RateLimiterState {
    buckets: DashMap<String, TokenBucket>,
    rps: f64,
    burst: f64,
    created: Instant,
    sweep_interval: Duration,
    /// Milliseconds after `created` of the last sweep.
    last_sweep_ms: AtomicU64,
}

impl RateLimiterState {
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            rps: requests_per_second.max(0.0),
            burst: f64::from(burst_size.max(1)),
            created: Instant::now(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst_size)
    }

    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let allowed = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst))
            .try_acquire(self.burst, self.rps, now);
        // The entry guard is released above; `retain` locks every shard.
        self.maybe_sweep(now);
        allowed
    }

    fn maybe_sweep(&self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.created).as_millis() as u64;
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if elapsed_ms.saturating_sub(last) < self.sweep_interval.as_millis() as u64 {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, elapsed_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let evicted = self.evict_full(now);
            if evicted > 0 {
                tracing::debug!(evicted, remaining = self.buckets.len(), "Swept idle rate-limit buckets");
            }
        }
    }

    /// Drop every bucket that has refilled to capacity by `now`.
    fn evict_full(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.available(self.burst, self.rps, now) < self.burst);
        before.saturating_sub(self.buckets.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Middleware: reject with 429 once a client's bucket runs dry.
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (key, kind) = match request.extensions().get::<Identity>() {
        Some(identity) => (format!("user:{}", identity.user_id), "user"),
        None => {
            let ip = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            (format!("ip:{ip}"), "ip")
        }
    };

    if state.check(&key) {
        return next.run(request).await;
    }

    tracing::warn!(client = %key, "Rate limit exceeded");
    metrics::record_rate_limited(kind);
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    GatewayError::RateLimited.respond(&method, &path)
}
