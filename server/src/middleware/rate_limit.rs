//! In-memory token-bucket limiter for `/token`: `tokens`, `last_refill`,
//! replenish-then-spend, backed by a `DashMap` instead of Redis — this
//! service has no multi-node deployment story in scope, so a
//! process-local limiter is sufficient (and sits outside the core
//! contract as an external collaborator concern).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::infra::errors::AppError;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// 5 requests/minute/IP for the token-issuing endpoint.
const CAPACITY: f64 = 5.0;
const REFILL_PER_SEC: f64 = CAPACITY / 60.0;

#[derive(Clone)]
pub struct TokenBucketLimiter {
    buckets: Arc<DashMap<IpAddr, Mutex<Bucket>>>,
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
        }
    }

    fn try_acquire(&self, ip: IpAddr) -> bool {
        let entry = self
            .buckets
            .entry(ip)
            .or_insert_with(|| {
                Mutex::new(Bucket {
                    tokens: CAPACITY,
                    last_refill: Instant::now(),
                })
            });
        let mut bucket = entry.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * REFILL_PER_SEC).min(CAPACITY);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub async fn rate_limit_token_endpoint(
    State(limiter): State<TokenBucketLimiter>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    if limiter.try_acquire(addr.ip()) {
        Ok(next.run(request).await)
    } else {
        Err(AppError::rate_limited("too many token requests, try again shortly"))
    }
}
