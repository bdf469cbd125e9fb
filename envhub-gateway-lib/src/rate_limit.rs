//! Global GCRA limiter in front of instance creation.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::RETRY_AFTER;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use envhub_runtime::InstanceError;
use envhub_runtime::metrics::metrics;
use governor::clock::{Clock, DefaultClock};
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};

use crate::api::ApiError;
use crate::state::GatewayState;

pub struct GlobalRateLimiter {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    clock: DefaultClock,
}

impl GlobalRateLimiter {
    /// `qps == 0` disables limiting.
    pub fn new(qps: u32) -> Self {
        Self {
            limiter: NonZeroU32::new(qps).map(|qps| RateLimiter::direct(Quota::per_second(qps))),
            clock: DefaultClock::default(),
        }
    }

    /// `Err(wait)` when the request is over the limit.
    pub fn check(&self) -> Result<(), Duration> {
        match &self.limiter {
            Some(limiter) => limiter
                .check()
                .map_err(|not_until| not_until.wait_time_from(self.clock.now())),
            None => Ok(()),
        }
    }
}

/// Whole seconds a client should wait, never less than one.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

pub async fn rate_limit(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(wait) = state.limiter.check() {
        metrics().record_rejection("rate_limit");
        let secs = retry_after_secs(wait);
        let mut response =
            ApiError(InstanceError::RateLimited(format!("rate limit exceeded, retry in {secs}s")))
                .into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(secs));
        return response;
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_reject() {
        let limiter = GlobalRateLimiter::new(2);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        let wait = limiter.check().unwrap_err();
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn zero_disables() {
        let limiter = GlobalRateLimiter::new(0);
        for _ in 0..1000 {
            assert!(limiter.check().is_ok());
        }
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
    }
}
