//! Per-session request rate limiting

use crate::config::RateLimitConfig;
use crate::error::{Result, WardenError};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::RwLock;

use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};

type InnerLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Sessions tracked before idle limiters are dropped wholesale
const MAX_TRACKED_SESSIONS: usize = 10_000;

/// One token bucket per session
pub struct SessionRateLimiter {
    config: RateLimitConfig,
    quota: Quota,
    limiters: Arc<RwLock<HashMap<String, Arc<InnerLimiter>>>>,
}

impl SessionRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);

        Self {
            quota: Quota::per_minute(per_minute).allow_burst(burst),
            config,
            limiters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Consume one request from the session's budget
    pub async fn check(&self, session_id: &str) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let limiter = self.limiter(session_id).await;
        limiter.check().map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            WardenError::RateLimitExceeded(format!(
                "session {session_id} exceeded {} requests/minute, retry in {}ms",
                self.config.requests_per_minute,
                wait.as_millis()
            ))
        })
    }

    pub async fn tracked_sessions(&self) -> usize {
        self.limiters.read().await.len()
    }

    async fn limiter(&self, session_id: &str) -> Arc<InnerLimiter> {
        {
            let limiters = self.limiters.read().await;
            if let Some(limiter) = limiters.get(session_id) {
                return limiter.clone();
            }
        }

        let mut limiters = self.limiters.write().await;

        // Another task may have inserted while we waited for the write lock
        if let Some(limiter) = limiters.get(session_id) {
            return limiter.clone();
        }

        if limiters.len() >= MAX_TRACKED_SESSIONS {
            limiters.clear();
        }

        let limiter = Arc::new(RateLimiter::direct(self.quota));
        limiters.insert(session_id.to_string(), limiter.clone());
        limiter
    }
}
