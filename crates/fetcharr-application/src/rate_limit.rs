// SPDX-License-Identifier: GPL-3.0-or-later

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter for outbound tracker/indexer calls. Refills at
/// `rate` tokens per second up to `burst`; a disabled limiter is a no-op.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    rate: f64,
    burst: f64,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let burst = burst.max(1) as f64;
        Self {
            state: Mutex::new(BucketState { tokens: burst, last_refill: Instant::now() }),
            rate: requests_per_second.max(1) as f64,
            burst,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        let mut limiter = Self::new(1, 1);
        limiter.enabled = false;
        limiter
    }

    pub fn from_config(cfg: &fetcharr_config::RateLimitConfig) -> Self {
        if cfg.enabled {
            Self::new(cfg.requests_per_second, cfg.burst)
        } else {
            Self::disabled()
        }
    }

    /// Wait until a request is allowed.
    pub async fn acquire(&self) {
        if !self.enabled {
            return;
        }

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed();
                state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };
            sleep(wait).await;
        }
    }
}
