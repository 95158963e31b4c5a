//! Per-client sliding-window rate limiting.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Evict stale empty buckets every this many checks so the table stays
/// bounded when clients churn.
const SWEEP_INTERVAL: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_s: u64,
}

#[derive(Default)]
struct LimiterState {
    buckets: HashMap<String, VecDeque<Instant>>,
    checks: u64,
}

/// Admission over a fixed 60 s window: a client may hold at most
/// `max(1, rpm)` timestamps inside the window. The whole check-then-append
/// runs under one lock, so concurrent handlers never double-admit.
pub struct SlidingWindowRateLimiter {
    limit: usize,
    state: Mutex<LimiterState>,
}

impl SlidingWindowRateLimiter {
    pub fn new(rpm: u32) -> Self {
        Self {
            limit: rpm.max(1) as usize,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit as u32
    }

    pub fn check(&self, client_id: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();

        state.checks += 1;
        if state.checks % SWEEP_INTERVAL == 0 {
            state.buckets.retain(|_, bucket| {
                prune(bucket, now);
                !bucket.is_empty()
            });
        }

        let bucket = state.buckets.entry(client_id.to_string()).or_default();
        prune(bucket, now);

        if bucket.len() >= self.limit {
            let retry_after_s = bucket
                .front()
                .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)))
                .map(|wait| wait.as_secs_f64().ceil() as u64)
                .unwrap_or(1)
                .max(1);
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after_s,
            };
        }

        bucket.push_back(now);
        RateLimitDecision {
            allowed: true,
            remaining: (self.limit - bucket.len()) as u32,
            retry_after_s: 0,
        }
    }
}

fn prune(bucket: &mut VecDeque<Instant>, now: Instant) {
    let cutoff = now.checked_sub(WINDOW);
    while let Some(front) = bucket.front() {
        match cutoff {
            Some(cutoff) if *front < cutoff => {
                bucket.pop_front();
            }
            _ => break,
        }
    }
}
