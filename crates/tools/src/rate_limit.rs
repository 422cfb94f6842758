//! Per-tool sliding-window rate limiting.
//!
//! Admission never blocks: a call either fits in the window or is refused.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use toolwright_config::{RateLimitConfig, RateLimitPolicy};

/// Outcome of a refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub max_calls: usize,
    pub window: Duration,
    /// Time until the oldest call in the window expires.
    pub retry_after: Duration,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit one call for `tool_name`, recording it if allowed.
    pub fn check(&self, tool_name: &str) -> Result<(), RateLimitExceeded> {
        let policy = self.config.policy_for(tool_name);
        let window = Duration::from_secs(policy.window_secs);
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let timestamps = windows.entry(tool_name.to_string()).or_default();
        evict_expired(timestamps, now, window);

        if timestamps.len() >= policy.max_calls {
            let retry_after = timestamps
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            return Err(RateLimitExceeded {
                max_calls: policy.max_calls,
                window,
                retry_after,
            });
        }

        timestamps.push_back(now);
        Ok(())
    }

    /// Calls still admissible in the current window.
    pub fn remaining(&self, tool_name: &str) -> usize {
        let RateLimitPolicy {
            max_calls,
            window_secs,
        } = self.config.policy_for(tool_name);
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let used = windows.get_mut(tool_name).map_or(0, |timestamps| {
            evict_expired(timestamps, Instant::now(), Duration::from_secs(window_secs));
            timestamps.len()
        });
        max_calls.saturating_sub(used)
    }

    /// Forget the recorded calls for one tool.
    pub fn reset(&self, tool_name: &str) {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(tool_name);
    }
}

fn evict_expired(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while timestamps
        .front()
        .is_some_and(|t| now.duration_since(*t) >= window)
    {
        timestamps.pop_front();
    }
}
