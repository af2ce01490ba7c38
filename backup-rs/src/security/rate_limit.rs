use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Failed-login limiter, keyed by account name.
///
/// Counts only failures: a successful login resets the window for that
/// account, so a legitimate operator is never locked out by their own
/// successful activity.
pub struct LoginRateLimiter {
    /// Map of username -> (failure count, window start time)
    failures: RwLock<HashMap<String, (u32, Instant)>>,
    /// Maximum failures per window
    max_failures: u32,
    /// Window duration
    window_duration: Duration,
}

impl LoginRateLimiter {
    pub fn new(max_failures: u32, window_seconds: u64) -> Self {
        Self {
            failures: RwLock::new(HashMap::new()),
            max_failures,
            window_duration: Duration::from_secs(window_seconds),
        }
    }

    /// Whether a login attempt for this account should be allowed.
    pub async fn check(&self, username: &str) -> bool {
        let now = Instant::now();
        let mut failures = self.failures.write().await;

        match failures.get_mut(username) {
            Some((count, start)) => {
                if now.duration_since(*start) > self.window_duration {
                    *count = 0;
                    *start = now;
                }
                *count < self.max_failures
            }
            None => true,
        }
    }

    /// Record a failed attempt for this account.
    pub async fn record_failure(&self, username: &str) {
        let now = Instant::now();
        let mut failures = self.failures.write().await;
        let entry = failures.entry(username.to_string()).or_insert((0, now));

        if now.duration_since(entry.1) > self.window_duration {
            entry.0 = 0;
            entry.1 = now;
        }
        entry.0 += 1;
    }

    /// Clear the failure window after a successful login.
    pub async fn reset(&self, username: &str) {
        self.failures.write().await.remove(username);
    }

    /// Drop stale entries (call periodically).
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut failures = self.failures.write().await;
        failures.retain(|_, (_, start)| now.duration_since(*start) <= self.window_duration * 2);
    }
}
