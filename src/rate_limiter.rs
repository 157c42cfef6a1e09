//! Login attempt throttling, keyed by resolved client IP.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::info;

/// Throttle configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Attempts allowed inside one window.
    pub max_attempts: u32,
    /// Width of the attempt-counting window.
    pub window: Duration,
    /// How long a key stays banned once it exceeds the limit.
    pub ban_duration: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(300),
            ban_duration: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug)]
struct Entry {
    attempts: u32,
    window_started: Instant,
    banned_until: Option<Instant>,
}

/// Fixed-window rate limiter shared across requests.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record an attempt for `key` and report whether it may proceed.
    pub async fn allow(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let entry = entries.entry(key.to_string()).or_insert(Entry {
            attempts: 0,
            window_started: now,
            banned_until: None,
        });

        if let Some(until) = entry.banned_until {
            if now < until {
                return false;
            }
            entry.attempts = 0;
            entry.window_started = now;
            entry.banned_until = None;
        }

        if now.duration_since(entry.window_started) >= self.config.window {
            entry.attempts = 0;
            entry.window_started = now;
        }

        if entry.attempts >= self.config.max_attempts {
            entry.banned_until = Some(now + self.config.ban_duration);
            info!(
                "throttling attempts from {} for {:?}",
                key, self.config.ban_duration
            );
            return false;
        }

        entry.attempts += 1;
        true
    }
}
