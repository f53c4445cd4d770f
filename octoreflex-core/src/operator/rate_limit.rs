// Operator rate limiting (spec §4.13), adapted from
// `kratos-core/src/rpc/rate_limit.rs`'s `RpcRateLimiter`: same
// window/violations/ban-duration shape, keyed by operator identity
// (the HMAC key id) instead of `IpAddr` since the operator interface is a
// local UNIX socket, not a network listener.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_duration: Duration,
    pub ban_duration: Duration,
    pub max_violations: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_duration: Duration::from_secs(60),
            ban_duration: Duration::from_secs(300),
            max_violations: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    request_count: u32,
    window_start: Instant,
    violations: u32,
    banned_until: Option<Instant>,
}

impl RateLimitEntry {
    fn new() -> Self {
        Self {
            request_count: 0,
            window_start: Instant::now(),
            violations: 0,
            banned_until: None,
        }
    }
}

#[derive(Clone)]
pub struct OperatorRateLimiter {
    config: RateLimitConfig,
    entries: Arc<RwLock<HashMap<String, RateLimitEntry>>>,
}

impl OperatorRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// `Ok(())` if allowed, `Err(remaining_seconds)` otherwise.
    pub async fn check_rate_limit(&self, operator_key: &str) -> Result<(), u64> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let entry = entries
            .entry(operator_key.to_string())
            .or_insert_with(RateLimitEntry::new);

        if let Some(banned_until) = entry.banned_until {
            if now < banned_until {
                return Err(banned_until.duration_since(now).as_secs());
            }
            entry.banned_until = None;
            entry.violations = 0;
        }

        if now.duration_since(entry.window_start) >= self.config.window_duration {
            entry.request_count = 0;
            entry.window_start = now;
        }

        entry.request_count += 1;

        if entry.request_count > self.config.max_requests {
            entry.violations += 1;
            warn!(
                operator_key,
                request_count = entry.request_count,
                violation = entry.violations,
                "operator rate limit exceeded"
            );

            if entry.violations >= self.config.max_violations {
                entry.banned_until = Some(now + self.config.ban_duration);
                warn!(operator_key, secs = self.config.ban_duration.as_secs(), "operator banned");
                return Err(self.config.ban_duration.as_secs());
            }

            let window_remaining = self
                .config
                .window_duration
                .saturating_sub(now.duration_since(entry.window_start));
            return Err(window_remaining.as_secs().max(1));
        }

        Ok(())
    }

    pub async fn cleanup(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let max_age = self.config.window_duration * 10;
        entries.retain(|_, entry| {
            let is_recent = now.duration_since(entry.window_start) < max_age;
            let is_banned = entry.banned_until.map(|t| now < t).unwrap_or(false);
            is_recent || is_banned
        });
    }
}

impl Default for OperatorRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_traffic_under_the_limit() {
        let config = RateLimitConfig {
            max_requests: 5,
            window_duration: Duration::from_secs(1),
            ban_duration: Duration::from_secs(60),
            max_violations: 3,
        };
        let limiter = OperatorRateLimiter::new(config);
        for _ in 0..5 {
            assert!(limiter.check_rate_limit("opkey-a").await.is_ok());
        }
    }

    #[tokio::test]
    async fn blocks_excess_traffic() {
        let config = RateLimitConfig {
            max_requests: 3,
            window_duration: Duration::from_secs(10),
            ban_duration: Duration::from_secs(60),
            max_violations: 3,
        };
        let limiter = OperatorRateLimiter::new(config);
        for _ in 0..3 {
            assert!(limiter.check_rate_limit("opkey-b").await.is_ok());
        }
        assert!(limiter.check_rate_limit("opkey-b").await.is_err());
    }

    #[tokio::test]
    async fn different_keys_have_separate_limits() {
        let config = RateLimitConfig {
            max_requests: 2,
            window_duration: Duration::from_secs(10),
            ban_duration: Duration::from_secs(60),
            max_violations: 3,
        };
        let limiter = OperatorRateLimiter::new(config);
        for _ in 0..3 {
            let _ = limiter.check_rate_limit("opkey-c").await;
        }
        assert!(limiter.check_rate_limit("opkey-d").await.is_ok());
    }

    #[tokio::test]
    async fn repeated_violations_trigger_a_ban() {
        let config = RateLimitConfig {
            max_requests: 1,
            window_duration: Duration::from_millis(10),
            ban_duration: Duration::from_secs(60),
            max_violations: 2,
        };
        let limiter = OperatorRateLimiter::new(config);
        assert!(limiter.check_rate_limit("opkey-e").await.is_ok());
        assert!(limiter.check_rate_limit("opkey-e").await.is_err());
        let result = limiter.check_rate_limit("opkey-e").await;
        assert!(result.is_err());
        assert!(result.unwrap_err() >= 59);
    }
}
