//! Rate limiting for unauthenticated handshakes
//!
//! Tracks attempts per source IP and action to slow down:
//! - Password guessing through logon challenges
//! - Reconnect probing
//! - World auth session floods

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::constants::CLEANUP_INTERVAL_SECS;

/// Rate limit configuration for a specific action type
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum number of actions allowed in the window
    pub max_actions: u32,
    /// Time window for the rate limit
    pub window: Duration,
    /// Cooldown after exceeding the limit
    pub cooldown: Duration,
}

impl RateLimitConfig {
    pub fn new(max_actions: u32, window_secs: u64, cooldown_secs: u64) -> Self {
        Self {
            max_actions,
            window: Duration::from_secs(window_secs),
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }
}

/// Action types that can be rate limited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// AUTH_LOGON_CHALLENGE
    LogonChallenge,
    /// AUTH_RECONNECT_CHALLENGE
    ReconnectChallenge,
    /// CMSG_AUTH_SESSION
    WorldAuth,
}

impl ActionType {
    /// Get the default rate limit config for this action type
    pub fn default_config(&self) -> RateLimitConfig {
        match self {
            // 10 per minute per IP, one minute cooldown
            ActionType::LogonChallenge => RateLimitConfig::new(10, 60, 60),

            ActionType::ReconnectChallenge => RateLimitConfig::new(10, 60, 60),

            // A client reconnects to the world once per character screen visit
            ActionType::WorldAuth => RateLimitConfig::new(20, 60, 30),
        }
    }
}

/// Tracks rate limit state for a single action type
#[derive(Debug, Clone)]
struct RateLimitBucket {
    /// Timestamps of recent actions
    actions: Vec<Instant>,
    /// When the cooldown ends (if in cooldown)
    cooldown_until: Option<Instant>,
    config: RateLimitConfig,
}

impl RateLimitBucket {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            actions: Vec::with_capacity(config.max_actions as usize),
            cooldown_until: None,
            config,
        }
    }

    /// Check if action is allowed, and record it if so
    fn check_and_record(&mut self, now: Instant) -> RateLimitResult {
        if let Some(until) = self.cooldown_until {
            if now < until {
                return RateLimitResult::InCooldown {
                    remaining: until - now,
                };
            }
            self.cooldown_until = None;
        }

        self.actions
            .retain(|&t| now.saturating_duration_since(t) < self.config.window);

        if self.actions.len() < self.config.max_actions as usize {
            self.actions.push(now);
            RateLimitResult::Allowed
        } else {
            self.cooldown_until = Some(now + self.config.cooldown);
            RateLimitResult::Exceeded {
                cooldown: self.config.cooldown,
            }
        }
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Action is allowed
    Allowed,
    /// Rate limit exceeded, source entered cooldown
    Exceeded { cooldown: Duration },
    /// Source is in cooldown from a previous violation
    InCooldown { remaining: Duration },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

/// Buckets for one source address
#[derive(Debug)]
struct SourceRateLimiter {
    buckets: HashMap<ActionType, RateLimitBucket>,
    total_violations: u32,
    last_activity: Instant,
}

impl SourceRateLimiter {
    fn new(now: Instant) -> Self {
        Self {
            buckets: HashMap::new(),
            total_violations: 0,
            last_activity: now,
        }
    }

    fn check(&mut self, action: ActionType, config: RateLimitConfig, now: Instant) -> RateLimitResult {
        self.last_activity = now;

        let result = self
            .buckets
            .entry(action)
            .or_insert_with(|| RateLimitBucket::new(config))
            .check_and_record(now);

        if !result.is_allowed() {
            self.total_violations += 1;
        }

        result
    }

    fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }
}

/// Per-IP rate limiter shared by both listeners
pub struct RateLimiter {
    ips: RwLock<HashMap<String, SourceRateLimiter>>,
    /// Custom configs per action type (overrides defaults)
    configs: RwLock<HashMap<ActionType, RateLimitConfig>>,
    stale_timeout: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            ips: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            stale_timeout: Duration::from_secs(300),
        }
    }

    /// Check if an IP action is rate limited, recording it when allowed.
    pub async fn check_ip(&self, ip: &str, action: ActionType) -> RateLimitResult {
        let config = self
            .configs
            .read()
            .await
            .get(&action)
            .cloned()
            .unwrap_or_else(|| action.default_config());

        let now = Instant::now();
        let mut ips = self.ips.write().await;
        let limiter = ips
            .entry(ip.to_string())
            .or_insert_with(|| SourceRateLimiter::new(now));
        let result = limiter.check(action, config, now);

        if !result.is_allowed() {
            warn!(
                "Rate limit {:?} for IP {}: {:?} (total violations: {})",
                action, ip, result, limiter.total_violations
            );
        }

        result
    }

    /// Violations recorded for an IP since it was last cleaned up.
    pub async fn get_violations(&self, ip: &str) -> u32 {
        let ips = self.ips.read().await;
        ips.get(ip).map(|l| l.total_violations).unwrap_or(0)
    }

    /// Number of addresses currently tracked.
    pub async fn tracked_ips(&self) -> usize {
        self.ips.read().await.len()
    }

    /// Clean up stale entries
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut ips = self.ips.write().await;
        let before = ips.len();
        ips.retain(|_, l| !l.is_stale(now, self.stale_timeout));
        let removed = before - ips.len();
        if removed > 0 {
            debug!("Cleaned up {} stale IP rate limiters", removed);
        }
    }

    /// Override config for a specific action type. Applies to buckets created
    /// after the call.
    pub async fn set_config(&self, action: ActionType, config: RateLimitConfig) {
        let mut configs = self.configs.write().await;
        configs.insert(action, config);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically drop rate limiter state for quiet addresses.
pub fn spawn_rate_limit_cleanup(rate_limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            rate_limiter.cleanup().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limit_allowed() {
        let limiter = RateLimiter::new();

        for _ in 0..5 {
            let result = limiter.check_ip("10.0.0.1", ActionType::LogonChallenge).await;
            assert!(result.is_allowed());
        }
        assert_eq!(limiter.get_violations("10.0.0.1").await, 0);
    }

    #[tokio::test]
    async fn test_rate_limit_exceeded() {
        let limiter = RateLimiter::new();

        // logon challenges are 10 per minute
        for i in 0..12 {
            let result = limiter.check_ip("10.0.0.1", ActionType::LogonChallenge).await;
            if i < 10 {
                assert!(result.is_allowed(), "Request {} should be allowed", i);
            } else {
                assert!(!result.is_allowed(), "Request {} should be denied", i);
            }
        }
        assert_eq!(limiter.get_violations("10.0.0.1").await, 2);
    }

    #[tokio::test]
    async fn test_cooldown_follows_exceeded() {
        let limiter = RateLimiter::new();
        limiter
            .set_config(ActionType::WorldAuth, RateLimitConfig::new(1, 60, 30))
            .await;

        assert!(limiter.check_ip("10.0.0.2", ActionType::WorldAuth).await.is_allowed());
        assert!(matches!(
            limiter.check_ip("10.0.0.2", ActionType::WorldAuth).await,
            RateLimitResult::Exceeded { .. }
        ));
        assert!(matches!(
            limiter.check_ip("10.0.0.2", ActionType::WorldAuth).await,
            RateLimitResult::InCooldown { .. }
        ));
    }

    #[tokio::test]
    async fn test_separate_ips_and_actions() {
        let limiter = RateLimiter::new();
        limiter
            .set_config(ActionType::LogonChallenge, RateLimitConfig::new(1, 60, 30))
            .await;

        assert!(limiter.check_ip("10.0.0.1", ActionType::LogonChallenge).await.is_allowed());
        assert!(limiter.check_ip("10.0.0.2", ActionType::LogonChallenge).await.is_allowed());
        assert!(limiter.check_ip("10.0.0.1", ActionType::ReconnectChallenge).await.is_allowed());
        assert!(!limiter.check_ip("10.0.0.1", ActionType::LogonChallenge).await.is_allowed());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_active() {
        let limiter = RateLimiter::new();
        limiter.check_ip("10.0.0.1", ActionType::LogonChallenge).await;

        limiter.cleanup().await;

        assert_eq!(limiter.tracked_ips().await, 1);
    }
}
