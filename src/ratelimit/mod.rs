//! Rate Limiter (C9).
//!
//! A sliding-window limiter keyed by a caller-supplied identifier
//! (already hashed by the caller before it reaches this module).
//! Breaching the minute/hour/day thresholds blocks the identifier for a
//! fixed cooldown rather than merely rejecting the one request.
//!
//! Locks are sharded by the first byte of the identifier so unrelated
//! identifiers never contend on the same mutex.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::config::RetrievalConfig;

const SHARD_COUNT: usize = 16;
const BLOCK_ON_MINUTE_BREACH: Duration = Duration::from_secs(5 * 60);
const BLOCK_ON_HOUR_BREACH: Duration = Duration::from_secs(60 * 60);
const BLOCK_ON_DAY_BREACH: Duration = Duration::from_secs(24 * 60 * 60);
const HISTORY_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct Entry {
    requests: Vec<SystemTime>,
    blocked_until: Option<SystemTime>,
}

/// Aggregate counters for a single identifier, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStats {
    /// Requests within the last minute.
    pub last_minute: u32,
    /// Requests within the last hour.
    pub last_hour: u32,
    /// Requests within the last day.
    pub last_day: u32,
    /// Whether the identifier is currently blocked.
    pub blocked: bool,
}

/// Aggregate counters across all known identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemStats {
    /// Distinct identifiers tracked.
    pub known_identifiers: usize,
    /// Identifiers currently blocked.
    pub blocked_identifiers: usize,
}

/// Sliding-window, sharded-lock rate limiter.
pub struct RateLimiter {
    shards: Vec<Mutex<HashMap<String, Entry>>>,
    req_per_minute: u32,
    req_per_hour: u32,
    req_per_day: u32,
}

impl RateLimiter {
    /// Builds a limiter from the configured thresholds.
    #[must_use]
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            req_per_minute: config.req_per_minute,
            req_per_hour: config.req_per_hour,
            req_per_day: config.req_per_day,
        }
    }

    fn shard_for(&self, identifier: &str) -> &Mutex<HashMap<String, Entry>> {
        let byte = identifier.bytes().next().unwrap_or(0);
        &self.shards[usize::from(byte) % SHARD_COUNT]
    }

    /// Checks and records a request for `identifier`, returning `Ok(())`
    /// if it is accepted or `Err(retry_after)` if blocked or rate
    /// limited. On a fresh breach, blocks the identifier for the
    /// corresponding cooldown rather than just rejecting this request.
    ///
    /// # Errors
    ///
    /// Returns the number of seconds the caller must wait before retrying.
    pub fn check(&self, identifier: &str) -> Result<(), Duration> {
        let now = SystemTime::now();
        let shard = self.shard_for(identifier);
        let mut map = shard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = map.entry(identifier.to_string()).or_default();

        if let Some(until) = entry.blocked_until {
            if now < until {
                return Err(until.duration_since(now).unwrap_or(Duration::ZERO));
            }
            entry.blocked_until = None;
        }

        entry.requests.retain(|t| now.duration_since(*t).unwrap_or(Duration::ZERO) < HISTORY_RETENTION);

        let last_minute = count_within(&entry.requests, now, Duration::from_secs(60));
        let last_hour = count_within(&entry.requests, now, Duration::from_secs(3600));
        let last_day = count_within(&entry.requests, now, Duration::from_secs(86400));

        let breach = if last_minute >= self.req_per_minute {
            Some(BLOCK_ON_MINUTE_BREACH)
        } else if last_hour >= self.req_per_hour {
            Some(BLOCK_ON_HOUR_BREACH)
        } else if last_day >= self.req_per_day {
            Some(BLOCK_ON_DAY_BREACH)
        } else {
            None
        };

        if let Some(cooldown) = breach {
            entry.blocked_until = Some(now + cooldown);
            return Err(cooldown);
        }

        entry.requests.push(now);
        Ok(())
    }

    /// Returns the current counters for `identifier`, without recording a
    /// request.
    #[must_use]
    pub fn get_user_stats(&self, identifier: &str) -> UserStats {
        let now = SystemTime::now();
        let shard = self.shard_for(identifier);
        let map = shard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.get(identifier).map_or(
            UserStats { last_minute: 0, last_hour: 0, last_day: 0, blocked: false },
            |entry| UserStats {
                last_minute: count_within(&entry.requests, now, Duration::from_secs(60)),
                last_hour: count_within(&entry.requests, now, Duration::from_secs(3600)),
                last_day: count_within(&entry.requests, now, Duration::from_secs(86400)),
                blocked: entry.blocked_until.is_some_and(|until| until > now),
            },
        )
    }

    /// Returns aggregate counters across all shards.
    #[must_use]
    pub fn get_system_stats(&self) -> SystemStats {
        let now = SystemTime::now();
        let mut known = 0;
        let mut blocked = 0;
        for shard in &self.shards {
            let map = shard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            known += map.len();
            blocked += map.values().filter(|e| e.blocked_until.is_some_and(|u| u > now)).count();
        }
        SystemStats { known_identifiers: known, blocked_identifiers: blocked }
    }
}

fn count_within(requests: &[SystemTime], now: SystemTime, window: Duration) -> u32 {
    u32::try_from(requests.iter().filter(|t| now.duration_since(**t).unwrap_or(Duration::ZERO) < window).count())
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(req_per_minute: u32) -> RateLimiter {
        let config = RetrievalConfig { req_per_minute, req_per_hour: 1000, req_per_day: 10000, ..Default::default() };
        RateLimiter::new(&config)
    }

    #[test]
    fn accepts_requests_under_threshold() {
        let limiter = limiter_with(5);
        for _ in 0..5 {
            assert!(limiter.check("user-a").is_ok());
        }
    }

    #[test]
    fn blocks_after_minute_threshold_breach() {
        let limiter = limiter_with(3);
        for _ in 0..3 {
            assert!(limiter.check("user-b").is_ok());
        }
        assert!(limiter.check("user-b").is_err());
    }

    #[test]
    fn stays_blocked_on_subsequent_calls_within_cooldown() {
        let limiter = limiter_with(1);
        assert!(limiter.check("user-c").is_ok());
        assert!(limiter.check("user-c").is_err());
        assert!(limiter.check("user-c").is_err());
    }

    #[test]
    fn identifiers_are_independent() {
        let limiter = limiter_with(1);
        assert!(limiter.check("user-d").is_ok());
        assert!(limiter.check("user-e").is_ok());
    }

    #[test]
    fn user_stats_reflect_recorded_requests() {
        let limiter = limiter_with(10);
        limiter.check("user-f").unwrap();
        limiter.check("user-f").unwrap();
        let stats = limiter.get_user_stats("user-f");
        assert_eq!(stats.last_minute, 2);
        assert!(!stats.blocked);
    }

    #[test]
    fn system_stats_count_known_and_blocked_identifiers() {
        let limiter = limiter_with(1);
        limiter.check("user-g").unwrap();
        assert!(limiter.check("user-g").is_err());
        let stats = limiter.get_system_stats();
        assert_eq!(stats.known_identifiers, 1);
        assert_eq!(stats.blocked_identifiers, 1);
    }
}
