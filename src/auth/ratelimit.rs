//! Brute-force guard for failed logins
//!
//! This module provides IP-based blocking for failed login attempts.
//! After a configurable number of consecutive failures, an IP is blocked for a
//! configurable duration.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::warn;

/// Longest block the guard will apply
pub const MAX_BLOCK_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration for the brute-force guard
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Number of consecutive failed logins that blocks an IP
    pub max_failures: u32,

    /// Duration to block an IP after max failures
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            block_duration: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Per-IP state
///
/// A failing IP carries its consecutive failure count; a blocked IP carries
/// the instant its block lifts and no count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpState {
    Failing(u32),
    Blocked { until: Instant },
}

/// Tracks failed logins per source IP and blocks abusive IPs
///
/// Every mutation goes through the map's entry API, which holds the shard
/// lock for that key, so increment-and-block is atomic per IP.
pub struct BruteForceGuard {
    config: RateLimitConfig,
    entries: DashMap<IpAddr, IpState>,
}

impl BruteForceGuard {
    /// Create a new guard with the given configuration
    ///
    /// `block_duration` is capped at [`MAX_BLOCK_DURATION`].
    pub fn new(mut config: RateLimitConfig) -> Self {
        config.block_duration = config.block_duration.min(MAX_BLOCK_DURATION);
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Create a new guard with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check if an IP is currently blocked
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.is_blocked_at(ip, Instant::now())
    }

    /// [`BruteForceGuard::is_blocked`] at an explicit instant
    ///
    /// A block that has run out is removed here.
    pub fn is_blocked_at(&self, ip: IpAddr, now: Instant) -> bool {
        match self.entries.get(&ip).map(|entry| *entry) {
            Some(IpState::Blocked { until }) if until > now => true,
            Some(IpState::Blocked { .. }) => {
                self.entries.remove_if(&ip, |_, state| {
                    matches!(state, IpState::Blocked { until } if *until <= now)
                });
                false
            }
            _ => false,
        }
    }

    /// Record a failed login attempt for an IP
    ///
    /// Returns `true` if the IP is blocked after this failure.
    pub fn record_failure(&self, ip: IpAddr) -> bool {
        self.record_failure_at(ip, Instant::now())
    }

    /// [`BruteForceGuard::record_failure`] at an explicit instant
    pub fn record_failure_at(&self, ip: IpAddr, now: Instant) -> bool {
        match self.entries.entry(ip) {
            Entry::Occupied(mut entry) => {
                let next = match *entry.get() {
                    IpState::Blocked { until } if until > now => return true,
                    IpState::Blocked { .. } => self.after_failures(1, now),
                    IpState::Failing(count) => self.after_failures(count.saturating_add(1), now),
                };
                entry.insert(next);
                self.log_if_blocked(ip, next)
            }
            Entry::Vacant(entry) => {
                let next = self.after_failures(1, now);
                entry.insert(next);
                self.log_if_blocked(ip, next)
            }
        }
    }

    fn after_failures(&self, count: u32, now: Instant) -> IpState {
        if count < self.config.max_failures {
            return IpState::Failing(count);
        }
        let until = now
            .checked_add(self.config.block_duration)
            .or_else(|| now.checked_add(MAX_BLOCK_DURATION))
            .unwrap_or(now);
        IpState::Blocked { until }
    }

    fn log_if_blocked(&self, ip: IpAddr, state: IpState) -> bool {
        let blocked = matches!(state, IpState::Blocked { .. });
        if blocked {
            warn!(
                ip = %ip,
                block_secs = self.config.block_duration.as_secs(),
                "Blocking IP after too many failed login attempts"
            );
        }
        blocked
    }

    /// Clear the failure count for an IP (after a successful login)
    ///
    /// A live block is left in place.
    pub fn record_success(&self, ip: IpAddr) {
        self.entries
            .remove_if(&ip, |_, state| matches!(state, IpState::Failing(_)));
    }

    /// Get the number of consecutive failures for an IP
    ///
    /// Returns 0 if none are recorded or the IP is blocked.
    pub fn failure_count(&self, ip: IpAddr) -> u32 {
        match self.entries.get(&ip).map(|entry| *entry) {
            Some(IpState::Failing(count)) => count,
            _ => 0,
        }
    }

    /// Get remaining block time for an IP
    ///
    /// Returns `None` if not blocked, otherwise returns the remaining duration
    pub fn remaining_block_time(&self, ip: IpAddr) -> Option<Duration> {
        self.remaining_block_time_at(ip, Instant::now())
    }

    /// [`BruteForceGuard::remaining_block_time`] at an explicit instant
    pub fn remaining_block_time_at(&self, ip: IpAddr, now: Instant) -> Option<Duration> {
        match self.entries.get(&ip).map(|entry| *entry) {
            Some(IpState::Blocked { until }) if until > now => Some(until - now),
            _ => None,
        }
    }

    /// Remove blocks that have run out
    ///
    /// Returns the number of entries removed. Failure counts are kept.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    /// [`BruteForceGuard::cleanup`] at an explicit instant
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, state| match state {
            IpState::Blocked { until } => *until > now,
            IpState::Failing(_) => true,
        });
        before.saturating_sub(self.entries.len())
    }

    /// Get current number of tracked IPs
    pub fn tracked_ips_count(&self) -> usize {
        self.entries.len()
    }
}
