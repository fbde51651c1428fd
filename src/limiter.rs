// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed-window rate limiter keyed by client identity.
//!
//! Each identity owns a window `{count, window_start}`. A request past
//! `window_start + window` starts a fresh window; otherwise the count is
//! bumped and compared to the identity's limit. Denied requests still count,
//! so a client hammering the API stays denied until its window closes.
//!
//! Windows live in a sharded map and are updated under the entry lock, so
//! concurrent requests from one identity never observe a stale count and
//! different identities never contend on a global lock.

use crate::clock::{Clock, SystemClock};
use crate::config::ThrottleConfig;
use crate::identity::ClientIdentity;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Request is allowed
    Allow {
        /// Requests left in the current window
        remaining: u32,
        /// Time until the window resets
        reset_in: Duration,
    },
    /// Request is over the limit
    Deny {
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Counter state for one identity.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    window_start: Instant,
}

impl RateWindow {
    fn open(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn expired(&self, now: Instant, window: Duration) -> bool {
        now >= self.window_start + window
    }

    fn reset_in(&self, now: Instant, window: Duration) -> Duration {
        (self.window_start + window).saturating_duration_since(now)
    }
}

/// Thread-safe fixed-window rate limiter.
pub struct RateLimiter {
    config: ThrottleConfig,
    windows: DashMap<ClientIdentity, RateWindow>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter reading the system clock.
    pub fn new(config: ThrottleConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a rate limiter with an explicit time source.
    pub fn with_clock(config: ThrottleConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            clock,
        }
    }

    /// Requests allowed per window for this identity.
    pub fn limit_for(&self, identity: &ClientIdentity) -> u32 {
        if identity.is_authenticated() {
            self.config.user_rate
        } else {
            self.config.anon_rate
        }
    }

    /// Admit or deny a request at the limiter's current time.
    pub fn admit(&self, identity: &ClientIdentity) -> Decision {
        self.admit_at(identity, self.clock.now())
    }

    /// Admit or deny a request arriving at `now`.
    pub fn admit_at(&self, identity: &ClientIdentity, now: Instant) -> Decision {
        let window = self.config.window_duration();
        let limit = self.limit_for(identity);

        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut state = self
            .windows
            .entry(identity.clone())
            .or_insert_with(|| RateWindow::open(now));

        if state.expired(now, window) {
            *state = RateWindow::open(now);
        }
        state.count = state.count.saturating_add(1);

        let reset_in = state.reset_in(now, window);
        if state.count <= limit {
            Decision::Allow {
                remaining: limit - state.count,
                reset_in,
            }
        } else {
            debug!(%identity, count = state.count, limit, ?reset_in, "Rate limit exceeded");
            Decision::Deny {
                retry_after: reset_in,
            }
        }
    }

    /// Drop windows that have closed (should be called periodically).
    pub fn cleanup(&self) {
        self.cleanup_at(self.clock.now());
    }

    /// Drop windows that have closed as of `now`.
    pub fn cleanup_at(&self, now: Instant) {
        let window = self.config.window_duration();
        let before = self.windows.len();
        self.windows.retain(|_, state| !state.expired(now, window));
        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            debug!(evicted, "Evicted closed rate windows");
        }
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(rate: u32) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let config = ThrottleConfig {
            anon_rate: rate,
            user_rate: rate * 2,
            ..Default::default()
        };
        (RateLimiter::with_clock(config, Arc::new(clock.clone())), clock)
    }

    fn anon(origin: &str) -> ClientIdentity {
        ClientIdentity::Anonymous(origin.to_string())
    }

    #[test]
    fn test_fifty_first_request_denied() {
        let (limiter, _clock) = limiter(50);
        let id = anon("127.0.0.1");

        for i in 0..50 {
            assert!(limiter.admit(&id).is_allowed(), "request {} denied", i + 1);
        }
        assert!(matches!(limiter.admit(&id), Decision::Deny { .. }));
    }

    #[test]
    fn test_remaining_counts_down() {
        let (limiter, _clock) = limiter(3);
        let id = anon("127.0.0.1");

        let remaining: Vec<u32> = (0..3)
            .map(|_| match limiter.admit(&id) {
                Decision::Allow { remaining, .. } => remaining,
                Decision::Deny { .. } => panic!("Should not be limited"),
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);
    }

    #[test]
    fn test_window_reset() {
        let (limiter, clock) = limiter(2);
        let id = anon("127.0.0.1");

        assert!(limiter.admit(&id).is_allowed());
        assert!(limiter.admit(&id).is_allowed());
        assert!(!limiter.admit(&id).is_allowed());

        // One tick before the boundary the window is still closed to us
        clock.advance(Duration::from_secs(59));
        match limiter.admit(&id) {
            Decision::Deny { retry_after } => assert_eq!(retry_after, Duration::from_secs(1)),
            Decision::Allow { .. } => panic!("Should be limited"),
        }

        clock.advance(Duration::from_secs(1));
        assert!(limiter.admit(&id).is_allowed());
        assert!(limiter.admit(&id).is_allowed());
        assert!(!limiter.admit(&id).is_allowed());
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _clock) = limiter(1);
        assert!(limiter.admit(&anon("a")).is_allowed());
        assert!(!limiter.admit(&anon("a")).is_allowed());
        assert!(limiter.admit(&anon("b")).is_allowed());
    }

    #[test]
    fn test_users_get_their_own_rate() {
        let (limiter, _clock) = limiter(1);
        let user = ClientIdentity::User(7);
        assert_eq!(limiter.limit_for(&user), 2);
        assert!(limiter.admit(&user).is_allowed());
        assert!(limiter.admit(&user).is_allowed());
        assert!(!limiter.admit(&user).is_allowed());
    }

    #[test]
    fn test_cleanup_evicts_closed_windows() {
        let (limiter, clock) = limiter(5);
        limiter.admit(&anon("a"));
        clock.advance(Duration::from_secs(30));
        limiter.admit(&anon("b"));
        assert_eq!(limiter.tracked(), 2);

        clock.advance(Duration::from_secs(30));
        limiter.cleanup();
        assert_eq!(limiter.tracked(), 1);

        clock.advance(Duration::from_secs(30));
        limiter.cleanup();
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_concurrent_admits_never_exceed_limit() {
        let (limiter, _clock) = limiter(50);
        let limiter = Arc::new(limiter);
        let id = anon("10.0.0.1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    (0..25).filter(|_| limiter.admit(&id).is_allowed()).count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }
}
