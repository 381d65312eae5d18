//! Per-key rate limiting for noisy log categories.
//!
//! Each rate-limit key remembers when it last emitted. A call inside the
//! suppression window is rejected and counted; the next admitted call reports
//! how many were dropped so the loss shows up in the log instead of vanishing.
//!
//! Decisions for the same key are serialized by the map's entry lock, so two
//! threads can never both observe a stale timestamp and both emit within one
//! window. Different keys are decided independently.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Default suppression window.
pub const DEFAULT_RATE_LIMIT_PERIOD: Duration = Duration::from_secs(30);

/// Result of asking the limiter about one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Emit the event; `suppressed` events were dropped since the last emission.
    Emit { suppressed: u64 },
    /// Drop the event; it has been counted.
    Suppress,
}

impl Admission {
    pub fn is_emit(&self) -> bool {
        matches!(self, Admission::Emit { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct KeyState {
    last_emit: Instant,
    suppressed: u64,
}

impl KeyState {
    fn admit(&mut self, now: Instant, period: Duration) -> Admission {
        // A `now` behind `last_emit` saturates to zero: still inside the window.
        if now.saturating_duration_since(self.last_emit) >= period {
            let suppressed = std::mem::take(&mut self.suppressed);
            self.last_emit = now;
            Admission::Emit { suppressed }
        } else {
            self.suppressed += 1;
            Admission::Suppress
        }
    }
}

/// Tracks last-emit times per rate-limit key.
#[derive(Debug)]
pub struct RateLimiter {
    period: Duration,
    keys: DashMap<String, KeyState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_PERIOD)
    }
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            keys: DashMap::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Decide whether an event for `key` at `now` should be emitted.
    ///
    /// The first call for a key always emits.
    pub fn admit(&self, key: &str, now: Instant) -> Admission {
        // Fast path avoids allocating the key for known categories.
        if let Some(mut state) = self.keys.get_mut(key) {
            return state.admit(now, self.period);
        }

        match self.keys.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => occupied.get_mut().admit(now, self.period),
            Entry::Vacant(vacant) => {
                vacant.insert(KeyState {
                    last_emit: now,
                    suppressed: 0,
                });
                Admission::Emit { suppressed: 0 }
            }
        }
    }

    /// Boolean form of [`RateLimiter::admit`].
    pub fn should_emit(&self, key: &str, now: Instant) -> bool {
        self.admit(key, now).is_emit()
    }

    /// Events suppressed for `key` since its last emission.
    pub fn suppressed(&self, key: &str) -> u64 {
        self.keys.get(key).map(|state| state.suppressed).unwrap_or(0)
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Forget keys that have been quiet for a full period and owe no summary.
    ///
    /// Returns how many keys were removed.
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.keys.len();
        let period = self.period;
        self.keys.retain(|_, state| {
            state.suppressed > 0 || now.saturating_duration_since(state.last_emit) < period
        });
        before.saturating_sub(self.keys.len())
    }
}

/// Suffix appended to the first message emitted after a suppression window.
pub fn suppression_summary(suppressed: u64) -> String {
    format!(" (+ skipped {} logs due to rate-limiting)", suppressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_warning_scenario() {
        let limiter = RateLimiter::new(secs(30));
        let t0 = Instant::now();

        let decisions: Vec<bool> = [0, 5, 10, 35]
            .iter()
            .map(|offset| limiter.should_emit("warning", t0 + secs(*offset)))
            .collect();

        assert_eq!(decisions, vec![true, false, false, true]);
    }

    #[test]
    fn test_summary_reports_suppressed_count() {
        let limiter = RateLimiter::new(secs(30));
        let t0 = Instant::now();

        assert_eq!(limiter.admit("error", t0), Admission::Emit { suppressed: 0 });
        assert_eq!(limiter.admit("error", t0 + secs(1)), Admission::Suppress);
        assert_eq!(limiter.admit("error", t0 + secs(2)), Admission::Suppress);
        assert_eq!(limiter.suppressed("error"), 2);

        assert_eq!(
            limiter.admit("error", t0 + secs(31)),
            Admission::Emit { suppressed: 2 }
        );
        assert_eq!(limiter.suppressed("error"), 0);
    }

    #[test]
    fn test_firehose_emits_once_per_window() {
        let limiter = RateLimiter::new(secs(30));
        let t0 = Instant::now();

        // 100ms spacing over three windows
        let emitted: Vec<u64> = (0..900u64)
            .filter(|i| limiter.should_emit("info", t0 + Duration::from_millis(i * 100)))
            .collect();

        assert_eq!(emitted, vec![0, 300, 600]);
    }

    #[test]
    fn test_spaced_calls_always_emit() {
        let limiter = RateLimiter::new(secs(30));
        let t0 = Instant::now();

        for i in 0..10 {
            assert!(limiter.should_emit("debug", t0 + secs(30 * i)));
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(secs(30));
        let t0 = Instant::now();

        assert!(limiter.should_emit("info", t0));
        assert!(limiter.should_emit("warning", t0));
        assert!(!limiter.should_emit("info", t0 + secs(1)));
        assert!(!limiter.should_emit("warning", t0 + secs(1)));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_time_going_backwards_stays_in_window() {
        let limiter = RateLimiter::new(secs(30));
        let t0 = Instant::now() + secs(60);

        assert!(limiter.should_emit("skew", t0));
        assert!(!limiter.should_emit("skew", t0 - secs(45)));
    }

    #[test]
    fn test_prune_keeps_pending_summaries() {
        let limiter = RateLimiter::new(secs(30));
        let t0 = Instant::now();

        limiter.should_emit("quiet", t0);
        limiter.should_emit("noisy", t0);
        limiter.should_emit("noisy", t0 + secs(1));

        assert_eq!(limiter.prune(t0 + secs(40)), 1);
        assert_eq!(limiter.suppressed("noisy"), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_concurrent_callers_emit_once() {
        let limiter = Arc::new(RateLimiter::new(secs(30)));
        let emitted = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let emitted = Arc::clone(&emitted);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if limiter.should_emit("shared", now) {
                            emitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(emitted.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.suppressed("shared"), 7999);
    }

    #[test]
    fn test_summary_text() {
        assert_eq!(
            suppression_summary(3),
            " (+ skipped 3 logs due to rate-limiting)"
        );
    }
}
