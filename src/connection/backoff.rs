//! Reconnect backoff
//!
//! Delay after `n` consecutive failures is `min(base * 2^n, cap)` scaled by a
//! uniformly random factor in `[1 - jitter, 1 + jitter]`, so instances that
//! drop together do not reconnect in lockstep.

use std::time::Duration;

use crate::constants::backoff::{BASE, CAP, JITTER, MAX_EXPONENT};

/// Exponential backoff with symmetric jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BASE, CAP, JITTER)
    }
}

impl Backoff {
    /// `jitter` is clamped to `[0, 1)`; `cap` is raised to `base` if lower
    #[must_use]
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 0.99)
        } else {
            0.0
        };
        Self {
            base,
            cap: cap.max(base),
            jitter,
        }
    }

    /// Delay before the next attempt, without jitter
    #[must_use]
    pub fn nominal(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.min(MAX_EXPONENT);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Jittered delay before the next attempt
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let nominal = self.nominal(failures);
        if self.jitter == 0.0 {
            return nominal;
        }
        let factor = rand::random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        nominal.mul_f64(factor)
    }

    /// Shortest delay `delay(failures)` can return
    #[must_use]
    pub fn min_delay(&self, failures: u32) -> Duration {
        self.nominal(failures).mul_f64(1.0 - self.jitter)
    }

    /// Longest delay `delay(failures)` can return
    #[must_use]
    pub fn max_delay(&self, failures: u32) -> Duration {
        self.nominal(failures).mul_f64(1.0 + self.jitter)
    }

    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    #[must_use]
    pub const fn cap(&self) -> Duration {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_nominal_doubles_until_cap() {
        let b = Backoff::default();
        assert_eq!(b.nominal(0), Duration::from_secs(1));
        assert_eq!(b.nominal(1), Duration::from_secs(2));
        assert_eq!(b.nominal(4), Duration::from_secs(16));
        assert_eq!(b.nominal(5), Duration::from_secs(30));
        assert_eq!(b.nominal(1000), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 0.0);
        assert_eq!(b.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_cap_below_base_raised() {
        let b = Backoff::new(Duration::from_secs(5), Duration::from_secs(1), 0.0);
        assert_eq!(b.cap(), Duration::from_secs(5));
        assert_eq!(b.delay(3), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_jitter_clamped() {
        let b = Backoff::new(BASE, CAP, f64::NAN);
        assert_eq!(b.delay(0), BASE);
        let b = Backoff::new(BASE, CAP, 5.0);
        assert!(b.min_delay(0) > Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_delay_within_jitter_bounds(failures in 0u32..64) {
            let b = Backoff::default();
            let d = b.delay(failures);
            let nominal = BASE.saturating_mul(1u32 << failures.min(MAX_EXPONENT)).min(CAP);
            // No sooner than min(base * 2^n, cap) minus jitter
            prop_assert!(d >= nominal.mul_f64(1.0 - JITTER) - Duration::from_nanos(1));
            prop_assert!(d <= nominal.mul_f64(1.0 + JITTER) + Duration::from_nanos(1));
        }

        #[test]
        fn prop_nominal_monotonic(failures in 0u32..63) {
            let b = Backoff::default();
            prop_assert!(b.nominal(failures) <= b.nominal(failures + 1));
        }
    }
}
