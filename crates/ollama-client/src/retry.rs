use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential retry policy applied to the initial connection of every call.
///
/// Retries never happen once a response has been handed to the caller, so a
/// stream that fails mid-body is not replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first request.
    #[serde(default)]
    pub max_retries: u32,
    /// Initial backoff before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Exponential multiplier per retry step.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for computed backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Fraction of the computed backoff randomly added or removed (0.0..=1.0).
    #[serde(default)]
    pub jitter: f64,
}

const fn default_initial_backoff_ms() -> u64 {
    250
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(2, default_initial_backoff_ms(), default_backoff_factor())
            .with_jitter(0.25)
    }
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: 0.0,
        }
    }

    pub fn exponential(max_retries: u32, initial_backoff_ms: u64, backoff_factor: f64) -> Self {
        let initial = if initial_backoff_ms == 0 {
            default_initial_backoff_ms()
        } else {
            initial_backoff_ms
        };
        let factor = if backoff_factor <= 0.0 {
            default_backoff_factor()
        } else {
            backoff_factor
        };
        Self {
            max_retries,
            initial_backoff_ms: initial,
            backoff_factor: factor,
            max_backoff_ms: default_max_backoff_ms(),
            jitter: 0.0,
        }
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms.max(1);
        self
    }

    /// Sets the jitter fraction, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn can_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    pub fn backoff_duration(&self, retries_done: u32) -> Duration {
        if self.max_retries == 0 {
            return Duration::ZERO;
        }
        let exp = self.backoff_factor.powi(retries_done as i32);
        let base = (self.initial_backoff_ms as f64 * exp).round() as u64;
        let clamped = base.min(self.max_backoff_ms.max(1));
        Duration::from_millis(clamped)
    }

    /// Backoff for the given step with jitter drawn from `rng`.
    ///
    /// The result stays within `backoff * (1 ± jitter)` and never exceeds
    /// `max_backoff_ms`.
    pub fn jittered_backoff<R: Rng>(&self, retries_done: u32, rng: &mut R) -> Duration {
        let base = self.backoff_duration(retries_done);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = rng.gen_range(-self.jitter..=self.jitter);
        let millis = (base.as_millis() as f64 * (1.0 + spread)).round().max(0.0) as u64;
        Duration::from_millis(millis.min(self.max_backoff_ms.max(1)))
    }

    pub(crate) fn next_delay(&self, retries_done: u32) -> Duration {
        self.jittered_backoff(retries_done, &mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn none_policy_has_zero_retries() {
        let p = RetryPolicy::none();
        assert_eq!(p.max_retries, 0);
        assert!(!p.can_retry(0));
        assert!(p.backoff_duration(0).is_zero());
    }

    #[test]
    fn exponential_policy_grows_with_cap() {
        let p = RetryPolicy::exponential(3, 100, 2.0).with_max_backoff_ms(250);
        assert_eq!(p.backoff_duration(0).as_millis(), 100);
        assert_eq!(p.backoff_duration(1).as_millis(), 200);
        assert_eq!(p.backoff_duration(2).as_millis(), 250);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = RetryPolicy::exponential(5, 1_000, 2.0).with_jitter(0.5);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let delay = p.jittered_backoff(0, &mut rng).as_millis();
            assert!((500..=1_500).contains(&delay), "delay out of range: {delay}");
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let p = RetryPolicy::exponential(2, 100, 3.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(p.jittered_backoff(1, &mut rng), p.backoff_duration(1));
    }

    #[test]
    fn jitter_is_clamped() {
        assert_eq!(RetryPolicy::none().with_jitter(4.0).jitter, 1.0);
        assert_eq!(RetryPolicy::none().with_jitter(-1.0).jitter, 0.0);
        assert_eq!(RetryPolicy::none().with_jitter(f64::NAN).jitter, 0.0);
    }

    #[test]
    fn default_policy_retries_twice() {
        let p = RetryPolicy::default();
        assert!(p.can_retry(1));
        assert!(!p.can_retry(2));
    }
}
