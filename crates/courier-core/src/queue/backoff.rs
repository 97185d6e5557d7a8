//! Backoff policy: decides when a failed entry becomes eligible again.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;

/// Exponential backoff with jitter for failed entries.
///
/// `next_retry(attempts) = now + min(base * 2^(attempts-1) + uniform(0, base), max_backoff)`
///
/// Example with base=5s:
/// - attempt 1: [5s, 10s)
/// - attempt 2: [10s, 15s)
/// - attempt 3: [20s, 25s)
///
/// The result only schedules eligibility; the sweeper's `next_retry_at <= now`
/// comparison is what actually gates the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay for the first retry (and the jitter bound).
    pub base: Duration,

    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_backoff: Duration) -> Self {
        Self { base, max_backoff }
    }

    /// Delay before the next attempt, using the thread-local RNG for jitter.
    pub fn delay(&self, attempts: u32) -> Duration {
        self.delay_with_rng(attempts, &mut rand::thread_rng())
    }

    /// Delay before the next attempt.
    ///
    /// # Arguments
    /// * `attempts` - failed attempts so far (1-indexed; 0 is treated as 1).
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempts: u32, rng: &mut R) -> Duration {
        let base_secs = self.base.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(62) as i32;
        let expo = base_secs * 2f64.powi(exponent);
        let jitter = if base_secs > 0.0 {
            rng.gen_range(0.0..base_secs)
        } else {
            0.0
        };
        let delay_secs = (expo + jitter).min(self.max_backoff.as_secs_f64());
        // f64 rounding can push a huge cap past what Duration holds.
        Duration::try_from_secs_f64(delay_secs)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Timestamp at which the entry becomes eligible for retry.
    pub fn next_retry(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        self.next_retry_with_rng(attempts, now, &mut rand::thread_rng())
    }

    pub fn next_retry_with_rng<R: Rng + ?Sized>(
        &self,
        attempts: u32,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> DateTime<Utc> {
        let delay = self.delay_with_rng(attempts, rng);
        let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let delta = TimeDelta::try_milliseconds(millis).unwrap_or(TimeDelta::MAX);
        now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60 * 60 * 24),
        }
    }
}
