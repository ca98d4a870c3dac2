/// Bounded retry with exponential backoff and jitter.
///
/// Provider clients never retry on their own; callers decide which failures are worth
/// another attempt and drive them through a `RetryPolicy`.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Total number of attempts is always at least two, so every failure gets one retry.
pub const MIN_ATTEMPTS: u32 = 2;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(MIN_ATTEMPTS),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given 1-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        backoff_delay(
            self.initial_backoff,
            self.max_backoff,
            attempt.saturating_sub(1),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_millis(8_000))
    }
}

/// `initial * 2^exponent`, capped at `max`, plus up to 25% jitter.
pub fn backoff_delay(initial: Duration, max: Duration, exponent: u32) -> Duration {
    let mult = 1u128.checked_shl(exponent).unwrap_or(u128::MAX);
    let base_ms = initial.as_millis().saturating_mul(mult);
    let capped_ms = std::cmp::min(base_ms, max.as_millis()) as u64;
    let jitter_cap = std::cmp::max(1, capped_ms / 4);
    let jitter_ms = pseudo_jitter_ms(jitter_cap);
    Duration::from_millis(capped_ms.saturating_add(jitter_ms))
}

fn pseudo_jitter_ms(max_inclusive: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let nanos = now.subsec_nanos() as u64;
    nanos % (max_inclusive + 1)
}
