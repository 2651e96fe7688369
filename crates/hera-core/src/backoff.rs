//! Retry delay helpers.
//!
//! Rate-limit, external-service and internal errors back off exponentially;
//! idempotency conflicts wait a fixed delay with random jitter so that
//! retries of the same key do not arrive in lockstep.

use rand::Rng;
use std::time::Duration;

/// Base delay for rate-limit retries.
pub const RATE_LIMIT_BASE: Duration = Duration::from_secs(1);

/// Base delay for external-service retries.
pub const EXTERNAL_BASE: Duration = Duration::from_millis(500);

/// Base delay for internal-error retries.
pub const INTERNAL_BASE: Duration = Duration::from_secs(1);

/// Upper bound on any exponential delay.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Fixed delay for idempotency conflicts.
pub const IDEMPOTENCY_DELAY: Duration = Duration::from_secs(1);

/// Maximum jitter added to [`IDEMPOTENCY_DELAY`].
pub const IDEMPOTENCY_JITTER: Duration = Duration::from_millis(250);

/// Returns `base * 2^attempt`, capped at [`MAX_DELAY`].
///
/// # Example
///
/// ```
/// use hera_core::backoff::{exponential, MAX_DELAY};
/// use std::time::Duration;
///
/// assert_eq!(exponential(0, Duration::from_millis(500)), Duration::from_millis(500));
/// assert_eq!(exponential(2, Duration::from_millis(500)), Duration::from_secs(2));
/// assert_eq!(exponential(20, Duration::from_secs(1)), MAX_DELAY);
/// ```
#[must_use]
pub fn exponential(attempt: u32, base: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(MAX_DELAY)
}

/// Returns `delay` plus a uniformly random jitter in `[0, jitter]`.
#[must_use]
pub fn jittered_fixed(delay: Duration, jitter: Duration) -> Duration {
    let jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    if jitter_ms == 0 {
        return delay;
    }
    let extra = rand::thread_rng().gen_range(0..=jitter_ms);
    delay + Duration::from_millis(extra)
}
