//! Retry policy: decides whether a failed job runs again, and when.
//!
//! The decision is a pure function of the attempt count after the failure
//! being handled and the two configured knobs. Callers apply the resulting
//! [`Decision`] through the store; nothing here touches durable state.

use std::time::Duration;

/// Upper bound on any computed backoff delay. Keeps `base ^ n` finite for
/// adversarial configurations.
pub const MAX_BACKOFF: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the job again after the given delay.
    Reschedule(Duration),
    /// The retry budget is exhausted; move the job to the dead letter queue.
    GiveUp,
}

/// Decides the fate of a job whose attempt just failed.
///
/// `attempts_after_failure` is the attempt count including the failure being
/// handled. The job is given up once that count exceeds `max_retries`;
/// otherwise the retry delay is `backoff_base ^ attempts_after_failure`
/// seconds, clamped to [`MAX_BACKOFF`].
///
/// With the defaults (`max_retries = 3`, `backoff_base = 2`) a consistently
/// failing job retries after 2, 4, and 8 seconds and is dead-lettered on its
/// fourth failure.
#[must_use]
pub fn decide(attempts_after_failure: u32, max_retries: u32, backoff_base: u32) -> Decision {
    if attempts_after_failure > max_retries {
        Decision::GiveUp
    } else {
        Decision::Reschedule(backoff_delay(backoff_base, attempts_after_failure))
    }
}

/// Computes `base ^ exponent` seconds, saturating at [`MAX_BACKOFF`].
#[must_use]
pub fn backoff_delay(base: u32, exponent: u32) -> Duration {
    let secs = u64::from(base).checked_pow(exponent).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        // max_retries = 3, backoff_base = 2: retries at +2s, +4s, +8s.
        assert_eq!(
            decide(1, 3, 2),
            Decision::Reschedule(Duration::from_secs(2))
        );
        assert_eq!(
            decide(2, 3, 2),
            Decision::Reschedule(Duration::from_secs(4))
        );
        assert_eq!(
            decide(3, 3, 2),
            Decision::Reschedule(Duration::from_secs(8))
        );
        assert_eq!(decide(4, 3, 2), Decision::GiveUp);
    }

    #[test]
    fn test_give_up_when_count_exceeds_budget() {
        // max_retries = 2: the third failure is final, so the dead letter
        // queue records attempts = 3.
        assert!(matches!(decide(1, 2, 1), Decision::Reschedule(_)));
        assert!(matches!(decide(2, 2, 1), Decision::Reschedule(_)));
        assert_eq!(decide(3, 2, 1), Decision::GiveUp);
    }

    #[test]
    fn test_zero_retries_gives_up_immediately() {
        assert_eq!(decide(1, 0, 2), Decision::GiveUp);
    }

    #[test]
    fn test_base_one_is_constant_delay() {
        assert_eq!(
            decide(5, 10, 1),
            Decision::Reschedule(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_delay_is_clamped() {
        assert_eq!(backoff_delay(10, 30), MAX_BACKOFF);
        // Exponent large enough to overflow u64 still saturates.
        assert_eq!(backoff_delay(2, u32::MAX), MAX_BACKOFF);
    }
}
