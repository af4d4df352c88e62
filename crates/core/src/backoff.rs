//! Retry and reconnect delay math.
//!
//! Pure functions shared by the bus (handler retries) and the broker
//! (connection recovery) so both sides back off identically.

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Delay applied to the first retry of an envelope that had no delay yet.
pub const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

/// Ceiling for both retry and reconnect delays.
pub const MAX_BACKOFF_DELAY_MS: u64 = 30_000;

/// Base delay for broker reconnection attempts.
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Reconnection attempts before the broker gives up for good.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

// ---------------------------------------------------------------------------
// Delay computation
// ---------------------------------------------------------------------------

/// Next retry delay for an envelope currently delayed by `current_ms`.
///
/// Doubles the current delay, seeding with [`INITIAL_RETRY_DELAY_MS`] when
/// there was none, and caps at [`MAX_BACKOFF_DELAY_MS`].
pub fn next_retry_delay_ms(current_ms: u64) -> u64 {
    let next = if current_ms == 0 {
        INITIAL_RETRY_DELAY_MS
    } else {
        current_ms.saturating_mul(2)
    };
    next.min(MAX_BACKOFF_DELAY_MS)
}

/// Reconnect delay for the given zero-based attempt number.
///
/// `min(1000 * 2^attempt, 30000)` milliseconds.
pub fn reconnect_delay_ms(attempt: u32) -> u64 {
    RECONNECT_BASE_DELAY_MS
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
        .min(MAX_BACKOFF_DELAY_MS)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- next_retry_delay_ms --

    #[test]
    fn first_retry_starts_at_one_second() {
        assert_eq!(next_retry_delay_ms(0), 1_000);
    }

    #[test]
    fn retry_delay_doubles() {
        assert_eq!(next_retry_delay_ms(1_000), 2_000);
        assert_eq!(next_retry_delay_ms(2_000), 4_000);
        assert_eq!(next_retry_delay_ms(8_000), 16_000);
    }

    #[test]
    fn retry_delay_caps_at_thirty_seconds() {
        assert_eq!(next_retry_delay_ms(16_000), 30_000);
        assert_eq!(next_retry_delay_ms(30_000), 30_000);
        assert_eq!(next_retry_delay_ms(u64::MAX), 30_000);
    }

    #[test]
    fn retry_delays_are_monotonic_up_to_the_cap() {
        let mut delay = 0;
        let mut previous = 0;
        for _ in 0..16 {
            delay = next_retry_delay_ms(delay);
            assert!(delay >= previous);
            assert!(delay <= MAX_BACKOFF_DELAY_MS);
            previous = delay;
        }
        assert_eq!(delay, MAX_BACKOFF_DELAY_MS);
    }

    #[test]
    fn delayed_publishes_keep_doubling_from_their_own_delay() {
        // An envelope published with a small explicit delay backs off from
        // that value rather than jumping to the one-second seed.
        assert_eq!(next_retry_delay_ms(1), 2);
        assert_eq!(next_retry_delay_ms(250), 500);
    }

    // -- reconnect_delay_ms --

    #[test]
    fn reconnect_delay_grows_exponentially() {
        assert_eq!(reconnect_delay_ms(0), 1_000);
        assert_eq!(reconnect_delay_ms(1), 2_000);
        assert_eq!(reconnect_delay_ms(2), 4_000);
        assert_eq!(reconnect_delay_ms(4), 16_000);
    }

    #[test]
    fn reconnect_delay_caps_at_thirty_seconds() {
        assert_eq!(reconnect_delay_ms(5), 30_000);
        assert_eq!(reconnect_delay_ms(10), 30_000);
        assert_eq!(reconnect_delay_ms(63), 30_000);
        assert_eq!(reconnect_delay_ms(64), 30_000);
    }

    #[test]
    fn attempt_cap_is_ten() {
        assert_eq!(MAX_RECONNECT_ATTEMPTS, 10);
    }
}
