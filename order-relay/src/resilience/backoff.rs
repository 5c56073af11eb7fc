//! Reconnect delays.

use std::time::Duration;

use rand::Rng;

/// Exponential delay schedule for connect attempts.
///
/// The first attempt goes out immediately; attempt `n` waits
/// `base * 2^(n-1)`, never more than `max`, stretched by up to a tenth so
/// several relays restarting together do not reconnect in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
        }
    }

    /// Delay before zero-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.spread(self.ceiling_ms(attempt)))
    }

    fn ceiling_ms(&self, attempt: u32) -> u64 {
        let Some(doublings) = attempt.checked_sub(1) else {
            return 0;
        };
        let factor = 1u64.checked_shl(doublings).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }

    fn spread(&self, ceiling_ms: u64) -> u64 {
        ceiling_ms + rand::thread_rng().gen_range(0..=ceiling_ms / 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_is_immediate() {
        assert_eq!(Backoff::new(100, 2000).delay(0), Duration::ZERO);
    }

    #[test]
    fn test_delay_doubles_until_capped() {
        let backoff = Backoff::new(100, 1000);
        assert_eq!(backoff.ceiling_ms(1), 100);
        assert_eq!(backoff.ceiling_ms(2), 200);
        assert_eq!(backoff.ceiling_ms(4), 800);
        assert_eq!(backoff.ceiling_ms(5), 1000);
        assert_eq!(backoff.ceiling_ms(200), 1000);
    }

    #[test]
    fn test_jitter_stays_within_a_tenth() {
        let backoff = Backoff::new(100, 2000);
        for _ in 0..50 {
            let ms = backoff.delay(3).as_millis();
            assert!((400..=440).contains(&ms), "delay {}ms out of range", ms);
        }
    }

    #[test]
    fn test_max_below_base_is_raised() {
        let backoff = Backoff::new(500, 100);
        assert_eq!(backoff.ceiling_ms(1), 500);
    }
}
