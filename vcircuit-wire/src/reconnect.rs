//! Backoff between daemon connection attempts.

use std::time::Duration;
use vcircuit_core::options::TransportOptions;

/// Exponential backoff tracker.
///
/// ```rust
/// use vcircuit_core::options::TransportOptions;
/// use vcircuit_wire::reconnect::Backoff;
/// use std::time::Duration;
///
/// let options = TransportOptions::default()
///     .with_reconnect_ivl(Duration::from_millis(100))
///     .with_reconnect_ivl_max(Duration::from_millis(300));
///
/// let mut backoff = Backoff::new(&options);
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(200));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(300));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    base_interval: Duration,
    max_interval: Duration,
    attempt: u32,
    current_interval: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn new(options: &TransportOptions) -> Self {
        Self {
            base_interval: options.reconnect_ivl,
            max_interval: options.reconnect_ivl_max,
            attempt: 0,
            current_interval: options.reconnect_ivl,
        }
    }

    /// Delay before the next attempt. Doubles per call up to the maximum;
    /// a zero maximum disables growth.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_interval;

        self.attempt += 1;
        if self.max_interval.is_zero() {
            return delay;
        }
        self.current_interval = self
            .base_interval
            .saturating_mul(1_u32 << self.attempt.min(10))
            .min(self.max_interval);

        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_interval = self.base_interval;
    }

    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_max_keeps_base() {
        let options = TransportOptions::default()
            .with_reconnect_ivl(Duration::from_millis(50))
            .with_reconnect_ivl_max(Duration::ZERO);

        let mut backoff = Backoff::new(&options);
        for _ in 0..4 {
            assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        }
        assert_eq!(backoff.attempt(), 4);
    }

    #[test]
    fn test_reset() {
        let options = TransportOptions::default();
        let mut backoff = Backoff::new(&options);

        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), options.reconnect_ivl);
    }
}
