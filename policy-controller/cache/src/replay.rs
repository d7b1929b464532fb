use std::{num::NonZeroU32, time::Duration};

/// Exponential backoff between failed replay lists.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,

    /// Bounds the number of attempts before a replay gives up. `None` retries until the replay is
    /// cancelled.
    pub max_attempts: Option<NonZeroU32>,
}

/// The delays to wait after each failed attempt. Yields `None` once attempts are exhausted.
#[derive(Clone, Debug)]
pub struct Delays {
    backoff: Backoff,
    next: Duration,
    failures: u32,
}

// === impl Backoff ===

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            max_attempts: None,
        }
    }
}

impl Backoff {
    pub fn delays(&self) -> Delays {
        Delays {
            backoff: *self,
            next: self.initial.min(self.max),
            failures: 0,
        }
    }
}

// === impl Delays ===

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if let Some(max) = self.backoff.max_attempts {
            if self.failures >= max.get() {
                return None;
            }
        }

        let delay = self.next;
        let factor = if self.backoff.factor.is_finite() && self.backoff.factor >= 1.0 {
            self.backoff.factor
        } else {
            1.0
        };
        self.next = Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
            .unwrap_or(self.backoff.max)
            .min(self.backoff.max);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn grows_to_max() {
        let backoff = Backoff {
            initial: ms(100),
            max: ms(1_000),
            factor: 2.0,
            max_attempts: None,
        };
        let delays = backoff.delays().take(6).collect::<Vec<_>>();
        assert_eq!(
            delays,
            vec![ms(100), ms(200), ms(400), ms(800), ms(1_000), ms(1_000)]
        );
    }

    #[test]
    fn bounded_attempts() {
        let backoff = Backoff {
            max_attempts: NonZeroU32::new(3),
            ..Backoff::default()
        };
        // Three attempts means two waits between them.
        assert_eq!(backoff.delays().count(), 2);

        let once = Backoff {
            max_attempts: NonZeroU32::new(1),
            ..Backoff::default()
        };
        assert_eq!(once.delays().next(), None);
    }

    #[test]
    fn unbounded_by_default() {
        let backoff = Backoff::default();
        assert_eq!(backoff.max_attempts, None);
        let last = backoff.delays().nth(1_000).unwrap();
        assert_eq!(last, backoff.max);
    }

    #[test]
    fn tolerates_degenerate_factors() {
        let backoff = Backoff {
            factor: f64::NAN,
            ..Backoff::default()
        };
        assert!(backoff.delays().take(3).all(|d| d == backoff.initial));

        let huge = Backoff {
            factor: f64::MAX,
            ..Backoff::default()
        };
        let delays = huge.delays().take(3).collect::<Vec<_>>();
        assert_eq!(delays, vec![huge.initial, huge.max, huge.max]);
    }
}
