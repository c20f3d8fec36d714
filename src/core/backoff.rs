use std::time::Duration;

/// Wait-interval schedule used between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Constant time between retries
    Constant(Duration),
    /// Linear increase in time between retries, capped at `max`
    Linear {
        base: Duration,
        increment: Duration,
        max: Duration,
    },
    /// Exponential increase in time between retries (base * 2^attempt)
    Exponential { base: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant(interval) => *interval,
            Self::Linear {
                base,
                increment,
                max,
            } => {
                let step = increment.checked_mul(attempt).unwrap_or(*max);
                base.checked_add(step).unwrap_or(*max).min(*max)
            }
            Self::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(*max).min(*max)
            }
        }
    }
}

/// A consumable sequence of wait intervals.
///
/// The client holds one value as a prototype and clones it before each retry
/// series, so concurrent series never share interval state.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    strategy: BackoffStrategy,
    attempt: u32,
}

impl RetryBackoff {
    pub fn new(strategy: BackoffStrategy) -> Self {
        Self {
            strategy,
            attempt: 0,
        }
    }

    /// The next wait interval; successive calls walk the schedule.
    pub fn next_interval(&mut self) -> Duration {
        let delay = self.strategy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(BackoffStrategy::Linear {
            base: Duration::from_millis(1),
            increment: Duration::from_millis(250),
            max: Duration::from_secs(5),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_delay_never_changes() {
        let strategy = BackoffStrategy::Constant(Duration::from_millis(100));
        assert_eq!(strategy.delay(0), Duration::from_millis(100));
        assert_eq!(strategy.delay(7), Duration::from_millis(100));
    }

    #[test]
    fn linear_delay_grows_until_capped() {
        let strategy = BackoffStrategy::Linear {
            base: Duration::from_millis(100),
            increment: Duration::from_millis(50),
            max: Duration::from_millis(220),
        };
        assert_eq!(strategy.delay(0), Duration::from_millis(100));
        assert_eq!(strategy.delay(1), Duration::from_millis(150));
        assert_eq!(strategy.delay(2), Duration::from_millis(200));
        assert_eq!(strategy.delay(3), Duration::from_millis(220));
        assert_eq!(strategy.delay(u32::MAX), Duration::from_millis(220));
    }

    #[test]
    fn exponential_delay_doubles_until_capped() {
        let strategy = BackoffStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        };
        assert_eq!(strategy.delay(0), Duration::from_millis(100));
        assert_eq!(strategy.delay(1), Duration::from_millis(200));
        assert_eq!(strategy.delay(3), Duration::from_millis(800));
        assert_eq!(strategy.delay(4), Duration::from_millis(1000));
        assert_eq!(strategy.delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn cloned_prototype_restarts_the_sequence() {
        let prototype = RetryBackoff::new(BackoffStrategy::Linear {
            base: Duration::from_millis(1),
            increment: Duration::from_millis(1),
            max: Duration::from_secs(1),
        });

        let mut first = prototype.clone();
        assert_eq!(first.next_interval(), Duration::from_millis(1));
        assert_eq!(first.next_interval(), Duration::from_millis(2));

        // A second series is unaffected by the first one.
        let mut second = prototype.clone();
        assert_eq!(second.next_interval(), Duration::from_millis(1));
    }

    #[test]
    fn default_schedule_starts_small_and_caps_at_five_seconds() {
        let mut backoff = RetryBackoff::default();
        assert_eq!(backoff.next_interval(), Duration::from_millis(1));
        assert_eq!(backoff.next_interval(), Duration::from_millis(251));
        for _ in 0..100 {
            backoff.next_interval();
        }
        assert_eq!(backoff.next_interval(), Duration::from_secs(5));
    }
}
