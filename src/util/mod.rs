//! Small shared utilities.

use std::time::{Duration, Instant};

/// Rate limiter for log channels.
///
/// Transports log connection trouble at most once per interval so a flapping
/// link cannot flood the output.
#[derive(Debug, Clone)]
pub struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl LogThrottle {
    /// Create a throttle admitting one event per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// One event per second.
    pub fn per_second() -> Self {
        Self::new(Duration::from_secs(1))
    }

    /// Returns `true` when the caller may emit; consumes the slot.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_admits_first_and_blocks_burst() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        assert!(throttle.ready());
        assert!(!throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn test_throttle_reopens_after_interval() {
        let mut throttle = LogThrottle::new(Duration::ZERO);
        assert!(throttle.ready());
        assert!(throttle.ready());
    }
}
