use std::time::{Duration, Instant, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// A `{last_time, interval}` pair implementing §4.1's rate-limited
/// broadcast timer: `should_broadcast` returns true and advances
/// `last_time` iff at least `interval` has elapsed.
pub struct BroadcastTimer {
    last_time: Instant,
    interval: Duration,
}

impl BroadcastTimer {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

    #[inline]
    pub fn new(interval: Duration) -> BroadcastTimer {
        BroadcastTimer {
            last_time: Instant::now() - interval,
            interval,
        }
    }

    #[inline]
    pub fn should_broadcast(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_time) >= self.interval {
            self.last_time = now;
            true
        } else {
            false
        }
    }
}

impl Default for BroadcastTimer {
    fn default() -> BroadcastTimer {
        BroadcastTimer::new(Self::DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_immediately_then_rate_limits() {
        let mut timer = BroadcastTimer::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(timer.should_broadcast(t0));
        assert!(!timer.should_broadcast(t0 + Duration::from_millis(50)));
        assert!(timer.should_broadcast(t0 + Duration::from_millis(150)));
    }
}
