use jiff::Timestamp;
use std::time::Duration;

pub trait Clock: Send + Sync {
    /// Returns the current time of the clock
    fn now(&self) -> Timestamp;
    /// Block and wait until the clock reaches the target time.
    fn wait_until(&self, target: Timestamp);
}

/// Wall clock backed by [`Timestamp::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn wait_until(&self, target: Timestamp) {
        // Sleep for exactly the remaining gap and re-check, since the wall
        // clock may be stepped while we are parked.
        loop {
            let now = Timestamp::now();
            if now >= target {
                return;
            }
            std::thread::sleep(remaining(now, target));
        }
    }
}

/// Time left from `now` until `target`, zero if already reached.
pub(crate) fn remaining(now: Timestamp, target: Timestamp) -> Duration {
    let nanos = target.as_nanosecond() - now.as_nanosecond();
    if nanos <= 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(nanos as u64)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_is_zero_once_target_passed() {
        let now = Timestamp::from_millisecond(10).unwrap();
        let target = Timestamp::from_millisecond(7).unwrap();
        assert_eq!(remaining(now, target), Duration::ZERO);
        assert_eq!(remaining(target, now), Duration::from_millis(3));
    }

    #[test]
    fn system_clock_waits_for_target() {
        let clock = SystemClock;
        let target = clock
            .now()
            .checked_add(jiff::SignedDuration::from_millis(3))
            .unwrap();
        clock.wait_until(target);
        assert!(clock.now() >= target);
    }
}
