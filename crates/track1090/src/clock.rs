/**
 * Time bases of the tracker: wall-clock milliseconds since the epoch for
 * everything the tracker stores, and the 12 MHz counter stamps that
 * Beast framing carries alongside each frame.
 */
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub fn now_in_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the epoch")
        .as_millis() as u64
}

pub fn now_in_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the epoch")
        .as_secs()
}

/// Start of the UTC day containing `now_s`
pub fn today_in_s(now_s: u64) -> u64 {
    now_s - now_s % 86_400
}

/// Convert a 48-bit 12 MHz counter stamp to microseconds
pub fn stamp_12mhz_to_us(stamp: u64) -> u64 {
    stamp / 12
}

/// A deadline that fires at a fixed period, never drifting on late wakeups.
#[derive(Debug)]
pub struct Periodic {
    next: Instant,
    period_ms: u64,
}

impl Periodic {
    pub fn every_ms(period_ms: u64) -> Self {
        Self {
            next: Instant::now(),
            period_ms,
        }
    }

    /// True once per period; late callers catch up without bursts.
    pub fn due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        let period = std::time::Duration::from_millis(self.period_ms);
        self.next += period;
        if self.next < now {
            // we fell behind more than a full period, re-anchor
            self.next = now + period;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_today() {
        assert_eq!(today_in_s(86_400 * 3 + 12), 86_400 * 3);
        assert_eq!(today_in_s(86_400 * 3), 86_400 * 3);
    }

    #[test]
    fn test_periodic_catches_up() {
        let t0 = Instant::now();
        let mut p = Periodic::every_ms(100);
        assert!(p.due(t0));
        assert!(!p.due(t0 + Duration::from_millis(50)));
        assert!(p.due(t0 + Duration::from_millis(120)));
        // a long stall yields a single firing, then re-anchors
        assert!(p.due(t0 + Duration::from_millis(900)));
        assert!(!p.due(t0 + Duration::from_millis(910)));
    }
}
