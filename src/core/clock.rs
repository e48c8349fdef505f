//! Time source abstraction

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use std::sync::Mutex;

/// Source of "now" for TTLs, locks and daily rollover
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Local calendar day of `now`, formatted `YYYY-MM-DD`
pub fn local_day(now: DateTime<Utc>) -> String {
    now.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

/// Time left until the next local midnight, at least one second
pub fn until_end_of_day(now: DateTime<Utc>) -> Duration {
    let local = now.with_timezone(&Local);
    let midnight = local
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest());

    match midnight {
        Some(end) => (end.with_timezone(&Utc) - now).max(Duration::seconds(1)),
        None => Duration::hours(24),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(901));
        assert_eq!(clock.now(), start + Duration::seconds(901));
    }

    #[test]
    fn end_of_day_is_within_a_day() {
        let now = Utc::now();
        let left = until_end_of_day(now);
        assert!(left > Duration::zero());
        assert!(left <= Duration::hours(25));
        assert_ne!(local_day(now), local_day(now + left));
    }
}
