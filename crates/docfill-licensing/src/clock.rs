//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Wall-clock abstraction and calendar helpers for license dates."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;

/// Days reported for entitlements without an expiration date.
pub const UNBOUNDED_DAYS: i64 = 999;

/// Source of the current local time.
///
/// License dates are local calendar dates, so the clock speaks naive local time.
pub trait Clock: Send + Sync {
    /// Current local date and time.
    fn now(&self) -> NaiveDateTime;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    /// Create a clock frozen at `now`.
    #[must_use]
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock to an absolute instant.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

/// 23:59:59 on the given calendar day.
#[must_use]
pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(23, 59, 59).expect("23:59:59 is a valid time"))
}

/// Whole days left until `expiration`, never less than one.
///
/// Callers only ask while the entitlement is still valid (`now <= expiration`);
/// a partial final day counts as one so a valid license never shows zero days.
#[must_use]
pub fn days_left(now: NaiveDateTime, expiration: NaiveDateTime) -> i64 {
    (expiration - now).num_days().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn end_of_day_is_last_second() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
        assert_eq!(end_of_day(date), at("2025-01-08", "23:59:59"));
    }

    #[test]
    fn partial_day_reports_one() {
        let expiration = at("2025-01-08", "23:59:59");
        assert_eq!(days_left(at("2025-01-08", "12:00:00"), expiration), 1);
        assert_eq!(days_left(expiration, expiration), 1);
    }

    #[test]
    fn whole_days_are_truncated() {
        let expiration = at("2025-01-08", "23:59:59");
        assert_eq!(days_left(at("2025-01-01", "10:00:00"), expiration), 7);
        assert_eq!(days_left(at("2025-01-06", "23:59:59"), expiration), 2);
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(at("2025-01-01", "00:00:00"));
        clock.advance(Duration::days(3));
        assert_eq!(clock.now(), at("2025-01-04", "00:00:00"));
    }
}
