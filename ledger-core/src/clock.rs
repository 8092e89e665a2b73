//! Calendar source for action dates and cooldowns.
//!
//! Actions are dated, not timestamped, so the clock only answers "what day
//! is it". Tests swap in [`ManualClock`] to move across cooldown windows
//! without sleeping.

use chrono::{Days, NaiveDate, Utc};
use parking_lot::Mutex;

/// Source of the current date
pub trait Clock: Send + Sync {
    /// Today's date
    fn today(&self) -> NaiveDate;
}

/// Wall clock, UTC calendar
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// A deterministic clock for testing.
///
/// The date only changes when you tell it to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<NaiveDate>,
}

impl ManualClock {
    /// Start at `date`
    pub fn new(date: NaiveDate) -> Self {
        Self {
            current: Mutex::new(date),
        }
    }

    /// Move forward by whole days
    pub fn advance_days(&self, days: u64) {
        let mut current = self.current.lock();
        if let Some(next) = current.checked_add_days(Days::new(days)) {
            *current = next;
        }
    }

    /// Jump to a specific date
    pub fn set(&self, date: NaiveDate) {
        *self.current.lock() = date;
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(NaiveDate::from_ymd_opt(2024, 2, 27).unwrap());
        clock.advance_days(3);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        clock.set(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }
}
