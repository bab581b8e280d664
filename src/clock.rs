//! Calendar clock — supplies "today" as a plain calendar date.

use std::sync::RwLock;

use chrono::{Datelike, Local, NaiveDate};

/// Source of the current calendar date.
///
/// Weekdays are always derived from a date through [`Clock::weekday_of`], never read
/// independently, so date and weekday cannot disagree.
pub trait Clock: Send + Sync {
    /// Today's date in the local calendar.
    fn today(&self) -> NaiveDate;

    /// Weekday of `date`, 0 = Sunday through 6 = Saturday.
    fn weekday_of(&self, date: NaiveDate) -> u8 {
        weekday_of(date)
    }
}

/// Weekday of `date`, 0 = Sunday through 6 = Saturday.
pub fn weekday_of(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Wall clock in the process's local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock pinned to a settable date (tests, replays).
#[derive(Debug)]
pub struct FixedClock {
    date: RwLock<NaiveDate>,
}

impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: RwLock::new(date),
        }
    }

    /// Move the clock to another date.
    pub fn set(&self, date: NaiveDate) {
        match self.date.write() {
            Ok(mut guard) => *guard = date,
            Err(poisoned) => *poisoned.into_inner() = date,
        }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        match self.date.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
