// src/clock.rs

use chrono::{Local, NaiveDate, NaiveDateTime};
use std::sync::{Arc, Mutex};

/// Source of "now" for the date-boundary logic. Local time, no timezone
/// normalisation against the server.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Settable clock for tests and for replaying a given day from the CLI.
#[derive(Clone, Debug)]
pub struct FixedClock {
    current_time: Arc<Mutex<NaiveDateTime>>,
}

impl FixedClock {
    pub fn at(datetime: NaiveDateTime) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(datetime)),
        }
    }

    pub fn on_date(date: NaiveDate) -> Self {
        Self::at(date.and_hms_opt(8, 0, 0).unwrap_or_default())
    }

    pub fn set(&self, datetime: NaiveDateTime) {
        if let Ok(mut current) = self.current_time.lock() {
            *current = datetime;
        }
    }

    pub fn set_date(&self, date: NaiveDate) {
        self.set(date.and_hms_opt(8, 0, 0).unwrap_or_default());
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        match self.current_time.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
