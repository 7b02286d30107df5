use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// "Today" and "currently busy" depend on wall-clock time; the clock is
/// injected so tests can pin it.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    fn time_now(&self) -> NaiveTime {
        self.now().time()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Fixed-instant clock for tests.
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}
