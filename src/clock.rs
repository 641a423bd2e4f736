// src/clock.rs

use chrono::{DateTime, Days, FixedOffset, Local, NaiveDate, TimeZone, Utc};
use std::time::{Duration, Instant};

/// Inclusive time range `[since, until]` that collection is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Option<Self> {
        (since <= until).then_some(DateWindow { since, until })
    }

    /// Window covering `days_back` calendar days in `tz`, ending at `now`.
    /// `days_back = 1` means "today since midnight".
    pub fn days_back<Tz: TimeZone>(days_back: u32, now: DateTime<Tz>) -> Option<Self> {
        if days_back == 0 {
            return None;
        }
        let tz = now.timezone();
        let first_day = now
            .date_naive()
            .checked_sub_days(Days::new(u64::from(days_back - 1)))?;
        let since = start_of_day(&tz, first_day)?;
        DateWindow::new(since, now.with_timezone(&Utc))
    }

    pub fn ending_now_local(days_back: u32) -> Option<Self> {
        DateWindow::days_back(days_back, Local::now())
    }

    pub fn contains(&self, timestamp: &DateTime<FixedOffset>) -> bool {
        let ts = timestamp.with_timezone(&Utc);
        self.since <= ts && ts <= self.until
    }
}

/// First instant of `date` in `tz`. Days starting inside a DST gap begin at
/// the first valid instant after midnight.
fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    if let Some(start) = tz.from_local_datetime(&midnight).earliest() {
        return Some(start.with_timezone(&Utc));
    }
    (1..=4)
        .filter_map(|hour| date.and_hms_opt(hour, 0, 0))
        .find_map(|t| tz.from_local_datetime(&t).earliest())
        .map(|start| start.with_timezone(&Utc))
}

/// Global run deadline. `None` never expires.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Deadline { at: Instant::now().checked_add(budget) }
    }

    pub fn never() -> Self {
        Deadline { at: None }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Shortens `timeout` so it never outlives the deadline
    pub fn clamp(&self, timeout: Duration) -> Duration {
        self.remaining().map_or(timeout, |left| timeout.min(left))
    }
}
