//! Calendar periods for trace queries.
//!
//! Half-open UTC ranges `[start, end)` with Monday-start weeks. Trace sink
//! implementations use these to bucket attempt records.

use jiff::{Timestamp, ToSpan as _, civil::{Date, Weekday}, tz::TimeZone};

/// A calendar period relative to a reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarPeriod {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
}

impl CalendarPeriod {
    /// The period's `[start, end)` range in UTC, relative to `now`.
    pub fn range(self, now: Timestamp) -> Result<(Timestamp, Timestamp), jiff::Error> {
        let today = now.to_zoned(TimeZone::UTC).date();

        match self {
            Self::Today => Ok((day_start(today)?, day_start(today.checked_add(1.day())?)?)),
            Self::Yesterday => Ok((day_start(today.checked_sub(1.day())?)?, day_start(today)?)),
            Self::ThisWeek => {
                let monday = monday_of(today)?;
                Ok((day_start(monday)?, day_start(monday.checked_add(7.days())?)?))
            }
            Self::LastWeek => {
                let monday = monday_of(today)?;
                Ok((day_start(monday.checked_sub(7.days())?)?, day_start(monday)?))
            }
            Self::ThisMonth => {
                let first = today.first_of_month();
                Ok((day_start(first)?, day_start(first.checked_add(1.month())?)?))
            }
            Self::LastMonth => {
                let first = today.first_of_month();
                Ok((day_start(first.checked_sub(1.month())?)?, day_start(first)?))
            }
        }
    }
}

fn day_start(date: Date) -> Result<Timestamp, jiff::Error> {
    Ok(date.to_zoned(TimeZone::UTC)?.timestamp())
}

fn monday_of(date: Date) -> Result<Date, jiff::Error> {
    let offset = date.weekday().since(Weekday::Monday);
    date.checked_sub((offset as i64).days())
}
