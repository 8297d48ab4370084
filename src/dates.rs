//! Date filter parsing.
//!
//! A filter value is one of `last-month`, `dd.mm.yyyy`, or a bare month number
//! (1-12, current year). The shapes are tried in that order by an explicit
//! matcher list; a matcher either declines the input or parses it, and only
//! fails for an invalid value inside its own format.
//!
//! Month-sized values stretch to cover the whole month: as a start bound they
//! resolve to the first day at 00:00:00, as an end bound to the last day at
//! 23:59:59. An exact `dd.mm.yyyy` day is midnight in both roles.

use crate::error::DateParseError;
use chrono::{DateTime, Datelike, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;

const LAST_MONTH: &str = "last-month";
const DOTTED_FORMAT: &str = "%d.%m.%Y";
const SECONDS_PER_DAY: i64 = 86_400;

/// Inclusive, optionally open-ended range of naive (UTC wall clock) instants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl DateRange {
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let at = at.naive_utc();
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

/// Which side of the range a value is resolved for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundRole {
    Start,
    End,
}

/// A recognized filter value, before it is pinned to an instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateBound {
    /// A whole calendar month (`last-month` or a bare month number).
    Month { first: NaiveDate, last: NaiveDate },
    /// One exact day (`dd.mm.yyyy`).
    Day(NaiveDate),
}

impl DateBound {
    pub fn resolve(&self, role: BoundRole) -> NaiveDateTime {
        match (self, role) {
            (DateBound::Month { first, .. }, BoundRole::Start) => first.and_time(NaiveTime::MIN),
            (DateBound::Month { last, .. }, BoundRole::End) => end_of_day(*last),
            (DateBound::Day(day), _) => day.and_time(NaiveTime::MIN),
        }
    }
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::seconds(SECONDS_PER_DAY - 1)
}

fn month_bound(year: i32, month: u32) -> Option<DateBound> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
    Some(DateBound::Month { first, last })
}

/// `Ok(None)` means "not this format".
type Matcher = fn(&str, NaiveDate) -> Result<Option<DateBound>, DateParseError>;

/// Format matchers in priority order.
const MATCHERS: [(&str, Matcher); 3] = [
    ("last-month", match_last_month),
    ("dd.mm.yyyy", match_dotted_date),
    ("month number", match_month_number),
];

fn match_last_month(input: &str, today: NaiveDate) -> Result<Option<DateBound>, DateParseError> {
    if input != LAST_MONTH {
        return Ok(None);
    }

    let previous = today
        .with_day(1)
        .and_then(|first| first.pred_opt())
        .and_then(|day| month_bound(day.year(), day.month()));

    previous
        .map(Some)
        .ok_or_else(|| DateParseError::Unrecognized {
            input: input.to_string(),
        })
}

fn match_dotted_date(input: &str, _today: NaiveDate) -> Result<Option<DateBound>, DateParseError> {
    if !input.contains('.') {
        return Ok(None);
    }

    let invalid = || DateParseError::InvalidDottedDate {
        input: input.to_string(),
    };

    // `%Y` alone takes any digit count; the year must be exactly four digits.
    let four_digit_year = matches!(
        input.split('.').collect::<Vec<_>>().as_slice(),
        [_, _, year] if year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit())
    );
    if !four_digit_year {
        return Err(invalid());
    }

    NaiveDate::parse_from_str(input, DOTTED_FORMAT)
        .map(|day| Some(DateBound::Day(day)))
        .map_err(|_| invalid())
}

fn match_month_number(input: &str, today: NaiveDate) -> Result<Option<DateBound>, DateParseError> {
    let Ok(month) = input.parse::<i64>() else {
        return Ok(None);
    };

    u32::try_from(month)
        .ok()
        .filter(|month| (1..=12).contains(month))
        .and_then(|month| month_bound(today.year(), month))
        .map(Some)
        .ok_or(DateParseError::MonthOutOfRange { month })
}

/// Parses date filter values relative to a fixed "today".
#[derive(Clone, Copy, Debug)]
pub struct DateFilterParser {
    today: NaiveDate,
}

impl DateFilterParser {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// A parser anchored to the local calendar date.
    pub fn for_today() -> Self {
        Self::new(Local::now().date_naive())
    }

    /// Recognizes a filter value without choosing a range side.
    pub fn parse_bound(&self, raw: &str) -> Result<DateBound, DateParseError> {
        let input = raw.trim().to_lowercase();

        for (name, matcher) in MATCHERS {
            if let Some(bound) = matcher(&input, self.today)? {
                tracing::trace!(input = %input, format = name, "date filter matched");
                return Ok(bound);
            }
        }

        Err(DateParseError::Unrecognized { input })
    }

    /// Parses a single value to the first instant it denotes.
    pub fn parse(&self, raw: &str) -> Result<NaiveDateTime, DateParseError> {
        self.parse_bound(raw).map(|bound| bound.resolve(BoundRole::Start))
    }

    /// Resolves an optional start/end pair. Missing or blank values leave
    /// that side of the range open.
    pub fn resolve_range(
        &self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<DateRange, DateParseError> {
        let resolve = |raw: Option<&str>, role| -> Result<Option<NaiveDateTime>, DateParseError> {
            match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
                Some(raw) => Ok(Some(self.parse_bound(raw)?.resolve(role))),
                None => Ok(None),
            }
        };

        Ok(DateRange {
            start: resolve(start, BoundRole::Start)?,
            end: resolve(end, BoundRole::End)?,
        })
    }
}
