//! Partial date/time values.
//!
//! A FHIR `date` or `dateTime` may be given to any precision from a year down
//! to fractions of a second. Searching treats such a value as the range of
//! instants it covers: `2020-03` is every instant of March 2020.

use std::fmt;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};

use crate::error::{SearchError, SearchResult};

/// Earliest representable instant; used for open period starts.
pub const MIN_DATE_TIME: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;
/// Latest representable instant; used for open period ends.
pub const MAX_DATE_TIME: DateTime<Utc> = DateTime::<Utc>::MAX_UTC;

/// Precision of a partial date/time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DatePrecision {
    /// Year only (e.g., "2024")
    Year,
    /// Year and month (e.g., "2024-01")
    Month,
    /// Full date (e.g., "2024-01-15")
    Day,
    /// Date and time to hours (e.g., "2024-01-15T10")
    Hour,
    /// Date and time to minutes (e.g., "2024-01-15T10:30")
    Minute,
    /// Date and time to seconds (e.g., "2024-01-15T10:30:00")
    Second,
    /// Fractional seconds
    Millisecond,
}

impl fmt::Display for DatePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatePrecision::Year => write!(f, "year"),
            DatePrecision::Month => write!(f, "month"),
            DatePrecision::Day => write!(f, "day"),
            DatePrecision::Hour => write!(f, "hour"),
            DatePrecision::Minute => write!(f, "minute"),
            DatePrecision::Second => write!(f, "second"),
            DatePrecision::Millisecond => write!(f, "millisecond"),
        }
    }
}

/// A date or dateTime as written, with its precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialDateTime {
    start: DateTime<Utc>,
    precision: DatePrecision,
}

impl PartialDateTime {
    /// Parses `YYYY[-MM[-DD[Thh[:mm[:ss[.fff]]][Z|(+|-)hh:mm]]]]`.
    ///
    /// Values without a time zone are taken as UTC.
    pub fn parse(text: &str) -> SearchResult<Self> {
        let invalid = || SearchError::invalid(format!("'{}' is not a valid date", text));

        let (date_part, time_part) = match text.split_once('T') {
            Some((date, time)) => (date, Some(time)),
            None => (text, None),
        };

        let mut date_fields = date_part.split('-');
        let year = date_fields
            .next()
            .filter(|y| y.len() == 4)
            .and_then(parse_digits)
            .ok_or_else(invalid)?;
        let month = date_fields
            .next()
            .map(|m| two_digits(m).ok_or_else(invalid))
            .transpose()?;
        let day = date_fields
            .next()
            .map(|d| two_digits(d).ok_or_else(invalid))
            .transpose()?;
        if date_fields.next().is_some() || (day.is_none() && time_part.is_some()) {
            return Err(invalid());
        }

        let date = NaiveDate::from_ymd_opt(year as i32, month.unwrap_or(1), day.unwrap_or(1))
            .ok_or_else(invalid)?;

        let mut precision = match (month, day) {
            (None, _) => DatePrecision::Year,
            (Some(_), None) => DatePrecision::Month,
            (Some(_), Some(_)) => DatePrecision::Day,
        };

        let Some(time_part) = time_part else {
            return Ok(Self {
                start: Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)),
                precision,
            });
        };

        let (clock, offset) = split_offset(time_part).ok_or_else(invalid)?;
        let mut clock_fields = clock.split(':');
        let hour = clock_fields.next().and_then(two_digits).ok_or_else(invalid)?;
        precision = DatePrecision::Hour;
        let minute = match clock_fields.next() {
            Some(m) => {
                precision = DatePrecision::Minute;
                two_digits(m).ok_or_else(invalid)?
            }
            None => 0,
        };
        let (second, nanos) = match clock_fields.next() {
            Some(s) => {
                precision = DatePrecision::Second;
                let (whole, fraction) = match s.split_once('.') {
                    Some((whole, fraction)) => (whole, Some(fraction)),
                    None => (s, None),
                };
                let nanos = match fraction {
                    Some(fraction) => {
                        precision = DatePrecision::Millisecond;
                        fraction_nanos(fraction).ok_or_else(invalid)?
                    }
                    None => 0,
                };
                (two_digits(whole).ok_or_else(invalid)?, nanos)
            }
            None => (0, 0),
        };
        if clock_fields.next().is_some() {
            return Err(invalid());
        }

        let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos).ok_or_else(invalid)?;
        let local = NaiveDateTime::new(date, time);
        let start = offset
            .from_local_datetime(&local)
            .single()
            .ok_or_else(invalid)?
            .with_timezone(&Utc);

        Ok(Self { start, precision })
    }

    /// The precision the value was written to.
    pub fn precision(&self) -> DatePrecision {
        self.precision
    }

    /// Returns true if the value carries a time of day.
    pub fn has_time(&self) -> bool {
        self.precision > DatePrecision::Day
    }

    /// First instant covered by the value.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Last instant covered by the value (inclusive, millisecond resolution).
    pub fn end(&self) -> DateTime<Utc> {
        let next = match self.precision {
            DatePrecision::Year => NaiveDate::from_ymd_opt(self.start.year() + 1, 1, 1)
                .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN))),
            DatePrecision::Month => {
                let (year, month) = match self.start.month() {
                    12 => (self.start.year() + 1, 1),
                    m => (self.start.year(), m + 1),
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
            }
            DatePrecision::Day => self.start.checked_add_signed(Duration::days(1)),
            DatePrecision::Hour => self.start.checked_add_signed(Duration::hours(1)),
            DatePrecision::Minute => self.start.checked_add_signed(Duration::minutes(1)),
            DatePrecision::Second => self.start.checked_add_signed(Duration::seconds(1)),
            DatePrecision::Millisecond => return self.start,
        };
        next.and_then(|n| n.checked_sub_signed(Duration::milliseconds(1)))
            .unwrap_or(MAX_DATE_TIME)
    }

    /// The covered range as (start, end).
    pub fn range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start(), self.end())
    }
}

/// Parses an `instant`; the result covers a single point in time.
pub fn parse_instant(text: &str) -> SearchResult<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(instant) => Ok(instant.with_timezone(&Utc)),
        Err(_) => PartialDateTime::parse(text).map(|partial| partial.start()),
    }
}

fn parse_digits(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn two_digits(text: &str) -> Option<u32> {
    if text.len() == 2 { parse_digits(text) } else { None }
}

fn fraction_nanos(fraction: &str) -> Option<u32> {
    if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
    digits.parse().ok()
}

/// Splits a time of day from its zone designator.
fn split_offset(time: &str) -> Option<(&str, FixedOffset)> {
    if let Some(clock) = time.strip_suffix('Z') {
        return Some((clock, FixedOffset::east_opt(0)?));
    }
    match time.rfind(['+', '-']) {
        Some(index) => {
            let (clock, zone) = time.split_at(index);
            let sign = if zone.starts_with('-') { -1 } else { 1 };
            let (hours, minutes) = zone[1..].split_once(':')?;
            let seconds = (two_digits(hours)? * 3600 + two_digits(minutes)? * 60) as i32;
            Some((clock, FixedOffset::east_opt(sign * seconds)?))
        }
        None => Some((time, FixedOffset::east_opt(0)?)),
    }
}
