use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::limits::{MAX_SUPPORTED_YEAR, MIN_SUPPORTED_YEAR};

/// Civil date in the service's reference timezone. The only day identity the
/// engine uses: lookups, uniqueness and range checks all compare `DayKey`s,
/// never raw timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey(NaiveDate);

/// Anything a caller may hand us as "the date of the ride".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateLike {
    /// Civil date, taken as-is.
    Date(NaiveDate),
    /// Wall-clock time in the reference timezone.
    Local(NaiveDateTime),
    /// Instant with an explicit UTC offset.
    Instant(DateTime<FixedOffset>),
    /// Unix milliseconds.
    EpochMs(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayError {
    Unparseable(String),
    OutOfRange(String),
}

impl fmt::Display for DayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayError::Unparseable(s) => write!(f, "unrecognized date: {s:?}"),
            DayError::OutOfRange(s) => write!(
                f,
                "date {s} outside supported years {MIN_SUPPORTED_YEAR}-{MAX_SUPPORTED_YEAR}"
            ),
        }
    }
}

impl std::error::Error for DayError {}

impl DayKey {
    /// Collapse any date-like input onto the civil day it denotes in `tz`.
    pub fn normalize(input: DateLike, tz: &Tz) -> Result<DayKey, DayError> {
        let date = match input {
            DateLike::Date(d) => d,
            DateLike::Local(naive) => naive.date(),
            DateLike::Instant(at) => at.with_timezone(tz).date_naive(),
            DateLike::EpochMs(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
                .ok_or_else(|| DayError::OutOfRange(ms.to_string()))?
                .with_timezone(tz)
                .date_naive(),
        };
        DayKey::from_date(date)
    }

    /// Parse and normalize in one step.
    pub fn parse(input: &str, tz: &Tz) -> Result<DayKey, DayError> {
        DayKey::normalize(input.parse()?, tz)
    }

    pub fn from_date(date: NaiveDate) -> Result<DayKey, DayError> {
        if !(MIN_SUPPORTED_YEAR..=MAX_SUPPORTED_YEAR).contains(&date.year()) {
            return Err(DayError::OutOfRange(date.to_string()));
        }
        Ok(DayKey(date))
    }

    /// Fixture constructor for tests. Panics on an invalid civil date.
    #[cfg(test)]
    pub(crate) fn ymd(year: i32, month: u32, day: u32) -> DayKey {
        DayKey(NaiveDate::from_ymd_opt(year, month, day).expect("valid civil date"))
    }

    pub fn as_date(&self) -> NaiveDate {
        self.0
    }

    pub fn succ(&self) -> Option<DayKey> {
        self.0
            .checked_add_days(Days::new(1))
            .and_then(|d| DayKey::from_date(d).ok())
    }

    /// `YYMMDD`, used inside booking numbers.
    pub fn compact(&self) -> String {
        self.0.format("%y%m%d").to_string()
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl From<DayKey> for DateLike {
    fn from(day: DayKey) -> Self {
        DateLike::Date(day.0)
    }
}

impl From<NaiveDate> for DateLike {
    fn from(date: NaiveDate) -> Self {
        DateLike::Date(date)
    }
}

const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

impl FromStr for DateLike {
    type Err = DayError;

    /// Accepts `YYYY-MM-DD`, RFC 3339, naive local date-times and epoch millis.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DayError::Unparseable(String::new()));
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(DateLike::Date(d));
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(s) {
            return Ok(DateLike::Instant(at));
        }
        for fmt in LOCAL_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(DateLike::Local(naive));
            }
        }
        if let Ok(ms) = s.parse::<i64>() {
            return Ok(DateLike::EpochMs(ms));
        }
        Err(DayError::Unparseable(s.to_string()))
    }
}

/// Inclusive run of days `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub start: DayKey,
    pub end: DayKey,
}

impl DayRange {
    pub fn new(start: DayKey, end: DayKey) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn contains(&self, day: DayKey) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn len_days(&self) -> usize {
        (self.end.0 - self.start.0).num_days() as usize + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = DayKey> + use<> {
        let end = self.end;
        std::iter::successors(Some(self.start), move |d| d.succ().filter(|n| *n <= end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seoul() -> Tz {
        chrono_tz::Asia::Seoul
    }

    #[test]
    fn midnight_and_last_minute_are_same_day() {
        let tz = seoul();
        let a = DayKey::parse("2026-03-10T00:00:00", &tz).unwrap();
        let b = DayKey::parse("2026-03-10T23:59:00", &tz).unwrap();
        let c = DayKey::parse("2026-03-10", &tz).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, DayKey::ymd(2026, 3, 10));
    }

    #[test]
    fn same_civil_day_across_offsets() {
        let tz = seoul();
        // 00:30 in Seoul is 15:30 the previous day in UTC
        let local = DayKey::parse("2026-03-10T00:30:00+09:00", &tz).unwrap();
        let utc = DayKey::parse("2026-03-09T15:30:00Z", &tz).unwrap();
        let la = DayKey::parse("2026-03-09T08:30:00-07:00", &tz).unwrap();
        assert_eq!(local, utc);
        assert_eq!(local, la);
        assert_eq!(local, DayKey::ymd(2026, 3, 10));
    }

    #[test]
    fn utc_midnight_lands_on_previous_local_day_west_of_utc() {
        let tz = chrono_tz::America::New_York;
        let day = DayKey::parse("2026-03-10T00:00:00Z", &tz).unwrap();
        assert_eq!(day, DayKey::ymd(2026, 3, 9));
    }

    #[test]
    fn one_minute_before_local_midnight_stays_put() {
        let tz = seoul();
        let before = DayKey::parse("2026-03-09T14:59:00Z", &tz).unwrap();
        let after = DayKey::parse("2026-03-09T15:00:00Z", &tz).unwrap();
        assert_eq!(before, DayKey::ymd(2026, 3, 9));
        assert_eq!(after, DayKey::ymd(2026, 3, 10));
    }

    #[test]
    fn normalize_is_idempotent() {
        let tz = seoul();
        let day = DayKey::parse("2026-12-31T22:10:00-05:00", &tz).unwrap();
        let again = DayKey::normalize(DateLike::from(day), &tz).unwrap();
        assert_eq!(day, again);
        assert_eq!(day, DayKey::ymd(2027, 1, 1));
    }

    #[test]
    fn dst_gap_local_time_keeps_its_date() {
        // 02:30 does not exist in New York on 2026-03-08
        let tz = chrono_tz::America::New_York;
        let day = DayKey::parse("2026-03-08T02:30", &tz).unwrap();
        assert_eq!(day, DayKey::ymd(2026, 3, 8));
    }

    #[test]
    fn epoch_millis() {
        let tz = seoul();
        // 2026-03-09T15:00:00Z
        let day = DayKey::parse("1773068400000", &tz).unwrap();
        assert_eq!(day, DayKey::ymd(2026, 3, 10));
    }

    #[test]
    fn garbage_is_unparseable() {
        let tz = seoul();
        assert!(matches!(DayKey::parse("tomorrow", &tz), Err(DayError::Unparseable(_))));
        assert!(matches!(DayKey::parse("", &tz), Err(DayError::Unparseable(_))));
        assert!(matches!(DayKey::parse("2026-02-30", &tz), Err(DayError::Unparseable(_))));
    }

    #[test]
    fn out_of_range_years_rejected() {
        let tz = seoul();
        assert!(matches!(DayKey::parse("1999-12-31", &tz), Err(DayError::OutOfRange(_))));
        assert!(matches!(DayKey::parse("2101-01-01", &tz), Err(DayError::OutOfRange(_))));
        // small integers are epoch millis in 1970
        assert!(matches!(DayKey::parse("20260310", &tz), Err(DayError::OutOfRange(_))));
    }

    #[test]
    fn from_date_is_the_fallible_constructor() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(DayKey::from_date(date).unwrap(), DayKey::ymd(2026, 3, 10));
        let too_early = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        assert!(matches!(DayKey::from_date(too_early), Err(DayError::OutOfRange(_))));
    }

    #[test]
    fn display_and_compact() {
        let day = DayKey::ymd(2026, 1, 5);
        assert_eq!(day.to_string(), "2026-01-05");
        assert_eq!(day.compact(), "260105");
    }

    #[test]
    fn range_contains_by_day_not_timestamp() {
        let range = DayRange::new(DayKey::ymd(2026, 1, 1), DayKey::ymd(2026, 1, 31)).unwrap();
        let tz = seoul();
        // A late-evening timestamp on the last day is still inside the range
        let last = DayKey::parse("2026-01-31T23:59:59+09:00", &tz).unwrap();
        assert!(range.contains(last));
        assert!(!range.contains(DayKey::ymd(2026, 2, 1)));
        assert!(!range.contains(DayKey::ymd(2025, 12, 31)));
    }

    #[test]
    fn range_iterates_inclusively() {
        let range = DayRange::new(DayKey::ymd(2026, 2, 27), DayKey::ymd(2026, 3, 2)).unwrap();
        let days: Vec<String> = range.iter().map(|d| d.to_string()).collect();
        assert_eq!(days, vec!["2026-02-27", "2026-02-28", "2026-03-01", "2026-03-02"]);
        assert_eq!(range.len_days(), 4);
    }

    #[test]
    fn inverted_range_rejected() {
        assert!(DayRange::new(DayKey::ymd(2026, 3, 2), DayKey::ymd(2026, 3, 1)).is_none());
        let single = DayRange::new(DayKey::ymd(2026, 3, 1), DayKey::ymd(2026, 3, 1)).unwrap();
        assert_eq!(single.iter().count(), 1);
    }
}
