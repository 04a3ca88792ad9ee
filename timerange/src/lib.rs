pub mod datemath;
pub mod duration;
pub mod errors;
pub mod interval;

pub use duration::{parse_go_duration, parse_interval};
pub use errors::TimeRangeError;
pub use interval::{default_interval, format_duration, round_interval, Interval, IntervalCalculator};

use crate::datemath::EvaluationOptions;
use chrono::{DateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use log::debug;

/// A bound parser either claims the expression (`Ok(Some(_))`), rejects it as
/// malformed (`Err(_)`), or passes it on to the next parser (`Ok(None)`).
type BoundParser = fn(&str, &TimeRange, bool) -> Result<Option<DateTime<Utc>>, TimeRangeError>;

const BOUND_PARSERS: [BoundParser; 3] = [
    parse_epoch_millis,
    parse_relative_duration,
    parse_datemath,
];

/// A request time range. Both bounds are kept as the caller wrote them and
/// resolved against a `now` captured once, so every evaluation within one
/// request agrees.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
    now: DateTime<Utc>,
    location: Tz,
    week_start: Weekday,
}

impl TimeRange {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> TimeRange {
        TimeRange {
            from: from.into(),
            to: to.into(),
            now: Utc::now(),
            location: Tz::UTC,
            week_start: Weekday::Mon,
        }
    }

    pub fn from_epoch_millis(from: i64, to: i64) -> TimeRange {
        TimeRange::new(from.to_string(), to.to_string())
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> TimeRange {
        self.now = now;
        self
    }

    pub fn with_location(mut self, location: Tz) -> TimeRange {
        self.location = location;
        self
    }

    pub fn with_week_start(mut self, week_start: Weekday) -> TimeRange {
        self.week_start = week_start;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn parse_from(&self) -> Result<DateTime<Utc>, TimeRangeError> {
        self.parse_bound(&self.from, false)
    }

    pub fn parse_to(&self) -> Result<DateTime<Utc>, TimeRangeError> {
        self.parse_bound(&self.to, true)
    }

    /// Like [`TimeRange::parse_from`], but falls back to the Unix epoch.
    pub fn must_get_from(&self) -> DateTime<Utc> {
        self.parse_from().unwrap_or_else(|e| {
            debug!("Falling back to epoch for from bound: {}", e);
            unix_epoch()
        })
    }

    pub fn must_get_to(&self) -> DateTime<Utc> {
        self.parse_to().unwrap_or_else(|e| {
            debug!("Falling back to epoch for to bound: {}", e);
            unix_epoch()
        })
    }

    fn parse_bound(&self, bound: &str, round_up: bool) -> Result<DateTime<Utc>, TimeRangeError> {
        for parser in BOUND_PARSERS {
            if let Some(t) = parser(bound, self, round_up)? {
                return Ok(t);
            }
        }
        Err(TimeRangeError::InvalidDatemath(bound.to_string()))
    }
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

fn parse_epoch_millis(
    bound: &str,
    _: &TimeRange,
    _: bool,
) -> Result<Option<DateTime<Utc>>, TimeRangeError> {
    match bound.parse::<i64>() {
        Ok(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(Some)
            .ok_or(TimeRangeError::EpochOutOfRange(ms)),
        Err(_) => Ok(None),
    }
}

fn parse_relative_duration(
    bound: &str,
    range: &TimeRange,
    _: bool,
) -> Result<Option<DateTime<Utc>>, TimeRangeError> {
    match parse_go_duration(&format!("-{}", bound)) {
        Ok(offset) => range
            .now
            .checked_add_signed(offset)
            .map(Some)
            .ok_or_else(|| TimeRangeError::ArithmeticOverflow(bound.to_string())),
        Err(_) => Ok(None),
    }
}

fn parse_datemath(
    bound: &str,
    range: &TimeRange,
    round_up: bool,
) -> Result<Option<DateTime<Utc>>, TimeRangeError> {
    let options = EvaluationOptions {
        now: range.now,
        location: range.location,
        week_start: range.week_start,
        round_up,
    };
    datemath::parse_and_evaluate(bound, &options).map(Some)
}
