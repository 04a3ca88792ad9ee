use crate::errors::TimeRangeError;
use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, TimeZone,
    Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use nom::branch::alt;
use nom::character::complete::{char, digit1, one_of};
use nom::combinator::{all_consuming, map, map_res, opt, value};
use nom::multi::many0;
use nom::sequence::{preceded, tuple};
use nom::IResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Offset(i64, Unit),
    Round(Unit),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    Now,
    Absolute(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub anchor: Anchor,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone)]
pub struct EvaluationOptions {
    pub now: DateTime<Utc>,
    pub location: Tz,
    pub week_start: Weekday,
    pub round_up: bool,
}

fn unit(u: &str) -> IResult<&str, Unit> {
    alt((
        value(Unit::Year, char('y')),
        value(Unit::Quarter, char('Q')),
        value(Unit::Month, char('M')),
        value(Unit::Week, char('w')),
        value(Unit::Day, char('d')),
        value(Unit::Hour, one_of("hH")),
        value(Unit::Minute, char('m')),
        value(Unit::Second, char('s')),
    ))(u)
}

fn amount(a: &str) -> IResult<&str, i64> {
    map_res(digit1, |d: &str| d.parse::<i64>())(a)
}

fn offset(o: &str) -> IResult<&str, Operation> {
    map(
        tuple((one_of("+-"), opt(amount), unit)),
        |(sign, amount, unit)| {
            let amount = amount.unwrap_or(1);
            if sign == '-' {
                Operation::Offset(-amount, unit)
            } else {
                Operation::Offset(amount, unit)
            }
        },
    )(o)
}

fn rounding(r: &str) -> IResult<&str, Operation> {
    map(preceded(char('/'), unit), Operation::Round)(r)
}

fn operations(o: &str) -> IResult<&str, Vec<Operation>> {
    all_consuming(many0(alt((offset, rounding))))(o)
}

impl Expression {
    /// Parses `now`, `now-5h`, `now-1M/M` or `<absolute>||+1d/d`. A string
    /// that is neither anchored on `now` nor contains `||` is taken as a bare
    /// absolute time.
    pub fn parse(s: &str) -> Result<Expression, TimeRangeError> {
        let s = s.trim();
        let (anchor, rest) = if let Some(rest) = s.strip_prefix("now") {
            (Anchor::Now, rest)
        } else if let Some((absolute, rest)) = s.split_once("||") {
            (Anchor::Absolute(absolute.to_string()), rest)
        } else {
            return Ok(Expression {
                anchor: Anchor::Absolute(s.to_string()),
                operations: vec![],
            });
        };
        let (_, operations) =
            operations(rest).map_err(|_| TimeRangeError::InvalidDatemath(s.to_string()))?;
        Ok(Expression { anchor, operations })
    }

    pub fn evaluate(&self, options: &EvaluationOptions) -> Result<DateTime<Utc>, TimeRangeError> {
        let mut t = match &self.anchor {
            Anchor::Now => options.now.with_timezone(&options.location),
            Anchor::Absolute(a) => {
                parse_absolute(a, &options.location)?.with_timezone(&options.location)
            }
        };
        for op in &self.operations {
            t = match op {
                Operation::Offset(amount, unit) => add_units(t, *amount, *unit)
                    .ok_or_else(|| TimeRangeError::ArithmeticOverflow(format!("{:?}", op)))?,
                Operation::Round(unit) => round(t, *unit, options)?,
            };
        }
        Ok(t.with_timezone(&Utc))
    }
}

pub fn parse_and_evaluate(
    s: &str,
    options: &EvaluationOptions,
) -> Result<DateTime<Utc>, TimeRangeError> {
    Expression::parse(s)?.evaluate(options)
}

fn parse_absolute(a: &str, location: &Tz) -> Result<DateTime<Utc>, TimeRangeError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(a) {
        return Ok(t.with_timezone(&Utc));
    }
    dateparser::parse_with_timezone(a, location)
        .map_err(|e| TimeRangeError::InvalidAbsoluteTime(a.to_string(), e.to_string()))
}

fn add_months(t: DateTime<Tz>, months: i64) -> Option<DateTime<Tz>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        t.checked_add_months(magnitude)
    } else {
        t.checked_sub_months(magnitude)
    }
}

fn add_days(t: DateTime<Tz>, days: i64) -> Option<DateTime<Tz>> {
    let magnitude = Days::new(days.unsigned_abs());
    if days >= 0 {
        t.checked_add_days(magnitude)
    } else {
        t.checked_sub_days(magnitude)
    }
}

fn add_millis(t: DateTime<Tz>, amount: i64, millis_per_unit: i64) -> Option<DateTime<Tz>> {
    t.checked_add_signed(Duration::milliseconds(amount.checked_mul(millis_per_unit)?))
}

fn add_units(t: DateTime<Tz>, amount: i64, unit: Unit) -> Option<DateTime<Tz>> {
    match unit {
        Unit::Year => add_months(t, amount.checked_mul(12)?),
        Unit::Quarter => add_months(t, amount.checked_mul(3)?),
        Unit::Month => add_months(t, amount),
        Unit::Week => add_days(t, amount.checked_mul(7)?),
        Unit::Day => add_days(t, amount),
        Unit::Hour => add_millis(t, amount, 3_600_000),
        Unit::Minute => add_millis(t, amount, 60_000),
        Unit::Second => add_millis(t, amount, 1_000),
    }
}

fn start_of(t: &DateTime<Tz>, unit: Unit, week_start: Weekday) -> Option<NaiveDateTime> {
    let date = t.date_naive();
    match unit {
        Unit::Year => NaiveDate::from_ymd_opt(t.year(), 1, 1)?.and_hms_opt(0, 0, 0),
        Unit::Quarter => {
            NaiveDate::from_ymd_opt(t.year(), (t.month0() / 3) * 3 + 1, 1)?.and_hms_opt(0, 0, 0)
        }
        Unit::Month => NaiveDate::from_ymd_opt(t.year(), t.month(), 1)?.and_hms_opt(0, 0, 0),
        Unit::Week => {
            let back = (t.weekday().num_days_from_monday() + 7
                - week_start.num_days_from_monday())
                % 7;
            date.checked_sub_days(Days::new(u64::from(back)))?
                .and_hms_opt(0, 0, 0)
        }
        Unit::Day => date.and_hms_opt(0, 0, 0),
        Unit::Hour => date.and_hms_opt(t.hour(), 0, 0),
        Unit::Minute => date.and_hms_opt(t.hour(), t.minute(), 0),
        Unit::Second => date.and_hms_opt(t.hour(), t.minute(), t.second()),
    }
}

fn resolve_local(location: &Tz, naive: NaiveDateTime) -> Result<DateTime<Tz>, TimeRangeError> {
    match location.from_local_datetime(&naive) {
        LocalResult::Single(t) => Ok(t),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest),
        LocalResult::None => Err(TimeRangeError::NonExistentLocalTime(naive.to_string())),
    }
}

// Rounding up lands on the last nanosecond of the unit.
fn round(
    t: DateTime<Tz>,
    unit: Unit,
    options: &EvaluationOptions,
) -> Result<DateTime<Tz>, TimeRangeError> {
    let overflow = || TimeRangeError::ArithmeticOverflow(format!("rounding to {:?}", unit));
    let start_naive = start_of(&t, unit, options.week_start).ok_or_else(overflow)?;
    let start = resolve_local(&options.location, start_naive)?;
    if !options.round_up {
        return Ok(start);
    }
    let next = add_units(start, 1, unit).ok_or_else(overflow)?;
    Ok(next - Duration::nanoseconds(1))
}
