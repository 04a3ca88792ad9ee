use crate::errors::TimeRangeError;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char, digit0, digit1, one_of};
use nom::combinator::{all_consuming, opt, value};
use nom::error::{Error, ErrorKind};
use nom::multi::many1;
use nom::sequence::{pair, preceded};
use nom::IResult;
use std::time::Duration;

const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_DAY: u128 = 24 * 3600 * NANOS_PER_SECOND;
// Fractions longer than this cannot change the result at nanosecond precision.
const MAX_FRACTION_DIGITS: usize = 18;

fn sign(s: &str) -> IResult<&str, Option<char>> {
    opt(one_of("+-"))(s)
}

fn decimal(d: &str) -> IResult<&str, (&str, &str)> {
    let (d, whole) = digit0(d)?;
    let (d, fraction) = opt(preceded(char('.'), digit0))(d)?;
    let fraction = fraction.unwrap_or("");
    if whole.is_empty() && fraction.is_empty() {
        return Err(nom::Err::Error(Error::new(d, ErrorKind::Digit)));
    }
    Ok((d, (whole, fraction)))
}

fn unit(u: &str) -> IResult<&str, u128> {
    alt((
        value(1, tag("ns")),
        value(1_000, alt((tag("us"), tag("µs"), tag("μs")))),
        value(1_000_000, tag("ms")),
        value(NANOS_PER_SECOND, tag("s")),
        value(60 * NANOS_PER_SECOND, tag("m")),
        value(3600 * NANOS_PER_SECOND, tag("h")),
    ))(u)
}

fn go_duration(g: &str) -> IResult<&str, (Option<char>, Vec<((&str, &str), u128)>)> {
    all_consuming(pair(sign, many1(pair(decimal, unit))))(g)
}

fn calendar_unit(c: &str) -> IResult<&str, u128> {
    alt((
        value(NANOS_PER_DAY, char('d')),
        value(7 * NANOS_PER_DAY, char('w')),
        value(30 * NANOS_PER_DAY, char('M')),
        value(365 * NANOS_PER_DAY, char('y')),
    ))(c)
}

fn calendar_interval(c: &str) -> IResult<&str, (&str, u128)> {
    all_consuming(pair(digit1, calendar_unit))(c)
}

fn term_nanos(whole: &str, fraction: &str, unit: u128) -> Option<u128> {
    let whole_value = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().ok()?
    };
    let mut nanos = whole_value.checked_mul(unit)?;
    let fraction = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
    if !fraction.is_empty() {
        let scale = 10u128.pow(fraction.len() as u32);
        let fraction_value = fraction.parse::<u128>().ok()?;
        nanos = nanos.checked_add(fraction_value.checked_mul(unit)? / scale)?;
    }
    Some(nanos)
}

/// Parses a Go style duration such as `"-1h30m"`, `"1.5h"` or `"300ms"`.
pub fn parse_go_duration(s: &str) -> Result<chrono::Duration, TimeRangeError> {
    if s == "0" || s == "+0" || s == "-0" {
        return Ok(chrono::Duration::zero());
    }
    let (_, (sign, terms)) =
        go_duration(s).map_err(|_| TimeRangeError::InvalidDuration(s.to_string()))?;
    let mut total: u128 = 0;
    for ((whole, fraction), unit) in terms {
        total = term_nanos(whole, fraction, unit)
            .and_then(|n| total.checked_add(n))
            .ok_or_else(|| TimeRangeError::InvalidDuration(s.to_string()))?;
    }
    let nanos =
        i64::try_from(total).map_err(|_| TimeRangeError::InvalidDuration(s.to_string()))?;
    if sign == Some('-') {
        Ok(chrono::Duration::nanoseconds(-nanos))
    } else {
        Ok(chrono::Duration::nanoseconds(nanos))
    }
}

/// Parses an interval string as used for datasource and query intervals.
///
/// Accepts an optional leading `>` or `<` (minimum interval markers), a bare
/// number of seconds, calendar units `d`, `w`, `M` (30 days) and `y` (365
/// days), and anything [`parse_go_duration`] accepts. Negative intervals are
/// rejected.
pub fn parse_interval(s: &str) -> Result<Duration, TimeRangeError> {
    let trimmed = s
        .trim()
        .trim_start_matches(|c: char| c == '>' || c == '<')
        .trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let seconds = trimmed
            .parse::<u64>()
            .map_err(|_| TimeRangeError::InvalidDuration(s.to_string()))?;
        return Ok(Duration::from_secs(seconds));
    }
    if let Ok((_, (amount, unit))) = calendar_interval(trimmed) {
        let nanos = amount
            .parse::<u128>()
            .ok()
            .and_then(|a| a.checked_mul(unit))
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| TimeRangeError::InvalidDuration(s.to_string()))?;
        return Ok(Duration::from_nanos(nanos));
    }
    parse_go_duration(trimmed)?
        .to_std()
        .map_err(|_| TimeRangeError::InvalidDuration(s.to_string()))
}
