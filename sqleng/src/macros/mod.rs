pub mod kql;
pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod vertica;

use chrono::{DateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;
use timerange::{parse_interval, Interval, TimeRange, TimeRangeError};

/// Stands in for a failed expansion while the rest of the text is scanned.
/// Interpolation returns the recorded error instead of text containing it.
const MACRO_ERROR: &str = "macro_error()";

static CALL_MACRO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(__\w+)\s*\(").expect("call macro regex"));
static BARE_MACRO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(__\w+)(\s*\()?").expect("bare macro regex"));
static ESCAPE_MULTI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$__escapeMulti\(('.*')\)").expect("escapeMulti regex"));
static QUOTED_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'\s*,\s*'").expect("quoted separator regex"));

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MacroError {
    UnknownMacro(String),
    ArgumentCount {
        name: String,
        expected: String,
        got: usize,
    },
    InvalidInterval {
        name: String,
        source: TimeRangeError,
    },
    InvalidFill(String),
    InvalidArgument {
        name: String,
        reason: String,
    },
}

impl Display for MacroError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MacroError::UnknownMacro(name) => {
                write!(f, "Unknown macro {}", name)
            }
            MacroError::ArgumentCount {
                name,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Macro {} expects {} arguments, got {}",
                    name, expected, got
                )
            }
            MacroError::InvalidInterval { name, source } => {
                write!(f, "Macro {} got an invalid interval: {}", name, source)
            }
            MacroError::InvalidFill(v) => {
                write!(f, "Invalid fill value {}, expected NULL, previous or a number", v)
            }
            MacroError::InvalidArgument { name, reason } => {
                write!(f, "Invalid argument to macro {}: {}", name, reason)
            }
        }
    }
}

pub type MacroFn = fn(&[String], &mut MacroScope) -> Result<String, MacroError>;
pub type MacroTable = HashMap<&'static str, MacroFn>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres { timescaledb: bool },
    Mysql,
    Mssql,
    Vertica,
    Kql,
}

impl Dialect {
    pub fn from_type_name(type_name: &str, timescaledb: bool) -> Option<Dialect> {
        match type_name {
            "postgres" | "postgresql" => Some(Dialect::Postgres { timescaledb }),
            "mysql" => Some(Dialect::Mysql),
            "mssql" => Some(Dialect::Mssql),
            "vertica" => Some(Dialect::Vertica),
            "kql" | "kusto" => Some(Dialect::Kql),
            _ => None,
        }
    }

    pub fn table(&self) -> &'static MacroTable {
        match self {
            Dialect::Postgres { .. } => &postgres::MACROS,
            Dialect::Mysql => &mysql::MACROS,
            Dialect::Mssql => &mssql::MACROS,
            Dialect::Vertica => &vertica::MACROS,
            Dialect::Kql => &kql::MACROS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum FillMode {
    Null,
    Previous,
    Value(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub mode: FillMode,
    pub interval_seconds: f64,
}

/// What a macro function can see. `fill` is the only thing a macro may write.
#[derive(Debug, Clone)]
pub struct MacroScope {
    pub dialect: Dialect,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub interval: Interval,
    pub fill: Option<Fill>,
}

impl MacroScope {
    pub fn new(dialect: Dialect, time_range: &TimeRange, interval: Interval) -> MacroScope {
        MacroScope {
            dialect,
            from: time_range.must_get_from(),
            to: time_range.must_get_to(),
            interval,
            fill: None,
        }
    }

    pub fn from_seconds(&self) -> i64 {
        self.from.timestamp()
    }

    pub fn to_seconds(&self) -> i64 {
        self.to.timestamp()
    }

    pub fn from_nanos(&self) -> i64 {
        epoch_nanos(&self.from)
    }

    pub fn to_nanos(&self) -> i64 {
        epoch_nanos(&self.to)
    }
}

fn epoch_nanos(t: &DateTime<Utc>) -> i64 {
    t.timestamp()
        .saturating_mul(1_000_000_000)
        .saturating_add(i64::from(t.timestamp_subsec_nanos()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interpolated {
    pub sql: String,
    pub fill: Option<Fill>,
}

/// Expands `$__name` and `$__name(args)` tokens for one dialect, bound to
/// one time range and interval. Built per query.
#[derive(Debug, Clone)]
pub struct MacroEngine {
    dialect: Dialect,
    time_range: TimeRange,
    interval: Interval,
}

impl MacroEngine {
    pub fn new(dialect: Dialect, time_range: TimeRange, interval: Interval) -> MacroEngine {
        MacroEngine {
            dialect,
            time_range,
            interval,
        }
    }

    pub fn interpolate(&self, raw: &str) -> Result<Interpolated, MacroError> {
        let table = self.dialect.table();
        let mut scope = MacroScope::new(self.dialect, &self.time_range, self.interval.clone());
        let mut first_error: Option<MacroError> = None;
        let mut sql = raw.to_string();

        if self.dialect == Dialect::Kql {
            sql = ESCAPE_MULTI
                .replace_all(&sql, |caps: &Captures| {
                    let args = split_quoted(&caps[1]);
                    expand(table, "__escapeMulti", &args, &mut scope, &mut first_error)
                })
                .into_owned();
        }

        // Bare tokens go first so they can be used as arguments of call-form macros.
        sql = BARE_MACRO
            .replace_all(&sql, |caps: &Captures| {
                let name = &caps[1];
                if caps.get(2).is_some() {
                    return caps[0].to_string();
                }
                if !table.contains_key(name) {
                    debug!("Leaving unknown bare token ${} untouched", name);
                    return caps[0].to_string();
                }
                expand(table, name, &[], &mut scope, &mut first_error)
            })
            .into_owned();

        sql = expand_calls(table, &sql, &mut scope, &mut first_error);

        match first_error {
            Some(e) => Err(e),
            None => Ok(Interpolated {
                sql,
                fill: scope.fill,
            }),
        }
    }
}

fn expand(
    table: &MacroTable,
    name: &str,
    args: &[String],
    scope: &mut MacroScope,
    first_error: &mut Option<MacroError>,
) -> String {
    if first_error.is_some() {
        return MACRO_ERROR.to_string();
    }
    let expanded = match table.get(name) {
        Some(f) => f(args, scope),
        None => Err(MacroError::UnknownMacro(name.to_string())),
    };
    match expanded {
        Ok(s) => s,
        Err(e) => {
            *first_error = Some(e);
            MACRO_ERROR.to_string()
        }
    }
}

/// Expands every `$__name(args)` in `text`. Arguments run to the matching
/// closing parenthesis, and macros nested in them are expanded first.
fn expand_calls(
    table: &MacroTable,
    text: &str,
    scope: &mut MacroScope,
    first_error: &mut Option<MacroError>,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(caps) = CALL_MACRO.captures(rest) {
        let (start, end) = match caps.get(0) {
            Some(m) => (m.start(), m.end()),
            None => break,
        };
        let name = caps[1].to_string();
        out.push_str(&rest[..start]);
        let after = &rest[end..];
        match closing_paren(after) {
            Some(close) => {
                let inner = expand_calls(table, &after[..close], scope, first_error);
                let args = split_args(&inner);
                out.push_str(&expand(table, &name, &args, scope, first_error));
                rest = &after[close + 1..];
            }
            None => {
                if first_error.is_none() {
                    *first_error = Some(MacroError::InvalidArgument {
                        name,
                        reason: "missing closing parenthesis".to_string(),
                    });
                }
                out.push_str(MACRO_ERROR);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// Offset of the `)` closing an already opened `(`. Quoted text is skipped.
fn closing_paren(text: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut quoted = false;
    for (at, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth -= 1;
                if depth == 0 {
                    return Some(at);
                }
            }
            _ => {}
        }
    }
    None
}

// Splits on top-level commas only, so `coalesce(a, b), 5m` is two arguments.
fn split_args(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return vec![];
    }
    let mut args = vec![];
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (at, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                args.push(text[start..at].trim().to_string());
                start = at + 1;
            }
            _ => {}
        }
    }
    args.push(text[start..].trim().to_string());
    args
}

// `'a', 'b'` -> [`'a'`, `'b'`]
fn split_quoted(list: &str) -> Vec<String> {
    let inner = list
        .strip_prefix('\'')
        .and_then(|l| l.strip_suffix('\''))
        .unwrap_or(list);
    QUOTED_SEPARATOR
        .split(inner)
        .map(|v| format!("'{}'", v))
        .collect()
}

pub(crate) fn expect_args(
    name: &str,
    args: &[String],
    min: usize,
    max: usize,
) -> Result<(), MacroError> {
    if args.len() < min || args.len() > max || args.iter().any(|a| a.is_empty()) {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(MacroError::ArgumentCount {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

/// Shared by every `*Group` macro: `(col, interval[, fill])`. A fill argument
/// switches on filling for the whole query.
pub(crate) fn group_interval(
    name: &str,
    args: &[String],
    scope: &mut MacroScope,
) -> Result<Duration, MacroError> {
    expect_args(name, args, 2, 3)?;
    let interval = parse_interval(args[1].trim_matches(|c: char| c == '\'' || c == '"'))
        .map_err(|source| MacroError::InvalidInterval {
            name: name.to_string(),
            source,
        })?;
    if let Some(fill) = args.get(2) {
        let mode = if fill.eq_ignore_ascii_case("null") {
            FillMode::Null
        } else if fill.eq_ignore_ascii_case("previous") {
            FillMode::Previous
        } else {
            FillMode::Value(
                fill.parse::<f64>()
                    .map_err(|_| MacroError::InvalidFill(fill.to_string()))?,
            )
        };
        scope.fill = Some(Fill {
            mode,
            interval_seconds: interval.as_secs_f64(),
        });
    }
    Ok(interval)
}

pub(crate) fn seconds_text(interval: Duration) -> String {
    if interval.subsec_nanos() == 0 {
        interval.as_secs().to_string()
    } else {
        interval.as_secs_f64().to_string()
    }
}

/// Macros every SQL dialect renders the same way.
pub(crate) fn sql_common() -> MacroTable {
    let mut m: MacroTable = HashMap::new();
    m.insert("__interval", interval);
    m.insert("__interval_ms", interval_ms);
    m.insert("__unixEpochFilter", unix_epoch_filter);
    m.insert("__unixEpochFrom", unix_epoch_from);
    m.insert("__unixEpochTo", unix_epoch_to);
    m.insert("__unixEpochNanoFilter", unix_epoch_nano_filter);
    m.insert("__unixEpochNanoFrom", unix_epoch_nano_from);
    m.insert("__unixEpochNanoTo", unix_epoch_nano_to);
    m.insert("__unixEpochGroup", unix_epoch_group);
    m.insert("__unixEpochGroupAlias", unix_epoch_group_alias);
    m
}

fn interval(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__interval", args, 0, 0)?;
    Ok(scope.interval.text.clone())
}

fn interval_ms(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__interval_ms", args, 0, 0)?;
    Ok(scope.interval.milliseconds().to_string())
}

fn unix_epoch_filter(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__unixEpochFilter", args, 1, 1)?;
    Ok(format!(
        "{} >= {} AND {} <= {}",
        args[0],
        scope.from_seconds(),
        args[0],
        scope.to_seconds()
    ))
}

fn unix_epoch_from(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__unixEpochFrom", args, 0, 0)?;
    Ok(scope.from_seconds().to_string())
}

fn unix_epoch_to(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__unixEpochTo", args, 0, 0)?;
    Ok(scope.to_seconds().to_string())
}

fn unix_epoch_nano_filter(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__unixEpochNanoFilter", args, 1, 1)?;
    Ok(format!(
        "{} >= {} AND {} <= {}",
        args[0],
        scope.from_nanos(),
        args[0],
        scope.to_nanos()
    ))
}

fn unix_epoch_nano_from(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__unixEpochNanoFrom", args, 0, 0)?;
    Ok(scope.from_nanos().to_string())
}

fn unix_epoch_nano_to(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__unixEpochNanoTo", args, 0, 0)?;
    Ok(scope.to_nanos().to_string())
}

fn unix_epoch_group(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    let interval = group_interval("__unixEpochGroup", args, scope)?;
    let seconds = seconds_text(interval);
    Ok(format!("floor({}/{})*{}", args[0], seconds, seconds))
}

fn unix_epoch_group_alias(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    Ok(format!("{} AS \"time\"", unix_epoch_group(args, scope)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine(dialect: Dialect) -> MacroEngine {
        let now = Utc.with_ymd_and_hms(2018, 3, 15, 13, 0, 0).unwrap();
        MacroEngine::new(
            dialect,
            TimeRange::new("5m", "now").with_now(now),
            Interval::new(Duration::from_secs(60)),
        )
    }

    #[test]
    fn test_text_without_macros_is_unchanged() {
        let raw = "SELECT $1, '$__' AS x FROM t WHERE price > $5.00";
        let res = engine(Dialect::Mssql).interpolate(raw).unwrap();
        assert_eq!(res.sql, raw);
        assert_eq!(res.fill, None);
    }

    #[test]
    fn test_bare_macro_inside_call_arguments() {
        let res = engine(Dialect::Mssql)
            .interpolate("SELECT $__timeGroup(time, $__interval) AS time FROM metric")
            .unwrap();
        assert_eq!(
            res.sql,
            "SELECT FLOOR(DATEDIFF(second, '1970-01-01', time)/60)*60 AS time FROM metric"
        );
    }

    #[test]
    fn test_unknown_macro_fails_whole_interpolation() {
        let res = engine(Dialect::Postgres { timescaledb: false })
            .interpolate("SELECT $__bogus() FROM t WHERE $__timeFilter(time)");
        assert_eq!(res, Err(MacroError::UnknownMacro("__bogus".to_string())));
    }

    #[test]
    fn test_first_error_wins() {
        let res = engine(Dialect::Postgres { timescaledb: false })
            .interpolate("SELECT $__timeFilter() , $__bogus()");
        assert!(matches!(res, Err(MacroError::ArgumentCount { name, .. }) if name == "__timeFilter"));
    }

    #[test]
    fn test_unknown_bare_token_is_left_alone() {
        let res = engine(Dialect::Vertica)
            .interpolate("SELECT '$__user' FROM t")
            .unwrap();
        assert_eq!(res.sql, "SELECT '$__user' FROM t");
    }

    #[test]
    fn test_fill_side_channel() {
        let res = engine(Dialect::Postgres { timescaledb: false })
            .interpolate("SELECT $__timeGroup(time, '5m', previous), avg(v) FROM m GROUP BY 1")
            .unwrap();
        assert_eq!(
            res.fill,
            Some(Fill {
                mode: FillMode::Previous,
                interval_seconds: 300.0
            })
        );
    }

    #[test]
    fn test_interpolation_is_idempotent() {
        let e = engine(Dialect::Postgres { timescaledb: false });
        let once = e
            .interpolate("SELECT $__time(t), v FROM m WHERE $__timeFilter(t)")
            .unwrap();
        let twice = e.interpolate(&once.sql).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_split_args() {
        assert!(split_args("").is_empty());
        assert!(split_args("   ").is_empty());
        assert_eq!(split_args(" a ,b"), vec!["a", "b"]);
        assert_eq!(split_args("f(a, b), ','"), vec!["f(a, b)", "','"]);
        assert_eq!(split_quoted("'a', 'b'"), vec!["'a'", "'b'"]);
    }

    #[test]
    fn test_call_with_space_before_parenthesis() {
        let res = engine(Dialect::Postgres { timescaledb: false })
            .interpolate("SELECT 1 WHERE $__timeFilter (time)")
            .unwrap();
        assert_eq!(
            res.sql,
            "SELECT 1 WHERE time >= to_timestamp(1521118500) AND time <= to_timestamp(1521118800)"
        );
        let res = engine(Dialect::Mssql).interpolate("SELECT $__bogus (x)");
        assert_eq!(res, Err(MacroError::UnknownMacro("__bogus".to_string())));
    }

    #[test]
    fn test_nested_parentheses_stay_in_one_argument() {
        let res = engine(Dialect::Postgres { timescaledb: false })
            .interpolate("SELECT v FROM m WHERE $__timeFilter(cast(t as timestamp))")
            .unwrap();
        assert_eq!(
            res.sql,
            "SELECT v FROM m WHERE cast(t as timestamp) >= to_timestamp(1521118500) \
             AND cast(t as timestamp) <= to_timestamp(1521118800)"
        );
        let res = engine(Dialect::Mysql)
            .interpolate("SELECT $__timeGroup(coalesce(a, b), '5m') FROM m")
            .unwrap();
        assert_eq!(res.sql, "SELECT UNIX_TIMESTAMP(coalesce(a, b)) DIV 300 * 300 FROM m");
    }

    #[test]
    fn test_unclosed_call_is_an_error() {
        let res = engine(Dialect::Vertica).interpolate("SELECT $__timeFilter(time FROM t");
        assert!(matches!(res, Err(MacroError::InvalidArgument { name, .. }) if name == "__timeFilter"));
    }

    #[test]
    fn test_bad_fill_is_an_error() {
        let res = engine(Dialect::Mssql).interpolate("$__timeGroup(time, 5m, sometimes)");
        assert_eq!(res, Err(MacroError::InvalidFill("sometimes".to_string())));
    }
}
