use super::{expect_args, MacroError, MacroScope, MacroTable};
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;

const DEFAULT_TIME_COLUMN: &str = "TimeGenerated";

pub static MACROS: Lazy<MacroTable> = Lazy::new(|| {
    let mut m: MacroTable = HashMap::new();
    m.insert("__timeFilter", time_filter);
    m.insert("__timeFrom", time_from);
    m.insert("__timeTo", time_to);
    m.insert("__interval", interval);
    m.insert("__contains", contains);
    m.insert("__escapeMulti", escape_multi);
    m
});

fn datetime(t: &DateTime<Utc>) -> String {
    format!("datetime('{}')", t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn time_filter(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    if args.len() > 1 {
        return Err(MacroError::ArgumentCount {
            name: "__timeFilter".to_string(),
            expected: "0 to 1".to_string(),
            got: args.len(),
        });
    }
    let column = args
        .first()
        .filter(|c| !c.is_empty())
        .map(String::as_str)
        .unwrap_or(DEFAULT_TIME_COLUMN);
    Ok(format!(
        "['{}'] >= {} and ['{}'] <= {}",
        column,
        datetime(&scope.from),
        column,
        datetime(&scope.to)
    ))
}

fn time_from(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeFrom", args, 0, 0)?;
    Ok(datetime(&scope.from))
}

fn time_to(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeTo", args, 0, 0)?;
    Ok(datetime(&scope.to))
}

fn interval(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__interval", args, 0, 0)?;
    Ok(format!("{}ms", scope.interval.milliseconds()))
}

/// `all` is what a multi-value variable expands to when everything is
/// selected, so it means no filter at all.
fn contains(args: &[String], _: &mut MacroScope) -> Result<String, MacroError> {
    if args.len() < 2 || args.iter().any(|a| a.is_empty()) {
        return Err(MacroError::ArgumentCount {
            name: "__contains".to_string(),
            expected: "at least 2".to_string(),
            got: args.len(),
        });
    }
    if args[1..].iter().any(|v| v == "all") {
        return Ok("1 == 1".to_string());
    }
    Ok(format!("{} in ({})", args[0], args[1..].join(", ")))
}

fn escape_multi(args: &[String], _: &mut MacroScope) -> Result<String, MacroError> {
    if args.is_empty() {
        return Err(MacroError::ArgumentCount {
            name: "__escapeMulti".to_string(),
            expected: "at least 1".to_string(),
            got: 0,
        });
    }
    let mut escaped = Vec::with_capacity(args.len());
    for a in args {
        if a.len() < 2 || !a.starts_with('\'') || !a.ends_with('\'') {
            return Err(MacroError::InvalidArgument {
                name: "__escapeMulti".to_string(),
                reason: format!("{} is not wrapped in single quotes", a),
            });
        }
        escaped.push(format!("@{}", a));
    }
    Ok(escaped.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::{Dialect, MacroEngine};
    use chrono::TimeZone;
    use std::time::Duration;
    use timerange::{Interval, TimeRange};

    fn engine() -> MacroEngine {
        let now = Utc.with_ymd_and_hms(2018, 3, 15, 13, 0, 0).unwrap();
        MacroEngine::new(
            Dialect::Kql,
            TimeRange::new("5m", "now").with_now(now),
            Interval::new(Duration::from_secs(30)),
        )
    }

    fn scope() -> MacroScope {
        let now = Utc.with_ymd_and_hms(2018, 3, 15, 13, 0, 0).unwrap();
        MacroScope::new(
            Dialect::Kql,
            &TimeRange::new("5m", "now").with_now(now),
            Interval::new(Duration::from_secs(30)),
        )
    }

    fn strings(a: &[&str]) -> Vec<String> {
        a.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_time_filter_default_column() {
        let mut s = scope();
        let expected = "['TimeGenerated'] >= datetime('2018-03-15T12:55:00Z') \
                        and ['TimeGenerated'] <= datetime('2018-03-15T13:00:00Z')";
        assert_eq!(time_filter(&[], &mut s).unwrap(), expected);
        assert_eq!(
            time_filter(&strings(&["Timestamp"]), &mut s).unwrap(),
            "['Timestamp'] >= datetime('2018-03-15T12:55:00Z') \
             and ['Timestamp'] <= datetime('2018-03-15T13:00:00Z')"
        );
    }

    #[test]
    fn test_interval_in_milliseconds() {
        let mut s = scope();
        assert_eq!(interval(&[], &mut s).unwrap(), "30000ms");
    }

    #[test]
    fn test_contains() {
        let mut s = scope();
        assert_eq!(
            contains(&strings(&["Computer", "'a'", "'b'"]), &mut s).unwrap(),
            "Computer in ('a', 'b')"
        );
        assert_eq!(contains(&strings(&["Computer", "all"]), &mut s).unwrap(), "1 == 1");
        assert_eq!(contains(&strings(&["Anything", "all"]), &mut s).unwrap(), "1 == 1");
        assert!(contains(&strings(&["Computer"]), &mut s).is_err());
    }

    #[test]
    fn test_escape_multi_through_engine() {
        let res = engine()
            .interpolate("T | where Name in ($__escapeMulti('\\\\srv\\a','b, c'))")
            .unwrap();
        assert_eq!(res.sql, "T | where Name in (@'\\\\srv\\a', @'b, c')");
    }

    #[test]
    fn test_escape_multi_requires_quotes() {
        let res = engine().interpolate("T | where Name in ($__escapeMulti(a,b))");
        assert!(matches!(res, Err(MacroError::InvalidArgument { .. })));
    }

    #[test]
    fn test_bare_time_filter_through_engine() {
        let res = engine().interpolate("T | where $__timeFilter() | summarize count() by bin(TimeGenerated, $__interval)").unwrap();
        assert_eq!(
            res.sql,
            "T | where ['TimeGenerated'] >= datetime('2018-03-15T12:55:00Z') \
             and ['TimeGenerated'] <= datetime('2018-03-15T13:00:00Z') \
             | summarize count() by bin(TimeGenerated, 30000ms)"
        );
    }
}
