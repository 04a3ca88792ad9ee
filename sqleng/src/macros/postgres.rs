use super::{expect_args, group_interval, seconds_text, sql_common, Dialect, MacroError, MacroScope, MacroTable};
use once_cell::sync::Lazy;

pub static MACROS: Lazy<MacroTable> = Lazy::new(|| {
    let mut m = sql_common();
    m.insert("__time", time);
    m.insert("__timeEpoch", time_epoch);
    m.insert("__timeFilter", time_filter);
    m.insert("__timeFrom", time_from);
    m.insert("__timeTo", time_to);
    m.insert("__timeGroup", time_group);
    m.insert("__timeGroupAlias", time_group_alias);
    m
});

fn time(args: &[String], _: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__time", args, 1, 1)?;
    Ok(format!("{} AS \"time\"", args[0]))
}

fn time_epoch(args: &[String], _: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeEpoch", args, 1, 1)?;
    Ok(format!("extract(epoch from {}) AS \"time\"", args[0]))
}

fn time_filter(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeFilter", args, 1, 1)?;
    Ok(format!(
        "{} >= to_timestamp({}) AND {} <= to_timestamp({})",
        args[0],
        scope.from_seconds(),
        args[0],
        scope.to_seconds()
    ))
}

fn time_from(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeFrom", args, 0, 0)?;
    Ok(format!("to_timestamp({})", scope.from_seconds()))
}

fn time_to(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeTo", args, 0, 0)?;
    Ok(format!("to_timestamp({})", scope.to_seconds()))
}

fn time_group(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    let interval = group_interval("__timeGroup", args, scope)?;
    let seconds = seconds_text(interval);
    if let Dialect::Postgres { timescaledb: true } = scope.dialect {
        return Ok(format!("time_bucket('{}s',{})", seconds, args[0]));
    }
    Ok(format!(
        "floor(extract(epoch from {})/{})*{}",
        args[0], seconds, seconds
    ))
}

fn time_group_alias(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    Ok(format!("{} AS \"time\"", time_group(args, scope)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use timerange::{Interval, TimeRange};

    fn scope(timescaledb: bool) -> MacroScope {
        let now = Utc.with_ymd_and_hms(2018, 3, 15, 13, 0, 0).unwrap();
        MacroScope::new(
            Dialect::Postgres { timescaledb },
            &TimeRange::new("5m", "now").with_now(now),
            Interval::new(Duration::from_secs(60)),
        )
    }

    fn call(name: &str, args: &[&str], scope: &mut MacroScope) -> Result<String, MacroError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        MACROS[name](&args, scope)
    }

    #[test]
    fn test_time_columns() {
        let mut s = scope(false);
        assert_eq!(call("__time", &["created"], &mut s).unwrap(), "created AS \"time\"");
        assert_eq!(
            call("__timeEpoch", &["created"], &mut s).unwrap(),
            "extract(epoch from created) AS \"time\""
        );
    }

    #[test]
    fn test_time_filter_and_bounds() {
        let mut s = scope(false);
        assert_eq!(
            call("__timeFilter", &["time_column"], &mut s).unwrap(),
            "time_column >= to_timestamp(1521118500) AND time_column <= to_timestamp(1521118800)"
        );
        assert_eq!(call("__timeFrom", &[], &mut s).unwrap(), "to_timestamp(1521118500)");
        assert_eq!(call("__timeTo", &[], &mut s).unwrap(), "to_timestamp(1521118800)");
    }

    #[test]
    fn test_time_group() {
        let mut s = scope(false);
        assert_eq!(
            call("__timeGroup", &["time_column", "'5m'"], &mut s).unwrap(),
            "floor(extract(epoch from time_column)/300)*300"
        );
        assert_eq!(
            call("__timeGroupAlias", &["time_column", "5m"], &mut s).unwrap(),
            "floor(extract(epoch from time_column)/300)*300 AS \"time\""
        );
        assert_eq!(s.fill, None);
    }

    #[test]
    fn test_time_group_with_timescaledb() {
        let mut s = scope(true);
        assert_eq!(
            call("__timeGroup", &["time_column", "'5m'", "NULL"], &mut s).unwrap(),
            "time_bucket('300s',time_column)"
        );
        assert!(s.fill.is_some());
    }

    #[test]
    fn test_unix_epoch_family() {
        let mut s = scope(false);
        assert_eq!(
            call("__unixEpochFilter", &["ts"], &mut s).unwrap(),
            "ts >= 1521118500 AND ts <= 1521118800"
        );
        assert_eq!(
            call("__unixEpochNanoFrom", &[], &mut s).unwrap(),
            "1521118500000000000"
        );
        assert_eq!(
            call("__unixEpochGroupAlias", &["ts", "1h"], &mut s).unwrap(),
            "floor(ts/3600)*3600 AS \"time\""
        );
        assert_eq!(call("__interval_ms", &[], &mut s).unwrap(), "60000");
    }

    #[test]
    fn test_argument_contracts() {
        let mut s = scope(false);
        assert!(call("__time", &[], &mut s).is_err());
        assert!(call("__timeFrom", &["x"], &mut s).is_err());
        assert!(call("__timeGroup", &["time_column"], &mut s).is_err());
        assert!(call("__timeGroup", &["time_column", "fast"], &mut s).is_err());
    }
}
