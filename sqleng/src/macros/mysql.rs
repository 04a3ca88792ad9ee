use super::{expect_args, group_interval, seconds_text, sql_common, MacroError, MacroScope, MacroTable};
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
    // Integer division keeps epoch buckets integral.
    m.insert("__unixEpochGroup", unix_epoch_group);
    m.insert("__unixEpochGroupAlias", unix_epoch_group_alias);
    m
});

fn time(args: &[String], _: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__time", args, 1, 1)?;
    Ok(format!("UNIX_TIMESTAMP({}) as time_sec", args[0]))
}

fn time_epoch(args: &[String], _: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeEpoch", args, 1, 1)?;
    Ok(format!("UNIX_TIMESTAMP({}) as time_sec", args[0]))
}

fn time_filter(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeFilter", args, 1, 1)?;
    Ok(format!(
        "{} BETWEEN FROM_UNIXTIME({}) AND FROM_UNIXTIME({})",
        args[0],
        scope.from_seconds(),
        scope.to_seconds()
    ))
}

fn time_from(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeFrom", args, 0, 0)?;
    Ok(format!("FROM_UNIXTIME({})", scope.from_seconds()))
}

fn time_to(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeTo", args, 0, 0)?;
    Ok(format!("FROM_UNIXTIME({})", scope.to_seconds()))
}

fn time_group(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    let interval = group_interval("__timeGroup", args, scope)?;
    let seconds = seconds_text(interval);
    Ok(format!(
        "UNIX_TIMESTAMP({}) DIV {} * {}",
        args[0], seconds, seconds
    ))
}

fn time_group_alias(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    Ok(format!("{} AS \"time\"", time_group(args, scope)?))
}

fn unix_epoch_group(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    let interval = group_interval("__unixEpochGroup", args, scope)?;
    let seconds = seconds_text(interval);
    Ok(format!("{} DIV {} * {}", args[0], seconds, seconds))
}

fn unix_epoch_group_alias(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    Ok(format!("{} AS \"time\"", unix_epoch_group(args, scope)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::{Dialect, FillMode};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use timerange::{Interval, TimeRange};

    fn scope() -> MacroScope {
        let now = Utc.with_ymd_and_hms(2018, 3, 15, 13, 0, 0).unwrap();
        MacroScope::new(
            Dialect::Mysql,
            &TimeRange::new("5m", "now").with_now(now),
            Interval::new(Duration::from_secs(60)),
        )
    }

    fn call(name: &str, args: &[&str], scope: &mut MacroScope) -> Result<String, MacroError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        MACROS[name](&args, scope)
    }

    #[test]
    fn test_mysql_bounds() {
        let mut s = scope();
        assert_eq!(
            call("__timeFilter", &["time"], &mut s).unwrap(),
            "time BETWEEN FROM_UNIXTIME(1521118500) AND FROM_UNIXTIME(1521118800)"
        );
        assert_eq!(call("__timeFrom", &[], &mut s).unwrap(), "FROM_UNIXTIME(1521118500)");
        assert_eq!(call("__timeTo", &[], &mut s).unwrap(), "FROM_UNIXTIME(1521118800)");
        assert_eq!(call("__unixEpochFrom", &[], &mut s).unwrap(), "1521118500");
    }

    #[test]
    fn test_mysql_time_group() {
        let mut s = scope();
        assert_eq!(
            call("__timeGroup", &["time", "60s"], &mut s).unwrap(),
            "UNIX_TIMESTAMP(time) DIV 60 * 60"
        );
        assert_eq!(
            call("__timeGroupAlias", &["time", "'5m'", "1.5"], &mut s).unwrap(),
            "UNIX_TIMESTAMP(time) DIV 300 * 300 AS \"time\""
        );
        assert_eq!(s.fill.map(|f| f.mode), Some(FillMode::Value(1.5)));
        assert_eq!(
            call("__unixEpochGroup", &["time_sec", "1h"], &mut s).unwrap(),
            "time_sec DIV 3600 * 3600"
        );
        assert_eq!(
            call("__time", &["created"], &mut s).unwrap(),
            "UNIX_TIMESTAMP(created) as time_sec"
        );
    }
}
