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
    m
});

fn time(args: &[String], _: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__time", args, 1, 1)?;
    Ok(format!("{} AS \"time\"", args[0]))
}

fn time_epoch(args: &[String], _: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeEpoch", args, 1, 1)?;
    Ok(format!("EXTRACT(EPOCH FROM {}) AS \"time\"", args[0]))
}

fn time_filter(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeFilter", args, 1, 1)?;
    Ok(format!(
        "{} >= TO_TIMESTAMP({}) AND {} <= TO_TIMESTAMP({})",
        args[0],
        scope.from_seconds(),
        args[0],
        scope.to_seconds()
    ))
}

fn time_from(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeFrom", args, 0, 0)?;
    Ok(format!("TO_TIMESTAMP({})", scope.from_seconds()))
}

fn time_to(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeTo", args, 0, 0)?;
    Ok(format!("TO_TIMESTAMP({})", scope.to_seconds()))
}

fn time_group(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    let interval = group_interval("__timeGroup", args, scope)?;
    Ok(format!("TIME_SLICE({}, {})", args[0], seconds_text(interval)))
}

fn time_group_alias(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    Ok(format!("{} AS \"time\"", time_group(args, scope)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::Dialect;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use timerange::{Interval, TimeRange};

    #[test]
    fn test_vertica_table() {
        let now = Utc.with_ymd_and_hms(2018, 3, 15, 13, 0, 0).unwrap();
        let mut s = MacroScope::new(
            Dialect::Vertica,
            &TimeRange::new("5m", "now").with_now(now),
            Interval::new(Duration::from_secs(60)),
        );
        let args = |a: &[&str]| a.iter().map(|x| x.to_string()).collect::<Vec<String>>();
        assert_eq!(
            MACROS["__timeFilter"](&args(&["ts"]), &mut s).unwrap(),
            "ts >= TO_TIMESTAMP(1521118500) AND ts <= TO_TIMESTAMP(1521118800)"
        );
        assert_eq!(
            MACROS["__timeGroupAlias"](&args(&["ts", "'1m'"]), &mut s).unwrap(),
            "TIME_SLICE(ts, 60) AS \"time\""
        );
        assert_eq!(
            MACROS["__timeEpoch"](&args(&["ts"]), &mut s).unwrap(),
            "EXTRACT(EPOCH FROM ts) AS \"time\""
        );
        assert_eq!(MACROS["__interval"](&[], &mut s).unwrap(), "1m");
    }
}
