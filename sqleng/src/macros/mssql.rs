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

// Epoch seconds shifted into the server's local time.
fn local_datetime(epoch_seconds: i64) -> String {
    format!(
        "DATEADD(second, {}+DATEDIFF(second,GETUTCDATE(),GETDATE()), '1970-01-01')",
        epoch_seconds
    )
}

fn time(args: &[String], _: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__time", args, 1, 1)?;
    Ok(format!("{} AS time", args[0]))
}

fn time_epoch(args: &[String], _: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeEpoch", args, 1, 1)?;
    Ok(format!("DATEDIFF(second, '1970-01-01', {}) AS time", args[0]))
}

fn time_filter(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeFilter", args, 1, 1)?;
    Ok(format!(
        "{} >= {} AND {} <= {}",
        args[0],
        local_datetime(scope.from_seconds()),
        args[0],
        local_datetime(scope.to_seconds())
    ))
}

fn time_from(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeFrom", args, 0, 0)?;
    Ok(local_datetime(scope.from_seconds()))
}

fn time_to(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    expect_args("__timeTo", args, 0, 0)?;
    Ok(local_datetime(scope.to_seconds()))
}

fn time_group(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    let interval = group_interval("__timeGroup", args, scope)?;
    let seconds = seconds_text(interval);
    Ok(format!(
        "FLOOR(DATEDIFF(second, '1970-01-01', {})/{})*{}",
        args[0], seconds, seconds
    ))
}

fn time_group_alias(args: &[String], scope: &mut MacroScope) -> Result<String, MacroError> {
    Ok(format!("{} AS [time]", time_group(args, scope)?))
}
