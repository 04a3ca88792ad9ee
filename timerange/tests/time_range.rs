use chrono::{DateTime, Duration, TimeZone, Utc};
use log::debug;
use rstest::*;
use std::time::Duration as StdDuration;
use timerange::{default_interval, IntervalCalculator, TimeRange, TimeRangeError};

#[fixture]
fn use_logger() {
    let res = env_logger::try_init();
    match res {
        Ok(_) => {}
        Err(_) => {
            debug!("Tried to initialize logger which is already initialize")
        }
    }
}

#[fixture]
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 5, 18, 13, 47, 21).unwrap()
}

#[rstest]
fn test_relative_duration_from(use_logger: (), now: DateTime<Utc>) {
    let range = TimeRange::new("5m", "now").with_now(now);
    assert_eq!(range.parse_from().unwrap(), now - Duration::minutes(5));
    assert_eq!(range.parse_to().unwrap(), now);
}

#[rstest]
fn test_now_is_captured_once(now: DateTime<Utc>) {
    let range = TimeRange::new("now", "now").with_now(now);
    assert_eq!(range.parse_from().unwrap(), range.parse_from().unwrap());
    assert_eq!(range.parse_from().unwrap(), now);
}

#[rstest]
fn test_epoch_millis_is_exact(now: DateTime<Utc>) {
    let range = TimeRange::from_epoch_millis(1_500_000_000_123, 1_500_000_360_456).with_now(now);
    assert_eq!(
        range.parse_from().unwrap().timestamp_millis(),
        1_500_000_000_123
    );
    assert_eq!(range.parse_to().unwrap().timestamp_millis(), 1_500_000_360_456);
}

#[rstest]
#[case("now-1h", Duration::hours(-1))]
#[case("now+30m", Duration::minutes(30))]
#[case("1h30m", Duration::minutes(-90))]
#[case("now-7d", Duration::days(-7))]
fn test_offsets(now: DateTime<Utc>, #[case] bound: &str, #[case] expected: Duration) {
    let range = TimeRange::new(bound, "now").with_now(now);
    assert_eq!(range.parse_from().unwrap(), now + expected);
}

#[rstest]
fn test_rounding_depends_on_bound(now: DateTime<Utc>) {
    let range = TimeRange::new("now/d", "now/d").with_now(now);
    let from = range.parse_from().unwrap();
    let to = range.parse_to().unwrap();
    assert_eq!(from, Utc.with_ymd_and_hms(2022, 5, 18, 0, 0, 0).unwrap());
    assert_eq!(
        to,
        Utc.with_ymd_and_hms(2022, 5, 19, 0, 0, 0).unwrap() - Duration::nanoseconds(1)
    );
}

#[rstest]
fn test_invalid_bound_is_an_error(now: DateTime<Utc>) {
    let range = TimeRange::new("yesterday-ish", "now-5q").with_now(now);
    assert!(range.parse_from().is_err());
    assert!(matches!(
        range.parse_to(),
        Err(TimeRangeError::InvalidDatemath(_))
    ));
}

#[rstest]
fn test_must_get_falls_back_to_epoch(now: DateTime<Utc>) {
    let range = TimeRange::new("now-5q", "now-5q").with_now(now);
    assert_eq!(range.must_get_from().timestamp(), 0);
    assert_eq!(range.must_get_to().timestamp(), 0);
}

#[rstest]
fn test_location_changes_day_boundaries(now: DateTime<Utc>) {
    let range = TimeRange::new("now/d", "now")
        .with_now(now)
        .with_location(chrono_tz::America::New_York);
    // 13:47 UTC is 09:47 in New York (EDT, UTC-4).
    assert_eq!(
        range.parse_from().unwrap(),
        Utc.with_ymd_and_hms(2022, 5, 18, 4, 0, 0).unwrap()
    );
}

#[rstest]
fn test_default_interval_is_rounded(now: DateTime<Utc>) {
    // 6h / 60 = 6m, which rounds to 5m.
    let range = TimeRange::new("6h", "now").with_now(now);
    assert_eq!(default_interval(&range), StdDuration::from_secs(300));
}

#[rstest]
fn test_interval_calculator_respects_minimum(now: DateTime<Utc>) {
    let range = TimeRange::new("1h", "now").with_now(now);
    let calculator = IntervalCalculator::new(StdDuration::from_secs(10));
    // 1h / 1500 = 2.4s, below the 10s minimum.
    let interval = calculator.calculate(&range, None);
    assert_eq!(interval.value, StdDuration::from_secs(10));
    assert_eq!(interval.text, "10s");

    let wide = TimeRange::new("24h", "now").with_now(now);
    // 24h / 1500 = 57.6s, which rounds to 1m.
    let interval = calculator.calculate(&wide, None);
    assert_eq!(interval.text, "1m");
    assert_eq!(interval.milliseconds(), 60_000);

    let interval = calculator.calculate(&wide, Some(100));
    // 24h / 100 = 14.4m, which rounds to 15m.
    assert_eq!(interval.text, "15m");
}
