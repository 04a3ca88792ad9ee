use crate::TimeRange;
use std::time::Duration;

pub const DEFAULT_RESOLUTION: i64 = 1500;
/// Number of buckets used when a query carries no interval of its own.
pub const DEFAULT_INTERVAL_BUCKETS: u32 = 60;

const MILLISECOND: u64 = 1;
const SECOND: u64 = 1000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const YEAR: u64 = 365 * DAY;

// (upper bound inclusive, rounded value), both in milliseconds.
const ROUNDING_TABLE: [(u64, u64); 30] = [
    (10, 1),
    (15, 10),
    (35, 20),
    (75, 50),
    (150, 100),
    (350, 200),
    (750, 500),
    (1_500, SECOND),
    (3_500, 2 * SECOND),
    (7_500, 5 * SECOND),
    (12_500, 10 * SECOND),
    (17_500, 15 * SECOND),
    (25_000, 20 * SECOND),
    (45_000, 30 * SECOND),
    (90_000, MINUTE),
    (210_000, 2 * MINUTE),
    (450_000, 5 * MINUTE),
    (750_000, 10 * MINUTE),
    (1_050_000, 15 * MINUTE),
    (1_500_000, 20 * MINUTE),
    (2_700_000, 30 * MINUTE),
    (5_400_000, HOUR),
    (9_000_000, 2 * HOUR),
    (16_200_000, 3 * HOUR),
    (32_400_000, 6 * HOUR),
    (86_400_000, 12 * HOUR),
    (172_800_000, DAY),
    (604_800_000, DAY),
    (1_814_400_000, WEEK),
    (3_628_800_000 - 1, 30 * DAY),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub text: String,
    pub value: Duration,
}

impl Interval {
    pub fn new(value: Duration) -> Interval {
        Interval {
            text: format_duration(value),
            value,
        }
    }

    pub fn milliseconds(&self) -> i64 {
        i64::try_from(self.value.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Rounds a raw interval to the nearest "human" interval, e.g. 47s becomes 1m.
pub fn round_interval(interval: Duration) -> Duration {
    let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    for (upper, rounded) in ROUNDING_TABLE {
        if millis <= upper {
            return Duration::from_millis(rounded);
        }
    }
    Duration::from_millis(YEAR)
}

pub fn format_duration(interval: Duration) -> String {
    let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    if millis >= YEAR {
        format!("{}y", millis / YEAR)
    } else if millis >= DAY {
        format!("{}d", millis / DAY)
    } else if millis >= HOUR {
        format!("{}h", millis / HOUR)
    } else if millis >= MINUTE {
        format!("{}m", millis / MINUTE)
    } else if millis >= SECOND {
        format!("{}s", millis / SECOND)
    } else if millis >= MILLISECOND {
        format!("{}ms", millis)
    } else {
        "1ms".to_string()
    }
}

fn span(range: &TimeRange) -> Duration {
    let from = range.must_get_from();
    let to = range.must_get_to();
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

/// `(to - from) / 60`, rounded with [`round_interval`].
pub fn default_interval(range: &TimeRange) -> Duration {
    round_interval(span(range) / DEFAULT_INTERVAL_BUCKETS)
}

#[derive(Debug, Clone)]
pub struct IntervalCalculator {
    min_interval: Duration,
}

impl Default for IntervalCalculator {
    fn default() -> Self {
        IntervalCalculator {
            min_interval: Duration::from_millis(MILLISECOND),
        }
    }
}

impl IntervalCalculator {
    pub fn new(min_interval: Duration) -> IntervalCalculator {
        IntervalCalculator { min_interval }
    }

    /// Splits the range into `max_data_points` buckets (1500 when unset),
    /// never going below the minimum interval.
    pub fn calculate(&self, range: &TimeRange, max_data_points: Option<i64>) -> Interval {
        let resolution = match max_data_points {
            Some(points) if points > 0 => points,
            _ => DEFAULT_RESOLUTION,
        };
        let calculated = span(range) / u32::try_from(resolution).unwrap_or(u32::MAX);
        if calculated < self.min_interval {
            return Interval::new(self.min_interval);
        }
        Interval::new(round_interval(calculated))
    }
}
