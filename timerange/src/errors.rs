use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimeRangeError {
    EpochOutOfRange(i64),
    InvalidDuration(String),
    InvalidDatemath(String),
    InvalidAbsoluteTime(String, String),
    NonExistentLocalTime(String),
    ArithmeticOverflow(String),
}

impl Display for TimeRangeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeRangeError::EpochOutOfRange(ms) => {
                write!(f, "Epoch milliseconds out of range: {}", ms)
            }
            TimeRangeError::InvalidDuration(d) => {
                write!(f, "Invalid duration: {}", d)
            }
            TimeRangeError::InvalidDatemath(e) => {
                write!(f, "Could not parse time expression: {}", e)
            }
            TimeRangeError::InvalidAbsoluteTime(t, reason) => {
                write!(f, "Could not parse absolute time {}: {}", t, reason)
            }
            TimeRangeError::NonExistentLocalTime(t) => {
                write!(f, "Local time {} does not exist in the range location", t)
            }
            TimeRangeError::ArithmeticOverflow(e) => {
                write!(f, "Time arithmetic overflowed while evaluating {}", e)
            }
        }
    }
}
