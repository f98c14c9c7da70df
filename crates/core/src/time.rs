//! Microsecond time values used throughout the scheduler.
//!
//! A [`Time`] is a plain signed count of microseconds. Two sentinel values
//! mark the ends of the time axis: [`Time::NEVER`] (a deadline that never
//! expires) and [`Time::ANYTIME`] (a start that has always passed). Arithmetic
//! saturates and keeps sentinels sticky, so deadlines derived from `NEVER`
//! remain `NEVER`.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const MICROS_PER_MILLI: i64 = 1_000;
const MICROS_PER_SEC: i64 = 1_000_000;

/// Point in time (or time offset) with microsecond resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Time(i64);

impl Time {
    pub const ZERO: Time = Time(0);
    /// Upper end of the time axis; deadline that never expires.
    pub const NEVER: Time = Time(i64::MAX);
    /// Lower end of the time axis; start time "as soon as possible".
    pub const ANYTIME: Time = Time(i64::MIN);
    /// Alias of [`Time::ANYTIME`], used for deadlines that have always passed.
    pub const MIN: Time = Time(i64::MIN);

    /// Build from millisecond and second parts, `Time::new(333, 33)` is 33.333s.
    pub const fn new(millis: i64, secs: i64) -> Self {
        Time(secs * MICROS_PER_SEC + millis * MICROS_PER_MILLI)
    }

    pub const fn from_micros(micros: i64) -> Self {
        Time(micros)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Time(millis * MICROS_PER_MILLI)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Time((secs * MICROS_PER_SEC as f64).round() as i64)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Time(i64::try_from(duration.as_micros()).unwrap_or(i64::MAX - 1))
    }

    /// Raw microsecond count.
    pub const fn micros(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_SEC as f64
    }

    /// Convert to a `Duration`; negative and irregular values clamp to the ends.
    pub fn as_duration(self) -> Duration {
        if self.0 <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.0 as u64)
        }
    }

    /// False for the sentinels `NEVER` and `ANYTIME`.
    pub const fn is_regular(self) -> bool {
        self.0 != i64::MAX && self.0 != i64::MIN
    }

    /// Scale an offset by a factor, keeping sentinels unchanged.
    pub fn scaled(self, factor: f64) -> Self {
        if !self.is_regular() {
            return self;
        }
        Time((self.0 as f64 * factor).round() as i64)
    }

    fn clamp_regular(raw: i64) -> Self {
        Time(raw.clamp(i64::MIN + 1, i64::MAX - 1))
    }
}

impl Add for Time {
    type Output = Time;

    fn add(self, rhs: Time) -> Time {
        if !self.is_regular() {
            return self;
        }
        if !rhs.is_regular() {
            return rhs;
        }
        Time::clamp_regular(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Time) -> Time {
        if !self.is_regular() {
            return self;
        }
        match rhs {
            Time::NEVER => Time::ANYTIME,
            Time::ANYTIME => Time::NEVER,
            _ => Time::clamp_regular(self.0.saturating_sub(rhs.0)),
        }
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Time {
        self + Time::from_duration(rhs)
    }
}

impl Sub<Duration> for Time {
    type Output = Time;

    fn sub(self, rhs: Duration) -> Time {
        self - Time::from_duration(rhs)
    }
}

impl From<Duration> for Time {
    fn from(duration: Duration) -> Self {
        Time::from_duration(duration)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Time::NEVER => write!(f, "∞"),
            Time::ANYTIME => write!(f, "-∞"),
            Time(raw) => {
                let sign = if raw < 0 { "-" } else { "" };
                let abs = raw.unsigned_abs();
                let secs = abs / MICROS_PER_SEC as u64;
                let millis = (abs % MICROS_PER_SEC as u64) / MICROS_PER_MILLI as u64;
                write!(f, "{sign}{secs}.{millis:03}")
            }
        }
    }
}
