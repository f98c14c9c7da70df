use std::sync::OnceLock;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::time::Time;

struct Origin {
    instant: Instant,
    wall: DateTime<Utc>,
}

fn origin() -> &'static Origin {
    static ORIGIN: OnceLock<Origin> = OnceLock::new();
    ORIGIN.get_or_init(|| Origin {
        instant: Instant::now(),
        wall: Utc::now(),
    })
}

/// Monotonic process clock, rounded to microsecond ticks.
///
/// All scheduler times are relative to the first access of the clock
/// within this process.
pub struct RealClock;

impl RealClock {
    /// Current scheduler time.
    pub fn now() -> Time {
        Time::from_duration(origin().instant.elapsed())
    }

    /// Wall-clock timestamp corresponding to a scheduler time.
    pub fn wall_clock(at: Time) -> DateTime<Utc> {
        let offset = chrono::Duration::microseconds(at.micros().max(0));
        origin().wall + offset
    }
}
