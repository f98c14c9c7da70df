//! Foundation types shared by the gear scheduler crates.

pub mod clock;
pub mod config;
pub mod error;
pub mod hash;
pub mod incidence;
pub mod time;

pub use clock::RealClock;
pub use error::CoreError;
pub use hash::hash_combine;
pub use incidence::{this_thread_key, IncidenceCount, Statistic};
pub use time::Time;
