//! Time-bound scheduler for Activity chains.
//!
//! Organised in layers:
//! - `invocation`: layer 1, the queue of pending activations by start time
//! - `commutator`: layer 2, the grooming token and worker dispatch decisions
//! - `load_control`: lag sampling and capacity classification
//! - `work_force`: the pool of workers calling back into the scheduler
//! - `runner`: the [`Scheduler`] itself, tying the layers together
//!
//! Engine events are reported to an [`EngineObserver`].

pub mod commutator;
pub mod config;
pub mod invocation;
pub mod load_control;
pub mod metrics;
pub mod observer;
pub mod runner;
pub mod work_force;

pub use config::SchedulerConfig;
pub use invocation::ActivationEvent;
pub use load_control::{Capacity, LoadController};
pub use metrics::SchedulerMetrics;
pub use observer::{EngineEvent, EngineObserver, RecordingObserver, TracingObserver};
pub use runner::{ScheduleSpec, Scheduler};
pub use work_force::{WorkForce, WorkSetup};
