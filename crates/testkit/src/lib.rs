//! Test scaffolding for the gear scheduler.
//!
//! - [`detector`]: diagnostic execution context, probes and taps to observe
//!   Activity chains, with an event log and chainable matchers
//! - [`chain_load`]: synthetic dependency graphs with calibrated load, which
//!   can be driven through a live [`Scheduler`](gear_scheduler::Scheduler)
//! - [`stress_rig`]: breaking-point search over the schedule stress factor

pub mod chain_load;
pub mod detector;
pub mod stress_rig;

pub use chain_load::{ComputationalLoad, Node, Rule, ScheduleCtx, TestChainLoad};
pub use detector::{ActivityDetector, ActivityMatch, DiagnosticContext, EventLog};
pub use stress_rig::{BreakingPoint, Shape, StressResult, StressRig};
