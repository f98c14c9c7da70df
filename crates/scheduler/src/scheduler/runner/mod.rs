//! Scheduler runner -- drives Activity chains through the worker pool.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor and accessor methods
//! - `execution`: worker entry point and the execution context for chains
//! - `duty_cycle`: ignition, shutdown, periodic maintenance and meta jobs
//! - `spec`: the builder to define the schedule of an individual job

mod core;
mod duty_cycle;
mod execution;
mod spec;
#[cfg(test)]
mod tests;

pub use self::core::Scheduler;
pub use self::spec::ScheduleSpec;
