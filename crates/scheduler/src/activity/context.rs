use gear_core::Time;

use super::types::Proc;
use crate::block_flow::ActivityRef;

/// Capability interface an Activity uses to reach its execution environment.
///
/// Implemented by the scheduler for production dispatch and by diagnostic
/// fakes in tests. All calls happen synchronously on the dispatching thread.
pub trait ExecutionContext {
    /// Request (re)activation of `chain` within the time window `[when, dead]`.
    fn post(&mut self, when: Time, dead: Time, chain: &ActivityRef) -> Proc;

    /// Computational work is about to start.
    fn work(&mut self, now: Time, qualifier: usize);

    /// Computational work has completed.
    fn done(&mut self, now: Time, qualifier: usize);

    /// Scheduler heartbeat; `Kill` aborts the ticking chain.
    fn tick(&mut self, now: Time) -> Proc;

    /// Current scheduler time.
    fn sched_time(&mut self) -> Time;
}
