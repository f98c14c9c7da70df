//! Building blocks to express render jobs as Activity chains.
//!
//! [`ActivityLang`] allocates Activities from the [`BlockFlow`] and wires
//! them into [`Term`]s following one of the job [`Template`]s. It also
//! provides [`ActivityLang::dispatch_chain`], the common entry point to
//! perform a chain of Activities.

mod term;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use gear_core::Time;

use crate::activity::{Activity, ExecutionContext, Proc};
use crate::block_flow::{ActivityRef, BlockFlow};
use crate::error::Result;
use crate::job::Job;

pub use term::{find_verb, Template, Term};

/// Front-end to define and perform Activity chains.
#[derive(Clone)]
pub struct ActivityLang {
    mem: Arc<BlockFlow>,
}

impl ActivityLang {
    pub fn new(mem: Arc<BlockFlow>) -> Self {
        Self { mem }
    }

    pub fn block_flow(&self) -> &Arc<BlockFlow> {
        &self.mem
    }

    pub fn build_calculation_job(&self, job: Job, start: Time, dead: Time) -> Result<Term> {
        self.setup_term(Template::CalcJob, job, start, dead)
    }

    pub fn build_async_load_job(&self, job: Job, start: Time, dead: Time) -> Result<Term> {
        self.setup_term(Template::LoadJob, job, start, dead)
    }

    pub fn build_meta_job(&self, job: Job, start: Time, dead: Time) -> Result<Term> {
        self.setup_term(Template::MetaJob, job, start, dead)
    }

    fn setup_term(&self, kind: Template, job: Job, start: Time, dead: Time) -> Result<Term> {
        Term::build(self.mem.until(dead)?, kind, start, dead, job)
    }

    /// Scheduler heartbeat Activity.
    pub fn create_tick(&self, dead: Time) -> Result<ActivityRef> {
        self.mem.until(dead)?.create(Activity::tick())
    }

    /// Release allocations for Activities with deadline before the given time.
    pub fn discard_before(&self, cut_off: Time) {
        self.mem.discard_before(cut_off);
    }

    /// Announce additional load, given in frames per second.
    pub fn announce_load(&self, fps: f64) {
        self.mem.announce_additional_flow(fps);
    }

    /// Perform a chain of Activities.
    ///
    /// The head is *dispatched*, so a notification targeted at a gate
    /// counts down the gate; subsequent Activities are *activated* as long
    /// as each passes. `Skip` ends the chain regularly and yields `Pass`.
    pub fn dispatch_chain(chain: &ActivityRef, ctx: &mut dyn ExecutionContext) -> Proc {
        let now = ctx.sched_time();
        let mut res = chain.dispatch(now, ctx);
        let mut current = chain.clone();
        while res == Proc::Pass {
            let Some(next) = current.next() else { break };
            res = next.activate(now, ctx);
            current = next;
        }
        match res {
            Proc::Skip => Proc::Pass,
            other => other,
        }
    }
}
