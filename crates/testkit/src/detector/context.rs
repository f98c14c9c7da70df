use std::sync::Arc;

use gear_core::Time;
use gear_scheduler::{ActivityLang, ActivityRef, ExecutionContext, Proc};

use super::mock::DiagnosticFun;

pub const CTX_POST: &str = "CTX-post";
pub const CTX_WORK: &str = "CTX-work";
pub const CTX_DONE: &str = "CTX-done";
pub const CTX_TICK: &str = "CTX-tick";

/// Marker logged as last argument of each `post`, identifying the context.
pub const CTX_MARK: &str = "≺test::CTX≻";

/// Default scheduler time reported by a fresh context.
pub const DEFAULT_SCHED_TIME: Time = Time::new(555, 5);

/// Diagnostic [`ExecutionContext`] logging every call into the detector log.
///
/// The responses of `post` and `tick` can be rigged independently; posted
/// chains may optionally be dispatched right away, as the scheduler would
/// do once their start time is reached.
pub struct DiagnosticContext {
    pub post: Arc<DiagnosticFun<Proc>>,
    pub work: Arc<DiagnosticFun<()>>,
    pub done: Arc<DiagnosticFun<()>>,
    pub tick: Arc<DiagnosticFun<Proc>>,
    sched_time: Box<dyn FnMut() -> Time + Send>,
    dispatch_posts: bool,
}

impl DiagnosticContext {
    pub(super) fn new(
        post: Arc<DiagnosticFun<Proc>>,
        work: Arc<DiagnosticFun<()>>,
        done: Arc<DiagnosticFun<()>>,
        tick: Arc<DiagnosticFun<Proc>>,
    ) -> Self {
        Self {
            post,
            work,
            done,
            tick,
            sched_time: Box::new(|| DEFAULT_SCHED_TIME),
            dispatch_posts: false,
        }
    }

    pub fn post_returning(self, response: Proc) -> Self {
        self.post.returning(response);
        self
    }

    pub fn tick_returning(self, response: Proc) -> Self {
        self.tick.returning(response);
        self
    }

    /// Report a fixed scheduler time.
    pub fn at(self, time: Time) -> Self {
        self.with_sched_time(move || time)
    }

    /// Compute the scheduler time on each access.
    pub fn with_sched_time(mut self, clock: impl FnMut() -> Time + Send + 'static) -> Self {
        self.sched_time = Box::new(clock);
        self
    }

    /// Dispatch each posted chain immediately within the `post` call.
    pub fn dispatching_posts(mut self) -> Self {
        self.dispatch_posts = true;
        self
    }
}

/// Label of a posted chain: the diagnostic of a hook, else the Activity itself.
fn posted_label(chain: &ActivityRef) -> String {
    match chain.callback().and_then(|callback| callback.hook.as_ref()) {
        Some(hook) => hook.diagnostic(),
        None => chain.to_string(),
    }
}

impl ExecutionContext for DiagnosticContext {
    fn post(&mut self, when: Time, dead: Time, chain: &ActivityRef) -> Proc {
        let label = posted_label(chain);
        let res = self.post.call(&[&when, &dead, &label, &CTX_MARK]);
        if self.dispatch_posts && res == Proc::Pass {
            ActivityLang::dispatch_chain(chain, self)
        } else {
            res
        }
    }

    fn work(&mut self, now: Time, qualifier: usize) {
        self.work.call(&[&now, &qualifier]);
    }

    fn done(&mut self, now: Time, qualifier: usize) {
        self.done.call(&[&now, &qualifier]);
    }

    fn tick(&mut self, now: Time) -> Proc {
        self.tick.call(&[&now])
    }

    fn sched_time(&mut self) -> Time {
        (self.sched_time)()
    }
}
