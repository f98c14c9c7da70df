use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use gear_core::Time;
use tracing::{trace, warn};

use super::context::ExecutionContext;
use super::hook::Hook;
use super::types::{Callback, Condition, Invocation, Notification, Payload, Proc, TimeWindow, Timing, Verb};
use crate::block_flow::{ActivityRef, LinkCell};
use crate::job::{InvocationInstanceId, Job, JobFunctor, JobParameter};

/// Atomic scheduling step: a verb with payload, chained through `next`.
///
/// Activities live in the [`BlockFlow`](crate::block_flow::BlockFlow)
/// allocator and are addressed through [`ActivityRef`] handles; the `next`
/// link is non-owning.
pub struct Activity {
    payload: Payload,
    next: LinkCell,
}

impl Default for Activity {
    fn default() -> Self {
        Self::tick()
    }
}

impl Activity {
    fn with(payload: Payload) -> Self {
        Self {
            payload,
            next: LinkCell::default(),
        }
    }

    pub fn invoke(functor: Arc<dyn JobFunctor>, nominal_time: Time, invo_key: InvocationInstanceId) -> Self {
        Self::with(Payload::Invoke(Invocation {
            functor,
            nominal_time,
            invo_key,
        }))
    }

    pub fn from_job(job: Job) -> Self {
        Self::invoke(job.functor, job.parameter.nominal_time, job.parameter.invo_key)
    }

    pub fn work_start(quality: usize) -> Self {
        Self::with(Payload::WorkStart(Timing { quality }))
    }

    pub fn work_stop(quality: usize) -> Self {
        Self::with(Payload::WorkStop(Timing { quality }))
    }

    pub fn notify(target: Option<&ActivityRef>, timing: Time) -> Self {
        Self::with(Payload::Notify(Notification::new(target, timing)))
    }

    pub fn gate(rest: u32, dead: Time) -> Self {
        Self::with(Payload::Gate(Condition::new(rest, dead)))
    }

    pub fn post(life: Time, dead: Time) -> Self {
        Self::with(Payload::Post(TimeWindow { life, dead }))
    }

    pub fn hook(hook: Arc<dyn Hook>, arg: u64) -> Self {
        Self::with(Payload::Hook(Callback { hook: Some(hook), arg }))
    }

    pub fn tick() -> Self {
        Self::with(Payload::Tick)
    }

    /// Set the successor link at construction.
    pub fn followed_by(self, next: &ActivityRef) -> Self {
        self.next.set(Some(next));
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn verb(&self) -> Verb {
        self.payload.verb()
    }

    pub fn is(&self, verb: Verb) -> bool {
        self.verb() == verb
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Successor in the chain, if set and still alive.
    pub fn next(&self) -> Option<ActivityRef> {
        self.next.get()
    }

    pub fn set_next(&self, next: Option<&ActivityRef>) {
        self.next.set(next);
    }

    pub fn next_link(&self) -> &LinkCell {
        &self.next
    }

    pub fn condition(&self) -> Option<&Condition> {
        match &self.payload {
            Payload::Gate(condition) => Some(condition),
            _ => None,
        }
    }

    pub fn notification(&self) -> Option<&Notification> {
        match &self.payload {
            Payload::Notify(notification) => Some(notification),
            _ => None,
        }
    }

    pub fn time_window(&self) -> Option<TimeWindow> {
        match &self.payload {
            Payload::Post(window) => Some(*window),
            _ => None,
        }
    }

    pub fn invocation(&self) -> Option<&Invocation> {
        match &self.payload {
            Payload::Invoke(invocation) => Some(invocation),
            _ => None,
        }
    }

    pub fn callback(&self) -> Option<&Callback> {
        match &self.payload {
            Payload::Hook(callback) => Some(callback),
            _ => None,
        }
    }

    /// Deadline relevant when notifications are posted towards this Activity.
    pub fn notification_deadline(&self) -> Option<Time> {
        match &self.payload {
            Payload::Gate(condition) => Some(condition.deadline()),
            Payload::Hook(callback) => Some(callback.hook.as_ref().map_or(Time::NEVER, |hook| hook.deadline())),
            _ => None,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload {
            Payload::Tick => write!(f, "Act({})", self.verb()),
            _ => write!(f, "Act({}: {})", self.verb(), self.payload),
        }
    }
}

// ── Activation and dispatch ──────────────────────────────────────────

impl ActivityRef {
    /// Regular activation as part of a chain.
    pub fn activate(&self, now: Time, ctx: &mut dyn ExecutionContext) -> Proc {
        match self.payload() {
            Payload::Invoke(invocation) => invoke_functor(invocation),
            Payload::WorkStart(timing) => {
                ctx.work(now, timing.quality);
                Proc::Pass
            }
            Payload::WorkStop(timing) => {
                ctx.done(now, timing.quality);
                Proc::Pass
            }
            Payload::Notify(notification) => post_notification(notification, now, ctx),
            Payload::Gate(condition) => condition.check_activation(now),
            Payload::Post(window) => ctx.post(window.life, window.dead, self),
            Payload::Hook(callback) => match &callback.hook {
                Some(hook) => hook.activation(self, now, ctx),
                None => Proc::Pass,
            },
            Payload::Tick => ctx.tick(now),
        }
    }

    /// Dispatch as head of a chain taken from the scheduler queue.
    ///
    /// A `GATE` dispatched this way receives a notification; a `POST` has
    /// already been honoured by the queue and simply passes.
    pub fn dispatch(&self, now: Time, ctx: &mut dyn ExecutionContext) -> Proc {
        match self.payload() {
            Payload::Post(_) => Proc::Pass,
            Payload::Gate(condition) => condition.receive_notification(now),
            Payload::Hook(callback) => match &callback.hook {
                Some(hook) => hook.notify(self, now, ctx),
                None => Proc::Pass,
            },
            _ => self.activate(now, ctx),
        }
    }
}

fn invoke_functor(invocation: &Invocation) -> Proc {
    let param = JobParameter {
        nominal_time: invocation.nominal_time,
        invo_key: invocation.invo_key,
    };
    let functor = &invocation.functor;
    match catch_unwind(AssertUnwindSafe(|| functor.invoke_job_operation(param))) {
        Ok(Ok(())) => Proc::Pass,
        Ok(Err(e)) => {
            warn!("Job {} failed at {}: {}", functor.diagnostic(), param.nominal_time, e);
            Proc::Kill
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("Job {} panicked at {}: {}", functor.diagnostic(), param.nominal_time, reason);
            Proc::Kill
        }
    }
}

fn post_notification(notification: &Notification, now: Time, ctx: &mut dyn ExecutionContext) -> Proc {
    let Some(target) = notification.target.get() else {
        trace!("Notification target gone, nothing to notify");
        return Proc::Pass;
    };
    match target.notification_deadline() {
        Some(dead) => ctx.post(notification.timing(), dead, &target),
        None => ctx.post(now, Time::NEVER, &target),
    }
}
