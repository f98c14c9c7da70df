use chrono::Utc;
use gear_core::{RealClock, Time};
use tracing::{debug, trace, warn};

use super::core::Scheduler;
use crate::activity::{ExecutionContext, Proc};
use crate::activity_lang::ActivityLang;
use crate::block_flow::ActivityRef;
use crate::error::{Result, SchedulerError};
use crate::scheduler::invocation::ActivationEvent;
use crate::scheduler::observer::EngineEvent;

impl Scheduler {
    /// Worker entry point: retrieve and dispatch due work, or direct the
    /// calling capacity elsewhere.
    pub fn do_work(&self) -> Proc {
        self.layer2.dispatch_capacity(
            &self.layer1,
            &self.load_control,
            |event| self.perform_chain(event),
            |event| self.handle_discarded(event, RealClock::now()),
            RealClock::now,
        )
    }

    /// Enqueue a chain for activation, scaling up the work force as needed.
    pub(crate) fn post_chain(&self, event: ActivationEvent) -> Result<()> {
        let now = RealClock::now();
        self.sanity_check(&event, now)?;
        self.maybe_scale_work_force(event.starting, now);
        self.layer2.post_chain(event, &self.layer1);
        Ok(())
    }

    /// Reject activation windows the scheduler cannot honour.
    pub(super) fn sanity_check(&self, event: &ActivationEvent, now: Time) -> Result<()> {
        if !event.starting.is_regular() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "undefined start time for {}",
                event.activity
            )));
        }
        if !event.deadline.is_regular() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "undefined deadline for {}",
                event.activity
            )));
        }
        let ahead = event.deadline - now;
        if ahead > self.config.future_planning_limit() {
            return Err(SchedulerError::PlanningLimit {
                deadline: event.deadline,
                ahead,
            });
        }
        Ok(())
    }

    fn perform_chain(&self, event: ActivationEvent) -> Proc {
        self.update_metrics(|m| m.record_dispatch(Utc::now()));
        let chain = event.activity.clone();
        trace!("dispatch {} @{}", chain, event.starting);
        let mut ctx = ExecutionCtx {
            scheduler: self,
            root_event: event,
        };
        match ActivityLang::dispatch_chain(&chain, &mut ctx) {
            Proc::Kill => {
                self.report_abort(&chain, RealClock::now());
                Proc::Pass
            }
            res => res,
        }
    }

    fn report_abort(&self, chain: &ActivityRef, now: Time) {
        warn!("Activity chain aborted at {}: {}", now, chain);
        self.update_metrics(|m| m.chains_aborted += 1);
        self.engine_observer.dispatch_event(
            0,
            &EngineEvent::ChainAborted {
                activity: chain.to_string(),
                time: now,
            },
        );
    }

    /// Dispose of an entry removed from the queue without being dispatched.
    pub(super) fn handle_discarded(&self, event: ActivationEvent, now: Time) {
        if !self.layer1.is_activated(event.manifestation) {
            debug!("Discard {} of withdrawn {:?}", event.activity, event.manifestation);
            self.update_metrics(|m| m.discarded_inactive += 1);
            return;
        }
        self.record_deadline_miss(event.activity.to_string(), event.starting, event.deadline, now, event.compulsory);
    }

    /// Report work which never became eligible for dispatch before its
    /// deadline, e.g. a chain held by a gate which was never opened.
    pub fn report_deadline_miss(&self, activity: impl Into<String>, start: Time, deadline: Time) {
        self.record_deadline_miss(activity.into(), start, deadline, RealClock::now(), false);
    }

    fn record_deadline_miss(&self, activity: String, start: Time, deadline: Time, now: Time, compulsory: bool) {
        warn!("Deadline {} missed at {} for {} (start {})", deadline, now, activity, start);
        self.update_metrics(|m| m.deadline_misses += 1);
        let reason = compulsory.then(|| format!("compulsory {activity} out of time"));
        self.engine_observer.dispatch_event(
            0,
            &EngineEvent::DeadlineMissed {
                activity,
                start,
                deadline,
                now,
                compulsory,
            },
        );
        if let Some(reason) = reason {
            self.emergency(reason, now);
        }
    }
}

/// Execution context handed to a chain taken from the queue.
///
/// Follow-up posts inherit the significance of the root event.
pub(super) struct ExecutionCtx<'s> {
    pub(super) scheduler: &'s Scheduler,
    pub(super) root_event: ActivationEvent,
}

impl ExecutionContext for ExecutionCtx<'_> {
    fn post(&mut self, when: Time, dead: Time, chain: &ActivityRef) -> Proc {
        let mut event = self.root_event.clone();
        event.refine_to(chain, when, dead);
        let scheduler = self.scheduler;
        if let Err(e) = scheduler.sanity_check(&event, RealClock::now()) {
            warn!("Rejected follow-up {}: {}", chain, e);
            return Proc::Kill;
        }
        scheduler.layer2.post_chain(event, &scheduler.layer1)
    }

    fn work(&mut self, now: Time, qualifier: usize) {
        self.scheduler.layer2.drop_grooming_token();
        self.scheduler
            .engine_observer
            .dispatch_event(qualifier, &EngineEvent::WorkStart { time: now });
    }

    fn done(&mut self, now: Time, qualifier: usize) {
        self.scheduler
            .engine_observer
            .dispatch_event(qualifier, &EngineEvent::WorkStop { time: now });
    }

    fn tick(&mut self, now: Time) -> Proc {
        self.scheduler.handle_duty_cycle(now, false);
        Proc::Pass
    }

    fn sched_time(&mut self) -> Time {
        RealClock::now()
    }
}
