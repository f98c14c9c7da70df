use gear_core::{RealClock, Time};
use tracing::{debug, error, info};

use super::core::Scheduler;
use crate::error::Result;
use crate::job::{Job, ManifestationId};
use crate::scheduler::invocation::ActivationEvent;
use crate::scheduler::load_control::WORK_HORIZON;
use crate::scheduler::observer::EngineEvent;

impl Scheduler {
    /// Start processing: establish the duty cycle and activate the workers.
    pub fn ignite(&self) {
        self.log_startup();
        self.handle_duty_cycle(RealClock::now(), true);
        if !self.empty() {
            self.work_force.activate(1.0);
        }
    }

    /// Stop all workers and discard pending work.
    ///
    /// Blocks until the work force has shut down; must not be called from a job.
    pub fn terminate_processing(&self) {
        info!("Scheduler shutdown requested");
        self.work_force.await_shutdown();
        self.layer1.discard_schedule();
        info!("Scheduler stopped");
    }

    /// Set up a new calculation stream, driven by a planning job.
    ///
    /// The planning job is responsible for scheduling the calculations and
    /// its own continuation through [`continue_meta_job`](Self::continue_meta_job).
    pub fn seed_calc_stream(&self, planning_job: Job, manifestation: ManifestationId, expected_fps: f64) -> Result<()> {
        let _guard = self.layer2.require_grooming_token_here();
        self.layer1.activate(manifestation);
        self.activity_lang.announce_load(expected_fps);
        self.continue_meta_job(RealClock::now(), planning_job, manifestation)
    }

    /// Place the follow-up of a planning job into the timeline.
    pub fn continue_meta_job(&self, next_start: Time, planning_job: Job, manifestation: ManifestationId) -> Result<()> {
        let deadline = next_start + self.config.duty_cycle_tolerance();
        let term = self
            .activity_lang
            .build_meta_job(planning_job, next_start, deadline)?;
        let event = ActivationEvent::new(term.post().clone(), next_start, deadline)
            .with_manifestation(manifestation)
            .compulsory(true);
        self.post_chain(event)
    }

    /// Withdraw a calculation stream; its pending entries are discarded.
    pub fn withdraw_manifestation(&self, manifestation: ManifestationId) {
        self.layer1.deactivate(manifestation);
    }

    /// Periodic maintenance, run from the compulsory `TICK`.
    ///
    /// Purges outdated entries, releases allocator epochs and updates the
    /// load state; posts the next tick as long as work remains queued.
    pub(super) fn handle_duty_cycle(&self, now: Time, force_continuation: bool) {
        let _guard = self.layer2.require_grooming_token_here();

        while self.layer1.is_outdated(now) {
            match self.layer1.pull_head() {
                Some(event) => self.handle_discarded(event, now),
                None => break,
            }
        }
        self.activity_lang.discard_before(now);
        self.load_control.update_state(now);
        self.update_metrics(|m| m.duty_cycles += 1);

        if !self.empty() || force_continuation {
            let next_tick = now
                + if force_continuation {
                    WORK_HORIZON
                } else {
                    self.config.duty_cycle_period()
                };
            let deadline = next_tick + self.config.duty_cycle_tolerance();
            match self.activity_lang.create_tick(deadline) {
                Ok(tick) => {
                    let event = ActivationEvent::new(tick, next_tick, deadline).compulsory(true);
                    self.layer2.post_chain(event, &self.layer1);
                }
                Err(e) => self.emergency(format!("unable to continue duty cycle: {e}"), now),
            }
        }
    }

    pub(super) fn maybe_scale_work_force(&self, start_horizon: Time, now: Time) {
        if self.empty() {
            self.ignite();
        } else {
            self.load_control.ensure_capacity(start_horizon, now);
        }
    }

    pub(super) fn handle_worker_termination(&self, is_failure: bool) {
        self.update_metrics(|m| m.record_worker_exit(is_failure));
        if is_failure {
            self.emergency("worker failure".to_string(), RealClock::now());
        } else {
            debug!("Worker dismissed, {} remaining", self.work_force.size().saturating_sub(1));
            self.load_control.mark_worker_exit();
        }
    }

    /// Scheduler integrity is compromised; report and carry on.
    pub(super) fn emergency(&self, reason: String, now: Time) {
        error!("Scheduler emergency at {}: {}", now, reason);
        self.update_metrics(|m| m.emergencies += 1);
        self.engine_observer
            .dispatch_event(0, &EngineEvent::Emergency { reason, time: now });
    }
}
