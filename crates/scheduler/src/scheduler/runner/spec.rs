use std::fmt;
use std::sync::Arc;

use gear_core::{RealClock, Time};

use super::core::Scheduler;
use crate::activity_lang::Term;
use crate::error::Result;
use crate::job::{Job, ManifestationId};
use crate::scheduler::invocation::ActivationEvent;

/// Builder to define when and how a calculation job is scheduled.
///
/// The Activity term is created lazily on first use, so all timing
/// parameters should be set before posting or linking.
///
/// ```ignore
/// let spec = scheduler
///     .define_schedule(job)
///     .start_offset(Time::from_millis(5))
///     .life_window(Time::from_millis(50))
///     .post()?;
/// ```
pub struct ScheduleSpec {
    scheduler: Arc<Scheduler>,
    job: Job,
    start: Time,
    death: Time,
    manifestation: ManifestationId,
    compulsory: bool,
    term: Option<Term>,
}

impl ScheduleSpec {
    pub(super) fn new(scheduler: Arc<Scheduler>, job: Job) -> Self {
        Self {
            scheduler,
            job,
            start: Time::ANYTIME,
            death: Time::NEVER,
            manifestation: ManifestationId::DEFAULT,
            compulsory: false,
            term: None,
        }
    }

    /// Start relative to the current time.
    pub fn start_offset(mut self, offset: Time) -> Self {
        self.start = RealClock::now() + offset;
        self
    }

    pub fn start_time(mut self, start: Time) -> Self {
        self.start = start;
        self
    }

    /// Deadline relative to the start time set so far.
    pub fn life_window(mut self, time_to_live: Time) -> Self {
        self.death = self.start + time_to_live;
        self
    }

    pub fn manifestation(mut self, manifestation: ManifestationId) -> Self {
        self.manifestation = manifestation;
        self
    }

    pub fn compulsory(mut self, indeed: bool) -> Self {
        self.compulsory = indeed;
        self
    }

    pub fn start(&self) -> Time {
        self.start
    }

    pub fn deadline(&self) -> Time {
        self.death
    }

    /// Enqueue the job with the scheduler.
    pub fn post(mut self) -> Result<Self> {
        self.build_term()?;
        if let Some(term) = &self.term {
            let event = ActivationEvent::new(term.post().clone(), self.start, self.death)
                .with_manifestation(self.manifestation)
                .compulsory(self.compulsory);
            self.scheduler.post_chain(event)?;
        }
        Ok(self)
    }

    /// Hold back the successor until this job has completed.
    pub fn link_to_successor(&mut self, succ: &mut ScheduleSpec, unlimited_time: bool) -> Result<()> {
        self.build_term()?;
        succ.build_term()?;
        if let (Some(term), Some(succ_term)) = (self.term.as_mut(), succ.term.as_mut()) {
            term.append_notification_to(succ_term, unlimited_time)?;
        }
        Ok(())
    }

    pub fn link_to_predecessor(&mut self, pred: &mut ScheduleSpec, unlimited_time: bool) -> Result<()> {
        pred.link_to_successor(self, unlimited_time)
    }

    fn build_term(&mut self) -> Result<()> {
        if self.term.is_none() {
            let term = self
                .scheduler
                .activity_lang
                .build_calculation_job(self.job.clone(), self.start, self.death)?;
            self.term = Some(term);
        }
        Ok(())
    }
}

impl fmt::Debug for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleSpec")
            .field("job", &self.job)
            .field("start", &self.start)
            .field("death", &self.death)
            .field("manifestation", &self.manifestation)
            .field("compulsory", &self.compulsory)
            .field("planned", &self.term.is_some())
            .finish()
    }
}
