use std::fmt;

use gear_core::Time;

use crate::activity::{Activity, Verb};
use crate::block_flow::{ActivityRef, AllocatorHandle};
use crate::error::{Result, SchedulerError};
use crate::job::Job;

/// Wiring scheme for the Activities of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// `POST → GATE → WORKSTART → INVOKE → WORKSTOP`
    CalcJob,
    /// `POST → WORKSTART → INVOKE`, completed by the `WORKSTOP` callback.
    LoadJob,
    /// `POST → INVOKE`
    MetaJob,
}

/// A connected chain of Activities, built from a [`Template`].
///
/// The Activities themselves live in the allocator; the Term only holds
/// handles to the points of interest and remains usable to wire up
/// dependencies until it is dropped.
pub struct Term {
    alloc: AllocatorHandle,
    invoke: ActivityRef,
    post: ActivityRef,
    gate: Option<ActivityRef>,
    callback: Option<ActivityRef>,
}

impl Term {
    pub(crate) fn build(mut alloc: AllocatorHandle, kind: Template, start: Time, dead: Time, job: Job) -> Result<Self> {
        let invoke = alloc.create(Activity::from_job(job))?;
        let post = alloc.create(Activity::post(start, dead).followed_by(&invoke))?;
        let mut term = Self {
            alloc,
            invoke,
            post,
            gate: None,
            callback: None,
        };
        term.configure_template(kind)?;
        Ok(term)
    }

    /// Entrance point: the `POST` Activity heading the chain.
    pub fn post(&self) -> &ActivityRef {
        &self.post
    }

    pub fn invoke(&self) -> &ActivityRef {
        &self.invoke
    }

    pub fn gate(&self) -> Option<&ActivityRef> {
        self.gate.as_ref()
    }

    /// Completion chain of an async load job.
    pub fn callback(&self) -> Result<&ActivityRef> {
        self.callback
            .as_ref()
            .ok_or_else(|| SchedulerError::InvalidSchedule("Term not configured for async IO".into()))
    }

    /// Let this Term wait for the given `NOTIFY` before passing its gate.
    pub fn expect_notification(&mut self, notification_src: &ActivityRef, unlimited_time: bool) -> Result<&mut Self> {
        let Some(notification) = notification_src.notification() else {
            return Err(SchedulerError::InvalidSchedule(format!(
                "{notification_src} is not a notification"
            )));
        };
        let gate = self.setup_gate()?;
        if let Some(condition) = gate.condition() {
            condition.inc_dependencies();
        }
        let trigger_start = match (unlimited_time, self.post.time_window()) {
            (false, Some(window)) => window.life,
            _ => Time::ANYTIME,
        };
        notification.set_target(&gate, trigger_start);
        Ok(self)
    }

    /// Notify the target Term once this Term's work is done.
    pub fn append_notification_to(&mut self, target: &mut Term, unlimited_time: bool) -> Result<&mut Self> {
        let success = self.alloc.create(Activity::notify(None, Time::ANYTIME))?;
        let anchor = self.callback.as_ref().unwrap_or(&self.invoke);
        insert(&find_tail(anchor), &success);
        target.expect_notification(&success, unlimited_time)?;
        Ok(self)
    }

    /// Block this Term on an explicit notification, triggered from the chain itself.
    pub fn require_direct_activation(&mut self) -> Result<&mut Self> {
        let trigger = self.alloc.create(Activity::notify(None, Time::ANYTIME))?;
        self.expect_notification(&trigger, false)?;
        insert(&self.post, &trigger);
        Ok(self)
    }

    fn configure_template(&mut self, kind: Template) -> Result<()> {
        match kind {
            Template::CalcJob => {
                self.setup_gate()?;
                self.insert_work_bracket()?;
            }
            Template::LoadJob => {
                self.insert_work_bracket()?;
                self.sever_async_chain();
            }
            Template::MetaJob => {}
        }
        Ok(())
    }

    fn setup_gate(&mut self) -> Result<ActivityRef> {
        if let Some(gate) = &self.gate {
            return Ok(gate.clone());
        }
        let dead = self.post.time_window().map_or(Time::NEVER, |window| window.dead);
        let gate = self.alloc.create(Activity::gate(0, dead))?;
        insert(&self.post, &gate);
        self.gate = Some(gate.clone());
        Ok(gate)
    }

    fn insert_work_bracket(&mut self) -> Result<()> {
        let start = self.alloc.create(Activity::work_start(0))?;
        let stop = self.alloc.create(Activity::work_stop(0))?;
        insert(self.gate.as_ref().unwrap_or(&self.post), &start);
        insert(&find_tail(&start), &stop);
        Ok(())
    }

    fn sever_async_chain(&mut self) {
        if self.callback.is_some() {
            return;
        }
        self.callback = self.invoke.next();
        self.invoke.set_next(None);
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Term-{}⧐{}", *self.post, *self.invoke)
    }
}

fn insert(anchor: &ActivityRef, target: &ActivityRef) {
    target.set_next(anchor.next().as_ref());
    anchor.set_next(Some(target));
}

fn find_tail(chain: &ActivityRef) -> ActivityRef {
    let mut tail = chain.clone();
    while let Some(next) = tail.next() {
        tail = next;
    }
    tail
}

/// Follow the chain until an Activity with the given verb is found.
pub fn find_verb(chain: &ActivityRef, verb: Verb) -> Option<ActivityRef> {
    let mut current = Some(chain.clone());
    while let Some(act) = current {
        if act.is(verb) {
            return Some(act);
        }
        current = act.next();
    }
    None
}
