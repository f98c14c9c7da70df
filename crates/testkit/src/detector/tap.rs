use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use gear_core::Time;
use gear_scheduler::{ActivityRef, ExecutionContext, Hook, Proc};

use super::log::EventLog;

/// Hook placed in front of a subject Activity, logging each activation and
/// notification before forwarding it. Without a subject it acts as a
/// plain probe that just records being reached.
pub(super) struct ActivationTap {
    id: String,
    subject: Option<ActivityRef>,
    log: EventLog,
    seq: Arc<AtomicU32>,
    last_invoked: AtomicI64,
}

impl ActivationTap {
    pub(super) fn new(id: &str, subject: Option<ActivityRef>, log: EventLog, seq: Arc<AtomicU32>) -> Self {
        Self {
            id: id.to_string(),
            subject,
            log,
            seq,
            last_invoked: AtomicI64::new(Time::NEVER.micros()),
        }
    }

    /// Time of the most recent activation or notification.
    pub(super) fn invoke_time(&self) -> Time {
        Time::from_micros(self.last_invoked.load(Ordering::SeqCst))
    }

    fn target_label(&self) -> String {
        match &self.subject {
            Some(subject) => subject.to_string(),
            None => self.id.clone(),
        }
    }

    fn record(&self, now: Time, arrow: &str) {
        self.last_invoked.store(now.micros(), Ordering::SeqCst);
        self.log.call(
            &self.id,
            vec![format!("{now} {arrow} {}", self.target_label())],
            self.seq.load(Ordering::SeqCst),
        );
    }
}

impl Hook for ActivationTap {
    fn activation(&self, _this_hook: &ActivityRef, now: Time, ctx: &mut dyn ExecutionContext) -> Proc {
        self.record(now, "⧐");
        match &self.subject {
            Some(subject) => subject.activate(now, ctx),
            None => Proc::Pass,
        }
    }

    fn notify(&self, _this_hook: &ActivityRef, now: Time, ctx: &mut dyn ExecutionContext) -> Proc {
        self.record(now, "--notify-↯>");
        match &self.subject {
            Some(subject) => subject.dispatch(now, ctx),
            None => Proc::Pass,
        }
    }

    fn deadline(&self) -> Time {
        self.subject
            .as_ref()
            .and_then(|subject| subject.notification_deadline())
            .unwrap_or(Time::NEVER)
    }

    fn diagnostic(&self) -> String {
        self.id.clone()
    }
}
