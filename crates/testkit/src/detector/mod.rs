//! Diagnostic setup to observe Activities and their interplay with the
//! execution environment.
//!
//! An [`ActivityDetector`] owns an [`EventLog`] and hands out
//! instrumentation which logs into it:
//! - `context`: a [`DiagnosticContext`] with rigged responses
//! - `mock`: diagnostic functions and mock job functors
//! - `tap`: activation probes and taps spliced into Activity chains
//! - `matcher`: the [`ActivityMatch`] query over the log
//!
//! Each log entry carries the current sequence number, which the test
//! advances with [`ActivityDetector::increment_seq`] to separate phases.

mod context;
mod log;
mod matcher;
mod mock;
mod tap;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use gear_core::Time;
use gear_scheduler::block_flow::LinkCell;
use gear_scheduler::{Activity, ActivityRef, InvocationInstanceId, Job, Proc, Verb};

pub use self::context::{DiagnosticContext, CTX_DONE, CTX_MARK, CTX_POST, CTX_TICK, CTX_WORK, DEFAULT_SCHED_TIME};
pub use self::log::{EntryKind, EventLog, LogEntry};
pub use self::matcher::ActivityMatch;
pub use self::mock::{DiagnosticFun, MockJobFunctor};

use self::tap::ActivationTap;

const MARK_INC: &str = "IncSeq";

/// Test helper to record and verify Activity invocations.
pub struct ActivityDetector {
    id: String,
    log: EventLog,
    seq: Arc<AtomicU32>,
    /// Probes and taps are only weakly linked into chains; held alive here.
    taps: Mutex<Vec<(ActivityRef, Arc<ActivationTap>)>>,
}

impl Default for ActivityDetector {
    fn default() -> Self {
        Self::new("")
    }
}

impl ActivityDetector {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            log: EventLog::new(),
            seq: Arc::new(AtomicU32::new(0)),
            taps: Mutex::new(Vec::new()),
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    // ── Sequence ─────────────────────────────────────────────────

    /// Advance the sequence number, logging the increment as an event.
    pub fn increment_seq(&self) -> u32 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.event(MARK_INC, vec![seq.to_string()], seq);
        seq
    }

    pub fn mark_sequence(&self) -> u32 {
        self.increment_seq()
    }

    pub fn curr_seq(&self) -> u32 {
        self.seq.load(Ordering::SeqCst)
    }

    // ── Instrumentation ──────────────────────────────────────────

    /// Mock function logging its invocations under `id`.
    pub fn build_diagnostic_fun<R: Clone + Default>(&self, id: &str) -> DiagnosticFun<R> {
        DiagnosticFun::new(id, self.log.clone(), Arc::clone(&self.seq), R::default())
    }

    pub fn build_mock_job_functor(&self, id: &str) -> Arc<MockJobFunctor> {
        Arc::new(MockJobFunctor::new(id, self.log.clone(), Arc::clone(&self.seq)))
    }

    /// Job with a mock functor, logging `id(nominal_time, key)` when invoked.
    pub fn build_mock_job(&self, id: &str, nominal_time: Time, key: u64) -> Job {
        Job::new(
            self.build_mock_job_functor(id),
            InvocationInstanceId::new(key, 0),
            nominal_time,
        )
    }

    /// Fresh diagnostic execution context, logging into this detector.
    pub fn execution_ctx(&self) -> DiagnosticContext {
        DiagnosticContext::new(
            Arc::new(DiagnosticFun::new(CTX_POST, self.log.clone(), Arc::clone(&self.seq), Proc::Pass)),
            Arc::new(DiagnosticFun::new(CTX_WORK, self.log.clone(), Arc::clone(&self.seq), ())),
            Arc::new(DiagnosticFun::new(CTX_DONE, self.log.clone(), Arc::clone(&self.seq), ())),
            Arc::new(DiagnosticFun::new(CTX_TICK, self.log.clone(), Arc::clone(&self.seq), Proc::Pass)),
        )
    }

    fn build_tap(&self, id: &str, subject: Option<ActivityRef>) -> ActivityRef {
        let tap = Arc::new(ActivationTap::new(
            id,
            subject.clone(),
            self.log.clone(),
            Arc::clone(&self.seq),
        ));
        let hook = ActivityRef::new(Activity::hook(tap.clone(), 0));
        if let Some(subject) = &subject {
            hook.set_next(subject.next().as_ref());
        }
        self.taps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((hook.clone(), tap));
        hook
    }

    /// Standalone `HOOK` Activity recording each activation under `id`.
    pub fn build_activation_probe(&self, id: &str) -> ActivityRef {
        self.build_tap(id, None)
    }

    /// Time the given probe or tap was last reached; `Time::NEVER` if unknown.
    pub fn invoke_time(&self, probe: &ActivityRef) -> Time {
        self.taps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(hook, _)| hook.ptr_eq(probe))
            .map_or(Time::NEVER, |(_, tap)| tap.invoke_time())
    }

    /// Splice a tap into the given link, in front of the Activity it points to.
    ///
    /// Without explicit `id`, the tap is named `tap-VERB` after its subject.
    /// Returns the tap, or `None` when the link is empty.
    pub fn insert_activation_tap(&self, link: &LinkCell, id: Option<&str>) -> Option<ActivityRef> {
        let subject = link.get()?;
        let id = match id {
            Some(id) => id.to_string(),
            None => default_tap_id(subject.verb()),
        };
        let tap = self.build_tap(&id, Some(subject));
        link.set(Some(&tap));
        Some(tap)
    }

    /// Observe the gate behind `link`: a tap `id` in front and a probe
    /// `after-id` behind it, recording whether activation passes through.
    pub fn watch_gate(&self, link: &LinkCell, id: &str) -> Option<ActivityRef> {
        let gate = link.get()?;
        let after = self.build_tap(&format!("after-{id}"), None);
        after.set_next(gate.next().as_ref());
        gate.set_next(Some(&after));
        self.insert_activation_tap(link, Some(id))
    }

    /// Entrance Activity to drive the given gate through a `tap-GATE` tap.
    pub fn build_gate_watcher(&self, gate: &ActivityRef) -> ActivityRef {
        self.build_tap(&default_tap_id(gate.verb()), Some(gate.clone()))
    }

    // ── Verification ─────────────────────────────────────────────

    pub fn verify_invocation(&self, id: &str) -> ActivityMatch {
        let id = id.to_string();
        ActivityMatch::new(self.log.snapshot(), move |entry| entry.is_call(&id), false)
    }

    /// Holds when no matching invocation is found.
    pub fn ensure_no_invocation(&self, id: &str) -> ActivityMatch {
        let id = id.to_string();
        ActivityMatch::new(self.log.snapshot(), move |entry| entry.is_call(&id), true)
    }

    pub fn verify_seq_increment(&self, seq: u32) -> ActivityMatch {
        ActivityMatch::new(self.log.snapshot(), move |entry| matcher::is_increment(entry, seq), false)
    }

    pub fn show_log(&self) -> String {
        format!(
            "\n____Event-Log___________________________\n{}────╼━━━━━━━━╾──────────────────────────",
            self.log
        )
    }
}

fn default_tap_id(verb: Verb) -> String {
    format!("tap-{verb}")
}

impl fmt::Display for ActivityDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_empty() {
            write!(f, "ActivityDetector")?;
        } else {
            write!(f, "ActivityDetector({})", self.id)?;
        }
        write!(f, " seq={} entries={}", self.curr_seq(), self.log.len())
    }
}
