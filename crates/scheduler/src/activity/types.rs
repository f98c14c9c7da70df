use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use gear_core::Time;

use super::hook::Hook;
use crate::block_flow::{ActivityRef, LinkCell};
use crate::job::{InvocationInstanceId, JobFunctor};

/// Result instruction from activating an Activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proc {
    /// Continue with the chain.
    Pass,
    /// Skip the rest of this chain; not an error.
    Skip,
    /// Nothing to do, the worker may go idle.
    Wait,
    /// Contention detected, the worker should back off.
    Kick,
    /// Abort the chain.
    Kill,
    /// Terminate the worker.
    Halt,
}

/// Discriminator of the Activity verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Dispatch the job functor.
    Invoke,
    /// Signal start of computational work.
    WorkStart,
    /// Signal completion of computational work.
    WorkStop,
    /// Push a notification towards another Activity.
    Notify,
    /// Dependency countdown with deadline.
    Gate,
    /// Post a message to the scheduler, including a time window.
    Post,
    /// Extension point, forwarding to an attached [`Hook`].
    Hook,
    /// Internal engine heartbeat.
    Tick,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verb::Invoke => "INVOKE",
            Verb::WorkStart => "WORKSTART",
            Verb::WorkStop => "WORKSTOP",
            Verb::Notify => "NOTIFY",
            Verb::Gate => "GATE",
            Verb::Post => "POST",
            Verb::Hook => "HOOK",
            Verb::Tick => "TICK",
        };
        f.write_str(name)
    }
}

/// Payload of `INVOKE`.
#[derive(Clone)]
pub struct Invocation {
    pub functor: Arc<dyn JobFunctor>,
    pub nominal_time: Time,
    pub invo_key: InvocationInstanceId,
}

/// Payload of `WORKSTART` / `WORKSTOP`.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub quality: usize,
}

/// Payload of `NOTIFY`: the Activity to notify and a start-time hint.
pub struct Notification {
    pub target: LinkCell,
    timing: AtomicI64,
}

impl Notification {
    pub fn new(target: Option<&ActivityRef>, timing: Time) -> Self {
        Self {
            target: LinkCell::new(target),
            timing: AtomicI64::new(timing.micros()),
        }
    }

    pub fn timing(&self) -> Time {
        Time::from_micros(self.timing.load(Ordering::Relaxed))
    }

    /// Re-target this notification.
    pub fn set_target(&self, target: &ActivityRef, timing: Time) {
        self.timing.store(timing.micros(), Ordering::Relaxed);
        self.target.set(Some(target));
    }
}

const LOCKED: u64 = 1;

/// Payload of `GATE`: countdown of outstanding prerequisites and deadline.
///
/// `rest` and the permanent lock share one atomic word, so the transition
/// to zero on notification and the lock are a single atomic step; the gate
/// can thus open at most once.
pub struct Condition {
    state: AtomicU64,
    dead: AtomicI64,
}

impl Condition {
    pub fn new(rest: u32, dead: Time) -> Self {
        Self {
            state: AtomicU64::new(u64::from(rest) << 1),
            dead: AtomicI64::new(dead.micros()),
        }
    }

    pub fn rest(&self) -> u32 {
        (self.state.load(Ordering::Acquire) >> 1) as u32
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Acquire) & LOCKED != 0
    }

    /// Deadline of the gate; `Time::MIN` once locked permanently.
    pub fn deadline(&self) -> Time {
        if self.is_locked() {
            Time::MIN
        } else {
            Time::from_micros(self.dead.load(Ordering::Relaxed))
        }
    }

    pub fn is_hold(&self) -> bool {
        self.rest() > 0
    }

    pub fn is_dead(&self, now: Time) -> bool {
        self.deadline() <= now
    }

    pub fn is_free(&self, now: Time) -> bool {
        !self.is_hold() && !self.is_dead(now)
    }

    pub fn inc_dependencies(&self) {
        self.state.fetch_add(1 << 1, Ordering::AcqRel);
    }

    /// Regular activation: pass only when free.
    pub(crate) fn check_activation(&self, now: Time) -> Proc {
        if self.is_free(now) {
            Proc::Pass
        } else {
            Proc::Skip
        }
    }

    /// Count down one prerequisite, even past the deadline. The notification
    /// bringing the count to zero on a live gate locks it and passes.
    pub(crate) fn receive_notification(&self, now: Time) -> Proc {
        let dead = Time::from_micros(self.dead.load(Ordering::Relaxed));
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let rest = current >> 1;
            if current & LOCKED != 0 || rest == 0 {
                return Proc::Skip;
            }
            let rest = rest - 1;
            let opens = rest == 0 && now < dead;
            let next = if opens { LOCKED } else { rest << 1 };
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) if opens => return Proc::Pass,
                Ok(_) => return Proc::Skip,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, until {}>", self.rest(), self.deadline())
    }
}

/// Payload of `POST`: admissible activation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub life: Time,
    pub dead: Time,
}

/// Payload of `HOOK`: extension point with an argument.
#[derive(Clone, Default)]
pub struct Callback {
    pub hook: Option<Arc<dyn Hook>>,
    pub arg: u64,
}

/// Verb-specific payload of an Activity.
pub enum Payload {
    Invoke(Invocation),
    WorkStart(Timing),
    WorkStop(Timing),
    Notify(Notification),
    Gate(Condition),
    Post(TimeWindow),
    Hook(Callback),
    Tick,
}

impl Payload {
    pub fn verb(&self) -> Verb {
        match self {
            Payload::Invoke(_) => Verb::Invoke,
            Payload::WorkStart(_) => Verb::WorkStart,
            Payload::WorkStop(_) => Verb::WorkStop,
            Payload::Notify(_) => Verb::Notify,
            Payload::Gate(_) => Verb::Gate,
            Payload::Post(_) => Verb::Post,
            Payload::Hook(_) => Verb::Hook,
            Payload::Tick => Verb::Tick,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Invoke(invo) => write!(
                f,
                "{}, nominal {}, key {}",
                invo.functor.diagnostic(),
                invo.nominal_time,
                invo.invo_key
            ),
            Payload::WorkStart(timing) | Payload::WorkStop(timing) => write!(f, "quality {}", timing.quality),
            Payload::Notify(notification) => match notification.target.get() {
                Some(target) => write!(f, "→ {}, timing {}", target.verb(), notification.timing()),
                None => write!(f, "→ ⟂"),
            },
            Payload::Gate(condition) => write!(f, "{condition}"),
            Payload::Post(window) => write!(f, "[{} ... {}]", window.life, window.dead),
            Payload::Hook(callback) => match &callback.hook {
                Some(hook) => write!(f, "{}, arg {}", hook.diagnostic(), callback.arg),
                None => write!(f, "⟂, arg {}", callback.arg),
            },
            Payload::Tick => Ok(()),
        }
    }
}
