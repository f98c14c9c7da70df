//! Layer 2 of the scheduler: coordinate workers retrieving and dispatching work.
//!
//! Only the thread holding the *grooming token* may take entries from the
//! queue and perform the scheduler-internal parts of an Activity chain.
//! The token is dropped as soon as the chain reaches actual computational
//! work (`WORKSTART`), so other workers can pick up the next entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use gear_core::{this_thread_key, Time};
use tracing::trace;

use super::invocation::{ActivationEvent, SchedulerInvocation};
use super::load_control::{Capacity, LoadController};
use crate::activity::Proc;

const FREE: u64 = 0;

#[derive(Default)]
pub struct SchedulerCommutator {
    grooming_token: AtomicU64,
}

/// Scope holding the grooming token; releases it on drop if acquired here.
pub struct GroomingGuard<'a> {
    commutator: &'a SchedulerCommutator,
    owned: bool,
}

impl Drop for GroomingGuard<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.commutator.drop_grooming_token();
        }
    }
}

impl SchedulerCommutator {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Grooming token ──────────────────────────────────────────────

    /// Try to acquire the token for the calling thread, without blocking.
    pub fn acquire_grooming_token(&self) -> bool {
        self.grooming_token
            .compare_exchange(FREE, this_thread_key(), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the token, if held by the calling thread.
    pub fn drop_grooming_token(&self) {
        let _ = self.grooming_token.compare_exchange(
            this_thread_key(),
            FREE,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    pub fn holds_grooming_token(&self, thread_key: u64) -> bool {
        self.grooming_token.load(Ordering::Acquire) == thread_key
    }

    pub fn holds_grooming_token_here(&self) -> bool {
        self.holds_grooming_token(this_thread_key())
    }

    /// Block until the calling thread holds the token for the current scope.
    pub fn require_grooming_token_here(&self) -> GroomingGuard<'_> {
        if self.holds_grooming_token_here() {
            return GroomingGuard {
                commutator: self,
                owned: false,
            };
        }
        while !self.acquire_grooming_token() {
            thread::yield_now();
        }
        GroomingGuard {
            commutator: self,
            owned: true,
        }
    }

    fn has_or_acquires_token(&self) -> bool {
        self.holds_grooming_token_here() || self.acquire_grooming_token()
    }

    // ── Queue access ────────────────────────────────────────────────

    /// Enqueue a chain for activation.
    pub fn post_chain(&self, event: ActivationEvent, layer1: &SchedulerInvocation) -> Proc {
        layer1.instruct(event);
        Proc::Pass
    }

    /// Retrieve the next due entry, acquiring the grooming token.
    ///
    /// Outdated entries met on the way are removed and handed to `on_discard`.
    pub fn find_work(
        &self,
        layer1: &SchedulerInvocation,
        now: Time,
        mut on_discard: impl FnMut(ActivationEvent),
    ) -> Option<ActivationEvent> {
        if !layer1.is_due(now) || !self.has_or_acquires_token() {
            return None;
        }
        while let Some(event) = layer1.pull_due(now) {
            if !layer1.is_event_outdated(&event, now) {
                return Some(event);
            }
            on_discard(event);
        }
        None
    }

    /// Worker entry point: decide what to do with the calling capacity.
    ///
    /// Due work is retrieved and handed to `execute`; otherwise the worker
    /// is kicked back on contention, kept spinning, sent to sleep for a
    /// scattered delay, or told to go idle.
    pub fn dispatch_capacity<E, D, C>(
        &self,
        layer1: &SchedulerInvocation,
        load_control: &LoadController,
        execute: E,
        on_discard: D,
        sched_time: C,
    ) -> Proc
    where
        E: FnOnce(ActivationEvent) -> Proc,
        D: FnMut(ActivationEvent),
        C: Fn() -> Time,
    {
        let now = sched_time();
        let head = layer1.head_time();
        let mut capacity = load_control.mark_incoming_capacity(head, now);
        if capacity == Capacity::Dispatch {
            if !self.has_or_acquires_token() {
                return Proc::Kick;
            }
            let res = match self.find_work(layer1, now, on_discard) {
                Some(event) => execute(event),
                None => Proc::Pass,
            };
            self.drop_grooming_token();
            if res != Proc::Pass {
                return res;
            }
            capacity = load_control.mark_outgoing_capacity(layer1.head_time(), sched_time());
        }

        match capacity {
            Capacity::Dispatch => Proc::Pass,
            Capacity::SpinTime => {
                thread::yield_now();
                Proc::Pass
            }
            Capacity::IdleWait => Proc::Wait,
            Capacity::TendNext => {
                let head = layer1.head_time();
                load_control.tend_next(head);
                sleep_scattered(load_control, now, capacity);
                Proc::Pass
            }
            Capacity::NearTime | Capacity::WorkTime => {
                sleep_scattered(load_control, now, capacity);
                Proc::Pass
            }
        }
    }
}

fn sleep_scattered(load_control: &LoadController, now: Time, capacity: Capacity) {
    let delay = load_control.scattered_delay_time(now, capacity);
    trace!("{:?} capacity sleeps {}", capacity, delay);
    if delay > Time::ZERO {
        thread::sleep(delay.as_duration());
    }
}
