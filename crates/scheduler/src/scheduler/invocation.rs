//! Layer 1 of the scheduler: the queue of pending activations.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use gear_core::Time;

use crate::activity::Activity;
use crate::block_flow::ActivityRef;
use crate::job::ManifestationId;

/// Chain of Activities queued for activation within a time window.
#[derive(Clone)]
pub struct ActivationEvent {
    pub activity: ActivityRef,
    pub starting: Time,
    pub deadline: Time,
    pub manifestation: ManifestationId,
    pub compulsory: bool,
}

impl ActivationEvent {
    pub fn new(activity: ActivityRef, starting: Time, deadline: Time) -> Self {
        Self {
            activity,
            starting,
            deadline,
            manifestation: ManifestationId::DEFAULT,
            compulsory: false,
        }
    }

    pub fn with_manifestation(mut self, manifestation: ManifestationId) -> Self {
        self.manifestation = manifestation;
        self
    }

    pub fn compulsory(mut self, indeed: bool) -> Self {
        self.compulsory = indeed;
        self
    }

    /// Retarget this event to a follow-up chain, keeping the significance.
    ///
    /// Irregular times fall back to those of this event; a `POST` head
    /// further constrains the window to its own.
    pub fn refine_to(&mut self, chain: &ActivityRef, when: Time, dead: Time) {
        let when = if when.is_regular() { when } else { self.starting };
        let dead = if dead.is_regular() { dead } else { self.deadline };
        self.activity = chain.clone();
        self.starting = constrained_start(chain, when);
        self.deadline = constrained_death(chain, dead);
    }
}

fn constrained_start(chain: &Activity, start: Time) -> Time {
    match chain.time_window() {
        Some(window) => start.max(window.life),
        None => start,
    }
}

fn constrained_death(chain: &Activity, death: Time) -> Time {
    match chain.time_window() {
        Some(window) => death.min(window.dead),
        None => death,
    }
}

impl fmt::Debug for ActivationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationEvent")
            .field("activity", &self.activity.to_string())
            .field("starting", &self.starting)
            .field("deadline", &self.deadline)
            .field("manifestation", &self.manifestation)
            .field("compulsory", &self.compulsory)
            .finish()
    }
}

/// Queue entry; earliest start first, FIFO among equal starts.
struct Entry {
    event: ActivationEvent,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the maximum
        other
            .event
            .starting
            .cmp(&self.event.starting)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of [`ActivationEvent`]s plus the set of active manifestations.
///
/// Entries of a manifestation that is not (or no longer) active count as
/// outdated and are disposed of when reaching the head.
pub struct SchedulerInvocation {
    queue: Mutex<BinaryHeap<Entry>>,
    next_seq: AtomicU64,
    active: RwLock<HashSet<ManifestationId>>,
}

impl Default for SchedulerInvocation {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerInvocation {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            active: RwLock::new(HashSet::new()),
        }
    }

    fn heap(&self) -> MutexGuard<'_, BinaryHeap<Entry>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an event for activation.
    pub fn instruct(&self, event: ActivationEvent) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap().push(Entry { event, seq });
    }

    pub fn empty(&self) -> bool {
        self.heap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap().len()
    }

    /// Start time of the head entry; `Time::NEVER` when empty.
    pub fn head_time(&self) -> Time {
        self.heap().peek().map_or(Time::NEVER, |entry| entry.event.starting)
    }

    pub fn peek_head(&self) -> Option<ActivationEvent> {
        self.heap().peek().map(|entry| entry.event.clone())
    }

    pub fn pull_head(&self) -> Option<ActivationEvent> {
        self.heap().pop().map(|entry| entry.event)
    }

    /// Take the head entry only if it is due at `now`.
    pub fn pull_due(&self, now: Time) -> Option<ActivationEvent> {
        let mut heap = self.heap();
        match heap.peek() {
            Some(entry) if entry.event.starting <= now => heap.pop().map(|entry| entry.event),
            _ => None,
        }
    }

    /// Drop all pending entries.
    pub fn discard_schedule(&self) {
        self.heap().clear();
    }

    // ── Manifestations ──────────────────────────────────────────────

    pub fn activate(&self, manifestation: ManifestationId) {
        if manifestation != ManifestationId::DEFAULT {
            self.active
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(manifestation);
        }
    }

    pub fn deactivate(&self, manifestation: ManifestationId) {
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&manifestation);
    }

    pub fn is_activated(&self, manifestation: ManifestationId) -> bool {
        manifestation == ManifestationId::DEFAULT
            || self
                .active
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&manifestation)
    }

    // ── Head classification ─────────────────────────────────────────

    fn with_head<R>(&self, absent: R, f: impl FnOnce(&ActivationEvent) -> R) -> R {
        match self.heap().peek() {
            Some(entry) => f(&entry.event),
            None => absent,
        }
    }

    /// The head entry may be activated at `now`.
    pub fn is_due(&self, now: Time) -> bool {
        self.head_time() <= now
    }

    /// The head entry has passed its deadline.
    pub fn is_missed(&self, now: Time) -> bool {
        self.with_head(false, |head| head.deadline < now)
    }

    /// The head entry should not be dispatched anymore.
    pub fn is_outdated(&self, now: Time) -> bool {
        self.peek_head().is_some_and(|head| self.is_event_outdated(&head, now))
    }

    pub fn is_event_outdated(&self, event: &ActivationEvent, now: Time) -> bool {
        event.deadline < now || !self.is_activated(event.manifestation)
    }

    /// A compulsory head entry of an active manifestation missed its deadline.
    pub fn is_out_of_time(&self, now: Time) -> bool {
        let Some(head) = self.peek_head() else {
            return false;
        };
        head.compulsory && head.deadline < now && self.is_activated(head.manifestation)
    }
}
