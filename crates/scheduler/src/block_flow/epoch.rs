use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use gear_core::Time;

use super::handle::ActivityRef;
use crate::activity::Activity;

/// Fixed-capacity block of Activity slots sharing one deadline.
///
/// Slots are claimed lock-free through an atomic counter and initialised
/// exactly once; the whole block is released in bulk when the last
/// strong reference to the epoch goes away.
pub(crate) struct Epoch {
    deadline: Time,
    slots: Box<[OnceLock<Activity>]>,
    claimed: AtomicUsize,
}

impl Epoch {
    pub(crate) fn new(deadline: Time, capacity: usize) -> Arc<Self> {
        let slots = (0..capacity.max(1)).map(|_| OnceLock::new()).collect();
        Arc::new(Self {
            deadline,
            slots,
            claimed: AtomicUsize::new(0),
        })
    }

    pub(crate) fn deadline(&self) -> Time {
        self.deadline
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn cnt_elm(&self) -> usize {
        self.claimed.load(Ordering::Acquire).min(self.capacity())
    }

    pub(crate) fn is_full(&self) -> bool {
        self.cnt_elm() >= self.capacity()
    }

    pub(crate) fn fill_ratio(&self) -> f64 {
        self.cnt_elm() as f64 / self.capacity() as f64
    }

    /// Place the Activity into the next free slot; hands it back when full.
    pub(crate) fn try_place(self: &Arc<Self>, activity: Activity) -> Result<ActivityRef, Activity> {
        let cap = self.capacity();
        let claim = self
            .claimed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < cap).then_some(n + 1));
        let Ok(slot) = claim else {
            return Err(activity);
        };
        self.slots[slot].set(activity)?;
        Ok(ActivityRef::from_slot(Arc::clone(self), slot))
    }

    pub(crate) fn get(&self, slot: usize) -> Option<&Activity> {
        self.slots.get(slot).and_then(OnceLock::get)
    }
}
