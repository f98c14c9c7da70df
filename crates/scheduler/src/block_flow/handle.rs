use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use gear_core::Time;

use super::epoch::Epoch;
use crate::activity::Activity;

/// Strong handle to an Activity placed in the allocator.
///
/// Holding an `ActivityRef` keeps the owning epoch alive, even after the
/// allocator has discarded it. Pending timeline entries hold these.
#[derive(Clone)]
pub struct ActivityRef {
    epoch: Arc<Epoch>,
    slot: usize,
}

impl ActivityRef {
    pub(crate) fn from_slot(epoch: Arc<Epoch>, slot: usize) -> Self {
        Self { epoch, slot }
    }

    /// Standalone Activity outside any allocator, living as long as its handles.
    pub fn new(activity: Activity) -> Self {
        let epoch = Epoch::new(Time::NEVER, 1);
        match epoch.try_place(activity) {
            Ok(handle) => handle,
            Err(_) => unreachable!("fresh single-slot epoch has room"),
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &ActivityRef) -> bool {
        Arc::ptr_eq(&self.epoch, &other.epoch) && self.slot == other.slot
    }

    /// Non-owning link to this Activity.
    pub fn downgrade(&self) -> ActivityLink {
        ActivityLink {
            epoch: Arc::downgrade(&self.epoch),
            slot: self.slot,
        }
    }

    pub(crate) fn epoch(&self) -> &Arc<Epoch> {
        &self.epoch
    }

    /// Deadline of the epoch holding this Activity.
    pub fn epoch_deadline(&self) -> Time {
        self.epoch.deadline()
    }
}

impl Deref for ActivityRef {
    type Target = Activity;

    fn deref(&self) -> &Activity {
        self.epoch
            .get(self.slot)
            .expect("ActivityRef always points to an initialised slot")
    }
}

impl fmt::Debug for ActivityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", **self)
    }
}

impl fmt::Display for ActivityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", **self)
    }
}

/// Validated non-owning link between Activities.
///
/// Upgrading fails once the target epoch has been released, so a chain
/// never observes a dangling successor.
#[derive(Clone)]
pub struct ActivityLink {
    epoch: Weak<Epoch>,
    slot: usize,
}

impl ActivityLink {
    pub fn upgrade(&self) -> Option<ActivityRef> {
        let epoch = self.epoch.upgrade()?;
        epoch.get(self.slot)?;
        Some(ActivityRef::from_slot(epoch, self.slot))
    }

    pub fn is_valid(&self) -> bool {
        self.epoch.strong_count() > 0
    }
}

impl fmt::Debug for ActivityLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(target) => write!(f, "→{target}"),
            None => write!(f, "→⟂"),
        }
    }
}

/// Mutable link slot inside an Activity (`next` or notification target).
#[derive(Default)]
pub struct LinkCell {
    link: Mutex<Option<ActivityLink>>,
}

impl LinkCell {
    pub fn new(target: Option<&ActivityRef>) -> Self {
        Self {
            link: Mutex::new(target.map(ActivityRef::downgrade)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActivityLink>> {
        match self.link.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Resolve the link; `None` if unset or the target is gone.
    pub fn get(&self) -> Option<ActivityRef> {
        self.lock().as_ref().and_then(ActivityLink::upgrade)
    }

    pub fn set(&self, target: Option<&ActivityRef>) {
        *self.lock() = target.map(ActivityRef::downgrade);
    }

    /// Install a new target, returning the previous one.
    pub fn replace(&self, target: Option<&ActivityRef>) -> Option<ActivityRef> {
        let previous = std::mem::replace(&mut *self.lock(), target.map(ActivityRef::downgrade));
        previous.and_then(|link| link.upgrade())
    }

    pub fn is_set(&self) -> bool {
        self.lock().is_some()
    }
}

impl fmt::Debug for LinkCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lock().as_ref() {
            Some(link) => write!(f, "{link:?}"),
            None => write!(f, "⟂"),
        }
    }
}
