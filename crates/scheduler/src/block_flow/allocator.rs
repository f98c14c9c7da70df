use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gear_core::Time;
use tracing::{debug, trace, warn};

use super::config::BlockFlowConfig;
use super::epoch::Epoch;
use super::handle::ActivityRef;
use crate::activity::Activity;
use crate::error::{Result, SchedulerError};

// ── Constants ────────────────────────────────────────────────────────

/// Lower bound for the epoch step.
const MIN_EPOCH_STEP: Time = Time::from_millis(1);

/// Damping applied when adapting the epoch step to observed fill.
const ADAPT_DAMPING: f64 = 0.3;

// ── Allocator ────────────────────────────────────────────────────────

/// Epoch-based arena for Activities.
///
/// Activities are grouped into epochs by deadline. Planning code asks for an
/// [`AllocatorHandle`] covering a deadline and places its Activities there;
/// once the deadline has passed, [`BlockFlow::discard_before`] releases all
/// epochs in bulk. Allocation in the common case only touches an atomic
/// slot counter; the epoch list lock is taken to append or discard epochs.
pub struct BlockFlow {
    config: BlockFlowConfig,
    epochs: RwLock<VecDeque<Arc<Epoch>>>,
    /// Current epoch step in microseconds.
    epoch_step: AtomicI64,
    overflow_cnt: AtomicUsize,
    discarded_cnt: AtomicUsize,
}

impl BlockFlow {
    pub fn new(config: BlockFlowConfig) -> Arc<Self> {
        let step = Time::from_millis(config.initial_epoch_step_ms as i64);
        Arc::new(Self {
            config,
            epochs: RwLock::new(VecDeque::new()),
            epoch_step: AtomicI64::new(step.micros()),
            overflow_cnt: AtomicUsize::new(0),
            discarded_cnt: AtomicUsize::new(0),
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(BlockFlowConfig::default())
    }

    pub fn config(&self) -> &BlockFlowConfig {
        &self.config
    }

    /// Current spacing between consecutive epoch deadlines.
    pub fn epoch_step(&self) -> Time {
        Time::from_micros(self.epoch_step.load(Ordering::Relaxed))
    }

    fn set_epoch_step(&self, step: Time) {
        let max_step = Time::from_millis(self.config.initial_epoch_step_ms as i64 * 10);
        let bounded = step.max(MIN_EPOCH_STEP).min(max_step.max(MIN_EPOCH_STEP));
        self.epoch_step.store(bounded.micros(), Ordering::Relaxed);
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<Arc<Epoch>>> {
        match self.epochs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<Arc<Epoch>>> {
        match self.epochs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn first_covering(epochs: &VecDeque<Arc<Epoch>>, deadline: Time) -> Option<Arc<Epoch>> {
        let idx = epochs.partition_point(|epoch| epoch.deadline() < deadline);
        epochs.get(idx).cloned()
    }

    /// Append one epoch after the current last one, reaching at least
    /// up to the requested deadline.
    fn append_epoch(&self, epochs: &mut VecDeque<Arc<Epoch>>, requested: Time) -> Result<Arc<Epoch>> {
        if epochs.len() >= self.config.max_epochs {
            warn!(
                "Allocation exhausted: {} epochs alive, requested deadline {}",
                epochs.len(),
                requested
            );
            return Err(SchedulerError::AllocationExhausted {
                deadline: requested,
                epochs: epochs.len(),
            });
        }
        let step = self.epoch_step();
        let deadline = match epochs.back() {
            Some(last) => (last.deadline() + step).max(requested),
            None => requested + step,
        };
        let epoch = Epoch::new(deadline, self.config.epoch_size);
        epochs.push_back(Arc::clone(&epoch));
        trace!("Epoch appended until {} (step {})", deadline, step);
        Ok(epoch)
    }

    /// Get an allocation handle for Activities with the given deadline.
    ///
    /// Selects the first epoch whose deadline is not before the requested
    /// one, appending a new epoch if none qualifies.
    pub fn until(self: &Arc<Self>, deadline: Time) -> Result<AllocatorHandle> {
        if !deadline.is_regular() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "allocation requires a definite deadline, got {deadline}"
            )));
        }
        if let Some(epoch) = Self::first_covering(&self.read(), deadline) {
            return Ok(AllocatorHandle::new(Arc::clone(self), epoch));
        }
        let mut epochs = self.write();
        if let Some(epoch) = Self::first_covering(&epochs, deadline) {
            return Ok(AllocatorHandle::new(Arc::clone(self), epoch));
        }
        let epoch = self.append_epoch(&mut epochs, deadline)?;
        Ok(AllocatorHandle::new(Arc::clone(self), epoch))
    }

    /// Epoch following a full one, created when necessary.
    fn epoch_after(&self, full: &Arc<Epoch>) -> Result<Arc<Epoch>> {
        self.overflow_cnt.fetch_add(1, Ordering::Relaxed);
        let boosted = self.epoch_step().scaled(self.config.overflow_boost_factor);
        self.set_epoch_step(boosted);

        let mut epochs = self.write();
        let follower = epochs
            .iter()
            .position(|epoch| Arc::ptr_eq(epoch, full))
            .and_then(|idx| epochs.get(idx + 1).cloned())
            .or_else(|| {
                // discarded meanwhile: continue with anything not yet expired
                epochs.iter().find(|epoch| epoch.deadline() >= full.deadline() && !epoch.is_full()).cloned()
            });
        match follower {
            Some(epoch) => Ok(epoch),
            None => self.append_epoch(&mut epochs, full.deadline()),
        }
    }

    /// Release all epochs whose deadline lies before the given time.
    pub fn discard_before(&self, deadline: Time) {
        let mut epochs = self.write();
        let mut discarded = 0usize;
        let mut fill = 0.0;
        while epochs.front().is_some_and(|epoch| epoch.deadline() < deadline) {
            if let Some(epoch) = epochs.pop_front() {
                fill += epoch.fill_ratio();
                discarded += 1;
            }
        }
        drop(epochs);
        if discarded == 0 {
            return;
        }
        self.discarded_cnt.fetch_add(discarded, Ordering::Relaxed);
        self.adapt_to_fill(fill / discarded as f64);
        debug!("Discarded {} epochs before {}", discarded, deadline);
    }

    /// Widen the epoch step when released epochs were only sparsely used.
    fn adapt_to_fill(&self, avg_fill: f64) {
        let target = self.config.target_fill;
        if avg_fill >= target {
            return;
        }
        let step = self.epoch_step();
        let ideal = step.scaled(target / avg_fill.max(0.1));
        let adapted = step.scaled(1.0 - ADAPT_DAMPING) + ideal.scaled(ADAPT_DAMPING);
        self.set_epoch_step(adapted);
    }

    /// Prepare for additional load, given in frames per second.
    pub fn announce_additional_flow(&self, fps: f64) {
        if fps <= 0.0 {
            return;
        }
        let per_second = fps * self.config.activities_per_frame as f64;
        let fitting = self.config.epoch_size as f64 * self.config.target_fill / per_second;
        let fitting = Time::from_secs_f64(fitting);
        if fitting < self.epoch_step() {
            debug!("Epoch step reduced to {} for {} fps", fitting, fps);
            self.set_epoch_step(fitting);
        }
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// Deadline of the oldest epoch.
    pub fn first(&self) -> Option<Time> {
        self.read().front().map(|epoch| epoch.deadline())
    }

    /// Deadline of the latest epoch.
    pub fn last(&self) -> Option<Time> {
        self.read().back().map(|epoch| epoch.deadline())
    }

    pub fn cnt_epochs(&self) -> usize {
        self.read().len()
    }

    /// Total slot capacity of all live epochs.
    pub fn pool_size(&self) -> usize {
        self.read().iter().map(|epoch| epoch.capacity()).sum()
    }

    /// Number of Activities placed in live epochs.
    pub fn cnt_elm(&self) -> usize {
        self.read().iter().map(|epoch| epoch.cnt_elm()).sum()
    }

    pub fn cnt_overflow(&self) -> usize {
        self.overflow_cnt.load(Ordering::Relaxed)
    }

    pub fn cnt_discarded(&self) -> usize {
        self.discarded_cnt.load(Ordering::Relaxed)
    }

    /// Deadline of the live epoch holding the Activity, NEVER if not found.
    pub fn find(&self, activity: &ActivityRef) -> Time {
        self.read()
            .iter()
            .find(|epoch| Arc::ptr_eq(epoch, activity.epoch()))
            .map_or(Time::NEVER, |epoch| epoch.deadline())
    }
}

/// Allocation handle positioned at one epoch.
///
/// Overflowing Activities move on to the following epoch; the handle then
/// stays there for further allocations.
#[derive(Clone)]
pub struct AllocatorHandle {
    flow: Arc<BlockFlow>,
    epoch: Arc<Epoch>,
}

impl AllocatorHandle {
    fn new(flow: Arc<BlockFlow>, epoch: Arc<Epoch>) -> Self {
        Self { flow, epoch }
    }

    pub fn create(&mut self, activity: Activity) -> Result<ActivityRef> {
        let mut pending = activity;
        loop {
            match self.epoch.try_place(pending) {
                Ok(placed) => return Ok(placed),
                Err(rejected) => {
                    pending = rejected;
                    self.epoch = self.flow.epoch_after(&self.epoch)?;
                }
            }
        }
    }

    /// Deadline of the epoch currently used.
    pub fn current_deadline(&self) -> Time {
        self.epoch.deadline()
    }

    pub fn flow(&self) -> &Arc<BlockFlow> {
        &self.flow
    }
}
