use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::info;

use super::spec::ScheduleSpec;
use crate::activity::Proc;
use crate::activity_lang::ActivityLang;
use crate::block_flow::BlockFlow;
use crate::error::Result;
use crate::job::Job;
use crate::scheduler::commutator::SchedulerCommutator;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::invocation::SchedulerInvocation;
use crate::scheduler::load_control::{LoadController, Wiring};
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::observer::EngineObserver;
use crate::scheduler::work_force::{worker_pool, WorkForce, WorkSetup};

/// The render engine scheduler. Queues Activity chains by start time and
/// dispatches them onto a pool of workers, reporting to an [`EngineObserver`].
///
/// Always handled through an `Arc`; workers hold a weak back-reference.
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    /// Layer 1: queue of pending activations.
    pub(super) layer1: SchedulerInvocation,
    /// Layer 2: grooming token and dispatch decisions.
    pub(super) layer2: SchedulerCommutator,
    pub(super) activity_lang: ActivityLang,
    pub(super) load_control: LoadController,
    pub(super) work_force: WorkForce<WorkerSetup>,
    pub(super) engine_observer: Arc<dyn EngineObserver>,
    pub(super) metrics: Arc<RwLock<SchedulerMetrics>>,
}

/// Connects the workers back to the scheduler.
pub(super) struct WorkerSetup {
    scheduler: Weak<Scheduler>,
}

impl WorkSetup for WorkerSetup {
    fn do_work(&self) -> Proc {
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.do_work(),
            None => Proc::Halt,
        }
    }

    fn final_hook(&self, is_failure: bool) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.handle_worker_termination(is_failure);
        }
    }
}

impl Scheduler {
    /// Create a scheduler drawing Activity storage from the given allocator.
    ///
    /// Workers are started on demand, when work is posted or on [`ignite`](Self::ignite).
    pub fn new(
        block_flow: Arc<BlockFlow>,
        engine_observer: Arc<dyn EngineObserver>,
        config: SchedulerConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let work_force_config = config.work_force_config();
        let pool = worker_pool(work_force_config.max_workers())?;

        Ok(Arc::new_cyclic(|weak: &Weak<Scheduler>| {
            let size_probe = weak.clone();
            let scale_up = weak.clone();
            let wiring = Wiring {
                max_capacity: work_force_config.capacity,
                curr_work_force_size: Box::new(move || size_probe.upgrade().map_or(0, |s| s.work_force.size())),
                step_up_work_force: Box::new(move |step| {
                    if let Some(s) = scale_up.upgrade() {
                        s.work_force.inc_scale(step);
                    }
                }),
            };
            let setup = WorkerSetup { scheduler: weak.clone() };
            Self {
                layer1: SchedulerInvocation::new(),
                layer2: SchedulerCommutator::new(),
                activity_lang: ActivityLang::new(block_flow),
                load_control: LoadController::new(wiring),
                work_force: WorkForce::with_pool(setup, work_force_config, pool),
                engine_observer,
                metrics: Arc::new(RwLock::new(SchedulerMetrics::default())),
                config,
            }
        }))
    }

    /// Scheduler with the given capacity, logging engine events through `tracing`.
    pub fn with_capacity(block_flow: Arc<BlockFlow>, capacity: usize) -> Result<Arc<Self>> {
        Self::new(
            block_flow,
            Arc::new(crate::scheduler::observer::TracingObserver),
            SchedulerConfig::with_capacity(capacity),
        )
    }

    /// Start defining the schedule for a calculation job.
    pub fn define_schedule(self: &Arc<Self>, job: Job) -> ScheduleSpec {
        ScheduleSpec::new(Arc::clone(self), job)
    }

    /// No pending activations.
    pub fn empty(&self) -> bool {
        self.layer1.empty()
    }

    /// Current load, relative to full concurrency at balanced schedule pressure.
    pub fn load_indicator(&self) -> f64 {
        self.load_control.effective_load()
    }

    /// Number of live workers.
    pub fn work_force_size(&self) -> usize {
        self.work_force.size()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn activity_lang(&self) -> &ActivityLang {
        &self.activity_lang
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(super) fn update_metrics(&self, f: impl FnOnce(&mut SchedulerMetrics)) {
        let mut m = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut m);
    }

    pub(super) fn log_startup(&self) {
        info!(
            "Scheduler ignition: capacity {}, {} pending",
            self.work_force.capacity(),
            self.layer1.len()
        );
    }
}
