//! Pool of workers, each repeatedly pulling work from the scheduler.
//!
//! Workers run on a rayon thread pool sized for the computation capacity
//! plus overprovisioning headroom. Each worker loops over
//! [`WorkSetup::do_work`] and interprets the returned [`Proc`]: `Kick`
//! triggers a contention back-off, `Wait` an idle sleep (terminating the
//! worker after too many idle cycles); any other result besides `Pass`
//! ends the worker.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gear_core::this_thread_key;
use rayon::ThreadPool;
use tracing::{debug, error};

use crate::activity::Proc;
use crate::error::Result;

// ── Contention back-off ──────────────────────────────────────────────

/// Contention events handled by soft measures (spinning).
const CONTEND_SOFT_LIMIT: usize = 3;
/// Contention events handled by stepped-up sleeping.
const CONTEND_STARK_LIMIT: usize = CONTEND_SOFT_LIMIT + 5;
const CONTEND_SATURATION: usize = CONTEND_STARK_LIMIT + 4;
const CONTEND_SOFT_FACTOR: usize = 100;
const CONTEND_RANDOM_STEP: usize = 11;
const CONTEND_WAIT: Duration = Duration::from_micros(100);

/// Behaviour of the individual workers, provided by the owner of the pool.
pub trait WorkSetup: Send + Sync + 'static {
    /// Perform one unit of work.
    fn do_work(&self) -> Proc;

    /// Invoked when a worker terminates.
    fn final_hook(&self, is_failure: bool);
}

#[derive(Debug, Clone)]
pub struct WorkForceConfig {
    /// Number of workers for regular full-scale operation.
    pub capacity: usize,
    pub idle_wait: Duration,
    pub dismiss_cycles: usize,
    pub max_overprovisioning: f64,
}

impl WorkForceConfig {
    pub fn max_workers(&self) -> usize {
        ((self.capacity as f64 * self.max_overprovisioning).ceil() as usize).max(self.capacity)
    }
}

struct Shared<S> {
    setup: S,
    config: WorkForceConfig,
    size: AtomicUsize,
    halt: AtomicBool,
}

pub struct WorkForce<S: WorkSetup> {
    shared: Arc<Shared<S>>,
    pool: ThreadPool,
}

impl<S: WorkSetup> WorkForce<S> {
    pub fn new(setup: S, config: WorkForceConfig) -> Result<Self> {
        let pool = worker_pool(config.max_workers())?;
        Ok(Self::with_pool(setup, config, pool))
    }

    pub fn with_pool(setup: S, config: WorkForceConfig, pool: ThreadPool) -> Self {
        Self {
            shared: Arc::new(Shared {
                setup,
                config,
                size: AtomicUsize::new(0),
                halt: AtomicBool::new(false),
            }),
            pool,
        }
    }

    /// Number of live workers.
    pub fn size(&self) -> usize {
        self.shared.size.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    /// Scale up to the given degree of the computation capacity.
    pub fn activate(&self, degree: f64) {
        let config = &self.shared.config;
        let scale = (degree * config.capacity as f64).clamp(0.0, config.max_workers() as f64) as usize;
        self.scale_to(scale);
    }

    /// Add workers, up to the computation capacity.
    pub fn inc_scale(&self, step: usize) {
        let target = (self.size() + step).min(self.shared.config.capacity);
        self.scale_to(target);
    }

    fn scale_to(&self, target: usize) {
        while self
            .shared
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < target).then_some(n + 1))
            .is_ok()
        {
            let shared = Arc::clone(&self.shared);
            self.pool.spawn(move || pull_work(shared));
        }
    }

    /// Signal all workers to stop and block until they have terminated.
    ///
    /// Must not be called from a worker.
    pub fn await_shutdown(&self) {
        self.shared.halt.store(true, Ordering::Release);
        while self.size() > 0 {
            thread::sleep(self.shared.config.idle_wait);
        }
        self.shared.halt.store(false, Ordering::Release);
    }
}

impl<S: WorkSetup> Drop for WorkForce<S> {
    fn drop(&mut self) {
        // may run on a worker, so only signal
        self.shared.halt.store(true, Ordering::Release);
    }
}

/// Thread pool backing a work force of at most `max_workers`.
pub fn worker_pool(max_workers: usize) -> Result<ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(max_workers)
        .thread_name(|i| format!("gear-worker-{i}"))
        .build()?)
}

fn pull_work<S: WorkSetup>(shared: Arc<Shared<S>>) {
    let mut worker = Worker::default();
    let regular_exit = catch_unwind(AssertUnwindSafe(|| worker.run(&shared))).is_ok();
    if !regular_exit {
        error!("Defunct worker thread");
    }
    if catch_unwind(AssertUnwindSafe(|| shared.setup.final_hook(!regular_exit))).is_err() {
        error!("Failure in worker exit hook");
    }
    shared.size.fetch_sub(1, Ordering::AcqRel);
}

#[derive(Default)]
struct Worker {
    kick_level: usize,
    rand_fact: usize,
    idle_cycles: usize,
}

impl Worker {
    fn run<S: WorkSetup>(&mut self, shared: &Shared<S>) {
        while !shared.halt.load(Ordering::Acquire) {
            let mut res = shared.setup.do_work();
            if shared.halt.load(Ordering::Acquire) {
                break;
            }
            if res == Proc::Kick {
                res = self.contention_wait();
            } else if self.kick_level > 0 {
                self.kick_level /= 2;
            }
            if res == Proc::Wait {
                res = self.idle_wait(&shared.config);
            } else {
                self.idle_cycles = 0;
            }
            if res != Proc::Pass {
                debug!("Worker leaves work loop with {:?}", res);
                break;
            }
        }
    }

    fn idle_wait(&mut self, config: &WorkForceConfig) -> Proc {
        self.idle_cycles += 1;
        if self.idle_cycles < config.dismiss_cycles {
            thread::sleep(config.idle_wait);
            Proc::Pass
        } else {
            // idle beyond threshold
            Proc::Halt
        }
    }

    fn contention_wait(&mut self) -> Proc {
        if self.rand_fact == 0 {
            self.rand_fact = (this_thread_key() as usize) % CONTEND_RANDOM_STEP;
        }
        if self.kick_level <= CONTEND_SOFT_LIMIT {
            for _ in 0..self.kick_level {
                randomised_spin(self.kick_level, self.rand_fact);
                thread::yield_now();
            }
        } else {
            let stepping = self.kick_level.min(CONTEND_STARK_LIMIT) - CONTEND_SOFT_LIMIT;
            thread::sleep(stepped_rand_delay(stepping, self.rand_fact));
        }
        if self.kick_level < CONTEND_SATURATION {
            self.kick_level += 1;
        }
        Proc::Pass
    }
}

fn randomised_spin(stepping: usize, rand_fact: usize) {
    let degree = CONTEND_SOFT_FACTOR * (1 + rand_fact) * stepping;
    for _ in 0..degree {
        std::hint::spin_loop();
    }
}

fn stepped_rand_delay(stepping: usize, rand_fact: usize) -> Duration {
    let factor = 1u32 << (stepping - 1);
    CONTEND_WAIT * (factor + rand_fact as u32)
}
