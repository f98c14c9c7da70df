use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use gear_core::{hash_combine, IncidenceCount, RealClock, Statistic, Time};
use gear_scheduler::{
    InvocationInstanceId, Job, JobError, JobFunctor, JobKind, JobParameter, ManifestationId, ScheduleSpec, Scheduler,
};
use tracing::{debug, info, warn};

use super::load::ComputationalLoad;
use super::node::Node;
use super::{micro_benchmark, TestChainLoad, GRAPH_BENCHMARK_RUNS, LOAD_DEFAULT_MEM_SIZE};

/// Maximum time for a test run; aborted when exceeded.
pub const SAFETY_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for each computation job, relative to its start.
pub const STANDARD_DEADLINE: Duration = Duration::from_millis(30);
/// Computation jobs prepared in each planning round.
pub const DEFAULT_CHUNKSIZE: usize = 64;
/// Factor on the pre-roll to ensure all planning is done up-front.
pub const UPFRONT_PLANNING_BOOST: f64 = 2.6;
/// Time budget for each level of jobs.
pub const SCHEDULE_LEVEL_STEP: Duration = Duration::from_millis(1);
/// Additional time budget per node.
pub const SCHEDULE_NODE_STEP: Duration = Duration::ZERO;
/// Time budget for planning each node.
pub const SCHEDULE_PLAN_STEP: Duration = Duration::from_micros(100);
/// Offset placing the final wake-up job behind any systematic schedule.
pub const SCHEDULE_WAKE_UP: Duration = Duration::from_micros(10);
/// Explicitly post dependent jobs, instead of relying on `NOTIFY`.
pub const SCHED_DEPENDS: bool = false;
/// Dependent jobs are notified no earlier than their own start time.
pub const SCHED_NOTIFY: bool = true;

// ── Job encoding ─────────────────────────────────────────────────

/// Node index travels in the low word of the invocation key.
fn encode_node_id(idx: usize) -> InvocationInstanceId {
    InvocationInstanceId::new(idx as u64, 0)
}

fn decode_node_id(key: InvocationInstanceId) -> usize {
    key.w1 as usize
}

/// Level travels as nominal time on a one-second grid.
fn encode_level(level: usize) -> Time {
    Time::new(0, level as i64)
}

fn decode_level(nominal_time: Time) -> usize {
    (nominal_time.micros() / Time::new(0, 1).micros()).max(0) as usize
}

// ── Shared graph of one run ──────────────────────────────────────

/// Topology snapshot with hashes computed concurrently by the calc jobs.
struct ChainGraph {
    nodes: Vec<Node>,
    hashes: Vec<AtomicU64>,
    calculated: Vec<AtomicBool>,
}

impl ChainGraph {
    fn new(nodes: &[Node], seed: u64) -> Self {
        let hashes = nodes
            .iter()
            .map(|n| AtomicU64::new(if n.is_start() { seed } else { 0 }))
            .collect();
        Self {
            nodes: nodes.to_vec(),
            hashes,
            calculated: nodes.iter().map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Predecessors are complete when invoked; dependencies guarantee that.
    fn calculate(&self, idx: usize) {
        let mut hash = self.hashes[idx].load(Ordering::Acquire);
        for &pred in &self.nodes[idx].pred {
            hash_combine(&mut hash, self.hashes[pred].load(Ordering::Acquire));
        }
        self.hashes[idx].store(hash, Ordering::Release);
        self.calculated[idx].store(true, Ordering::Release);
    }

    /// Nodes whose calc job never ran.
    fn stranded(&self) -> Vec<usize> {
        self.calculated
            .iter()
            .enumerate()
            .filter(|(_, done)| !done.load(Ordering::Acquire))
            .map(|(idx, _)| idx)
            .collect()
    }

    fn write_back(&self, nodes: &mut [Node]) {
        for (node, hash) in nodes.iter_mut().zip(&self.hashes) {
            node.hash = hash.load(Ordering::Acquire);
        }
    }
}

// ── Job functors ─────────────────────────────────────────────────

/// Calculates a single node, after burning its weight as computational load.
struct ChainCalcFunctor {
    graph: Arc<ChainGraph>,
    load: ComputationalLoad,
    watch: Option<Arc<IncidenceCount>>,
}

impl JobFunctor for ChainCalcFunctor {
    fn invoke_job_operation(&self, param: JobParameter) -> Result<(), JobError> {
        let idx = decode_node_id(param.invo_key);
        let level = decode_level(param.nominal_time);
        let node = self
            .graph
            .nodes
            .get(idx)
            .ok_or_else(|| JobError::Failed(format!("no chain node #{idx}")))?;
        if node.level != level {
            return Err(JobError::Failed(format!(
                "chain node #{idx} at level {}, but invoked for level {level}",
                node.level
            )));
        }
        if let Some(watch) = &self.watch {
            watch.mark_enter(0);
        }
        if node.weight > 0 {
            self.load.invoke(node.weight);
        }
        self.graph.calculate(idx);
        if let Some(watch) = &self.watch {
            watch.mark_leave(0);
        }
        Ok(())
    }

    fn diagnostic(&self) -> String {
        format!("ChainCalc(n:{})", self.graph.nodes.len())
    }

    fn job_kind(&self) -> JobKind {
        JobKind::Test
    }
}

/// Signals the waiting test thread once the last computations are done.
struct WakeUpFunctor {
    signal: Mutex<Option<Sender<()>>>,
}

impl JobFunctor for WakeUpFunctor {
    fn invoke_job_operation(&self, _param: JobParameter) -> Result<(), JobError> {
        let signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(signal) = signal {
            // receiver gone after a timeout; nothing left to wake
            let _ = signal.send(());
        }
        Ok(())
    }

    fn diagnostic(&self) -> String {
        "ChainWakeUp".to_string()
    }

    fn job_kind(&self) -> JobKind {
        JobKind::Test
    }
}

/// Frozen schedule parameters for one run, with absolute start times.
struct PlanParams {
    start_times: Vec<Time>,
    node_expense: Time,
    stress: f64,
    deadline: Time,
    pre_roll: Time,
    chunk_size: usize,
    sched_notify: bool,
    sched_depends: bool,
    manifestation: ManifestationId,
}

struct PlanState {
    curr_idx: usize,
    schedule: Vec<Option<ScheduleSpec>>,
    wake_up: Option<ScheduleSpec>,
}

/// Meta job planning the calc jobs chunk-wise, then scheduling its own
/// continuation, until the final chunk installs the wake-up job.
///
/// The invocation key encodes the node index the chunk should reach; the
/// chunk is extended to the end of that level.
struct ChainPlanner {
    this: Weak<ChainPlanner>,
    scheduler: Weak<Scheduler>,
    graph: Arc<ChainGraph>,
    calc: Arc<dyn JobFunctor>,
    wake_up: Arc<dyn JobFunctor>,
    plan: PlanParams,
    state: Mutex<PlanState>,
}

fn job_failure(err: impl std::fmt::Display) -> JobError {
    JobError::Failed(err.to_string())
}

impl ChainPlanner {
    fn scheduler(&self) -> Result<Arc<Scheduler>, JobError> {
        self.scheduler
            .upgrade()
            .ok_or_else(|| JobError::PrerequisiteNotAvailable("scheduler".to_string()))
    }

    fn planning_job(&self, end_node_idx: usize) -> Result<Job, JobError> {
        let functor: Arc<dyn JobFunctor> = self
            .this
            .upgrade()
            .ok_or_else(|| JobError::PrerequisiteNotAvailable("chain planner".to_string()))?;
        Ok(Job::new(functor, encode_node_id(end_node_idx), Time::ANYTIME))
    }

    fn calc_job(&self, idx: usize, level: usize) -> Job {
        Job::new(Arc::clone(&self.calc), encode_node_id(idx), encode_level(level))
    }

    fn job_start_time(&self, level: usize, idx: usize) -> Time {
        let times = &self.plan.start_times;
        let base = times.get(level).or(times.last()).copied().unwrap_or(Time::ZERO);
        base + self.plan.node_expense.scaled(idx as f64 / self.plan.stress)
    }

    fn calc_next_chunk_end(&self, last_node_idx: usize) -> usize {
        (last_node_idx + self.plan.chunk_size).min(self.graph.nodes.len() - 1)
    }

    /// Plan at least two levels ahead: the next chunk attaches dependencies
    /// to the last level of the preceding one, which must not be dispatched yet.
    fn calc_plan_schedule_time(&self, last_node_idx: usize) -> Time {
        let last = last_node_idx.min(self.graph.nodes.len() - 1);
        let level = self.graph.nodes[last].level.saturating_sub(2);
        self.job_start_time(level, 0) - self.plan.pre_roll
    }

    fn dispose_step(&self, state: &mut PlanState, scheduler: &Arc<Scheduler>, idx: usize, level: usize) -> Result<(), JobError> {
        let spec = scheduler
            .define_schedule(self.calc_job(idx, level))
            .manifestation(self.plan.manifestation)
            .start_time(self.job_start_time(level, idx))
            .life_window(self.plan.deadline);
        // dependent nodes are triggered through NOTIFY
        let spec = if self.graph.nodes[idx].is_start() || self.plan.sched_depends {
            spec.post().map_err(job_failure)?
        } else {
            spec
        };
        state.schedule[idx] = Some(spec);
        Ok(())
    }

    fn set_dependency(&self, state: &mut PlanState, pred: usize, succ: usize) -> Result<(), JobError> {
        if pred >= succ {
            return Err(JobError::Failed(format!("dependency #{pred} → #{succ} against node order")));
        }
        let (head, tail) = state.schedule.split_at_mut(succ);
        if let (Some(pred_spec), Some(succ_spec)) = (head[pred].as_mut(), tail[0].as_mut()) {
            pred_spec
                .link_to_successor(succ_spec, !self.plan.sched_notify)
                .map_err(job_failure)?;
        }
        Ok(())
    }

    fn continuation(
        &self,
        state: &mut PlanState,
        scheduler: &Arc<Scheduler>,
        chunk_start: usize,
        last_node_idx: usize,
        level_done: usize,
        work_left: bool,
    ) -> Result<(), JobError> {
        if work_left {
            let next_chunk_end = self.calc_next_chunk_end(last_node_idx);
            scheduler
                .continue_meta_job(
                    self.calc_plan_schedule_time(last_node_idx + 1),
                    self.planning_job(next_chunk_end)?,
                    self.plan.manifestation,
                )
                .map_err(job_failure)?;
            return Ok(());
        }
        let wake_up_job = Job::new(Arc::clone(&self.wake_up), InvocationInstanceId::default(), Time::ANYTIME);
        let mut wake_up = scheduler
            .define_schedule(wake_up_job)
            .manifestation(self.plan.manifestation)
            .start_time(self.job_start_time(level_done + 1, last_node_idx + 1) + SCHEDULE_WAKE_UP)
            .life_window(Time::from_duration(SAFETY_TIMEOUT))
            .post()
            .map_err(job_failure)?;
        let exits: Vec<usize> = (chunk_start..self.graph.nodes.len())
            .filter(|idx| self.graph.nodes[*idx].is_exit())
            .collect();
        for exit in exits {
            if let Some(pred) = state.schedule[exit].as_mut() {
                wake_up.link_to_predecessor(pred, false).map_err(job_failure)?;
            }
        }
        state.wake_up = Some(wake_up);
        Ok(())
    }

    /// Report each planned node which never ran as missing its deadline;
    /// returns the number of stranded nodes.
    fn report_stranded(&self) -> usize {
        let stranded = self.graph.stranded();
        if stranded.is_empty() {
            return 0;
        }
        let Some(scheduler) = self.scheduler.upgrade() else {
            return stranded.len();
        };
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for &idx in &stranded {
            match state.schedule.get(idx).and_then(Option::as_ref) {
                Some(spec) => scheduler.report_deadline_miss(format!("ChainCalc #{idx}"), spec.start(), spec.deadline()),
                None => warn!("chain node #{idx} never planned"),
            }
        }
        stranded.len()
    }

    /// Drop all schedule specs, which hold the scheduler.
    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.schedule.clear();
        state.wake_up = None;
    }
}

impl JobFunctor for ChainPlanner {
    fn invoke_job_operation(&self, param: JobParameter) -> Result<(), JobError> {
        let scheduler = self.scheduler()?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let node_cnt = self.graph.nodes.len();
        if state.schedule.len() != node_cnt {
            return Err(JobError::PrerequisiteNotAvailable("chain planner already released".to_string()));
        }
        let target = decode_node_id(param.invo_key);
        let start = state.curr_idx;
        let mut reached_level = 0;
        while state.curr_idx < node_cnt {
            let idx = state.curr_idx;
            let level = self.graph.nodes[idx].level;
            if idx <= target {
                reached_level = level;
            } else if level > reached_level {
                break;
            }
            self.dispose_step(&mut state, &scheduler, idx, level)?;
            for &pred in &self.graph.nodes[idx].pred {
                self.set_dependency(&mut state, pred, idx)?;
            }
            state.curr_idx += 1;
        }
        if state.curr_idx == 0 {
            return Err(JobError::Failed("empty planning chunk".to_string()));
        }
        let last = state.curr_idx - 1;
        debug!("planned chain nodes {start}..={last} up to level {reached_level}");
        self.continuation(&mut state, &scheduler, start, last, reached_level, last + 1 < node_cnt)
    }

    fn diagnostic(&self) -> String {
        "ChainPlan".to_string()
    }

    fn job_kind(&self) -> JobKind {
        JobKind::Meta
    }
}

// ── Schedule context ─────────────────────────────────────────────

/// Setup and wiring to perform a [`TestChainLoad`] through the scheduler.
///
/// Each run seeds a planning job, which disposes the calc jobs chunk-wise
/// with their dependencies, and finally a wake-up job depending on the last
/// exit nodes. [`launch_and_wait`](Self::launch_and_wait) blocks on that
/// wake-up and copies the computed hashes back into the graph. The context
/// can be reused for further runs.
pub struct ScheduleCtx<'a> {
    chain_load: &'a mut TestChainLoad,
    scheduler: Arc<Scheduler>,
    level_step: Time,
    plan_step: Time,
    node_expense: Time,
    stress_fact: f64,
    sched_notify: bool,
    sched_depends: bool,
    block_load_factor: u32,
    chunk_size: usize,
    deadline: Time,
    pre_roll: Time,
    manifestation: ManifestationId,
    /// Relative start time per level, plus one point after the top level.
    start_times: Vec<Time>,
    compu_load: ComputationalLoad,
    watch: Option<Arc<IncidenceCount>>,
}

impl<'a> ScheduleCtx<'a> {
    pub(super) fn new(chain_load: &'a mut TestChainLoad, scheduler: Arc<Scheduler>) -> Self {
        let mut ctx = Self {
            chain_load,
            scheduler,
            level_step: Time::from_duration(SCHEDULE_LEVEL_STEP),
            plan_step: Time::from_duration(SCHEDULE_PLAN_STEP),
            node_expense: Time::from_duration(SCHEDULE_NODE_STEP),
            stress_fact: 1.0,
            sched_notify: SCHED_NOTIFY,
            sched_depends: SCHED_DEPENDS,
            block_load_factor: 2,
            chunk_size: DEFAULT_CHUNKSIZE,
            deadline: Time::from_duration(STANDARD_DEADLINE),
            pre_roll: Time::ZERO,
            manifestation: ManifestationId::DEFAULT,
            start_times: Vec::new(),
            compu_load: ComputationalLoad::new(),
            watch: None,
        };
        ctx.pre_roll = ctx.guess_planning_preroll();
        ctx
    }

    pub fn chain_load(&self) -> &TestChainLoad {
        self.chain_load
    }

    // ── Running ──────────────────────────────────────────────────

    /// Dispose one complete run of the graph into the scheduler and block
    /// until it is done; returns the observed runtime in µs, without pre-roll.
    pub fn launch_and_wait(&mut self) -> anyhow::Result<f64> {
        let (done, signal) = mpsc::channel();
        let started = Instant::now();
        let planner = self.perform_run(done).context("launching chain load")?;
        let outcome = signal.recv_timeout(SAFETY_TIMEOUT);
        let elapsed = started.elapsed();
        if outcome.is_err() {
            let stranded = planner.report_stranded();
            planner.release();
            bail!(
                "timeout on scheduler test exceeded ({SAFETY_TIMEOUT:?}); {stranded} of {} nodes never calculated",
                self.chain_load.size()
            );
        }
        planner.release();
        planner.graph.write_back(self.chain_load.nodes_mut());
        let micros = elapsed.as_secs_f64() * 1e6 - self.pre_roll.micros() as f64;
        info!(
            "chain load of {} nodes performed in {:.3}ms",
            self.chain_load.size(),
            micros / 1000.0
        );
        Ok(micros)
    }

    fn perform_run(&mut self, done: Sender<()>) -> anyhow::Result<Arc<ChainPlanner>> {
        if !self.compu_load.time_base.is_zero() {
            self.compu_load.maybe_calibrate();
        }
        let graph = Arc::new(ChainGraph::new(self.chain_load.nodes(), self.chain_load.get_seed()));
        let calc: Arc<dyn JobFunctor> = Arc::new(ChainCalcFunctor {
            graph: Arc::clone(&graph),
            load: self.compu_load.clone(),
            watch: self.watch.clone(),
        });
        let wake_up: Arc<dyn JobFunctor> = Arc::new(WakeUpFunctor {
            signal: Mutex::new(Some(done)),
        });
        let plan = PlanParams {
            start_times: self.anchor_schedule(),
            node_expense: self.node_expense,
            stress: self.stress_fact,
            deadline: self.deadline,
            pre_roll: self.pre_roll,
            chunk_size: self.chunk_size.max(1),
            sched_notify: self.effective_sched_notify(),
            sched_depends: self.sched_depends,
            manifestation: self.manifestation,
        };
        let node_cnt = graph.nodes.len();
        let planner = Arc::new_cyclic(|this| ChainPlanner {
            this: this.clone(),
            scheduler: Arc::downgrade(&self.scheduler),
            graph,
            calc,
            wake_up,
            plan,
            state: Mutex::new(PlanState {
                curr_idx: 0,
                schedule: (0..node_cnt).map(|_| None).collect(),
                wake_up: None,
            }),
        });
        let first_chunk_end = planner.calc_next_chunk_end(0);
        let planning_job = planner.planning_job(first_chunk_end)?;
        self.scheduler
            .seed_calc_stream(planning_job, self.manifestation, self.calc_load_hint())?;
        Ok(planner)
    }

    /// Single-threaded reference time for the graph with the configured load, in µs.
    pub fn calc_runtime_reference(&mut self) -> f64 {
        let time_base = self.compu_load.time_base;
        let size_base = if self.compu_load.use_allocation {
            self.compu_load.size_base
        } else {
            0
        };
        let chain_load = &mut *self.chain_load;
        micro_benchmark(
            || {
                chain_load.perform_graph_synchronously(time_base, size_base);
            },
            GRAPH_BENCHMARK_RUNS,
        )
    }

    // ── Evaluation ───────────────────────────────────────────────

    /// Start time of each level relative to the first, plus the end point.
    pub fn get_schedule_seq(&mut self) -> Vec<Time> {
        if self.start_times.is_empty() {
            self.fill_default_schedule();
        }
        let front = self.start_times[0];
        self.start_times.iter().map(|t| *t - front).collect()
    }

    /// Expected runtime of a complete run in µs.
    pub fn get_expected_end_time(&mut self) -> f64 {
        if self.start_times.is_empty() {
            self.fill_default_schedule();
        }
        let span = self.start_times[self.start_times.len() - 1] - self.start_times[0];
        span.micros() as f64 + self.node_expense.micros() as f64 * self.chain_load.size() as f64 / self.stress_fact
    }

    pub fn get_invocation_statistic(&self) -> Statistic {
        self.watch.as_ref().map(|watch| watch.evaluate()).unwrap_or_default()
    }

    // ── Configuration ────────────────────────────────────────────

    /// Record each calc job invocation; resets previous records.
    pub fn with_instrumentation(&mut self, do_watch: bool) -> &mut Self {
        self.watch = do_watch.then(|| {
            Arc::new(
                IncidenceCount::new()
                    .expect_threads(self.scheduler.config().resolved_capacity())
                    .expect_incidents(self.chain_load.size()),
            )
        });
        self
    }

    pub fn with_planning_step(&mut self, planning_time_per_node: Duration) -> &mut Self {
        self.plan_step = Time::from_duration(planning_time_per_node);
        self.pre_roll = self.guess_planning_preroll();
        self
    }

    pub fn with_chunk_size(&mut self, nodes_per_chunk: usize) -> &mut Self {
        self.chunk_size = nodes_per_chunk.max(1);
        self.pre_roll = self.guess_planning_preroll();
        self
    }

    pub fn with_pre_roll(&mut self, planning_headstart: Duration) -> &mut Self {
        self.pre_roll = Time::from_duration(planning_headstart);
        self
    }

    /// Plan the whole graph in one chunk, ahead of the first job.
    pub fn with_upfront_planning(&mut self) -> &mut Self {
        let size = self.chain_load.size();
        self.with_chunk_size(size);
        self.pre_roll = self.pre_roll.scaled(UPFRONT_PLANNING_BOOST);
        self
    }

    pub fn with_level_duration(&mut self, fixed_time_per_level: Duration) -> &mut Self {
        self.level_step = Time::from_duration(fixed_time_per_level);
        self
    }

    pub fn with_base_expense(&mut self, fixed_time_per_node: Duration) -> &mut Self {
        self.node_expense = Time::from_duration(fixed_time_per_node);
        self
    }

    pub fn with_sched_depends(&mut self, explicitly: bool) -> &mut Self {
        self.sched_depends = explicitly;
        self
    }

    pub fn with_sched_notify(&mut self, do_set_time: bool) -> &mut Self {
        self.sched_notify = do_set_time;
        self
    }

    /// Schedule levels according to their weight, assuming `concurrency`
    /// workers (0 = scheduler capacity). `stress_fac` > 1 tightens the
    /// schedule; `form_fac` accounts for further expenses, relaxing it.
    pub fn with_adapted_schedule(&mut self, stress_fac: f64, concurrency: usize, form_fac: f64) -> &mut Self {
        let default_concurrency = self.default_concurrency();
        let concurrency = if concurrency == 0 {
            default_concurrency
        } else {
            concurrency.clamp(1, 3 * default_concurrency)
        };
        let form_fac = if form_fac > 0.0 { form_fac } else { 1.0 };
        let stress_fac = stress_fac / form_fac;
        let time_base = self.compu_load.time_base;
        self.with_level_duration(time_base);
        self.fill_adapted_schedule(stress_fac, concurrency);
        self
    }

    /// Form factor from the recorded invocations: lack of concurrency and
    /// excess node runtime relative to the configured load. 1.0 without data.
    pub fn determine_empiric_form_factor(&self, concurrency: usize) -> f64 {
        let Some(watch) = &self.watch else {
            return 1.0;
        };
        let stat = watch.evaluate();
        if stat.activation_cnt == 0 || stat.avg_concurrency <= 0.0 {
            return 1.0;
        }
        let concurrency = if concurrency == 0 {
            self.default_concurrency()
        } else {
            concurrency
        };
        let weight_sum = self.chain_load.get_weight_sum();
        let expected_node_time = self.compu_load.time_base.as_secs_f64() * 1e6 * weight_sum as f64
            / self.chain_load.size() as f64;
        let real_avg_node_time = stat.active_time / stat.activation_cnt as f64;
        let form_fac = concurrency as f64 / stat.avg_concurrency;
        if expected_node_time > 0.0 {
            form_fac * real_avg_node_time / expected_node_time
        } else {
            form_fac
        }
    }

    /// Adapt the schedule to the form factor observed in a previous run.
    pub fn adapt_empirically(&mut self, stress_fac: f64, concurrency: usize) -> &mut Self {
        let has_data = self
            .watch
            .as_ref()
            .is_some_and(|watch| watch.evaluate().activation_cnt > 0);
        if has_data {
            let form_fac = self.determine_empiric_form_factor(concurrency);
            self.with_adapted_schedule(stress_fac, concurrency, form_fac);
        }
        self
    }

    pub fn with_job_deadline(&mut self, deadline_after_start: Duration) -> &mut Self {
        self.deadline = Time::from_duration(deadline_after_start);
        self
    }

    /// Multiple of the level frequency announced to the allocator.
    pub fn with_announced_load_factor(&mut self, factor_on_level_speed: u32) -> &mut Self {
        self.block_load_factor = factor_on_level_speed;
        self
    }

    pub fn with_manifestation(&mut self, manifestation: ManifestationId) -> &mut Self {
        self.manifestation = manifestation;
        self
    }

    pub fn with_load_time_base(&mut self, time_base: Duration) -> &mut Self {
        self.compu_load.time_base = time_base;
        self
    }

    pub fn deactivate_load(&mut self) -> &mut Self {
        self.compu_load.time_base = Duration::ZERO;
        self
    }

    /// Memory-bound load with the given block size; 0 switches back to CPU load.
    pub fn with_load_mem(&mut self, size_base: usize) -> &mut Self {
        if size_base == 0 {
            self.compu_load.size_base = LOAD_DEFAULT_MEM_SIZE;
            self.compu_load.use_allocation = false;
        } else {
            self.compu_load.size_base = size_base;
            self.compu_load.use_allocation = true;
        }
        self
    }

    // ── Internals ────────────────────────────────────────────────

    /// Notifications without start time are only safe when the whole graph
    /// is planned at once: otherwise a predecessor may complete before the
    /// next chunk attaches its notification, leaving the successor gate shut.
    pub(super) fn effective_sched_notify(&self) -> bool {
        if self.sched_notify || self.chunk_size >= self.chain_load.size() {
            return self.sched_notify;
        }
        debug!("chunked planning: notifications bound to successor start time");
        true
    }

    fn default_concurrency(&self) -> usize {
        self.scheduler.config().resolved_capacity().max(1)
    }

    fn guess_planning_preroll(&self) -> Time {
        Time::from_micros(self.plan_step.micros() * self.chunk_size as i64)
    }

    fn calc_load_hint(&self) -> f64 {
        let level_secs = self.level_step.as_secs_f64();
        if level_secs > 0.0 {
            self.block_load_factor as f64 / level_secs
        } else {
            0.0
        }
    }

    /// Absolute start times for a run beginning after the pre-roll.
    fn anchor_schedule(&mut self) -> Vec<Time> {
        if self.start_times.is_empty() {
            self.fill_default_schedule();
        }
        let anchor = RealClock::now() + self.pre_roll;
        let front = self.start_times[0];
        self.start_times.iter().map(|t| anchor + (*t - front)).collect()
    }

    fn fill_default_schedule(&mut self) {
        let num_points = self.chain_load.top_level() + 2;
        self.stress_fact = 1.0;
        self.start_times = (0..num_points)
            .map(|level| Time::from_micros(self.level_step.micros() * level as i64))
            .collect();
    }

    fn fill_adapted_schedule(&mut self, stress_fact: f64, concurrency: usize) {
        self.stress_fact = if stress_fact > 0.0 { stress_fact } else { 1.0 };
        let level_step = self.level_step;
        let stress = self.stress_fact;
        self.start_times = std::iter::once(Time::ZERO)
            .chain(
                self.chain_load
                    .level_schedule_sequence(concurrency)
                    .into_iter()
                    .map(|fact| level_step.scaled(fact / stress)),
            )
            .collect();
    }
}
