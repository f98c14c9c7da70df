//! Stress testing the scheduler by tightening the schedule of a
//! [`TestChainLoad`] until it breaks.
//!
//! [`StressRig`] holds the configuration: the test graph, its schedule
//! setup and the criteria deciding a breakdown. [`BreakingPoint`] runs a
//! binary search over the stress factor, where 1.0 corresponds to a schedule
//! exactly fitting the computational load on the configured concurrency.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context};
use gear_scheduler::{BlockFlow, Scheduler, SchedulerConfig, TracingObserver};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain_load::{ScheduleCtx, TestChainLoad, LOAD_DEFAULT_TIME};

/// Preconfigured graph topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Shape {
    /// Single linear chain.
    #[default]
    Chain,
    /// Isolated 2-step chains.
    ShortChains2,
    /// Interleaved 3-step chains.
    ShortChains3Interleaved,
    /// Interwoven 3-step segments.
    ShortSegments3Interleaved,
    /// Parallel chains, followed by bursts of load.
    ChainLoadBursts,
}

impl Shape {
    pub fn configure(self, load: TestChainLoad) -> TestChainLoad {
        match self {
            Shape::Chain => load,
            Shape::ShortChains2 => load.configure_shape_short_chains2(),
            Shape::ShortChains3Interleaved => load.configure_shape_short_chains3_interleaved(),
            Shape::ShortSegments3Interleaved => load.configure_shape_short_segments3_interleaved(),
            Shape::ChainLoadBursts => load.configure_shape_chain_load_bursts(),
        }
    }
}

/// Configuration of a stress test.
///
/// Times in the breakdown criteria are given in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressRig {
    /// Worker capacity of the scheduler under test; 0 = available parallelism.
    pub concurrency: usize,
    pub instrumentation: bool,
    /// Bound to abort the binary search.
    pub epsilon: f64,
    /// Starting point for the upper limit, likely to fail.
    pub upper_stress: f64,
    /// Delay beyond the expected end time counting a run as failure.
    pub fail_limit: f64,
    /// Failure rate above which a breakdown is considered.
    pub trigger_fail: f64,
    /// Standard deviation of the run times above which a breakdown is considered.
    pub trigger_sdev: f64,
    /// Average delay above which a breakdown is considered.
    pub trigger_delta: f64,
    /// Runs per probed stress factor.
    pub repetitions: usize,
    pub nodes: usize,
    pub shape: Shape,
    pub level_duration: Duration,
    pub job_deadline: Duration,
    pub load_time_base: Duration,
    pub upfront_planning: bool,
    /// Log each individual run.
    pub show_runs: bool,
    /// Determine the single-threaded reference time at the end.
    pub show_ref: bool,
}

impl Default for StressRig {
    fn default() -> Self {
        let fail_limit = 2.0;
        Self {
            concurrency: 0,
            instrumentation: true,
            epsilon: 0.01,
            upper_stress: 1.7,
            fail_limit,
            trigger_fail: 0.55,
            trigger_sdev: fail_limit,
            trigger_delta: 2.0 * fail_limit,
            repetitions: 20,
            nodes: 64,
            shape: Shape::Chain,
            level_duration: Duration::from_micros(200),
            job_deadline: Duration::from_millis(500),
            load_time_base: LOAD_DEFAULT_TIME,
            upfront_planning: true,
            show_runs: false,
            show_ref: true,
        }
    }
}

impl StressRig {
    /// Build the test graph.
    pub fn test_load(&self) -> TestChainLoad {
        self.shape.configure(TestChainLoad::new(self.nodes)).build_topology()
    }

    /// Basic schedule setup, before the stress factor is applied.
    pub fn test_setup(&self, ctx: &mut ScheduleCtx<'_>) {
        ctx.with_level_duration(self.level_duration)
            .with_job_deadline(self.job_deadline)
            .with_load_time_base(self.load_time_base);
        if self.upfront_planning {
            ctx.with_upfront_planning();
        }
    }

    /// Scheduler with the configured worker capacity.
    pub fn build_scheduler(&self) -> anyhow::Result<Arc<Scheduler>> {
        let scheduler = Scheduler::new(
            BlockFlow::with_defaults(),
            Arc::new(TracingObserver),
            SchedulerConfig::with_capacity(self.concurrency),
        )
        .context("creating scheduler for stress test")?;
        Ok(scheduler)
    }

    pub fn breaking_point(&self) -> BreakingPoint<'_> {
        BreakingPoint::new(self)
    }
}

// ── Breaking point search ────────────────────────────────────────

/// Observations for one stress factor, times in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StressResult {
    pub stress_fac: f64,
    /// Fraction of failed runs.
    pub percent_off: f64,
    pub std_dev: f64,
    /// Average run time minus expected time; may be negative.
    pub avg_delta: f64,
    pub avg_time: f64,
    pub exp_time: f64,
}

/// Search for the stress factor where the schedule breaks down.
///
/// Each probe configures an adapted schedule for the stress factor and
/// performs repeated runs. A probe breaks when almost all runs fail, or when
/// failures, scatter and average delay all exceed their triggers. While
/// probing at high stress, the schedule is adjusted to the empirical form
/// factor of the observed runs.
pub struct BreakingPoint<'r> {
    rig: &'r StressRig,
    adjustment_fac: f64,
    gauge_probes: usize,
    observations: Vec<StressResult>,
}

impl<'r> BreakingPoint<'r> {
    pub fn new(rig: &'r StressRig) -> Self {
        Self {
            rig,
            adjustment_fac: 1.0,
            gauge_probes: 3 * rig.repetitions,
            observations: Vec::new(),
        }
    }

    pub fn observations(&self) -> &[StressResult] {
        &self.observations
    }

    /// Conduct the search on a fresh scheduler; returns the result averaged
    /// over the last probes, with the determined breaking point.
    pub fn perform(&mut self) -> anyhow::Result<StressResult> {
        let rig = self.rig;
        ensure!(rig.repetitions > 0, "stress test needs at least one repetition");
        let scheduler = rig.build_scheduler()?;
        scheduler.ignite();

        let mut load = rig.test_load();
        let outcome = {
            let mut ctx = load.setup_schedule(&scheduler);
            rig.test_setup(&mut ctx);
            self.conduct_binary_search(&mut ctx).map(|res| {
                show_res(&res);
                if rig.show_ref {
                    info!("{:>9}: {:5.2}ms", "refTime", ctx.calc_runtime_reference() / 1000.0);
                }
                res
            })
        };
        scheduler.terminate_processing();
        outcome
    }

    fn conduct_binary_search(&mut self, ctx: &mut ScheduleCtx<'_>) -> anyhow::Result<StressResult> {
        let rig = self.rig;
        let break_point = binary_search_upper(
            |stress| self.perform_evaluation(ctx, stress),
            0.0,
            rig.upper_stress,
            rig.epsilon,
        )?;
        ensure!(self.observations.len() >= 2, "binary search yielded too few observations");

        let points = self.observations.len().min(3);
        let recent = &self.observations[self.observations.len() - points..];
        let avg = |field: fn(&StressResult) -> f64| recent.iter().map(field).sum::<f64>() / points as f64;
        Ok(StressResult {
            stress_fac: break_point,
            percent_off: avg(|r| r.percent_off),
            std_dev: avg(|r| r.std_dev),
            avg_delta: avg(|r| r.avg_delta),
            avg_time: avg(|r| r.avg_time),
            exp_time: avg(|r| r.exp_time),
        })
    }

    fn perform_evaluation(&mut self, ctx: &mut ScheduleCtx<'_>, stress_fac: f64) -> anyhow::Result<bool> {
        self.configure_test(ctx, stress_fac);
        let res = self.run_probes(ctx, stress_fac)?;
        self.observations.push(res);
        Ok(self.decide_break_point(&res))
    }

    fn configure_test(&self, ctx: &mut ScheduleCtx<'_>, stress_fac: f64) {
        ctx.with_instrumentation(self.rig.instrumentation)
            .with_adapted_schedule(stress_fac, self.rig.concurrency, self.adjustment_fac);
    }

    fn run_probes(&mut self, ctx: &mut ScheduleCtx<'_>, stress_fac: f64) -> anyhow::Result<StressResult> {
        let reps = self.rig.repetitions;
        let mut run_time = Vec::with_capacity(reps);
        for _ in 0..reps {
            run_time.push(ctx.launch_and_wait()? / 1000.0);
            self.maybe_adapt_scale_empirically(ctx, stress_fac);
        }
        let exp_time = ctx.get_expected_end_time() / 1000.0;
        let avg_time = run_time.iter().sum::<f64>() / reps as f64;
        let mut failures = 0usize;
        let mut sdev = 0.0;
        for (i, t) in run_time.iter().enumerate() {
            sdev += (t - avg_time).powi(2);
            let delta = t - exp_time;
            let fail = delta > self.rig.fail_limit;
            if fail {
                failures += 1;
            }
            if self.rig.show_runs {
                info!(
                    "....·{i:<2}:  Δ={delta:4.1}        t={t:4.1}  {} {}",
                    if *t > avg_time { "+" } else { "-" },
                    if fail { "●" } else { "○" }
                );
            }
        }
        let res = StressResult {
            stress_fac,
            percent_off: failures as f64 / reps as f64,
            std_dev: (sdev / reps as f64).sqrt(),
            avg_delta: avg_time - exp_time,
            avg_time,
            exp_time,
        };
        info!(
            "{:4.2}|  : ∅Δ={:4.1}±{:<4.2}  ∅t={:4.1}  {} %{:<3.0} -- expect:{:4.1}ms",
            res.stress_fac,
            res.avg_delta,
            res.std_dev,
            res.avg_time,
            if self.decide_break_point(&res) { "—◆—" } else { "—◇—" },
            100.0 * res.percent_off,
            res.exp_time
        );
        Ok(res)
    }

    fn decide_break_point(&self, res: &StressResult) -> bool {
        res.percent_off > 0.99
            || (res.percent_off > self.rig.trigger_fail
                && res.std_dev > self.rig.trigger_sdev
                && res.avg_delta > self.rig.trigger_delta)
    }

    /// Close to the breaking point, blend the empirical form factor of the
    /// last runs into the schedule adjustment.
    fn maybe_adapt_scale_empirically(&mut self, ctx: &mut ScheduleCtx<'_>, stress_fac: f64) {
        if self.gauge_probes == 0 {
            return;
        }
        let gain = stress_fac.powi(9).clamp(0.0, 1.0);
        if gain < 0.2 {
            return;
        }
        let form_fac = ctx.determine_empiric_form_factor(self.rig.concurrency);
        self.adjustment_fac = gain * form_fac + (1.0 - gain) * self.adjustment_fac;
        debug!("stress {stress_fac:.2}: schedule adjustment {:.3}", self.adjustment_fac);
        ctx.with_adapted_schedule(stress_fac, self.rig.concurrency, self.adjustment_fac);
        self.gauge_probes -= 1;
    }
}

fn show_res(res: &StressResult) {
    info!("{:>9}: {:5.2}", "stresFac", res.stress_fac);
    info!("{:>9}: {:5.2}%", "fail", res.percent_off * 100.0);
    info!("{:>9}= {:5.2} ±{:4.2}ms", "delta", res.avg_delta, res.std_dev);
    info!("{:>9}: {:5.2}ms", "runTime", res.avg_time);
    info!("{:>9}: {:5.2}ms", "expected", res.exp_time);
}

/// Maximum doublings of the upper bound while it does not yet break.
const MAX_UPPER_EXTENSIONS: usize = 5;

/// Binary search for the lowest parameter where `breaks` holds, assuming it
/// is monotonous. The upper bound is extended when it does not break.
fn binary_search_upper(
    mut breaks: impl FnMut(f64) -> anyhow::Result<bool>,
    lower: f64,
    upper: f64,
    epsilon: f64,
) -> anyhow::Result<f64> {
    let (mut lower, mut upper) = (lower, upper);
    let mut extensions = 0;
    while !breaks(upper)? {
        ensure!(
            extensions < MAX_UPPER_EXTENSIONS,
            "no breaking point found up to {upper:.2}"
        );
        lower = upper;
        upper *= 2.0;
        extensions += 1;
    }
    while upper - lower >= epsilon {
        let mid = (lower + upper) / 2.0;
        if breaks(mid)? {
            upper = mid;
        } else {
            lower = mid;
        }
    }
    Ok((lower + upper) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_search_converges_on_threshold() {
        let mut probes = Vec::new();
        let found = binary_search_upper(
            |x| {
                probes.push(x);
                Ok(x > 0.8)
            },
            0.0,
            1.7,
            0.01,
        )
        .unwrap();

        assert!((found - 0.8).abs() < 0.01, "found {found}");
        assert_eq!(probes[0], 1.7);
        assert!(probes.len() > 5);
    }

    #[test]
    fn binary_search_extends_upper_bound() {
        let found = binary_search_upper(|x| Ok(x > 2.5), 0.0, 1.7, 0.01).unwrap();
        assert!((found - 2.5).abs() < 0.01, "found {found}");

        assert!(binary_search_upper(|_| Ok(false), 0.0, 1.0, 0.01).is_err());
    }

    #[test]
    fn break_point_criteria() {
        let rig = StressRig::default();
        let bp = BreakingPoint::new(&rig);
        let nominal = StressResult {
            stress_fac: 1.0,
            ..StressResult::default()
        };
        assert!(!bp.decide_break_point(&nominal));

        let total_failure = StressResult {
            percent_off: 1.0,
            ..nominal
        };
        assert!(bp.decide_break_point(&total_failure));

        let scattered = StressResult {
            percent_off: 0.6,
            std_dev: 2.5,
            avg_delta: 4.5,
            ..nominal
        };
        assert!(bp.decide_break_point(&scattered));
        let consistent = StressResult {
            std_dev: 1.0,
            ..scattered
        };
        assert!(!bp.decide_break_point(&consistent));
    }

    #[test]
    fn default_rig_matches_breakdown_triggers() {
        let rig = StressRig::default();
        assert_eq!(rig.trigger_sdev, rig.fail_limit);
        assert_eq!(rig.trigger_delta, 2.0 * rig.fail_limit);
        assert_eq!(BreakingPoint::new(&rig).gauge_probes, 60);
        assert_eq!(rig.test_load().size(), 64);
    }
}
