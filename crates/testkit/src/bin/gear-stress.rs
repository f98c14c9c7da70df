//! gear-stress: drive synthetic render graphs through the scheduler.
//!
//! Subcommands:
//! - `run`: perform a chain load once, report run time and invocation statistics
//! - `breaking-point`: search the stress factor where the schedule breaks down
//! - `topology`: print the generated graph as Graphviz or as statistics table

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use gear_core::config::load_dotenv;
use gear_scheduler::{BlockFlow, Scheduler, SchedulerConfig, TracingObserver};
use gear_testkit::{Shape, StressResult, StressRig, TestChainLoad};

// ── CLI ─────────────────────────────────────────────────────────────

/// Load and stress tests for the gear scheduler.
#[derive(Parser, Debug)]
#[command(name = "gear-stress", version, about)]
struct Cli {
    /// Print results as JSON instead of a log summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Perform a chain load once through the scheduler.
    Run(RunArgs),
    /// Binary search for the breaking point of the schedule.
    BreakingPoint(BreakingArgs),
    /// Show the generated topology.
    Topology(TopologyArgs),
}

#[derive(Args, Debug)]
struct GraphArgs {
    /// Graph topology.
    #[arg(long, value_enum, env = "GEAR_SHAPE", default_value_t = Shape::ChainLoadBursts)]
    shape: Shape,

    /// Number of nodes in the graph.
    #[arg(long, env = "GEAR_NODES", default_value_t = 256)]
    nodes: usize,

    /// Seed hash, overriding the preset of the shape.
    #[arg(long)]
    seed: Option<u64>,
}

impl GraphArgs {
    fn build(&self) -> Result<TestChainLoad> {
        ensure!(self.nodes > 1, "a graph needs at least two nodes");
        let mut load = self.shape.configure(TestChainLoad::new(self.nodes));
        if let Some(seed) = self.seed {
            load = load.set_seed(seed);
        }
        Ok(load.build_topology())
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    graph: GraphArgs,

    /// Scheduler config file (TOML); defaults apply when omitted.
    #[arg(long, env = "GEAR_CONFIG")]
    config: Option<String>,

    /// Worker capacity, overriding the config; 0 = available parallelism.
    #[arg(long, env = "GEAR_WORKERS")]
    workers: Option<usize>,

    /// Nodes planned per chunk.
    #[arg(long, default_value_t = 32)]
    chunk: usize,

    /// Deadline per job in milliseconds.
    #[arg(long, default_value_t = 50)]
    deadline_ms: u64,

    /// Computational load per unit of node weight in microseconds; 0 = no load.
    #[arg(long, default_value_t = 5000)]
    load_us: u64,

    /// Stress factor for a schedule adapted to the node weights; 0 = fixed level steps.
    #[arg(long, default_value_t = 1.0)]
    stress: f64,
}

#[derive(Args, Debug)]
struct BreakingArgs {
    #[command(flatten)]
    graph: GraphArgs,

    /// Worker capacity; 0 = available parallelism.
    #[arg(long, env = "GEAR_WORKERS", default_value_t = 0)]
    workers: usize,

    /// Runs per probed stress factor.
    #[arg(long, default_value_t = 20)]
    repetitions: usize,

    /// Computational load per unit of node weight in microseconds.
    #[arg(long, default_value_t = 100)]
    load_us: u64,

    /// Log each individual run.
    #[arg(long)]
    show_runs: bool,
}

#[derive(Args, Debug)]
struct TopologyArgs {
    #[command(flatten)]
    graph: GraphArgs,

    /// Emit Graphviz source instead of the statistics table.
    #[arg(long)]
    dot: bool,
}

// ── Reports ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RunReport {
    nodes: usize,
    levels: usize,
    workers: usize,
    runtime_ms: f64,
    expected_ms: f64,
    reference_hash: u64,
    computed_hash: u64,
    activations: usize,
    avg_concurrency: f64,
    active_ms: f64,
    covered_ms: f64,
    deadline_misses: u64,
}

#[derive(Debug, Serialize)]
struct BreakingReport {
    nodes: usize,
    workers: usize,
    #[serde(flatten)]
    result: StressResult,
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args, cli.json),
        Command::BreakingPoint(args) => breaking_point(args, cli.json),
        Command::Topology(args) => topology(args),
    }
}

fn run(args: RunArgs, json: bool) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SchedulerConfig::from_file(path).with_context(|| format!("loading scheduler config {path}"))?,
        None => SchedulerConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.computation_capacity = workers;
    }
    let workers = config.resolved_capacity();
    config.log_summary();
    let scheduler = Scheduler::new(BlockFlow::with_defaults(), Arc::new(TracingObserver), config)
        .context("creating scheduler")?;
    scheduler.ignite();

    let mut load = args.graph.build()?;
    let reference_hash = load.get_hash();
    let levels = load.top_level() + 1;
    info!("performing {} nodes in {} levels on {} workers", load.size(), levels, workers);

    let (runtime, expected, stat) = {
        let mut ctx = load.setup_schedule(&scheduler);
        ctx.with_chunk_size(args.chunk)
            .with_job_deadline(Duration::from_millis(args.deadline_ms))
            .with_instrumentation(true);
        if args.load_us == 0 {
            ctx.deactivate_load();
        } else {
            ctx.with_load_time_base(Duration::from_micros(args.load_us));
        }
        if args.stress > 0.0 {
            ctx.with_adapted_schedule(args.stress, workers, 1.0);
        }
        let runtime = ctx.launch_and_wait();
        (runtime, ctx.get_expected_end_time(), ctx.get_invocation_statistic())
    };
    let deadline_misses = scheduler.metrics().deadline_misses;
    scheduler.terminate_processing();
    let runtime = runtime?;

    let report = RunReport {
        nodes: load.size(),
        levels,
        workers,
        runtime_ms: runtime / 1000.0,
        expected_ms: expected / 1000.0,
        reference_hash,
        computed_hash: load.get_hash(),
        activations: stat.activation_cnt,
        avg_concurrency: stat.avg_concurrency,
        active_ms: stat.active_time / 1000.0,
        covered_ms: stat.covered_time / 1000.0,
        deadline_misses,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!(
            "run time {:.2}ms (expected {:.2}ms), {} activations, ∅ concurrency {:.2}",
            report.runtime_ms, report.expected_ms, report.activations, report.avg_concurrency
        );
        info!(
            "hash {:x} ({})",
            report.computed_hash,
            if report.computed_hash == report.reference_hash { "ok" } else { "MISMATCH" }
        );
    }
    ensure!(
        report.computed_hash == report.reference_hash,
        "scheduled computation diverged from the reference hash"
    );
    Ok(())
}

fn breaking_point(args: BreakingArgs, json: bool) -> Result<()> {
    let rig = StressRig {
        concurrency: args.workers,
        repetitions: args.repetitions,
        nodes: args.graph.nodes,
        shape: args.graph.shape,
        load_time_base: Duration::from_micros(args.load_us),
        show_runs: args.show_runs,
        ..StressRig::default()
    };
    let result = rig.breaking_point().perform()?;
    if json {
        let report = BreakingReport {
            nodes: rig.nodes,
            workers: SchedulerConfig::with_capacity(rig.concurrency).resolved_capacity(),
            result,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn topology(args: TopologyArgs) -> Result<()> {
    let load = args.graph.build()?;
    if args.dot {
        print!("{}", load.generate_topology_dot());
    } else {
        print!("{}", load.compute_graph_statistics().render());
        println!("HASH: {:x}", load.get_hash());
    }
    Ok(())
}
