//! Integration tests driving synthetic chain loads through a live scheduler.
//!
//! Each run checks the computed graph hash against the reference computed
//! while building the topology; a mismatch means some job ran out of
//! dependency order or not at all. Tests marked with `#[ignore]` measure
//! timing and need a quiet machine with at least four cores.

use std::sync::Arc;
use std::time::Duration;

use gear_scheduler::{BlockFlow, RecordingObserver, Scheduler, SchedulerConfig};
use gear_testkit::{Shape, StressRig, TestChainLoad};

fn live_scheduler(capacity: usize) -> Arc<Scheduler> {
    let scheduler = Scheduler::new(
        BlockFlow::with_defaults(),
        Arc::new(RecordingObserver::new()),
        SchedulerConfig::with_capacity(capacity),
    )
    .unwrap();
    scheduler.ignite();
    scheduler
}

// ── Functional runs ──────────────────────────────────────────────────

#[test]
fn chain_load_computes_through_scheduler() {
    let scheduler = live_scheduler(4);
    let mut load = TestChainLoad::new(64)
        .configure_shape_short_segments3_interleaved()
        .build_topology();
    let expected_hash = load.get_hash();

    let stat = {
        let mut ctx = load.setup_schedule(&scheduler);
        ctx.deactivate_load()
            .with_chunk_size(16)
            .with_job_deadline(Duration::from_millis(200))
            .with_instrumentation(true);
        let runtime = ctx.launch_and_wait().unwrap();
        assert!(runtime > 0.0);
        ctx.get_invocation_statistic()
    };
    scheduler.terminate_processing();

    assert_eq!(load.get_hash(), expected_hash);
    assert_eq!(stat.activation_cnt, 64);
}

#[test]
fn planning_in_chunks_matches_upfront_planning() {
    let scheduler = live_scheduler(2);
    let mut load = TestChainLoad::new(48).configure_shape_chain_load_bursts().build_topology();
    let expected_hash = load.get_hash();

    load.setup_schedule(&scheduler)
        .deactivate_load()
        .with_upfront_planning()
        .with_job_deadline(Duration::from_millis(200))
        .launch_and_wait()
        .unwrap();
    assert_eq!(load.get_hash(), expected_hash);

    load.setup_schedule(&scheduler)
        .deactivate_load()
        .with_chunk_size(8)
        .with_sched_notify(false)
        .with_job_deadline(Duration::from_millis(200))
        .launch_and_wait()
        .unwrap();
    assert_eq!(load.get_hash(), expected_hash);

    scheduler.terminate_processing();
}

#[test]
fn moderate_load_completes_with_standard_planning() {
    let scheduler = live_scheduler(2);
    let mut load = TestChainLoad::new(192).configure_shape_chain_load_bursts().build_topology();
    let expected_hash = load.get_hash();

    let stat = {
        let mut ctx = load.setup_schedule(&scheduler);
        ctx.with_chunk_size(32)
            .with_job_deadline(Duration::from_millis(50))
            .with_load_time_base(Duration::from_micros(200))
            .with_instrumentation(true)
            .with_adapted_schedule(1.0, 2, 1.5);
        ctx.launch_and_wait().unwrap();
        ctx.get_invocation_statistic()
    };
    scheduler.terminate_processing();

    assert_eq!(stat.activation_cnt, 192);
    assert_eq!(load.get_hash(), expected_hash);
}

// ── Timing ───────────────────────────────────────────────────────────

#[test]
#[ignore = "timing benchmark; takes several seconds and needs four idle cores"]
fn sustained_load_keeps_workers_busy() {
    let scheduler = live_scheduler(4);
    let mut load = TestChainLoad::new(1024).configure_shape_chain_load_bursts().build_topology();
    let expected_hash = load.get_hash();

    let stat = {
        let mut ctx = load.setup_schedule(&scheduler);
        ctx.with_chunk_size(32)
            .with_job_deadline(Duration::from_millis(50))
            .with_load_time_base(Duration::from_millis(5))
            .with_instrumentation(true)
            .with_adapted_schedule(1.0, 4, 1.0);
        ctx.launch_and_wait().unwrap();
        ctx.get_invocation_statistic()
    };
    scheduler.terminate_processing();

    assert_eq!(stat.activation_cnt, 1024);
    assert_eq!(load.get_hash(), expected_hash);
    assert!(stat.avg_concurrency > 3.0, "∅ concurrency {:.2}", stat.avg_concurrency);
}

#[test]
#[ignore = "timing benchmark; runs the breaking point search for minutes"]
fn breaking_point_is_close_to_nominal_stress() {
    let rig = StressRig {
        concurrency: 4,
        nodes: 64,
        shape: Shape::Chain,
        ..StressRig::default()
    };
    let result = rig.breaking_point().perform().unwrap();

    assert!(
        (result.stress_fac - 1.0).abs() < 0.15,
        "breaking point at stress {:.3}",
        result.stress_fac
    );
}
