use std::time::Duration;

use gear_core::{hash_combine, Time};
use gear_scheduler::{BlockFlow, RecordingObserver, Scheduler, SchedulerConfig};

use super::*;

fn idle_scheduler(capacity: usize) -> Arc<Scheduler> {
    Scheduler::new(
        BlockFlow::with_defaults(),
        Arc::new(RecordingObserver::new()),
        SchedulerConfig::with_capacity(capacity),
    )
    .unwrap()
}

// ── Topology ─────────────────────────────────────────────────────

#[test]
fn default_rules_build_a_single_chain() {
    let load = TestChainLoad::new(16).build_topology();

    assert_eq!(load.size(), 16);
    assert_eq!(load.top_level(), 15);
    assert!(load.node(0).is_start());
    for idx in 1..16 {
        assert_eq!(load.node(idx).level, idx);
        assert_eq!(load.node(idx).pred, vec![idx - 1]);
    }
    assert_eq!(load.all_exit_nodes().collect::<Vec<_>>(), vec![15]);
}

#[test]
fn chain_hash_combines_along_the_chain() {
    let load = TestChainLoad::new(8).set_seed(55).build_topology();

    let mut hash = 55;
    for _ in 1..8 {
        let mut next = 0;
        hash_combine(&mut next, hash);
        hash = next;
    }
    let mut expected = 0;
    hash_combine(&mut expected, hash);

    assert_eq!(load.node(7).hash, hash);
    assert_eq!(load.get_hash(), expected);
}

#[test]
fn build_is_deterministic() {
    let a = TestChainLoad::new(256).configure_shape_chain_load_bursts().build_topology();
    let b = TestChainLoad::new(256).configure_shape_chain_load_bursts().build_topology();

    assert_eq!(a.nodes(), b.nodes());
    assert_eq!(a.get_hash(), b.get_hash());

    let c = TestChainLoad::new(256)
        .configure_shape_chain_load_bursts()
        .set_seed(56)
        .build_topology();
    assert_ne!(a.get_hash(), c.get_hash());
}

#[test]
fn topology_links_forward_in_time() {
    let load = TestChainLoad::new(256)
        .configure_shape_short_segments3_interleaved()
        .build_topology();

    let mut prev_level = 0;
    for (idx, node) in load.nodes().iter().enumerate() {
        assert!(node.level >= prev_level, "levels ordered by index");
        prev_level = node.level;
        for &pred in &node.pred {
            assert!(pred < idx);
            assert!(load.node(pred).level < node.level);
            assert!(load.node(pred).succ.contains(&idx));
        }
        for &succ in &node.succ {
            assert!(succ > idx);
        }
    }
    for lw in load.all_level_weights() {
        assert!(lw.nodes <= load.max_fan());
    }
    assert_eq!(load.top_level(), load.all_level_weights().len() - 1);
}

#[test]
fn short_chains_are_pruned_into_many_exits() {
    let load = TestChainLoad::new(64).configure_shape_short_chains2().build_topology();

    let exits = load.all_exit_nodes().count();
    assert!(exits > 1, "pruning produces several chains");
    assert_eq!(load.get_weight_sum(), 64);
}

// ── Evaluation ───────────────────────────────────────────────────

#[test]
fn statistics_account_for_all_nodes() {
    let load = TestChainLoad::new(256).configure_shape_chain_load_bursts().build_topology();
    let stat = load.compute_graph_statistics();

    assert_eq!(stat.nodes, 256);
    assert_eq!(stat.levels, load.top_level() + 1);
    assert_eq!(stat.indicator(StatKey::Node).cnt, 256);
    assert_eq!(stat.indicator(StatKey::Weight).cnt, load.get_weight_sum());
    let seeds = load.nodes().iter().filter(|n| n.is_start()).count();
    assert_eq!(stat.indicator(StatKey::Seed).cnt, seeds);
    let exits = load.all_exit_nodes().count();
    assert_eq!(stat.indicator(StatKey::Exit).cnt, exits);
    assert!(stat.render().contains("node: 256"));
}

#[test]
fn weight_factor_accounts_for_concurrency() {
    let full = LevelWeight {
        level: 0,
        nodes: 8,
        endidx: 7,
        weight: 8,
    };
    assert_eq!(compute_weight_factor(&full, 4), 2.0);
    assert_eq!(compute_weight_factor(&full, 1), 8.0);

    let uneven = LevelWeight {
        nodes: 5,
        weight: 5,
        ..full
    };
    assert_eq!(compute_weight_factor(&uneven, 4), 2.0);
}

#[test]
fn level_schedule_sums_level_weights() {
    let load = TestChainLoad::new(8).build_topology().set_weight(1);
    let seq = load.level_schedule_sequence(4);

    assert_eq!(seq, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

    let load = TestChainLoad::new(256).configure_shape_chain_load_bursts().build_topology();
    let seq = load.level_schedule_sequence(4);
    assert_eq!(seq.len(), load.top_level() + 1);
    assert!(seq.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn recalculation_reproduces_the_graph_hash() {
    let mut load = TestChainLoad::new(128).configure_shape_chain_load_bursts().build_topology();
    let hash = load.get_hash();

    load.clear_node_hashes();
    load.recalculate();
    assert_eq!(load.get_hash(), hash);

    load.clear_node_hashes();
    load.perform_graph_synchronously(Duration::ZERO, 0);
    assert_eq!(load.get_hash(), hash);
}

#[test]
fn dot_rendering_lists_nodes_and_layers() {
    let load = TestChainLoad::new(4).build_topology();
    let dot = load.generate_topology_dot();

    assert!(dot.starts_with("digraph {"));
    assert!(dot.contains("N0 [label=\"0: "));
    assert!(dot.contains("{ rank=min; N0 }"));
    assert!(dot.contains("{ rank=same; N3 }"));
    assert!(dot.contains("N2 -> N3"));
}

// ── Schedule setup ───────────────────────────────────────────────

#[test]
fn default_schedule_steps_one_level_per_millisecond() {
    let scheduler = idle_scheduler(4);
    let mut load = TestChainLoad::new(16).build_topology();
    let mut ctx = load.setup_schedule(&scheduler);

    let seq = ctx.get_schedule_seq();
    assert_eq!(seq.len(), 17);
    for (level, t) in seq.iter().enumerate() {
        assert_eq!(*t, Time::from_millis(level as i64));
    }
    assert_eq!(ctx.get_expected_end_time(), 16_000.0);
}

#[test]
fn adapted_schedule_follows_level_weights() {
    let scheduler = idle_scheduler(4);
    let mut load = TestChainLoad::new(8).build_topology().set_weight(1);
    let mut ctx = load.setup_schedule(&scheduler);

    ctx.with_load_time_base(Duration::from_micros(100))
        .with_adapted_schedule(1.0, 4, 1.0);
    let seq = ctx.get_schedule_seq();
    assert_eq!(seq.len(), 9);
    for (level, t) in seq.iter().enumerate() {
        assert_eq!(t.micros(), 100 * level as i64);
    }

    ctx.with_adapted_schedule(2.0, 4, 1.0);
    assert_eq!(ctx.get_schedule_seq()[8].micros(), 400);
    assert_eq!(ctx.get_expected_end_time(), 400.0);
}

#[test]
fn adapted_schedule_is_idempotent() {
    let scheduler = idle_scheduler(4);
    let mut load = TestChainLoad::new(256).configure_shape_chain_load_bursts().build_topology();
    let mut ctx = load.setup_schedule(&scheduler);

    ctx.with_adapted_schedule(1.3, 4, 1.0);
    let first = ctx.get_schedule_seq();
    ctx.with_adapted_schedule(1.3, 4, 1.0);
    assert_eq!(ctx.get_schedule_seq(), first);
}

#[test]
fn form_factor_is_neutral_without_observations() {
    let scheduler = idle_scheduler(4);
    let mut load = TestChainLoad::new(32).build_topology();
    let mut ctx = load.setup_schedule(&scheduler);

    assert_eq!(ctx.determine_empiric_form_factor(4), 1.0);
    ctx.with_instrumentation(true);
    assert_eq!(ctx.determine_empiric_form_factor(4), 1.0);
    assert_eq!(ctx.get_invocation_statistic().activation_cnt, 0);
}

#[test]
fn chunked_planning_binds_notification_to_start_time() {
    let scheduler = idle_scheduler(2);
    let mut load = TestChainLoad::new(48).configure_shape_chain_load_bursts().build_topology();
    let mut ctx = load.setup_schedule(&scheduler);

    ctx.with_sched_notify(false).with_chunk_size(8);
    assert!(ctx.effective_sched_notify());

    ctx.with_upfront_planning();
    assert!(!ctx.effective_sched_notify());

    ctx.with_sched_notify(true).with_chunk_size(8);
    assert!(ctx.effective_sched_notify());
}
