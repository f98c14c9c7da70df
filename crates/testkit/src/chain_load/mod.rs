//! Generator for synthetic render job graphs, to load-test the scheduler.
//!
//! A [`TestChainLoad`] allocates a fixed number of [`Node`]s and wires them
//! into a DAG organised in time levels. Topology is controlled by [`Rule`]s
//! evaluated on each node's hash, so the same seed and rules always yield
//! the same graph. Each node computes its hash by combining its
//! predecessors' hashes; the combination of all exit hashes identifies a
//! correct computation of the whole graph.
//!
//! - `node`: graph node and its classification
//! - `rule`: hash-driven random draw for topology parameters
//! - `stats`: per-level connectivity statistics
//! - `load`: [`ComputationalLoad`], a calibrated busy loop
//! - `schedule`: [`ScheduleCtx`], driving the graph through a [`Scheduler`]

mod load;
mod node;
mod rule;
mod schedule;
mod stats;

#[cfg(test)]
mod tests;

use std::fmt::Write;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use gear_core::hash_combine;
use gear_scheduler::Scheduler;
use serde::Serialize;
use tracing::debug;

pub use self::load::{
    benchmark_time, micro_benchmark, ComputationalLoad, LOAD_BENCHMARK_RUNS, LOAD_DEFAULT_MEM_SIZE, LOAD_DEFAULT_TIME,
    LOAD_SPEED_BASELINE,
};
pub use self::node::Node;
pub use self::rule::Rule;
pub use self::schedule::{
    ScheduleCtx, DEFAULT_CHUNKSIZE, SAFETY_TIMEOUT, SCHEDULE_LEVEL_STEP, SCHEDULE_NODE_STEP, SCHEDULE_PLAN_STEP,
    SCHEDULE_WAKE_UP, STANDARD_DEADLINE, UPFRONT_PLANNING_BOOST,
};
pub use self::stats::{Indicator, StatKey, TopologyStatistic};

/// Default maximum fan-in/out per node, also limiting parallel strands.
pub const DEFAULT_FAN: usize = 16;
/// Default node count.
pub const DEFAULT_SIZ: usize = 256;
/// Repetitions for the synchronous reference run.
pub const GRAPH_BENCHMARK_RUNS: usize = 5;

/// Aggregated node weights of one time level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelWeight {
    pub level: usize,
    pub nodes: usize,
    /// Index of the last node in this level.
    pub endidx: usize,
    pub weight: usize,
}

/// Expense of a level, assuming its nodes run in parallel on `concurrency`
/// workers and the speed-up applies evenly to the summed weights.
pub fn compute_weight_factor(lw: &LevelWeight, concurrency: usize) -> f64 {
    let concurrency = concurrency.max(1) as f64;
    let speed_up = if lw.nodes > 0 {
        lw.nodes as f64 / (lw.nodes as f64 / concurrency).ceil()
    } else {
        1.0
    };
    lw.weight as f64 / speed_up
}

/// Synthetic computation graph with deterministic, rule-driven topology.
pub struct TestChainLoad {
    nodes: Vec<Node>,
    max_fan: usize,
    seeding_rule: Rule,
    expansion_rule: Rule,
    reduction_rule: Rule,
    pruning_rule: Rule,
    weight_rule: Rule,
}

impl Default for TestChainLoad {
    fn default() -> Self {
        Self::new(DEFAULT_SIZ)
    }
}

impl TestChainLoad {
    /// Graph with `node_cnt` nodes and the default fan of 16.
    ///
    /// # Panics
    /// At least two nodes are required.
    pub fn new(node_cnt: usize) -> Self {
        Self::with_fan(node_cnt, DEFAULT_FAN)
    }

    /// # Panics
    /// At least two nodes and a fan of at least two are required.
    pub fn with_fan(node_cnt: usize, max_fan: usize) -> Self {
        assert!(node_cnt > 1, "a chain load needs at least two nodes");
        assert!(max_fan > 1, "a chain load needs a fan of at least two");
        Self {
            nodes: vec![Node::default(); node_cnt],
            max_fan,
            seeding_rule: Rule::new(),
            expansion_rule: Rule::new(),
            reduction_rule: Rule::new(),
            pruning_rule: Rule::new(),
            weight_rule: Rule::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_fan(&self) -> usize {
        self.max_fan
    }

    pub fn top_level(&self) -> usize {
        self.nodes.last().map_or(0, |n| n.level)
    }

    pub fn get_seed(&self) -> u64 {
        self.nodes[0].hash
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    /// Indices of all nodes without successor.
    pub fn all_exit_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_exit())
            .map(|(idx, _)| idx)
    }

    /// Global hash: combination of all non-zero exit node hashes.
    pub fn get_hash(&self) -> u64 {
        self.all_exit_nodes()
            .map(|idx| self.nodes[idx].hash)
            .filter(|h| *h != 0)
            .fold(0, |mut acc, h| {
                hash_combine(&mut acc, h);
                acc
            })
    }

    // ── Topology control ─────────────────────────────────────────

    pub fn seeding_rule(mut self, rule: Rule) -> Self {
        self.seeding_rule = rule;
        self
    }

    pub fn expansion_rule(mut self, rule: Rule) -> Self {
        self.expansion_rule = rule;
        self
    }

    pub fn reduction_rule(mut self, rule: Rule) -> Self {
        self.reduction_rule = rule;
        self
    }

    pub fn pruning_rule(mut self, rule: Rule) -> Self {
        self.pruning_rule = rule;
        self
    }

    pub fn weight_rule(mut self, rule: Rule) -> Self {
        self.weight_rule = rule;
        self
    }

    pub fn rule() -> Rule {
        Rule::new()
    }

    pub fn value(v: usize) -> Rule {
        Rule::new().fixed_val(v)
    }

    pub fn rule_at_start(v: usize) -> Rule {
        Rule::new().mapping(move |n| if n.is_start() { Self::value(v) } else { Rule::new() })
    }

    pub fn rule_at_join(v: usize) -> Rule {
        Rule::new().mapping(move |n| if n.is_join() { Self::value(v) } else { Rule::new() })
    }

    /// Applies to nodes neither joining nor starting; successors are not
    /// yet wired when rules are evaluated.
    pub fn rule_at_link(v: usize) -> Rule {
        Rule::new().mapping(move |n| {
            if !(n.is_join() || n.is_start()) {
                Self::value(v)
            } else {
                Rule::new()
            }
        })
    }

    pub fn rule_at_join_else(p1: f64, p2: f64, v: usize) -> Rule {
        Rule::new().mapping(move |n| {
            let p = if n.is_join() { p1 } else { p2 };
            Rule::new().probability(p).max_val(v)
        })
    }

    // ── Preconfigured shapes ─────────────────────────────────────

    /// Isolated simple 2-step chains.
    pub fn configure_shape_short_chains2(self) -> Self {
        self.pruning_rule(Self::rule().probability(0.8))
            .weight_rule(Self::value(1))
    }

    /// Simple 3-step chains, starting interleaved.
    pub fn configure_shape_short_chains3_interleaved(self) -> Self {
        self.pruning_rule(Self::rule().probability(0.6))
            .seeding_rule(Self::rule_at_start(1))
            .weight_rule(Self::value(1))
    }

    /// Simple interwoven 3-step graph segments.
    pub fn configure_shape_short_segments3_interleaved(self) -> Self {
        self.seeding_rule(Self::rule().probability(0.8).max_val(1))
            .reduction_rule(Self::rule().probability(0.75).max_val(3))
            .pruning_rule(Self::rule_at_join(1))
            .weight_rule(Self::value(1))
    }

    /// Single graph with a prelude of parallel chains, followed by bursts of load.
    pub fn configure_shape_chain_load_bursts(self) -> Self {
        self.expansion_rule(Self::rule().probability(0.27).max_val(4))
            .reduction_rule(Self::rule().probability(0.44).max_val(6).min_val(2))
            .weight_rule(Self::rule().probability(0.66).max_val(3))
            .set_seed(55)
    }

    // ── Topology generation ──────────────────────────────────────

    /// (Re)build the node connectivity from the current seed and rules.
    ///
    /// Works level by level from the front node: each node of the current
    /// level is calculated, then the rules decide whether it is pruned,
    /// starts new seed chains, forks out, or is joined with its neighbours
    /// into a common successor. The last node collects all open ends.
    pub fn build_topology(mut self) -> Self {
        let back = self.nodes.len() - 1;
        let fan = self.max_fan;
        let mut curr: Vec<usize> = Vec::with_capacity(fan);
        let mut next: Vec<usize> = Vec::with_capacity(fan);
        let mut cursor = 0usize;
        let mut level = 0usize;

        while cursor < back {
            mem::swap(&mut curr, &mut next);
            next.clear();
            let mut to_reduce = 0usize;
            let mut carry: Option<usize> = None;
            for &o in &curr {
                self.calc_node(o);
                if self.pruning_rule.draw(&self.nodes[o], fan) > 0 {
                    continue;
                }
                let mut to_seed = self.seeding_rule.draw(&self.nodes[o], fan);
                let mut to_expand = self.expansion_rule.draw(&self.nodes[o], fan);
                while to_seed > 0 && space_left(&next, cursor, back, fan) {
                    let seed = self.get_seed();
                    self.add_node(&mut next, &mut cursor, level, seed);
                    to_seed -= 1;
                }
                while to_expand > 0 && space_left(&next, cursor, back, fan) {
                    let n = self.add_node(&mut next, &mut cursor, level, 0);
                    node::connect(&mut self.nodes, o, n);
                    to_expand -= 1;
                }
                if to_reduce == 0 {
                    carry = if space_left(&next, cursor, back, fan) {
                        Some(self.add_node(&mut next, &mut cursor, level, 0))
                    } else {
                        None
                    };
                    to_reduce = self.reduction_rule.draw(&self.nodes[o], fan);
                } else {
                    to_reduce -= 1;
                }
                match carry {
                    Some(r) => node::connect(&mut self.nodes, o, r),
                    None => {
                        // successors exhausted; still no chain may break off
                        if let Some(&last) = next.last() {
                            if self.nodes[o].succ.is_empty() {
                                node::connect(&mut self.nodes, o, last);
                            }
                        }
                    }
                }
            }
            if next.is_empty() {
                let seed = self.get_seed();
                self.add_node(&mut next, &mut cursor, level, seed);
            }
            level += 1;
        }

        self.nodes[back].clear();
        self.nodes[back].level = level;
        for &o in &next {
            self.calc_node(o);
            node::connect(&mut self.nodes, o, back);
        }
        self.calc_node(back);
        debug!(
            "chain load topology: {} nodes, {} levels, hash {:x}",
            self.nodes.len(),
            level + 1,
            self.get_hash()
        );
        self
    }

    fn add_node(&mut self, next: &mut Vec<usize>, cursor: &mut usize, level: usize, seed: u64) -> usize {
        let idx = *cursor;
        *cursor += 1;
        let node = &mut self.nodes[idx];
        node.clear();
        node.level = level;
        node.hash = seed;
        next.push(idx);
        idx
    }

    fn calc_node(&mut self, idx: usize) {
        calculate(&mut self.nodes, idx);
        let weight = self.weight_rule.draw(&self.nodes[idx], self.max_fan);
        self.nodes[idx].weight = weight;
    }

    /// Set the overall seed; not propagated to further start nodes.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.nodes[0].hash = seed;
        self
    }

    /// Fixed weight for all nodes, leaving the topology untouched.
    pub fn set_weight(mut self, weight: usize) -> Self {
        for node in &mut self.nodes {
            node.weight = weight;
        }
        self
    }

    /// Recalculate all node hashes, propagating the seed to start nodes.
    pub fn recalculate(&mut self) -> &mut Self {
        let seed = self.get_seed();
        for idx in 0..self.nodes.len() {
            self.nodes[idx].hash = if self.nodes[idx].is_start() { seed } else { 0 };
            calculate(&mut self.nodes, idx);
        }
        self
    }

    /// Reset hashes to the seed at start nodes and 0 elsewhere.
    pub fn clear_node_hashes(&mut self) -> &mut Self {
        let seed = self.get_seed();
        for node in &mut self.nodes {
            node.hash = if node.is_start() { seed } else { 0 };
        }
        self
    }

    // ── Evaluation ───────────────────────────────────────────────

    pub fn get_weight_sum(&self) -> usize {
        self.nodes.iter().map(|n| n.weight).sum()
    }

    /// Node weights aggregated per level.
    pub fn all_level_weights(&self) -> Vec<LevelWeight> {
        let mut levels: Vec<LevelWeight> = Vec::with_capacity(self.top_level() + 1);
        for (idx, node) in self.nodes.iter().enumerate() {
            match levels.last_mut() {
                Some(lw) if lw.level == node.level => {
                    lw.weight += node.weight;
                    lw.endidx = idx;
                    lw.nodes += 1;
                }
                _ => levels.push(LevelWeight {
                    level: node.level,
                    nodes: 1,
                    endidx: idx,
                    weight: node.weight,
                }),
            }
        }
        levels
    }

    /// Running sum of the level weight factors, i.e. the relative time
    /// at which each level is complete.
    pub fn level_schedule_sequence(&self, concurrency: usize) -> Vec<f64> {
        let mut schedule = 0.0;
        self.all_level_weights()
            .iter()
            .map(|lw| {
                schedule += compute_weight_factor(lw, concurrency);
                schedule
            })
            .collect()
    }

    pub fn compute_graph_statistics(&self) -> TopologyStatistic {
        stats::compute(&self.nodes)
    }

    /// Emulate the complete graph computation in a single thread, with the
    /// given load per unit of node weight. A `size_base` > 0 selects the
    /// memory-bound load.
    pub fn perform_graph_synchronously(&mut self, time_base: Duration, size_base: usize) -> &mut Self {
        let load = ComputationalLoad {
            time_base,
            size_base: if size_base == 0 { LOAD_DEFAULT_MEM_SIZE } else { size_base },
            use_allocation: size_base > 0,
        };
        if !time_base.is_zero() {
            load.maybe_calibrate();
        }
        let seed = self.get_seed();
        for idx in 0..self.nodes.len() {
            let node = &mut self.nodes[idx];
            node.hash = if node.is_start() { seed } else { 0 };
            if node.weight > 0 {
                load.invoke(node.weight);
            }
            calculate(&mut self.nodes, idx);
        }
        self
    }

    /// Average single-threaded runtime of the graph in µs, as reference
    /// for scheduled runs.
    pub fn calc_runtime_reference(&mut self, time_base: Duration, size_base: usize, repeat_cnt: usize) -> f64 {
        micro_benchmark(
            || {
                self.perform_graph_synchronously(time_base, size_base);
            },
            repeat_cnt,
        )
    }

    /// Graphviz rendering: nodes stacked per level, seeds as circles,
    /// exits as boxes.
    pub fn generate_topology_dot(&self) -> String {
        let mut nodes = String::new();
        let mut layers = String::new();
        let mut topology = String::new();
        let mut level = 0usize;
        let mut layer = String::from("{ rank=min;");

        for (idx, node) in self.nodes.iter().enumerate() {
            let mut tag = format!("{idx}: {:02X}", node.hash & 0xFF);
            if node.weight > 0 {
                let _ = write!(tag, ".{}", node.weight);
            }
            let style = if idx == 0 {
                ", shape=doublecircle"
            } else if node.is_start() {
                ", shape=circle"
            } else if node.is_exit() {
                ", shape=box, style=rounded"
            } else {
                ""
            };
            let _ = writeln!(nodes, "  N{idx} [label=\"{tag}\"{style}]");
            for succ in &node.succ {
                let _ = writeln!(topology, "  N{idx} -> N{succ}");
            }
            if node.level != level {
                let _ = writeln!(layers, "  {layer} }}");
                level = node.level;
                layer = String::from("{ rank=same;");
            }
            let _ = write!(layer, " N{idx}");
        }
        let _ = writeln!(layers, "  {layer} }}");

        format!("digraph {{\n  // Nodes\n{nodes}  // Layers\n{layers}  // Topology\n{topology}}}\n")
    }

    // ── Scheduling ───────────────────────────────────────────────

    /// Context to perform this graph through the scheduler.
    ///
    /// Clears the node hashes beforehand; the hashes are recomputed by the
    /// scheduled jobs.
    pub fn setup_schedule(&mut self, scheduler: &Arc<Scheduler>) -> ScheduleCtx<'_> {
        self.clear_node_hashes();
        ScheduleCtx::new(self, Arc::clone(scheduler))
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }
}

fn space_left(next: &[usize], cursor: usize, back: usize, fan: usize) -> bool {
    next.len() < fan && cursor < back
}

/// Combine the predecessor hashes into the node's own hash.
fn calculate(nodes: &mut [Node], idx: usize) -> u64 {
    let mut hash = nodes[idx].hash;
    for &pred in &nodes[idx].pred {
        hash_combine(&mut hash, nodes[pred].hash);
    }
    nodes[idx].hash = hash;
    hash
}
