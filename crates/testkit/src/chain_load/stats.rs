use std::fmt::{self, Write};

use serde::Serialize;

use super::node::Node;

/// Categories of nodes accounted in the topology statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatKey {
    /// All nodes.
    Node,
    /// Start of a new chain or subgraph.
    Seed,
    /// Output node without successor.
    Exit,
    /// Both predecessors and successors.
    Inner,
    Fork,
    Join,
    /// One input, one output.
    Link,
    /// Joins and forks.
    Knot,
    /// Summed node weights.
    Weight,
}

impl StatKey {
    pub const ALL: [StatKey; 9] = [
        StatKey::Node,
        StatKey::Seed,
        StatKey::Exit,
        StatKey::Inner,
        StatKey::Fork,
        StatKey::Join,
        StatKey::Link,
        StatKey::Knot,
        StatKey::Weight,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StatKey::Node => "node",
            StatKey::Seed => "seed",
            StatKey::Exit => "exit",
            StatKey::Inner => "innr",
            StatKey::Fork => "fork",
            StatKey::Join => "join",
            StatKey::Link => "link",
            StatKey::Knot => "knot",
            StatKey::Weight => "wght",
        }
    }

    fn classify(self, node: &Node) -> usize {
        match self {
            StatKey::Node => 1,
            StatKey::Seed => usize::from(node.is_start()),
            StatKey::Exit => usize::from(node.is_exit()),
            StatKey::Inner => usize::from(node.is_inner()),
            StatKey::Fork => usize::from(node.is_fork()),
            StatKey::Join => usize::from(node.is_join()),
            StatKey::Link => usize::from(node.is_link()),
            StatKey::Knot => usize::from(node.is_knot()),
            StatKey::Weight => node.weight,
        }
    }
}

impl fmt::Display for StatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const CAT: usize = StatKey::ALL.len();

/// Distribution of one node category over the time levels.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Indicator {
    /// Count per level.
    pub data: Vec<usize>,
    /// Sum over all levels.
    pub cnt: usize,
    /// Fraction of all nodes.
    pub frac: f64,
    /// Average per segment.
    pub p_s: f64,
    /// Average per level.
    pub p_l: f64,
    /// Average per level, normalised to level width.
    pub p_lw: f64,
    /// Weight centre level, as fraction of the top level.
    pub c_l: f64,
    pub c_lw: f64,
    /// Weight centre relative to the enclosing segment.
    pub s_l: f64,
    pub s_lw: f64,
}

impl Indicator {
    fn add_point(&mut self, level: usize, sublevel: usize, width: usize, items: usize) {
        let (items_f, width_f) = (items as f64, width as f64);
        self.data.push(items);
        self.cnt += items;
        self.p_s += items_f;
        self.p_l += items_f;
        self.p_lw += items_f / width_f;
        self.c_l += level as f64 * items_f;
        self.c_lw += level as f64 * items_f / width_f;
        self.s_l += sublevel as f64 * items_f;
        self.s_lw += sublevel as f64 * items_f / width_f;
    }

    fn close_averages(&mut self, nodes: usize, levels: usize, segments: usize, avg_height: f64) {
        let levels_f = levels as f64;
        self.frac = self.cnt as f64 / nodes as f64;
        self.c_l = if self.p_l != 0.0 { self.c_l / self.p_l } else { 0.0 };
        self.c_lw = if self.p_lw != 0.0 { self.c_lw / self.p_lw } else { 0.0 };
        self.s_l = if self.p_l != 0.0 { self.s_l / self.p_l } else { 0.0 };
        self.s_lw = if self.p_lw != 0.0 { self.s_lw / self.p_lw } else { 0.0 };
        self.p_s /= segments.max(1) as f64;
        self.p_l /= levels_f;
        self.p_lw /= levels_f;
        if levels > 1 {
            self.c_l /= levels_f - 1.0;
            self.c_lw /= levels_f - 1.0;
        }
        if avg_height > 1.0 {
            self.s_l /= avg_height - 1.0;
            self.s_lw /= avg_height - 1.0;
        } else {
            self.s_l = 0.5;
            self.s_lw = 0.5;
        }
    }
}

/// Connectivity statistics of a generated topology.
///
/// A segment is a completely severed subgraph: a level consisting of a
/// single seed node starts a new one.
#[derive(Debug, Clone, Serialize)]
pub struct TopologyStatistic {
    pub nodes: usize,
    pub levels: usize,
    pub segments: usize,
    pub max_height: usize,
    pub avg_height: f64,
    pub width: Vec<usize>,
    pub sublevel: Vec<usize>,
    pub indicators: [Indicator; CAT],
}

impl TopologyStatistic {
    pub fn indicator(&self, key: StatKey) -> &Indicator {
        let idx = StatKey::ALL.iter().position(|k| *k == key).unwrap_or(0);
        &self.indicators[idx]
    }

    fn add_point(&mut self, width: usize, sublevel: usize, particulars: &[usize; CAT]) {
        let level = self.levels;
        self.levels += 1;
        self.nodes += width;
        self.width.push(width);
        self.sublevel.push(sublevel);
        for (indicator, items) in self.indicators.iter_mut().zip(particulars) {
            indicator.add_point(level, sublevel, width, *items);
        }
    }

    fn close_averages(&mut self, segments: usize, max_sublevel: usize) {
        self.segments = segments;
        self.max_height = max_sublevel + 1;
        self.avg_height = self.levels as f64 / segments.max(1) as f64;
        for indicator in &mut self.indicators {
            indicator.close_averages(self.nodes, self.levels, segments, self.avg_height);
        }
    }

    /// Tabular summary, one line per category.
    pub fn render(&self) -> String {
        let mut out = String::from("INDI: cnt frac   ∅pS  ∅pL  ∅pLW  γL◆ γLW◆  γL⬙ γLW⬙\n");
        for (key, ind) in StatKey::ALL.iter().zip(&self.indicators) {
            let _ = writeln!(
                out,
                "{:>4}: {:3} {:3.0}% {:5.1} {:5.2} {:4.2} {:4.2} {:4.2} {:4.2} {:4.2}",
                key.label(),
                ind.cnt,
                ind.frac * 100.0,
                ind.p_s,
                ind.p_l,
                ind.p_lw,
                ind.c_l,
                ind.c_lw,
                ind.s_l,
                ind.s_lw
            );
        }
        let _ = writeln!(out, "LEVL: {:3}", self.levels);
        let _ = writeln!(
            out,
            "SEGS: {:3}   h = ∅{:3.1} / max.{:2}",
            self.segments, self.avg_height, self.max_height
        );
        out
    }
}

/// Classify all nodes per level; nodes must be ordered by level.
pub(super) fn compute(nodes: &[Node]) -> TopologyStatistic {
    let mut stat = TopologyStatistic {
        nodes: 0,
        levels: 0,
        segments: 1,
        max_height: 0,
        avg_height: 0.0,
        width: Vec::new(),
        sublevel: Vec::new(),
        indicators: Default::default(),
    };
    let seed_idx = StatKey::ALL
        .iter()
        .position(|k| *k == StatKey::Seed)
        .unwrap_or(1);

    let mut particulars = [0usize; CAT];
    let (mut level, mut sublevel, mut max_sublevel) = (0usize, 0usize, 0usize);
    let mut segments = 0usize;
    let mut width = 0usize;

    let mut detect_subgraphs = |width: usize, particulars: &[usize; CAT], sublevel: &mut usize| {
        if width == 1 && particulars[seed_idx] == 1 {
            *sublevel = 0;
            segments += 1;
        } else {
            max_sublevel = max_sublevel.max(*sublevel);
        }
    };

    for node in nodes {
        if node.level != level {
            detect_subgraphs(width, &particulars, &mut sublevel);
            stat.add_point(width, sublevel, &particulars);
            level += 1;
            sublevel += 1;
            particulars = [0; CAT];
            width = 0;
        }
        width += 1;
        for (slot, key) in particulars.iter_mut().zip(StatKey::ALL) {
            *slot += key.classify(node);
        }
    }
    if width > 0 {
        detect_subgraphs(width, &particulars, &mut sublevel);
        stat.add_point(width, sublevel, &particulars);
    }
    stat.close_averages(segments, max_sublevel);
    stat
}
