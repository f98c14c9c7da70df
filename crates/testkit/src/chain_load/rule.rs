use std::fmt;
use std::sync::Arc;

use super::node::Node;

type NodeMapping = Arc<dyn Fn(&Node) -> Rule + Send + Sync>;
type ShapeFn = Arc<dyn Fn(u64, f64) -> f64 + Send + Sync>;

#[derive(Clone)]
enum Source {
    /// Quantise the node hash.
    Hash,
    /// Always yield this value, regardless of probability.
    Fixed(usize),
    /// Pick a rule depending on the node, then draw with that rule.
    Mapping(NodeMapping),
    /// Map node hash and guessed graph height into a value in `[0, 1[`.
    Shaped(ShapeFn),
}

/// Topology control rule: draws a parameter value in `[0, max_fan]` from a
/// node, using the node hash as deterministic source of randomness.
///
/// A default rule has probability zero and thus always yields 0. With
/// probability `p`, a fraction `1-p` of draws still yields 0, while the
/// remaining draws spread evenly over `[min .. max]` (`[1 .. max]` when no
/// minimum is set).
#[derive(Clone)]
pub struct Rule {
    probability: f64,
    min: usize,
    max: Option<usize>,
    source: Source,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            probability: 0.0,
            min: 0,
            max: None,
            source: Source::Hash,
        }
    }
}

impl Rule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probability to draw a non-zero value, clamped to `[0, 1]`.
    pub fn probability(mut self, p: f64) -> Self {
        self.probability = p.clamp(0.0, 1.0);
        self
    }

    pub fn max_val(mut self, max: usize) -> Self {
        self.max = Some(max);
        if self.min >= max {
            self.min = max.saturating_sub(1);
        }
        self
    }

    pub fn min_val(mut self, min: usize) -> Self {
        self.min = min;
        if self.max.is_some_and(|max| max <= min) {
            self.max = Some(min + 1);
        }
        self
    }

    pub fn fixed_val(mut self, value: usize) -> Self {
        self.source = Source::Fixed(value);
        self
    }

    /// Select the effective rule per node.
    pub fn mapping(mut self, fun: impl Fn(&Node) -> Rule + Send + Sync + 'static) -> Self {
        self.source = Source::Mapping(Arc::new(fun));
        self
    }

    /// Draw from a function of node hash and guessed graph height, where a
    /// height of 1.0 corresponds to a level of `2·max_fan`. The function
    /// yields a value in `[0, 1[`, which is quantised like a hash draw.
    pub fn shaped(mut self, fun: impl Fn(u64, f64) -> f64 + Send + Sync + 'static) -> Self {
        if self.probability == 0.0 {
            self.probability = 1.0;
        }
        self.source = Source::Shaped(Arc::new(fun));
        self
    }

    /// Evaluate the rule on the given node.
    pub fn draw(&self, node: &Node, max_fan: usize) -> usize {
        match &self.source {
            Source::Fixed(value) => (*value).min(max_fan),
            Source::Mapping(select) => select(node).draw(node, max_fan),
            Source::Hash => self.limited(as_rand(node.hash, max_fan), max_fan),
            Source::Shaped(shape) => self.limited(shape(node.hash, guess_height(node.level, max_fan)), max_fan),
        }
    }

    fn limited(&self, val: f64, max_fan: usize) -> usize {
        if self.probability == 0.0 {
            return 0;
        }
        let q = 1.0 - self.probability;
        if val < q {
            return 0;
        }
        let val = (val.min(1.0) - q) / self.probability;
        let max = self.max.unwrap_or(max_fan).min(max_fan);
        let eps = cap_epsilon(max_fan);
        let drawn = if self.min == 0 {
            val * max as f64 + 1.0 + eps
        } else {
            let min = self.min.min(max);
            val * (max - min + 1) as f64 + min as f64 + eps
        };
        (drawn.floor() as usize).min(max)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Hash => "hash".to_string(),
            Source::Fixed(v) => format!("fixed({v})"),
            Source::Mapping(_) => "mapping".to_string(),
            Source::Shaped(_) => "shaped".to_string(),
        };
        f.debug_struct("Rule")
            .field("probability", &self.probability)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("source", &source)
            .finish()
    }
}

/// Granularity when mapping hashes into `[0, 1[`; headroom for low probabilities.
fn quantiser(max_fan: usize) -> u64 {
    1 << (4 + max_fan.max(1).ilog2())
}

fn cap_epsilon(max_fan: usize) -> f64 {
    1.0 / (2.0 * quantiser(max_fan) as f64)
}

fn as_rand(hash: u64, max_fan: usize) -> f64 {
    let q = quantiser(max_fan);
    (hash % q) as f64 / q as f64
}

/// Heuristic height of a stable graph state: level `2·max_fan` maps to 1.0.
fn guess_height(level: usize, max_fan: usize) -> f64 {
    level as f64 / (2 * max_fan) as f64
}
