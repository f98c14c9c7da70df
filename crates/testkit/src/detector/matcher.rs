use std::fmt;

use gear_core::Time;

use super::log::LogEntry;
use super::MARK_INC;

type Filter = Box<dyn Fn(&LogEntry) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

struct Step {
    direction: Direction,
    filters: Vec<Filter>,
}

impl Step {
    fn accepts(&self, entry: &LogEntry) -> bool {
        self.filters.iter().all(|filter| filter(entry))
    }
}

/// Chainable query over a snapshot of the detector log.
///
/// The pattern is a sequence of steps. The first step locates an entry
/// anywhere in the log; `before_*` steps search forward from the previous
/// match, `after_*` steps search backward. Refinements like [`arg`](Self::arg)
/// or [`seq`](Self::seq) constrain the most recent step. The search
/// backtracks, so the pattern holds if *any* combination of entries fits.
pub struct ActivityMatch {
    log: Vec<LogEntry>,
    steps: Vec<Step>,
    negated: bool,
}

impl ActivityMatch {
    pub(super) fn new(log: Vec<LogEntry>, first: impl Fn(&LogEntry) -> bool + 'static, negated: bool) -> Self {
        Self {
            log,
            steps: vec![Step {
                direction: Direction::Forward,
                filters: vec![Box::new(first)],
            }],
            negated,
        }
    }

    fn refine(mut self, filter: impl Fn(&LogEntry) -> bool + 'static) -> Self {
        if let Some(step) = self.steps.last_mut() {
            step.filters.push(Box::new(filter));
        }
        self
    }

    fn step(mut self, direction: Direction, filter: impl Fn(&LogEntry) -> bool + 'static) -> Self {
        self.steps.push(Step {
            direction,
            filters: vec![Box::new(filter)],
        });
        self
    }

    /// The logged arguments start with the given renderings, position by position.
    pub fn arg(self, expected: &[&dyn fmt::Display]) -> Self {
        let expected: Vec<String> = expected.iter().map(|arg| arg.to_string()).collect();
        self.refine(move |entry| {
            entry.args.len() == expected.len()
                && entry
                    .args
                    .iter()
                    .zip(&expected)
                    .all(|(logged, want)| logged.starts_with(want.as_str()))
        })
    }

    /// Some logged argument contains the given fragment.
    pub fn arg_containing(self, fragment: &str) -> Self {
        let fragment = fragment.to_string();
        self.refine(move |entry| entry.args.iter().any(|arg| arg.contains(fragment.as_str())))
    }

    pub fn seq(self, seq: u32) -> Self {
        self.refine(move |entry| entry.seq == seq)
    }

    /// The first argument renders exactly the given time.
    pub fn nominal_time(self, time: Time) -> Self {
        let time = time.to_string();
        self.refine(move |entry| entry.args.first() == Some(&time))
    }

    pub fn before_invocation(self, id: &str) -> Self {
        let id = id.to_string();
        self.step(Direction::Forward, move |entry| entry.is_call(&id))
    }

    pub fn after_invocation(self, id: &str) -> Self {
        let id = id.to_string();
        self.step(Direction::Backward, move |entry| entry.is_call(&id))
    }

    pub fn before_seq_increment(self, seq: u32) -> Self {
        self.step(Direction::Forward, move |entry| is_increment(entry, seq))
    }

    pub fn after_seq_increment(self, seq: u32) -> Self {
        self.step(Direction::Backward, move |entry| is_increment(entry, seq))
    }

    /// Evaluate the pattern; a negated match holds when no combination fits.
    pub fn holds(&self) -> bool {
        self.search(0, None) != self.negated
    }

    fn search(&self, step_idx: usize, pos: Option<usize>) -> bool {
        let Some(step) = self.steps.get(step_idx) else {
            return true;
        };
        let candidates: Box<dyn Iterator<Item = usize>> = match (pos, step.direction) {
            (None, _) => Box::new(0..self.log.len()),
            (Some(p), Direction::Forward) => Box::new(p + 1..self.log.len()),
            (Some(p), Direction::Backward) => Box::new((0..p).rev()),
        };
        for idx in candidates {
            if step.accepts(&self.log[idx]) && self.search(step_idx + 1, Some(idx)) {
                return true;
            }
        }
        false
    }
}

pub(super) fn is_increment(entry: &LogEntry, seq: u32) -> bool {
    entry.is_event(MARK_INC) && entry.args.first().map(String::as_str) == Some(seq.to_string().as_str())
}

impl fmt::Display for ActivityMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} pattern of {} step(s) over:",
            if self.negated { "negated" } else { "positive" },
            self.steps.len()
        )?;
        for entry in &self.log {
            writeln!(f, "  {entry}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ActivityMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
