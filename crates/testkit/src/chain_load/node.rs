use serde::Serialize;

/// One computation step in the synthetic graph.
///
/// Connectivity is stored as indices into the owning node table; a node only
/// ever links to nodes of lower (`pred`) or higher (`succ`) index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Node {
    pub hash: u64,
    pub level: usize,
    pub weight: usize,
    pub pred: Vec<usize>,
    pub succ: Vec<usize>,
}

impl Node {
    pub(super) fn clear(&mut self) {
        self.hash = 0;
        self.level = 0;
        self.weight = 0;
        self.pred.clear();
        self.succ.clear();
    }

    /// No predecessor: starts a chain from the seed.
    pub fn is_start(&self) -> bool {
        self.pred.is_empty()
    }

    /// No successor: produces output.
    pub fn is_exit(&self) -> bool {
        self.succ.is_empty()
    }

    pub fn is_inner(&self) -> bool {
        !(self.is_start() || self.is_exit())
    }

    pub fn is_fork(&self) -> bool {
        self.succ.len() > 1
    }

    pub fn is_join(&self) -> bool {
        self.pred.len() > 1
    }

    /// Exactly one input and one output.
    pub fn is_link(&self) -> bool {
        self.pred.len() == 1 && self.succ.len() == 1
    }

    pub fn is_knot(&self) -> bool {
        self.is_fork() && self.is_join()
    }
}

/// Wire `pred → succ` symmetrically.
pub(super) fn connect(nodes: &mut [Node], pred: usize, succ: usize) {
    nodes[pred].succ.push(succ);
    nodes[succ].pred.push(pred);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_connectivity() {
        let mut nodes = vec![Node::default(); 4];
        connect(&mut nodes, 0, 1);
        connect(&mut nodes, 0, 2);
        connect(&mut nodes, 1, 3);
        connect(&mut nodes, 2, 3);

        assert!(nodes[0].is_start() && nodes[0].is_fork());
        assert!(!nodes[0].is_inner());
        assert!(nodes[1].is_link() && nodes[1].is_inner());
        assert!(nodes[3].is_join() && nodes[3].is_exit());
        assert!(!nodes[3].is_knot());
        assert_eq!(nodes[3].pred, vec![1, 2]);

        nodes[3].clear();
        assert!(nodes[3].is_start() && nodes[3].is_exit());
    }
}
