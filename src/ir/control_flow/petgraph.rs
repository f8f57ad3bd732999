//! Implementations for the traits in the `petgraph` crate.
//!
//! Nodes are block ordinals; edges are `(source, destination)` pairs.

use std::collections::{BTreeSet, HashSet};

use petgraph::{
    Direction,
    algo::dominators::{self, Dominators},
    visit::{
        Control, DfsEvent, GraphBase, IntoNeighbors, IntoNeighborsDirected, IntoNodeIdentifiers,
        Visitable, depth_first_search,
    },
};

use super::ControlFlowGraph;

impl GraphBase for ControlFlowGraph {
    type NodeId = usize;
    type EdgeId = (usize, usize);
}

impl IntoNeighbors for &ControlFlowGraph {
    type Neighbors = <Vec<usize> as IntoIterator>::IntoIter;

    fn neighbors(self, ordinal: usize) -> Self::Neighbors {
        self.block(ordinal)
            .into_iter()
            .flat_map(|block| block.successors().filter_map(|it| it.destination))
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl IntoNeighborsDirected for &ControlFlowGraph {
    type NeighborsDirected = <Vec<usize> as IntoIterator>::IntoIter;

    fn neighbors_directed(self, ordinal: usize, direction: Direction) -> Self::NeighborsDirected {
        match direction {
            Direction::Outgoing => self.neighbors(ordinal).collect::<Vec<_>>().into_iter(),
            Direction::Incoming => self
                .block(ordinal)
                .map(|it| it.predecessors.clone())
                .unwrap_or_default()
                .into_iter(),
        }
    }
}

impl IntoNodeIdentifiers for &ControlFlowGraph {
    type NodeIdentifiers = std::ops::Range<usize>;

    fn node_identifiers(self) -> Self::NodeIdentifiers {
        0..self.blocks().len()
    }
}

impl Visitable for ControlFlowGraph {
    type Map = HashSet<usize>;

    fn visit_map(&self) -> Self::Map {
        HashSet::with_capacity(self.blocks().len())
    }

    fn reset_map(&self, map: &mut Self::Map) {
        map.clear();
    }
}

impl ControlFlowGraph {
    /// Returns the ordinals of the blocks reachable from the entry block along branches.
    #[must_use]
    pub fn reachable_blocks(&self) -> BTreeSet<usize> {
        let mut reachable = BTreeSet::new();
        depth_first_search(self, [0], |event| {
            if let DfsEvent::Discover(ordinal, _) = event {
                reachable.insert(ordinal);
            }
            Control::<()>::Continue
        });
        reachable
    }

    /// Computes the dominator tree rooted at the entry block.
    #[must_use]
    pub fn dominators(&self) -> Dominators<usize> {
        dominators::simple_fast(self, 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::control_flow::{CfgBuilder, CfgId};

    #[test]
    fn reachability_and_dominators() {
        let mut builder = CfgBuilder::new(CfgId::from(0));
        for _ in 0..5 {
            builder.add_block();
        }
        builder.fall_through(0, 1);
        builder.fall_through(1, 4);
        builder.fall_through(2, 3);
        builder.fall_through(3, 4);
        let cfg = builder.build().expect("valid graph");
        assert_eq!(cfg.reachable_blocks(), [0, 1, 4].into_iter().collect());
        let dominators = cfg.dominators();
        assert_eq!(dominators.immediate_dominator(4), Some(1));
        assert_eq!(dominators.immediate_dominator(1), Some(0));
    }
}
