//! # Node Ranking
//!
//! Orders the present nodes by distance from a reference node so the
//! distance-first policy can try the nearest memory before remote memory.
//!
//! The ranking is computed once per topology epoch and then read without
//! rebuilding; see [`NumaAllocator::reset_topology`](crate::NumaAllocator::reset_topology).

use crate::topology::{NodeId, TopologyProber, FALLBACK_REFERENCE_NODE};

/// Present nodes in ascending distance from a reference node.
///
/// Ties are broken by ascending node id, so two builds over the same
/// snapshot always produce the same order. Empty when topology-aware
/// placement is not possible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRanking {
    reference: Option<NodeId>,
    order: Vec<NodeId>,
}

impl NodeRanking {
    /// Rank every present node by `distance(reference, node)`.
    #[must_use]
    pub fn build(prober: &dyn TopologyProber, reference: NodeId) -> Self {
        if !prober.topology_available() {
            return Self::default();
        }

        let mut order = prober.nodes();
        if order.is_empty() {
            return Self::default();
        }
        order.sort_by_key(|node| (prober.distance(reference, *node), *node));

        Self {
            reference: Some(reference),
            order,
        }
    }

    /// Rank relative to the caller's node, or node 0 when it is unknown.
    #[must_use]
    pub fn for_caller(prober: &dyn TopologyProber) -> Self {
        let reference = prober
            .node_of_caller()
            .unwrap_or(FALLBACK_REFERENCE_NODE);
        Self::build(prober, reference)
    }

    /// The node distances were measured from, if the ranking is non-empty.
    #[must_use]
    pub fn reference(&self) -> Option<NodeId> {
        self.reference
    }

    /// The nearest node, if any.
    #[must_use]
    pub fn nearest(&self) -> Option<NodeId> {
        self.order.first().copied()
    }

    /// Ranked node ids, nearest first.
    #[must_use]
    pub fn as_slice(&self) -> &[NodeId] {
        &self.order
    }

    /// Number of ranked nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no topology-aware placement is possible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::StaticTopology;

    fn two_node() -> StaticTopology {
        StaticTopology::new(vec![vec![0, 20], vec![20, 0]]).unwrap()
    }

    #[test]
    fn test_caller_on_node_one() {
        let topo = two_node().with_caller_node(1);
        let ranking = NodeRanking::for_caller(&topo);
        assert_eq!(ranking.as_slice(), &[1, 0]);
        assert_eq!(ranking.reference(), Some(1));
        assert_eq!(ranking.nearest(), Some(1));
    }

    #[test]
    fn test_unknown_caller_uses_node_zero() {
        let topo = two_node();
        let ranking = NodeRanking::for_caller(&topo);
        assert_eq!(ranking.as_slice(), &[0, 1]);
        assert_eq!(ranking.reference(), Some(0));
    }

    #[test]
    fn test_ties_break_by_id() {
        let topo = StaticTopology::new(vec![
            vec![10, 30, 20, 20],
            vec![30, 10, 20, 20],
            vec![20, 20, 10, 30],
            vec![20, 20, 30, 10],
        ])
        .unwrap();

        let ranking = NodeRanking::build(&topo, 0);
        assert_eq!(ranking.as_slice(), &[0, 2, 3, 1]);

        let ranking = NodeRanking::build(&topo, 1);
        assert_eq!(ranking.as_slice(), &[1, 2, 3, 0]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let topo = StaticTopology::symmetric(6).unwrap();
        let first = NodeRanking::build(&topo, 3);
        let second = NodeRanking::build(&topo, 3);
        assert_eq!(first, second);
        assert_eq!(first.as_slice(), &[3, 0, 1, 2, 4, 5]);
    }

    #[test]
    fn test_absent_nodes_not_ranked() {
        let topo = StaticTopology::symmetric(3)
            .unwrap()
            .with_absent_nodes(&[1]);
        let ranking = NodeRanking::build(&topo, 2);
        assert_eq!(ranking.as_slice(), &[2, 0]);
    }

    #[test]
    fn test_empty_without_topology() {
        assert!(NodeRanking::for_caller(&StaticTopology::unavailable()).is_empty());
        let degraded = NodeRanking::for_caller(&StaticTopology::degraded());
        assert!(degraded.is_empty());
        assert_eq!(degraded.reference(), None);
        assert_eq!(degraded.len(), 0);
    }
}
