//! Explicit topology description.
//!
//! For embedders that learn the machine layout out of band (a container
//! runtime, a config file) and for exercising placement deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Availability, NodeId, TopologyProber, LOCAL_DISTANCE, REMOTE_DISTANCE};
use crate::NumaError;

const NO_NODE: usize = usize::MAX;

/// Topology given as a square distance matrix.
///
/// Row `a`, column `b` holds `distance(a, b)`. Every row index is a node
/// id; nodes can be marked absent to model memoryless or offline nodes.
#[derive(Debug)]
pub struct StaticTopology {
    /// Reported facility state
    state: Availability,
    /// Distance matrix (index = node ID)
    distances: Vec<Vec<u32>>,
    /// Node ids inside the matrix that are not enumerated
    absent: Vec<NodeId>,
    /// Node reported for the calling thread (`NO_NODE` = unknown)
    caller: AtomicUsize,
}

impl StaticTopology {
    /// Build a topology from a square distance matrix.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::TopologyError`] if the matrix is empty or not square.
    pub fn new(distances: Vec<Vec<u32>>) -> Result<Self, NumaError> {
        if distances.is_empty() {
            return Err(NumaError::TopologyError(
                "distance matrix must not be empty".to_string(),
            ));
        }
        let n = distances.len();
        if let Some(row) = distances.iter().position(|row| row.len() != n) {
            return Err(NumaError::TopologyError(format!(
                "distance matrix row {row} has {} entries, expected {n}",
                distances[row].len()
            )));
        }

        Ok(Self {
            state: Availability::Available,
            distances,
            absent: Vec::new(),
            caller: AtomicUsize::new(NO_NODE),
        })
    }

    /// `n` nodes with local distance 10 and remote distance 20.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::TopologyError`] if `n` is zero.
    pub fn symmetric(n: usize) -> Result<Self, NumaError> {
        let distances = (0..n)
            .map(|a| {
                (0..n)
                    .map(|b| if a == b { LOCAL_DISTANCE } else { REMOTE_DISTANCE })
                    .collect()
            })
            .collect();
        Self::new(distances)
    }

    /// A platform without any topology facility.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            state: Availability::Unavailable,
            distances: Vec::new(),
            absent: Vec::new(),
            caller: AtomicUsize::new(NO_NODE),
        }
    }

    /// A platform whose topology facility reports no nodes.
    #[must_use]
    pub fn degraded() -> Self {
        Self {
            state: Availability::Degraded,
            ..Self::unavailable()
        }
    }

    /// Report `node` as the calling thread's node.
    #[must_use]
    pub fn with_caller_node(self, node: NodeId) -> Self {
        self.set_caller_node(Some(node));
        self
    }

    /// Exclude nodes from enumeration while keeping them addressable.
    #[must_use]
    pub fn with_absent_nodes(mut self, nodes: &[NodeId]) -> Self {
        self.absent.extend_from_slice(nodes);
        self.absent.sort_unstable();
        self.absent.dedup();
        self
    }

    /// Change the node reported for the calling thread.
    pub fn set_caller_node(&self, node: Option<NodeId>) {
        self.caller.store(node.unwrap_or(NO_NODE), Ordering::Release);
    }
}

impl Clone for StaticTopology {
    fn clone(&self) -> Self {
        Self {
            state: self.state,
            distances: self.distances.clone(),
            absent: self.absent.clone(),
            caller: AtomicUsize::new(self.caller.load(Ordering::Acquire)),
        }
    }
}

impl TopologyProber for StaticTopology {
    fn availability(&self) -> Availability {
        match self.state {
            Availability::Available if self.nodes().is_empty() => Availability::Degraded,
            state => state,
        }
    }

    fn max_node_index(&self) -> Option<NodeId> {
        if self.state.is_available() {
            self.distances.len().checked_sub(1)
        } else {
            None
        }
    }

    fn nodes(&self) -> Vec<NodeId> {
        (0..self.distances.len())
            .filter(|node| self.absent.binary_search(node).is_err())
            .collect()
    }

    fn node_of_caller(&self) -> Option<NodeId> {
        match self.caller.load(Ordering::Acquire) {
            NO_NODE => None,
            node => Some(node),
        }
    }

    fn distance(&self, from: NodeId, to: NodeId) -> u32 {
        self.distances
            .get(from)
            .and_then(|row| row.get(to))
            .copied()
            .unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_matrix() {
        assert!(StaticTopology::new(Vec::new()).is_err());
        assert!(StaticTopology::new(vec![vec![10, 20], vec![20]]).is_err());
        assert!(StaticTopology::symmetric(0).is_err());
    }

    #[test]
    fn test_symmetric() {
        let topo = StaticTopology::symmetric(3).unwrap();
        assert_eq!(topo.nodes(), vec![0, 1, 2]);
        assert_eq!(topo.distance(1, 1), LOCAL_DISTANCE);
        assert_eq!(topo.distance(0, 2), REMOTE_DISTANCE);
        assert_eq!(topo.node_of_caller(), None);
    }

    #[test]
    fn test_caller_node() {
        let topo = StaticTopology::symmetric(2).unwrap().with_caller_node(1);
        assert_eq!(topo.node_of_caller(), Some(1));
        topo.set_caller_node(None);
        assert_eq!(topo.node_of_caller(), None);
    }

    #[test]
    fn test_absent_nodes() {
        let topo = StaticTopology::symmetric(4)
            .unwrap()
            .with_absent_nodes(&[2, 1, 2]);
        assert_eq!(topo.nodes(), vec![0, 3]);
        assert_eq!(topo.max_node_index(), Some(3));

        let all_gone = StaticTopology::symmetric(1).unwrap().with_absent_nodes(&[0]);
        assert_eq!(all_gone.availability(), Availability::Degraded);
    }

    #[test]
    fn test_unavailable_and_degraded() {
        let topo = StaticTopology::unavailable();
        assert_eq!(topo.availability(), Availability::Unavailable);
        assert_eq!(topo.max_node_index(), None);

        let topo = StaticTopology::degraded();
        assert_eq!(topo.availability(), Availability::Degraded);
        assert!(topo.nodes().is_empty());
    }

    #[test]
    fn test_clone_keeps_caller() {
        let topo = StaticTopology::symmetric(2).unwrap().with_caller_node(1);
        let copy = topo.clone();
        topo.set_caller_node(Some(0));
        assert_eq!(copy.node_of_caller(), Some(1));
    }
}
