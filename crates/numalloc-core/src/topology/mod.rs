//! # Topology Probing
//!
//! Answers the questions the placement engine needs about the machine:
//! is node-aware allocation possible, which nodes exist, which node the
//! calling thread runs on, and how far apart two nodes are.
//!
//! ```text
//!  ┌──────────────┐   distance 20   ┌──────────────┐
//!  │    Node 0    │◄───────────────►│    Node 1    │
//!  │  cpus 0-15   │                 │  cpus 16-31  │
//!  │  distance 10 │                 │  distance 10 │
//!  └──────────────┘                 └──────────────┘
//! ```
//!
//! Two probers are provided:
//!
//! - [`SysfsTopology`] - reads `/sys/devices/system/node` at call time (Linux)
//! - [`StaticTopology`] - an explicit distance matrix supplied by the embedder

mod fixed;
#[allow(unsafe_code)]
mod sysfs;

pub use fixed::StaticTopology;
pub use sysfs::{SysfsTopology, DEFAULT_SYSFS_ROOT};

use std::fmt;

/// Identifier of a memory node within one process's topology snapshot.
pub type NodeId = usize;

/// Distance the firmware reports for a node to itself.
pub const LOCAL_DISTANCE: u32 = 10;

/// Distance assumed between two different nodes when none is reported.
pub const REMOTE_DISTANCE: u32 = 20;

/// Reference node used for ranking when the caller's node is unknown.
pub const FALLBACK_REFERENCE_NODE: NodeId = 0;

/// How much topology information the platform exposes.
///
/// Only [`Availability::Available`] enables node-targeted placement. Both
/// other states mean every allocation is untargeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Nodes are enumerable and allocations can be targeted.
    Available,
    /// The topology facility exists but reports no usable nodes.
    Degraded,
    /// No topology facility on this platform.
    Unavailable,
}

impl Availability {
    /// Returns `true` if node-targeted allocation may be attempted.
    #[must_use]
    pub fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Source of node topology information.
///
/// Implementations answer from the platform's state at call time and have
/// no side effects.
pub trait TopologyProber: Send + Sync {
    /// Reports how much topology information is exposed.
    fn availability(&self) -> Availability;

    /// Highest valid node identifier, or `None` when topology is not available.
    fn max_node_index(&self) -> Option<NodeId>;

    /// Every node reported present, in ascending order.
    fn nodes(&self) -> Vec<NodeId>;

    /// Node hosting the calling thread, if it can be determined directly.
    ///
    /// When this returns `None`, callers rank against
    /// [`FALLBACK_REFERENCE_NODE`] instead.
    fn node_of_caller(&self) -> Option<NodeId>;

    /// Symmetric ordinal cost between two nodes.
    ///
    /// Only meaningful for ids in `0..=max_node_index()`.
    fn distance(&self, from: NodeId, to: NodeId) -> u32;

    /// Returns `true` if node-targeted allocation may be attempted.
    fn topology_available(&self) -> bool {
        self.availability().is_available()
    }

    /// Returns `true` if `node` is addressable in the current snapshot.
    fn is_valid_node(&self, node: NodeId) -> bool {
        self.topology_available() && self.max_node_index().is_some_and(|max| node <= max)
    }

    /// Number of addressable node ids (`max_node_index + 1`, or 0).
    fn addressable_nodes(&self) -> usize {
        if self.topology_available() {
            self.max_node_index().map_or(0, |max| max + 1)
        } else {
            0
        }
    }
}

impl<P: TopologyProber + ?Sized> TopologyProber for &P {
    fn availability(&self) -> Availability {
        (**self).availability()
    }

    fn max_node_index(&self) -> Option<NodeId> {
        (**self).max_node_index()
    }

    fn nodes(&self) -> Vec<NodeId> {
        (**self).nodes()
    }

    fn node_of_caller(&self) -> Option<NodeId> {
        (**self).node_of_caller()
    }

    fn distance(&self, from: NodeId, to: NodeId) -> u32 {
        (**self).distance(from, to)
    }
}

impl<P: TopologyProber + ?Sized> TopologyProber for std::sync::Arc<P> {
    fn availability(&self) -> Availability {
        (**self).availability()
    }

    fn max_node_index(&self) -> Option<NodeId> {
        (**self).max_node_index()
    }

    fn nodes(&self) -> Vec<NodeId> {
        (**self).nodes()
    }

    fn node_of_caller(&self) -> Option<NodeId> {
        (**self).node_of_caller()
    }

    fn distance(&self, from: NodeId, to: NodeId) -> u32 {
        (**self).distance(from, to)
    }
}

/// Render a human-readable distance table for any prober.
#[must_use]
pub fn distance_table(prober: &dyn TopologyProber) -> String {
    use std::fmt::Write;

    let nodes = prober.nodes();
    let mut s = String::from("node");
    for to in &nodes {
        let _ = write!(s, "{to:>5}");
    }
    for from in &nodes {
        let _ = write!(s, "\n{from:>4}");
        for to in &nodes {
            let _ = write!(s, "{:>5}", prober.distance(*from, *to));
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability() {
        assert!(Availability::Available.is_available());
        assert!(!Availability::Degraded.is_available());
        assert!(!Availability::Unavailable.is_available());
        assert_eq!(Availability::Degraded.to_string(), "degraded");
    }

    #[test]
    fn test_valid_node_bounds() {
        let topo = StaticTopology::symmetric(2).unwrap();
        assert!(topo.is_valid_node(0));
        assert!(topo.is_valid_node(1));
        assert!(!topo.is_valid_node(2));
        assert_eq!(topo.addressable_nodes(), 2);

        let none = StaticTopology::unavailable();
        assert!(!none.is_valid_node(0));
        assert_eq!(none.addressable_nodes(), 0);
    }

    #[test]
    fn test_distance_table() {
        let topo = StaticTopology::new(vec![vec![10, 21], vec![21, 10]]).unwrap();
        let table = distance_table(&topo);
        assert!(table.contains("21"));
        assert_eq!(table.lines().count(), 3);
    }

    #[test]
    fn test_prober_through_reference() {
        fn max_node(prober: impl TopologyProber) -> Option<NodeId> {
            prober.max_node_index()
        }

        let topo = StaticTopology::symmetric(3).unwrap();
        assert_eq!(max_node(&topo), Some(2));
        assert_eq!(max_node(std::sync::Arc::new(topo)), Some(2));
    }
}
