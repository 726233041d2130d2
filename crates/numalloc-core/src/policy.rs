//! # Allocation Policy Engine
//!
//! Turns the placement inputs (explicit hint, policy, default node, ranking)
//! into an ordered list of nodes to try, then walks that list against the
//! backend's node-targeted primitive.
//!
//! Precedence, highest first:
//!
//! 1. Topology not available: no candidates, every allocation is untargeted
//! 2. Explicit node hint: exactly that node
//! 3. The active policy's [`PlacementStrategy`]
//!
//! An exhausted candidate list never switches policy. The block manager
//! falls back to untargeted allocation instead.

use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;

use smallvec::{smallvec, SmallVec};

use crate::backend::MemoryBackend;
use crate::stats::PlacementStats;
use crate::topology::NodeId;
use crate::NumaError;

/// Ordered node ids to try. Empty means "use untargeted allocation".
pub type Candidates = SmallVec<[NodeId; 8]>;

/// Placement policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum NumaPolicy {
    /// Use the default node if one is set, otherwise place untargeted.
    #[default]
    Default = 0,
    /// Try every node in ascending distance from the caller's node.
    DistanceFirst = 1,
    /// Reserved. Behaves as [`NumaPolicy::Default`].
    RoundRobin = 2,
    /// Reserved. Behaves as [`NumaPolicy::Default`].
    Balanced = 3,
}

impl NumaPolicy {
    /// All policies, in discriminant order.
    pub const ALL: [Self; 4] = [
        Self::Default,
        Self::DistanceFirst,
        Self::RoundRobin,
        Self::Balanced,
    ];

    /// Stable lowercase name, as accepted by [`FromStr`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::DistanceFirst => "distance-first",
            Self::RoundRobin => "round-robin",
            Self::Balanced => "balanced",
        }
    }

    /// The strategy implementing this policy.
    #[must_use]
    pub fn strategy(self) -> &'static dyn PlacementStrategy {
        match self {
            Self::Default => &DefaultStrategy,
            Self::DistanceFirst => &DistanceFirstStrategy,
            Self::RoundRobin => &RoundRobinStrategy,
            Self::Balanced => &BalancedStrategy,
        }
    }
}

impl From<u8> for NumaPolicy {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::DistanceFirst,
            2 => Self::RoundRobin,
            3 => Self::Balanced,
            _ => Self::Default,
        }
    }
}

impl fmt::Display for NumaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NumaPolicy {
    type Err = NumaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|policy| policy.as_str() == normalized)
            .ok_or_else(|| {
                NumaError::InvalidConfig(format!(
                    "unknown policy '{s}' (expected one of: default, distance-first, round-robin, balanced)"
                ))
            })
    }
}

/// Inputs a strategy may consult.
#[derive(Debug, Clone, Copy)]
pub struct PlacementContext<'a> {
    /// Explicit, already validated node hint
    pub hint: Option<NodeId>,
    /// Whether node-targeted allocation may be attempted at all
    pub topology_available: bool,
    /// Configured default node
    pub default_node: Option<NodeId>,
    /// Nodes nearest first; empty when no ranking exists
    pub ranking: &'a [NodeId],
}

/// Produces the candidate list for one allocation.
///
/// Only called when topology is available and no hint was given.
pub trait PlacementStrategy: Send + Sync {
    /// Nodes to try, in order.
    fn candidates(&self, ctx: &PlacementContext<'_>) -> Candidates;
}

/// The default node, or nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStrategy;

impl PlacementStrategy for DefaultStrategy {
    fn candidates(&self, ctx: &PlacementContext<'_>) -> Candidates {
        ctx.default_node.into_iter().collect()
    }
}

/// The full ranking, or the default strategy when no ranking exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceFirstStrategy;

impl PlacementStrategy for DistanceFirstStrategy {
    fn candidates(&self, ctx: &PlacementContext<'_>) -> Candidates {
        if ctx.ranking.is_empty() {
            DefaultStrategy.candidates(ctx)
        } else {
            SmallVec::from_slice(ctx.ranking)
        }
    }
}

/// Reserved policy; currently the default strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinStrategy;

impl PlacementStrategy for RoundRobinStrategy {
    fn candidates(&self, ctx: &PlacementContext<'_>) -> Candidates {
        DefaultStrategy.candidates(ctx)
    }
}

/// Reserved policy; currently the default strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedStrategy;

impl PlacementStrategy for BalancedStrategy {
    fn candidates(&self, ctx: &PlacementContext<'_>) -> Candidates {
        DefaultStrategy.candidates(ctx)
    }
}

/// Decide which nodes to try for one allocation.
#[must_use]
pub fn choose_targets(policy: NumaPolicy, ctx: &PlacementContext<'_>) -> Candidates {
    if !ctx.topology_available {
        return Candidates::new();
    }
    if let Some(hint) = ctx.hint {
        return smallvec![hint];
    }
    policy.strategy().candidates(ctx)
}

/// Try each candidate's node-targeted primitive in order.
///
/// Returns the first successful block and the node it came from. Failed
/// attempts are logged and counted, never fatal.
pub(crate) fn attempt_allocate<B: MemoryBackend + ?Sized>(
    backend: &B,
    candidates: &[NodeId],
    total: usize,
    stats: &PlacementStats,
) -> Option<(NonNull<u8>, NodeId)> {
    for &node in candidates {
        if let Some(ptr) = backend.alloc_on_node(total, node) {
            return Some((ptr, node));
        }
        tracing::debug!("Allocation of {} bytes on node {} failed", total, node);
        stats.record_failed_attempt();
    }
    None
}
