//! # numalloc Core
//!
//! A topology-aware placement and accounting layer over the system
//! allocator, for processes that want predictable memory locality on
//! multi-socket machines.
//!
//! This crate provides:
//! - **Topology**: node enumeration, caller's node and node distances
//! - **Ranking**: nodes ordered by distance from the caller's node
//! - **Policy**: which nodes to try, in which order, for each request
//! - **Blocks**: sized blocks with a hidden header, exact usage accounting
//! - **Façade**: [`NumaAllocator`] plus a process-wide instance in [`global`]
//!
//! ## Placement
//!
//! 1. **Explicit node wins** - a valid node hint bypasses policy
//! 2. **Policy next** - default node, or every node nearest first
//! 3. **Always a fallback** - if no node can serve, the system allocator does
//! 4. **Fail fast** - total exhaustion aborts (or errors on `try_*` calls)
//!
//! ## Example
//!
//! ```rust,no_run
//! use numalloc_core::{NumaAllocator, NumaPolicy, HEADER_WIDTH};
//!
//! let alloc = NumaAllocator::detect();
//! alloc.set_policy(NumaPolicy::DistanceFirst);
//!
//! let ptr = alloc.allocate(100);
//! assert_eq!(alloc.used_bytes(), 100 + HEADER_WIDTH);
//!
//! unsafe { alloc.free(Some(ptr)) };
//! assert_eq!(alloc.used_bytes(), 0);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)] // Will selectively allow where needed with justification
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod accountant;
#[allow(unsafe_code)]
pub mod allocator;
#[allow(unsafe_code)]
pub mod backend;
#[allow(unsafe_code)]
mod block;
pub mod config;
pub mod error;
#[allow(unsafe_code)]
pub mod global;
pub mod policy;
pub mod ranking;
pub mod stats;
pub mod topology;

pub use accountant::UsageAccountant;
pub use allocator::{BlockAllocator, NumaAllocator};
pub use backend::{MemoryBackend, NodeBackend, BLOCK_ALIGN};
pub use block::HEADER_WIDTH;
pub use config::{AllocatorConfig, AllocatorConfigBuilder};
pub use error::NumaError;
pub use global::Global;
pub use policy::{
    choose_targets, Candidates, NumaPolicy, PlacementContext, PlacementStrategy,
};
pub use ranking::NodeRanking;
pub use stats::AllocStats;
pub use topology::{
    Availability, NodeId, StaticTopology, SysfsTopology, TopologyProber,
};

/// Result type for numalloc-core operations
pub type Result<T> = std::result::Result<T, NumaError>;
