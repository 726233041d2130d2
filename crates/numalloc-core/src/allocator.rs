//! # Allocator Façade
//!
//! [`NumaAllocator`] ties the pieces together:
//!
//! ```text
//!  call ──► topology state (probed once per epoch)
//!             │
//!             ▼
//!          choose_targets(policy, hint, default node, ranking)
//!             │
//!             ▼
//!          block manager ──► backend primitives
//!             │
//!             ▼
//!          usage accountant
//! ```
//!
//! Plain entry points never return null: exhaustion is logged and the
//! process aborts. The `try_*` variants return [`NumaError::OutOfMemory`]
//! instead.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::accountant::UsageAccountant;
use crate::backend::{MemoryBackend, NodeBackend};
use crate::block::{self, BlockManager};
use crate::config::AllocatorConfig;
use crate::policy::{choose_targets, Candidates, NumaPolicy, PlacementContext};
use crate::ranking::NodeRanking;
use crate::stats::{AllocStats, PlacementStats};
use crate::topology::{Availability, NodeId, SysfsTopology, TopologyProber};
use crate::{NumaError, Result};

const NO_NODE: usize = usize::MAX;

/// Topology snapshot taken on first use within an epoch.
#[derive(Debug)]
struct TopologyState {
    availability: Availability,
    /// Number of addressable node ids
    addressable: usize,
    ranking: NodeRanking,
}

/// Topology-aware allocator context.
///
/// Generic over where topology comes from and where memory comes from;
/// the defaults read sysfs and bind pages with `mbind`.
///
/// # Example
///
/// ```rust,no_run
/// use numalloc_core::{NumaAllocator, NumaPolicy};
///
/// let alloc = NumaAllocator::detect();
/// alloc.set_policy(NumaPolicy::DistanceFirst);
///
/// let ptr = alloc.allocate(4096);
/// assert!(alloc.used_bytes() >= 4096);
/// unsafe { alloc.free(Some(ptr)) };
/// ```
#[derive(Debug)]
pub struct NumaAllocator<T: TopologyProber = SysfsTopology, B: MemoryBackend = NodeBackend> {
    topology: T,
    backend: B,
    state: RwLock<Option<Arc<TopologyState>>>,
    policy: AtomicU8,
    default_node: AtomicUsize,
    local_default: bool,
    accountant: UsageAccountant,
    stats: PlacementStats,
}

impl NumaAllocator {
    /// Allocator over the host's sysfs topology with default settings.
    #[must_use]
    pub fn detect() -> Self {
        Self::new(SysfsTopology::new(), NodeBackend::new())
    }

    /// Allocator over the sysfs tree named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or names a default
    /// node the topology does not have.
    pub fn from_config(config: &AllocatorConfig) -> Result<Self> {
        Self::with_config(
            SysfsTopology::with_root(&config.sysfs_root),
            NodeBackend::new(),
            config,
        )
    }
}

impl<T: TopologyProber, B: MemoryBackend> NumaAllocator<T, B> {
    /// Create an allocator with the default policy and no default node.
    ///
    /// Topology is not probed until first use.
    pub fn new(topology: T, backend: B) -> Self {
        Self {
            topology,
            backend,
            state: RwLock::new(None),
            policy: AtomicU8::new(NumaPolicy::Default as u8),
            default_node: AtomicUsize::new(NO_NODE),
            local_default: false,
            accountant: UsageAccountant::new(),
            stats: PlacementStats::default(),
        }
    }

    /// Create an allocator and apply `config`.
    ///
    /// A configured default node is validated against the topology, so
    /// construction probes immediately in that case. Otherwise probing waits
    /// for first use, as with [`new`](Self::new).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or names a default
    /// node the topology does not have.
    pub fn with_config(topology: T, backend: B, config: &AllocatorConfig) -> Result<Self> {
        config.validate()?;

        let mut alloc = Self::new(topology, backend);
        alloc.local_default = config.local_default;
        alloc.policy.store(config.policy as u8, Ordering::Release);
        if config.thread_safe {
            alloc.accountant.enable_thread_safety();
        }
        if let Some(node) = config.default_node {
            alloc.set_default_node(node)?;
        }
        Ok(alloc)
    }

    /// The topology prober.
    #[must_use]
    pub fn topology(&self) -> &T {
        &self.topology
    }

    /// The memory backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current snapshot, probing topology if this epoch has none yet.
    fn state(&self) -> Arc<TopologyState> {
        if let Some(state) = self.state.read().as_ref() {
            return Arc::clone(state);
        }

        let mut guard = self.state.write();
        // Another thread may have initialized while we waited
        if let Some(state) = guard.as_ref() {
            return Arc::clone(state);
        }

        let state = Arc::new(self.probe());
        *guard = Some(Arc::clone(&state));
        state
    }

    fn probe(&self) -> TopologyState {
        let availability = self.topology.availability();
        let ranking = NodeRanking::for_caller(&self.topology);
        let addressable = self.topology.addressable_nodes();

        tracing::info!(
            "Topology initialized: {}, {} addressable nodes, reference node {:?}, ranking {:?}",
            availability,
            addressable,
            ranking.reference(),
            ranking.as_slice()
        );

        if self.local_default && self.default_node().is_none() {
            if let Some(node) = ranking.reference() {
                self.default_node.store(node, Ordering::Release);
                tracing::info!("Default node set to caller's node {}", node);
            }
        }

        TopologyState {
            availability,
            addressable,
            ranking,
        }
    }

    fn blocks(&self) -> BlockManager<'_, B> {
        BlockManager {
            backend: &self.backend,
            accountant: &self.accountant,
            stats: &self.stats,
        }
    }

    /// Candidate nodes for one request, with an optional explicit hint.
    fn candidates(&self, hint: Option<NodeId>) -> Candidates {
        let state = self.state();

        let hint = hint.filter(|&node| {
            let valid = node < state.addressable;
            if !valid {
                tracing::warn!(
                    "{}, ignoring node hint",
                    NumaError::InvalidNode {
                        node,
                        available: state.addressable,
                    }
                );
            }
            valid
        });

        let ctx = PlacementContext {
            hint,
            topology_available: state.availability.is_available(),
            default_node: self.default_node(),
            ranking: state.ranking.as_slice(),
        };
        choose_targets(self.policy(), &ctx)
    }

    // Allocation

    /// Allocate `size` bytes placed by the active policy.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::OutOfMemory`] if every attempt failed.
    pub fn try_allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let candidates = self.candidates(None);
        self.blocks().allocate(size, &candidates)
    }

    /// Allocate `size` bytes placed by the active policy. Never null.
    pub fn allocate(&self, size: usize) -> NonNull<u8> {
        self.try_allocate(size).unwrap_or_else(|err| out_of_memory(&err))
    }

    /// Allocate `size` bytes on `node`.
    ///
    /// An out-of-range node is logged and ignored; the active policy then
    /// decides placement.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::OutOfMemory`] if every attempt failed.
    pub fn try_allocate_on_node(&self, size: usize, node: NodeId) -> Result<NonNull<u8>> {
        let candidates = self.candidates(Some(node));
        self.blocks().allocate(size, &candidates)
    }

    /// Allocate `size` bytes on `node`. Never null.
    pub fn allocate_on_node(&self, size: usize, node: NodeId) -> NonNull<u8> {
        self.try_allocate_on_node(size, node)
            .unwrap_or_else(|err| out_of_memory(&err))
    }

    /// Allocate a block holding a copy of `bytes`.
    pub fn allocate_copy(&self, bytes: &[u8]) -> NonNull<u8> {
        let ptr = self.allocate(bytes.len());
        // SAFETY: fresh block of bytes.len() bytes, distinct from `bytes`
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        }
        ptr
    }

    /// Resize a block, or allocate when `ptr` is `None`.
    ///
    /// The first `min(old, size)` bytes are preserved. On error the old
    /// block is still valid.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::OutOfMemory`] if every attempt failed.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator. After success it must
    /// not be used again.
    pub unsafe fn try_reallocate(&self, ptr: Option<NonNull<u8>>, size: usize) -> Result<NonNull<u8>> {
        let candidates = self.candidates(None);
        // SAFETY: forwarded caller contract
        unsafe { self.blocks().reallocate(ptr, size, &candidates) }
    }

    /// Resize a block, or allocate when `ptr` is `None`. Never null.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_reallocate`](Self::try_reallocate).
    pub unsafe fn reallocate(&self, ptr: Option<NonNull<u8>>, size: usize) -> NonNull<u8> {
        unsafe { self.try_reallocate(ptr, size) }.unwrap_or_else(|err| out_of_memory(&err))
    }

    /// Move a block to `node` with a new size, or allocate there when `ptr`
    /// is `None`. Always allocate-copy-free.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::OutOfMemory`] if every attempt failed.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_reallocate`](Self::try_reallocate).
    pub unsafe fn try_reallocate_on_node(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
        node: NodeId,
    ) -> Result<NonNull<u8>> {
        let candidates = self.candidates(Some(node));
        // SAFETY: forwarded caller contract
        unsafe { self.blocks().reallocate(ptr, size, &candidates) }
    }

    /// Move a block to `node` with a new size. Never null.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_reallocate`](Self::try_reallocate).
    pub unsafe fn reallocate_on_node(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
        node: NodeId,
    ) -> NonNull<u8> {
        unsafe { self.try_reallocate_on_node(ptr, size, node) }
            .unwrap_or_else(|err| out_of_memory(&err))
    }

    /// Release a block. `None` is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator and must not be used
    /// afterwards.
    pub unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        // SAFETY: forwarded caller contract
        unsafe { self.blocks().free(ptr) };
    }

    /// Requested payload size of a live block.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator.
    #[must_use]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { block::usable_size(ptr) }
    }

    /// Node a live block was placed on, `None` if it was served untargeted.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator.
    #[must_use]
    pub unsafe fn block_node(&self, ptr: NonNull<u8>) -> Option<NodeId> {
        unsafe { block::block_node(ptr) }
    }

    // Accounting

    /// Total bytes of live blocks, headers included.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.accountant.used_bytes()
    }

    /// Serialize usage accounting. Cannot be undone.
    pub fn enable_thread_safety(&self) {
        self.accountant.enable_thread_safety();
        tracing::debug!("Usage accounting is now lock-serialized");
    }

    /// Returns `true` once thread-safe accounting is enabled.
    #[must_use]
    pub fn is_thread_safe(&self) -> bool {
        self.accountant.is_thread_safe()
    }

    /// Snapshot of the placement counters.
    #[must_use]
    pub fn stats(&self) -> AllocStats {
        self.stats.snapshot()
    }

    // Configuration

    /// Switch the placement policy for subsequent allocations.
    pub fn set_policy(&self, policy: NumaPolicy) {
        let previous = NumaPolicy::from(self.policy.swap(policy as u8, Ordering::AcqRel));
        if previous != policy {
            tracing::info!("Placement policy changed: {} -> {}", previous, policy);
        }
    }

    /// The active placement policy.
    #[must_use]
    pub fn policy(&self) -> NumaPolicy {
        NumaPolicy::from(self.policy.load(Ordering::Acquire))
    }

    /// Set the node the default policy places on.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::InvalidNode`] if `node` is not addressable; the
    /// current default node is kept.
    pub fn set_default_node(&self, node: NodeId) -> Result<()> {
        let state = self.state();
        if node >= state.addressable {
            let err = NumaError::InvalidNode {
                node,
                available: state.addressable,
            };
            tracing::warn!("{}, default node unchanged", err);
            return Err(err);
        }

        self.default_node.store(node, Ordering::Release);
        tracing::info!("Default node set to {}", node);
        Ok(())
    }

    /// Forget the default node.
    pub fn clear_default_node(&self) {
        self.default_node.store(NO_NODE, Ordering::Release);
    }

    /// The configured default node.
    #[must_use]
    pub fn default_node(&self) -> Option<NodeId> {
        match self.default_node.load(Ordering::Acquire) {
            NO_NODE => None,
            node => Some(node),
        }
    }

    // Topology

    /// Node of the calling thread, `None` when topology is unavailable or
    /// the caller's node cannot be determined.
    #[must_use]
    pub fn current_node(&self) -> Option<NodeId> {
        if self.state().availability.is_available() {
            self.topology.node_of_caller()
        } else {
            None
        }
    }

    /// Topology availability of the current epoch.
    #[must_use]
    pub fn availability(&self) -> Availability {
        self.state().availability
    }

    /// Node ranking of the current epoch.
    #[must_use]
    pub fn ranking(&self) -> NodeRanking {
        self.state().ranking.clone()
    }

    /// Drop the cached topology; the next call re-probes and re-ranks.
    pub fn reset_topology(&self) {
        *self.state.write() = None;
        tracing::debug!("Topology state reset");
    }

    /// Release topology state.
    ///
    /// Live blocks stay valid and can still be freed. Any later call starts
    /// a new epoch.
    pub fn shutdown(&self) {
        let outstanding = self.used_bytes();
        if outstanding > 0 {
            tracing::warn!("Shutting down with {} bytes still allocated", outstanding);
        }
        *self.state.write() = None;
        tracing::info!("Allocator shut down");
    }
}

/// Report exhaustion and terminate.
#[cold]
fn out_of_memory(err: &NumaError) -> ! {
    tracing::error!("{}", err);
    eprintln!("numalloc: {err}");
    std::process::abort()
}

/// The allocate / reallocate / free triad consumed by collaborators.
///
/// Implementations never return null; exhaustion is fatal.
pub trait BlockAllocator {
    /// Allocate `size` bytes.
    fn allocate(&self, size: usize) -> NonNull<u8>;

    /// Resize a block, or allocate when `ptr` is `None`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator and must not be used
    /// after the call.
    unsafe fn reallocate(&self, ptr: Option<NonNull<u8>>, size: usize) -> NonNull<u8>;

    /// Release a block. `None` is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator and must not be used
    /// afterwards.
    unsafe fn free(&self, ptr: Option<NonNull<u8>>);
}

impl<T: TopologyProber, B: MemoryBackend> BlockAllocator for NumaAllocator<T, B> {
    fn allocate(&self, size: usize) -> NonNull<u8> {
        NumaAllocator::allocate(self, size)
    }

    unsafe fn reallocate(&self, ptr: Option<NonNull<u8>>, size: usize) -> NonNull<u8> {
        unsafe { NumaAllocator::reallocate(self, ptr, size) }
    }

    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        unsafe { NumaAllocator::free(self, ptr) }
    }
}

impl<A: BlockAllocator + ?Sized> BlockAllocator for &A {
    fn allocate(&self, size: usize) -> NonNull<u8> {
        (**self).allocate(size)
    }

    unsafe fn reallocate(&self, ptr: Option<NonNull<u8>>, size: usize) -> NonNull<u8> {
        unsafe { (**self).reallocate(ptr, size) }
    }

    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        unsafe { (**self).free(ptr) }
    }
}

impl<A: BlockAllocator + ?Sized> BlockAllocator for Arc<A> {
    fn allocate(&self, size: usize) -> NonNull<u8> {
        (**self).allocate(size)
    }

    unsafe fn reallocate(&self, ptr: Option<NonNull<u8>>, size: usize) -> NonNull<u8> {
        unsafe { (**self).reallocate(ptr, size) }
    }

    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        unsafe { (**self).free(ptr) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::StaticTopology;

    fn two_node() -> NumaAllocator<StaticTopology> {
        let topo = StaticTopology::new(vec![vec![10, 20], vec![20, 10]])
            .unwrap()
            .with_caller_node(1);
        NumaAllocator::new(topo, NodeBackend::new())
    }

    #[test]
    fn test_lazy_initialization() {
        let alloc = two_node();
        assert!(alloc.state.read().is_none());
        assert_eq!(alloc.ranking().as_slice(), &[1, 0]);
        assert!(alloc.state.read().is_some());
    }

    #[test]
    fn test_policy_roundtrip() {
        let alloc = two_node();
        assert_eq!(alloc.policy(), NumaPolicy::Default);
        alloc.set_policy(NumaPolicy::Balanced);
        assert_eq!(alloc.policy(), NumaPolicy::Balanced);
    }

    #[test]
    fn test_default_node_validation() {
        let alloc = two_node();
        alloc.set_default_node(1).unwrap();
        assert_eq!(alloc.default_node(), Some(1));

        let err = alloc.set_default_node(5).unwrap_err();
        assert!(matches!(err, NumaError::InvalidNode { node: 5, available: 2 }));
        assert_eq!(alloc.default_node(), Some(1));

        alloc.clear_default_node();
        assert_eq!(alloc.default_node(), None);
    }

    #[test]
    fn test_candidates_follow_policy() {
        let alloc = two_node();
        assert!(alloc.candidates(None).is_empty());

        alloc.set_default_node(0).unwrap();
        assert_eq!(alloc.candidates(None).as_slice(), &[0]);

        alloc.set_policy(NumaPolicy::DistanceFirst);
        assert_eq!(alloc.candidates(None).as_slice(), &[1, 0]);
        assert_eq!(alloc.candidates(Some(0)).as_slice(), &[0]);
        assert_eq!(alloc.candidates(Some(9)).as_slice(), &[1, 0]);
    }

    #[test]
    fn test_local_default() {
        let config = AllocatorConfig::builder()
            .local_default(true)
            .build()
            .unwrap();
        let topo = StaticTopology::symmetric(2).unwrap().with_caller_node(1);
        let alloc = NumaAllocator::with_config(topo, NodeBackend::new(), &config).unwrap();

        assert_eq!(alloc.default_node(), None);
        assert_eq!(alloc.current_node(), Some(1));
        assert_eq!(alloc.default_node(), Some(1));
    }

    #[test]
    fn test_with_config_probes_only_for_default_node() {
        let topo = StaticTopology::symmetric(2).unwrap();
        let config = AllocatorConfig::builder().build().unwrap();
        let alloc = NumaAllocator::with_config(topo, NodeBackend::new(), &config).unwrap();
        assert!(alloc.state.read().is_none());

        let topo = StaticTopology::symmetric(2).unwrap();
        let config = AllocatorConfig::builder().default_node(1).build().unwrap();
        let alloc = NumaAllocator::with_config(topo, NodeBackend::new(), &config).unwrap();
        assert!(alloc.state.read().is_some());
        assert_eq!(alloc.default_node(), Some(1));
    }

    #[test]
    fn test_with_config_rejects_unknown_default_node() {
        let config = AllocatorConfig::builder().default_node(3).build().unwrap();
        let topo = StaticTopology::symmetric(2).unwrap();
        let err = NumaAllocator::with_config(topo, NodeBackend::new(), &config).unwrap_err();
        assert!(matches!(err, NumaError::InvalidNode { .. }));
    }

    #[test]
    fn test_unavailable_topology() {
        let alloc = NumaAllocator::new(StaticTopology::unavailable(), NodeBackend::new());
        assert_eq!(alloc.availability(), Availability::Unavailable);
        assert_eq!(alloc.current_node(), None);
        assert!(alloc.ranking().is_empty());
        assert!(alloc.set_default_node(0).is_err());

        let ptr = alloc.allocate(64);
        unsafe {
            assert_eq!(alloc.block_node(ptr), None);
            alloc.free(Some(ptr));
        }
        assert_eq!(alloc.used_bytes(), 0);
    }

    #[test]
    fn test_allocate_copy() {
        let alloc = NumaAllocator::new(StaticTopology::unavailable(), NodeBackend::new());
        let ptr = alloc.allocate_copy(b"hello\0");
        unsafe {
            assert_eq!(std::slice::from_raw_parts(ptr.as_ptr(), 6), b"hello\0");
            assert_eq!(alloc.usable_size(ptr), 6);
            alloc.free(Some(ptr));
        }
    }

    #[test]
    fn test_shutdown_clears_state() {
        let alloc = two_node();
        let _ = alloc.ranking();
        alloc.shutdown();
        assert!(alloc.state.read().is_none());
    }
}
