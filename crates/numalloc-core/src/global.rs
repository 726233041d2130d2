//! # Process-Wide Allocator
//!
//! A single [`NumaAllocator`] shared by the whole process, for code that
//! wants the classic free-function interface.
//!
//! The instance is created on first use with default settings, or
//! explicitly beforehand with [`install`]:
//!
//! ```rust,no_run
//! use numalloc_core::{global, AllocatorConfig, NumaPolicy};
//!
//! let config = AllocatorConfig::builder()
//!     .policy(NumaPolicy::DistanceFirst)
//!     .thread_safe(true)
//!     .build()?;
//! global::install(&config)?;
//!
//! let ptr = global::allocate(128);
//! unsafe { global::free(Some(ptr)) };
//! # Ok::<(), numalloc_core::NumaError>(())
//! ```

use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::allocator::{BlockAllocator, NumaAllocator};
use crate::config::AllocatorConfig;
use crate::policy::NumaPolicy;
use crate::topology::NodeId;
use crate::{NumaError, Result};

static GLOBAL: OnceLock<NumaAllocator> = OnceLock::new();

/// Create the process-wide allocator from `config`.
///
/// # Errors
///
/// Returns [`NumaError::AlreadyInitialized`] if the allocator already
/// exists (explicitly installed or created by an earlier call), or the
/// configuration error.
pub fn install(config: &AllocatorConfig) -> Result<()> {
    if GLOBAL.get().is_some() {
        return Err(NumaError::AlreadyInitialized);
    }
    let alloc = NumaAllocator::from_config(config)?;
    GLOBAL
        .set(alloc)
        .map_err(|_| NumaError::AlreadyInitialized)
}

/// The process-wide allocator, created with defaults if needed.
pub fn allocator() -> &'static NumaAllocator {
    GLOBAL.get_or_init(NumaAllocator::detect)
}

/// See [`NumaAllocator::allocate`].
pub fn allocate(size: usize) -> NonNull<u8> {
    allocator().allocate(size)
}

/// See [`NumaAllocator::allocate_on_node`].
pub fn allocate_on_node(size: usize, node: NodeId) -> NonNull<u8> {
    allocator().allocate_on_node(size, node)
}

/// See [`NumaAllocator::allocate_copy`].
pub fn allocate_copy(bytes: &[u8]) -> NonNull<u8> {
    allocator().allocate_copy(bytes)
}

/// See [`NumaAllocator::reallocate`].
///
/// # Safety
///
/// `ptr` must be a live block from the process-wide allocator and must not
/// be used after the call.
pub unsafe fn reallocate(ptr: Option<NonNull<u8>>, size: usize) -> NonNull<u8> {
    unsafe { allocator().reallocate(ptr, size) }
}

/// See [`NumaAllocator::reallocate_on_node`].
///
/// # Safety
///
/// Same contract as [`reallocate`].
pub unsafe fn reallocate_on_node(ptr: Option<NonNull<u8>>, size: usize, node: NodeId) -> NonNull<u8> {
    unsafe { allocator().reallocate_on_node(ptr, size, node) }
}

/// See [`NumaAllocator::free`].
///
/// # Safety
///
/// `ptr` must be a live block from the process-wide allocator and must not
/// be used afterwards.
pub unsafe fn free(ptr: Option<NonNull<u8>>) {
    unsafe { allocator().free(ptr) }
}

/// See [`NumaAllocator::used_bytes`].
pub fn used_bytes() -> usize {
    allocator().used_bytes()
}

/// See [`NumaAllocator::set_policy`].
pub fn set_policy(policy: NumaPolicy) {
    allocator().set_policy(policy);
}

/// See [`NumaAllocator::set_default_node`].
///
/// # Errors
///
/// Returns [`NumaError::InvalidNode`] if `node` is not addressable.
pub fn set_default_node(node: NodeId) -> Result<()> {
    allocator().set_default_node(node)
}

/// See [`NumaAllocator::current_node`].
pub fn current_node() -> Option<NodeId> {
    allocator().current_node()
}

/// See [`NumaAllocator::enable_thread_safety`].
pub fn enable_thread_safety() {
    allocator().enable_thread_safety();
}

/// See [`NumaAllocator::reset_topology`].
pub fn reset_topology() {
    allocator().reset_topology();
}

/// See [`NumaAllocator::shutdown`].
///
/// The instance itself lives for the rest of the process; only its
/// topology state is released.
pub fn shutdown() {
    if let Some(alloc) = GLOBAL.get() {
        alloc.shutdown();
    }
}

/// Handle to the process-wide allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Global;

impl BlockAllocator for Global {
    fn allocate(&self, size: usize) -> NonNull<u8> {
        allocate(size)
    }

    unsafe fn reallocate(&self, ptr: Option<NonNull<u8>>, size: usize) -> NonNull<u8> {
        unsafe { reallocate(ptr, size) }
    }

    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        unsafe { free(ptr) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test owns the singleton so parallel tests cannot race on install.
    #[test]
    fn test_global_lifecycle() {
        let config = AllocatorConfig::builder().thread_safe(true).build().unwrap();
        let installed = install(&config);
        assert!(installed.is_ok() || matches!(installed, Err(NumaError::AlreadyInitialized)));
        assert!(matches!(install(&config), Err(NumaError::AlreadyInitialized)));

        let baseline = used_bytes();
        let ptr = Global.allocate(40);
        let ptr = unsafe { Global.reallocate(Some(ptr), 80) };
        assert_eq!(unsafe { allocator().usable_size(ptr) }, 80);
        unsafe { Global.free(Some(ptr)) };
        unsafe { free(None) };
        assert_eq!(used_bytes(), baseline);

        shutdown();
        let ptr = allocate_copy(b"again");
        unsafe { free(Some(ptr)) };
        assert_eq!(used_bytes(), baseline);
    }
}
