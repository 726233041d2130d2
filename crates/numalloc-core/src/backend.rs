//! # Allocation Primitives
//!
//! The raw memory sources the placement engine draws from: a node-targeted
//! primitive and an untargeted one. The default [`NodeBackend`] uses raw
//! libc syscalls (`mmap` + `mbind`) for targeted requests and the system
//! allocator for everything else, without depending on libnuma.
//!
//! Primitives only report success or failure. Retrying across nodes and
//! falling back is the policy engine's job.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use crate::topology::NodeId;

/// Alignment of every block handed out by a backend.
pub const BLOCK_ALIGN: usize = 16;

/// Source of raw memory for the block manager.
///
/// Sizes passed in always include the block header, so they are never zero.
pub trait MemoryBackend: Send + Sync {
    /// Allocate `size` bytes bound to `node`. `None` means this node cannot
    /// serve the request right now.
    fn alloc_on_node(&self, size: usize, node: NodeId) -> Option<NonNull<u8>>;

    /// Allocate `size` bytes without any node constraint.
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Resize an untargeted allocation, possibly in place.
    ///
    /// On failure the original allocation is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`alloc`](Self::alloc) on this backend with
    /// `old_size` bytes, and must not be used after a successful call.
    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let new_ptr = self.alloc(new_size)?;
        // SAFETY: both regions are live and distinct; the copy stays within the smaller one
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
            self.free(ptr, old_size);
        }
        Some(new_ptr)
    }

    /// Release memory obtained from [`alloc_on_node`](Self::alloc_on_node).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc_on_node(size, node)` on this backend and
    /// must not be used afterwards.
    unsafe fn free_on_node(&self, ptr: NonNull<u8>, size: usize, node: NodeId);

    /// Release memory obtained from [`alloc`](Self::alloc) or
    /// [`realloc`](Self::realloc).
    ///
    /// # Safety
    ///
    /// `ptr` must come from this backend's untargeted primitives with `size`
    /// bytes and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);
}

fn block_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size, BLOCK_ALIGN).ok()
}

/// Default backend: `mmap` + `mbind` for targeted memory, the system
/// allocator for untargeted memory.
///
/// Node-targeted allocation is only implemented on Linux; elsewhere
/// [`alloc_on_node`](MemoryBackend::alloc_on_node) always reports failure and
/// requests fall back to the system allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeBackend;

impl NodeBackend {
    /// Create the default backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Bind a fresh mapping to a single node using the mbind syscall.
    #[cfg(target_os = "linux")]
    #[allow(clippy::items_after_statements)]
    fn bind_to_node(ptr: *mut libc::c_void, size: usize, node: NodeId) -> std::io::Result<()> {
        use smallvec::{smallvec, SmallVec};

        // MPOL_BIND = 2 - strictly bind to the specified nodes
        const MPOL_BIND: libc::c_int = 2;
        const WORD_BITS: usize = libc::c_ulong::BITS as usize;

        // Bit N set means node N may back these pages
        let mut nodemask: SmallVec<[libc::c_ulong; 2]> = smallvec![0; node / WORD_BITS + 1];
        nodemask[node / WORD_BITS] |= 1 << (node % WORD_BITS);
        let maxnode = nodemask.len() * WORD_BITS + 1;

        // SAFETY: ptr/size describe a live mapping and nodemask outlives the call
        let result = unsafe {
            libc::syscall(
                libc::SYS_mbind,
                ptr,
                size,
                MPOL_BIND,
                nodemask.as_ptr(),
                maxnode,
                0u32,
            )
        };

        if result < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Get the node backing the page that contains `ptr`.
    ///
    /// The page must already be faulted in. Returns `None` when the kernel
    /// cannot tell (or on non-Linux platforms).
    #[must_use]
    pub fn memory_node(ptr: *const u8) -> Option<NodeId> {
        if ptr.is_null() {
            return None;
        }

        #[cfg(target_os = "linux")]
        {
            let mut status: libc::c_int = -1;
            let pages = [ptr.cast_mut().cast::<libc::c_void>()];

            // SAFETY: move_pages with a NULL node list only queries placement
            let result = unsafe {
                libc::syscall(
                    libc::SYS_move_pages,
                    0 as libc::c_int,
                    1usize,
                    pages.as_ptr(),
                    ptr::null::<libc::c_int>(),
                    &mut status as *mut libc::c_int,
                    0 as libc::c_int,
                )
            };

            if result == 0 {
                return usize::try_from(status).ok();
            }
        }

        None
    }
}

impl MemoryBackend for NodeBackend {
    #[cfg(target_os = "linux")]
    fn alloc_on_node(&self, size: usize, node: NodeId) -> Option<NonNull<u8>> {
        // SAFETY: anonymous private mapping; no existing memory is touched
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            tracing::debug!(
                "mmap of {} bytes for node {} failed: {}",
                size,
                node,
                std::io::Error::last_os_error()
            );
            return None;
        }

        if let Err(err) = Self::bind_to_node(ptr, size, node) {
            tracing::debug!("mbind to node {} failed: {}", node, err);
            // SAFETY: ptr/size is the mapping created above
            unsafe { libc::munmap(ptr, size) };
            return None;
        }

        NonNull::new(ptr.cast())
    }

    #[cfg(not(target_os = "linux"))]
    fn alloc_on_node(&self, _size: usize, _node: NodeId) -> Option<NonNull<u8>> {
        None
    }

    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = block_layout(size)?;
        // SAFETY: layout has non-zero size (callers always include the header)
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let layout = block_layout(old_size)?;
        block_layout(new_size)?;
        // SAFETY: caller guarantees ptr was allocated with this layout
        NonNull::new(unsafe { alloc::realloc(ptr.as_ptr(), layout, new_size) })
    }

    #[cfg(target_os = "linux")]
    unsafe fn free_on_node(&self, ptr: NonNull<u8>, size: usize, _node: NodeId) {
        // SAFETY: caller guarantees ptr was mapped by alloc_on_node with this size
        unsafe { libc::munmap(ptr.as_ptr().cast(), size) };
    }

    #[cfg(not(target_os = "linux"))]
    unsafe fn free_on_node(&self, ptr: NonNull<u8>, size: usize, _node: NodeId) {
        // alloc_on_node never succeeds here, but stay symmetric with free()
        unsafe { self.free(ptr, size) };
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = block_layout(size) {
            // SAFETY: caller guarantees ptr was allocated with this layout
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}
