//! # Sized-Block Lifecycle
//!
//! Every block carries a hidden header in front of the caller's pointer:
//!
//! ```text
//!  raw                    raw + HEADER_WIDTH
//!  │                      │
//!  ▼                      ▼
//!  ┌──────────┬───────────┬──────────────────────────┐
//!  │ size     │ origin    │ payload (size bytes)     │
//!  └──────────┴───────────┴──────────────────────────┘
//! ```
//!
//! `size` is the caller's last requested payload size. `origin` is the node
//! the block was placed on, or untargeted, and selects the primitive that
//! releases it.

use std::ptr::{self, NonNull};

use crate::accountant::UsageAccountant;
use crate::backend::{MemoryBackend, BLOCK_ALIGN};
use crate::policy::attempt_allocate;
use crate::stats::PlacementStats;
use crate::topology::NodeId;
use crate::NumaError;

/// Bytes reserved in front of every payload.
pub const HEADER_WIDTH: usize = 16;

/// Origin value for blocks served by the untargeted primitive.
const UNTARGETED: usize = usize::MAX;

/// Largest total a `Layout` accepts.
const MAX_TOTAL: usize = isize::MAX.unsigned_abs() - (BLOCK_ALIGN - 1);

#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    size: usize,
    origin: usize,
}

const _: () = assert!(std::mem::size_of::<BlockHeader>() == HEADER_WIDTH);

impl BlockHeader {
    fn node(self) -> Option<NodeId> {
        (self.origin != UNTARGETED).then_some(self.origin)
    }

    fn total(self) -> usize {
        self.size + HEADER_WIDTH
    }
}

fn total_for(size: usize) -> Result<usize, NumaError> {
    size.checked_add(HEADER_WIDTH)
        .filter(|total| *total <= MAX_TOTAL)
        .ok_or(NumaError::OutOfMemory { size })
}

/// Header location for a payload pointer.
///
/// # Safety
///
/// `ptr` must be a payload pointer produced by [`BlockManager`].
unsafe fn header_of(ptr: NonNull<u8>) -> NonNull<BlockHeader> {
    // SAFETY: payloads always sit HEADER_WIDTH bytes into their block
    unsafe { NonNull::new_unchecked(ptr.as_ptr().sub(HEADER_WIDTH)).cast() }
}

/// Payload location for a raw block.
///
/// # Safety
///
/// `raw` must point to a block of at least `HEADER_WIDTH` bytes.
unsafe fn payload_of(raw: NonNull<u8>) -> NonNull<u8> {
    // SAFETY: in bounds of the block; never null
    unsafe { NonNull::new_unchecked(raw.as_ptr().add(HEADER_WIDTH)) }
}

/// Requested payload size of a live block.
///
/// # Safety
///
/// `ptr` must be a live payload pointer produced by [`BlockManager`].
pub(crate) unsafe fn usable_size(ptr: NonNull<u8>) -> usize {
    unsafe { header_of(ptr).read().size }
}

/// Node a live block was placed on, `None` if untargeted.
///
/// # Safety
///
/// `ptr` must be a live payload pointer produced by [`BlockManager`].
pub(crate) unsafe fn block_node(ptr: NonNull<u8>) -> Option<NodeId> {
    unsafe { header_of(ptr).read().node() }
}

/// Borrowed view over the pieces one block operation touches.
pub(crate) struct BlockManager<'a, B: ?Sized> {
    pub(crate) backend: &'a B,
    pub(crate) accountant: &'a UsageAccountant,
    pub(crate) stats: &'a PlacementStats,
}

impl<B: MemoryBackend + ?Sized> BlockManager<'_, B> {
    /// Place a raw block of `total` bytes: candidates first, then untargeted.
    fn place(&self, total: usize, candidates: &[NodeId]) -> Option<(NonNull<u8>, usize)> {
        if let Some((raw, node)) = attempt_allocate(self.backend, candidates, total, self.stats) {
            self.stats.record_allocation(true);
            return Some((raw, node));
        }

        if !candidates.is_empty() {
            tracing::debug!(
                "No candidate node could serve {} bytes, falling back to untargeted allocation",
                total
            );
        }
        let raw = self.backend.alloc(total)?;
        self.stats.record_allocation(false);
        Some((raw, UNTARGETED))
    }

    /// Allocate a block with a `size`-byte payload.
    pub(crate) fn allocate(
        &self,
        size: usize,
        candidates: &[NodeId],
    ) -> Result<NonNull<u8>, NumaError> {
        let total = total_for(size)?;
        let (raw, origin) = self
            .place(total, candidates)
            .ok_or(NumaError::OutOfMemory { size })?;

        // SAFETY: raw is a fresh block of `total` bytes aligned to BLOCK_ALIGN
        unsafe {
            raw.cast::<BlockHeader>()
                .as_ptr()
                .write(BlockHeader { size, origin });
        }
        self.accountant.add(total);

        // SAFETY: total >= HEADER_WIDTH
        Ok(unsafe { payload_of(raw) })
    }

    /// Resize a block, or allocate one when `ptr` is `None`.
    ///
    /// On error the old block is untouched and still owned by the caller.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live payload pointer produced by this manager's
    /// backend. On success it must not be used again.
    pub(crate) unsafe fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
        candidates: &[NodeId],
    ) -> Result<NonNull<u8>, NumaError> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size, candidates);
        };

        let new_total = total_for(new_size)?;
        // SAFETY: caller guarantees ptr is live
        let header_ptr = unsafe { header_of(ptr) };
        let old = unsafe { header_ptr.read() };
        self.stats.record_reallocation();

        if candidates.is_empty() && old.node().is_none() {
            // SAFETY: untargeted blocks come from backend.alloc with old.total() bytes
            let raw = unsafe {
                self.backend
                    .realloc(header_ptr.cast(), old.total(), new_total)
                    .ok_or(NumaError::OutOfMemory { size: new_size })?
            };
            unsafe {
                raw.cast::<BlockHeader>().as_ptr().write(BlockHeader {
                    size: new_size,
                    origin: UNTARGETED,
                });
            }
            if new_total >= old.total() {
                self.accountant.add(new_total - old.total());
            } else {
                self.accountant.sub(old.total() - new_total);
            }
            return Ok(unsafe { payload_of(raw) });
        }

        let new_ptr = self.allocate(new_size, candidates)?;
        // SAFETY: distinct live blocks, copy bounded by both payloads
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old.size.min(new_size));
            self.free(Some(ptr));
        }
        Ok(new_ptr)
    }

    /// Release a block. `None` is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live payload pointer produced by this manager's
    /// backend and must not be used afterwards.
    pub(crate) unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };

        // SAFETY: caller guarantees ptr is live
        let header_ptr = unsafe { header_of(ptr) };
        let header = unsafe { header_ptr.read() };
        self.accountant.sub(header.total());
        self.stats.record_free();

        let raw = header_ptr.cast::<u8>();
        // SAFETY: header origin identifies the primitive that produced raw
        unsafe {
            match header.node() {
                Some(node) => self.backend.free_on_node(raw, header.total(), node),
                None => self.backend.free(raw, header.total()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NodeBackend;

    fn with_manager<R>(f: impl FnOnce(&BlockManager<'_, NodeBackend>) -> R) -> R {
        let backend = NodeBackend::new();
        let accountant = UsageAccountant::new();
        let stats = PlacementStats::default();
        f(&BlockManager {
            backend: &backend,
            accountant: &accountant,
            stats: &stats,
        })
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_WIDTH, 16);
        assert_eq!(std::mem::align_of::<BlockHeader>(), BLOCK_ALIGN);
    }

    #[test]
    fn test_allocate_untargeted() {
        with_manager(|blocks| {
            let ptr = blocks.allocate(100, &[]).unwrap();
            assert_eq!(ptr.as_ptr() as usize % BLOCK_ALIGN, 0);
            assert_eq!(blocks.accountant.used_bytes(), 100 + HEADER_WIDTH);

            unsafe {
                assert_eq!(usable_size(ptr), 100);
                assert_eq!(block_node(ptr), None);
                blocks.free(Some(ptr));
            }
            assert_eq!(blocks.accountant.used_bytes(), 0);
        });
    }

    #[test]
    fn test_zero_size_block() {
        with_manager(|blocks| {
            let ptr = blocks.allocate(0, &[]).unwrap();
            assert_eq!(blocks.accountant.used_bytes(), HEADER_WIDTH);
            unsafe { blocks.free(Some(ptr)) };
            assert_eq!(blocks.accountant.used_bytes(), 0);
        });
    }

    #[test]
    fn test_overflowing_size_is_out_of_memory() {
        with_manager(|blocks| {
            let err = blocks.allocate(usize::MAX - 4, &[]).unwrap_err();
            assert!(err.is_out_of_memory());
            assert_eq!(blocks.accountant.used_bytes(), 0);
        });
    }

    #[test]
    fn test_in_place_realloc_keeps_content() {
        with_manager(|blocks| unsafe {
            let ptr = blocks.allocate(8, &[]).unwrap();
            ptr.as_ptr().copy_from_nonoverlapping(b"numalloc".as_ptr(), 8);

            let grown = blocks.reallocate(Some(ptr), 4096, &[]).unwrap();
            assert_eq!(std::slice::from_raw_parts(grown.as_ptr(), 8), b"numalloc");
            assert_eq!(usable_size(grown), 4096);
            assert_eq!(blocks.accountant.used_bytes(), 4096 + HEADER_WIDTH);

            let shrunk = blocks.reallocate(Some(grown), 4, &[]).unwrap();
            assert_eq!(std::slice::from_raw_parts(shrunk.as_ptr(), 4), b"numa");
            assert_eq!(blocks.accountant.used_bytes(), 4 + HEADER_WIDTH);

            blocks.free(Some(shrunk));
            assert_eq!(blocks.accountant.used_bytes(), 0);
        });
    }

    #[test]
    fn test_realloc_null_allocates() {
        with_manager(|blocks| unsafe {
            let ptr = blocks.reallocate(None, 32, &[]).unwrap();
            assert_eq!(usable_size(ptr), 32);
            assert_eq!(blocks.stats.snapshot().reallocations, 0);
            blocks.free(Some(ptr));
        });
    }

    #[test]
    fn test_free_none_is_noop() {
        with_manager(|blocks| {
            unsafe { blocks.free(None) };
            assert_eq!(blocks.accountant.used_bytes(), 0);
            assert_eq!(blocks.stats.snapshot().frees, 0);
        });
    }
}
