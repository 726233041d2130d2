//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::alloc::{self, Layout};
use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use numalloc_core::{MemoryBackend, NodeId, NumaAllocator, StaticTopology, BLOCK_ALIGN};

/// Backend that serves every node from the system allocator and can be
/// told which nodes (and whether untargeted requests) should fail.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    failing: Mutex<HashSet<NodeId>>,
    attempts: Mutex<Vec<NodeId>>,
    fail_untargeted: AtomicBool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_node(&self, node: NodeId) {
        self.failing.lock().insert(node);
    }

    pub fn fail_untargeted(&self, fail: bool) {
        self.fail_untargeted.store(fail, Ordering::SeqCst);
    }

    /// Nodes tried since the last call, in order.
    pub fn take_attempts(&self) -> Vec<NodeId> {
        std::mem::take(&mut *self.attempts.lock())
    }

    fn raw_alloc(size: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(size, BLOCK_ALIGN).ok()?;
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn raw_free(ptr: NonNull<u8>, size: usize) {
        let layout = Layout::from_size_align(size, BLOCK_ALIGN).unwrap();
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

impl MemoryBackend for ScriptedBackend {
    fn alloc_on_node(&self, size: usize, node: NodeId) -> Option<NonNull<u8>> {
        self.attempts.lock().push(node);
        if self.failing.lock().contains(&node) {
            return None;
        }
        Self::raw_alloc(size)
    }

    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if self.fail_untargeted.load(Ordering::SeqCst) {
            return None;
        }
        Self::raw_alloc(size)
    }

    unsafe fn free_on_node(&self, ptr: NonNull<u8>, size: usize, _node: NodeId) {
        unsafe { Self::raw_free(ptr, size) };
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        unsafe { Self::raw_free(ptr, size) };
    }
}

pub type TestAllocator = NumaAllocator<StaticTopology, ScriptedBackend>;

/// Two nodes at distance 20, caller on node 1.
pub fn two_node_allocator() -> TestAllocator {
    let topo = StaticTopology::new(vec![vec![0, 20], vec![20, 0]])
        .unwrap()
        .with_caller_node(1);
    NumaAllocator::new(topo, ScriptedBackend::new())
}

/// `n` symmetric nodes with the caller on `caller`.
pub fn symmetric_allocator(n: usize, caller: NodeId) -> TestAllocator {
    let topo = StaticTopology::symmetric(n).unwrap().with_caller_node(caller);
    NumaAllocator::new(topo, ScriptedBackend::new())
}
