//! # Usage Accountant
//!
//! Tracks the total bytes of live blocks, headers included.
//!
//! Thread safety is a one-way switch. Before it is enabled, updates are a
//! plain load followed by a store, so concurrent updates can lose
//! increments (the count drifts but memory stays safe). After it is enabled,
//! every update and every read is serialized by a mutex.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Byte counter for live allocations.
#[derive(Debug, Default)]
pub struct UsageAccountant {
    used: AtomicUsize,
    thread_safe: AtomicBool,
    lock: Mutex<()>,
}

impl UsageAccountant {
    /// Create a counter at zero with thread safety disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increase the count by exactly `n`.
    pub fn add(&self, n: usize) {
        self.update(|used| used.wrapping_add(n));
    }

    /// Decrease the count by exactly `n`.
    ///
    /// An underflow wraps instead of clamping, so a double free shows up as
    /// a huge count rather than being hidden at zero.
    pub fn sub(&self, n: usize) {
        self.update(|used| used.wrapping_sub(n));
    }

    fn update(&self, f: impl FnOnce(usize) -> usize) {
        if self.is_thread_safe() {
            let _guard = self.lock.lock();
            self.store(f);
        } else {
            self.store(f);
        }
    }

    fn store(&self, f: impl FnOnce(usize) -> usize) {
        let current = self.used.load(Ordering::Relaxed);
        self.used.store(f(current), Ordering::Relaxed);
    }

    /// Current count.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        if self.is_thread_safe() {
            let _guard = self.lock.lock();
            self.used.load(Ordering::Relaxed)
        } else {
            self.used.load(Ordering::Relaxed)
        }
    }

    /// Serialize all further updates. Cannot be undone.
    pub fn enable_thread_safety(&self) {
        // Take the lock so no unlocked update straddles the switch
        let _guard = self.lock.lock();
        self.thread_safe.store(true, Ordering::Release);
    }

    /// Returns `true` once [`enable_thread_safety`](Self::enable_thread_safety) has been called.
    #[must_use]
    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_sub() {
        let acct = UsageAccountant::new();
        acct.add(116);
        acct.add(32);
        assert_eq!(acct.used_bytes(), 148);
        acct.sub(116);
        assert_eq!(acct.used_bytes(), 32);
        acct.sub(32);
        assert_eq!(acct.used_bytes(), 0);
    }

    #[test]
    fn test_sub_is_exact_past_zero() {
        let acct = UsageAccountant::new();
        acct.add(10);
        acct.sub(30);
        assert_ne!(acct.used_bytes(), 0);
        assert_eq!(acct.used_bytes(), usize::MAX - 19);
        acct.add(20);
        assert_eq!(acct.used_bytes(), 0);
    }

    #[test]
    fn test_switch_is_one_way() {
        let acct = UsageAccountant::new();
        assert!(!acct.is_thread_safe());
        acct.enable_thread_safety();
        acct.enable_thread_safety();
        assert!(acct.is_thread_safe());
    }

    #[test]
    fn test_locked_concurrent_updates_are_exact() {
        let acct = Arc::new(UsageAccountant::new());
        acct.enable_thread_safety();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let acct = Arc::clone(&acct);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        acct.add(24);
                        acct.sub(24);
                    }
                    acct.add(1);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(acct.used_bytes(), 8);
    }
}
