//! # numalloc SDS
//!
//! Length-prefixed, binary-safe byte strings whose storage comes from a
//! [`BlockAllocator`](numalloc_core::BlockAllocator), by default the
//! process-wide topology-aware allocator.
//!
//! Growth is amortized: when an append does not fit, capacity becomes twice
//! the needed length. Allocation failure is never reported here; the
//! allocator terminates the process instead.
//!
//! ## Example
//!
//! ```rust,no_run
//! use numalloc_sds::Sds;
//!
//! let mut s = Sds::from("  hello ");
//! s.trim(b" ");
//! s.cat_str(", world");
//! s.to_upper();
//! assert_eq!(s.as_bytes(), b"HELLO, WORLD");
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod sds;

pub use sds::Sds;
