//! The [`Sds`] buffer type.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use numalloc_core::{BlockAllocator, Global};

/// Growable, binary-safe byte string.
///
/// The backing block holds `len + avail` bytes plus a trailing NUL that is
/// always kept right after the last byte, so the contents can be handed to
/// code expecting a terminated string.
pub struct Sds<A: BlockAllocator = Global> {
    ptr: NonNull<u8>,
    len: usize,
    free: usize,
    alloc: A,
}

// SAFETY: an Sds exclusively owns its block, like a Box
unsafe impl<A: BlockAllocator + Send> Send for Sds<A> {}
// SAFETY: shared access only reads the block
unsafe impl<A: BlockAllocator + Sync> Sync for Sds<A> {}

impl Sds {
    /// Copy `init` into a new buffer from the process-wide allocator.
    #[must_use]
    pub fn new(init: &[u8]) -> Self {
        Self::new_in(init, Global)
    }

    /// Zero-filled buffer of `len` bytes.
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self::with_len_in(len, Global)
    }

    /// Empty buffer.
    #[must_use]
    pub fn empty() -> Self {
        Self::empty_in(Global)
    }

    /// Split `s` on every occurrence of `sep`.
    ///
    /// Returns `None` for an empty separator and an empty vector for empty
    /// input. Adjacent separators yield empty tokens.
    #[must_use]
    pub fn split(s: &[u8], sep: &[u8]) -> Option<Vec<Self>> {
        Self::split_in(s, sep, Global)
    }
}

impl<A: BlockAllocator> Sds<A> {
    /// Copy `init` into a new buffer from `alloc`.
    pub fn new_in(init: &[u8], alloc: A) -> Self {
        let ptr = alloc.allocate(init.len() + 1);
        // SAFETY: fresh block of init.len() + 1 bytes
        unsafe {
            ptr.as_ptr()
                .copy_from_nonoverlapping(init.as_ptr(), init.len());
            ptr.as_ptr().add(init.len()).write(0);
        }
        Self {
            ptr,
            len: init.len(),
            free: 0,
            alloc,
        }
    }

    /// Zero-filled buffer of `len` bytes from `alloc`.
    pub fn with_len_in(len: usize, alloc: A) -> Self {
        let ptr = alloc.allocate(len + 1);
        // SAFETY: fresh block of len + 1 bytes
        unsafe { ptr.as_ptr().write_bytes(0, len + 1) };
        Self {
            ptr,
            len,
            free: 0,
            alloc,
        }
    }

    /// Empty buffer from `alloc`.
    pub fn empty_in(alloc: A) -> Self {
        Self::new_in(&[], alloc)
    }

    /// Split `s` on `sep`, allocating every token from `alloc`.
    pub fn split_in(s: &[u8], sep: &[u8], alloc: A) -> Option<Vec<Self>>
    where
        A: Clone,
    {
        if sep.is_empty() {
            return None;
        }
        if s.is_empty() {
            return Some(Vec::new());
        }

        let mut tokens = Vec::new();
        let mut start = 0;
        let mut j = 0;
        while j + sep.len() <= s.len() {
            if s[j..j + sep.len()] == *sep {
                tokens.push(Self::new_in(&s[start..j], alloc.clone()));
                start = j + sep.len();
                j = start;
            } else {
                j += 1;
            }
        }
        tokens.push(Self::new_in(&s[start..], alloc));
        Some(tokens)
    }

    /// Number of bytes stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bytes are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes that can be appended without growing.
    #[must_use]
    pub fn avail(&self) -> usize {
        self.free
    }

    /// The allocator backing this buffer.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// The stored bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the first len bytes of the block are initialized
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The stored bytes, mutably.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: the first len bytes are initialized and exclusively borrowed
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// The stored bytes followed by the terminating NUL.
    #[must_use]
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        // SAFETY: the byte at len is always the terminator
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len + 1) }
    }

    fn set_len(&mut self, len: usize) {
        let total = self.len + self.free;
        debug_assert!(len <= total);
        // SAFETY: len <= total, and the block holds total + 1 bytes
        unsafe { self.ptr.as_ptr().add(len).write(0) };
        self.len = len;
        self.free = total - len;
    }

    /// Shorten the length to the first NUL byte, if any.
    ///
    /// For use after writing a terminator into the buffer by hand.
    pub fn update_len(&mut self) {
        if let Some(pos) = self.as_bytes().iter().position(|&b| b == 0) {
            self.free += self.len - pos;
            self.len = pos;
        }
    }

    /// Make room for at least `addlen` more bytes.
    ///
    /// When growing, the new capacity is `(len + addlen) * 2`.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity overflows `usize`.
    pub fn reserve(&mut self, addlen: usize) {
        if self.free >= addlen {
            return;
        }

        let newlen = self
            .len
            .checked_add(addlen)
            .and_then(|n| n.checked_mul(2))
            .expect("capacity overflow");
        // SAFETY: self.ptr is our live block; it is replaced by the result
        self.ptr = unsafe { self.alloc.reallocate(Some(self.ptr), newlen + 1) };
        self.free = newlen - self.len;
    }

    /// Append bytes.
    pub fn cat(&mut self, t: &[u8]) {
        self.reserve(t.len());
        // SAFETY: reserve left room for t.len() bytes plus the terminator
        unsafe {
            self.ptr
                .as_ptr()
                .add(self.len)
                .copy_from_nonoverlapping(t.as_ptr(), t.len());
        }
        self.set_len(self.len + t.len());
    }

    /// Append a string.
    pub fn cat_str(&mut self, t: &str) {
        self.cat(t.as_bytes());
    }

    /// Append formatted text.
    ///
    /// ```rust,no_run
    /// use numalloc_sds::Sds;
    ///
    /// let mut s = Sds::from("id=");
    /// s.cat_fmt(format_args!("{}", 42));
    /// assert_eq!(s.as_bytes(), b"id=42");
    /// ```
    pub fn cat_fmt(&mut self, args: fmt::Arguments<'_>) {
        // Appending never fails
        let _ = fmt::Write::write_fmt(self, args);
    }

    /// Replace the contents with `t`.
    pub fn cpy(&mut self, t: &[u8]) {
        let total = self.len + self.free;
        if total < t.len() {
            self.reserve(t.len() - self.len);
        }
        // SAFETY: capacity is at least t.len(); t cannot alias our block
        unsafe {
            self.ptr
                .as_ptr()
                .copy_from_nonoverlapping(t.as_ptr(), t.len());
        }
        self.set_len(t.len());
    }

    /// Remove every leading and trailing byte found in `cset`.
    pub fn trim(&mut self, cset: &[u8]) {
        let bytes = self.as_bytes();
        let start = bytes
            .iter()
            .position(|b| !cset.contains(b))
            .unwrap_or(bytes.len());
        let end = bytes
            .iter()
            .rposition(|b| !cset.contains(b))
            .map_or(start, |i| i + 1);

        let newlen = end.saturating_sub(start);
        self.as_bytes_mut().copy_within(start..start + newlen, 0);
        self.set_len(newlen);
    }

    /// Keep only the bytes from `start` to `end`, both inclusive.
    ///
    /// Negative indices count from the end (`-1` is the last byte).
    /// Out-of-range indices are clamped; an empty range empties the buffer.
    pub fn range(&mut self, start: isize, end: isize) {
        let len = self.len;
        if len == 0 {
            return;
        }

        let resolve = |idx: isize| -> usize {
            if idx < 0 {
                len.saturating_sub(idx.unsigned_abs())
            } else {
                idx.unsigned_abs()
            }
        };
        let mut start = resolve(start);
        let mut end = resolve(end);

        let mut newlen = if start > end { 0 } else { end - start + 1 };
        if newlen == 0 {
            start = 0;
        } else {
            start = start.min(len - 1);
            end = end.min(len - 1);
            newlen = if start > end { 0 } else { end - start + 1 };
        }

        if start != 0 {
            self.as_bytes_mut().copy_within(start..start + newlen, 0);
        }
        self.set_len(newlen);
    }

    /// ASCII lowercase in place.
    pub fn to_lower(&mut self) {
        self.as_bytes_mut().make_ascii_lowercase();
    }

    /// ASCII uppercase in place.
    pub fn to_upper(&mut self) {
        self.as_bytes_mut().make_ascii_uppercase();
    }
}

impl<A: BlockAllocator> Drop for Sds<A> {
    fn drop(&mut self) {
        // SAFETY: the block is ours and is not used after this
        unsafe { self.alloc.free(Some(self.ptr)) };
    }
}

impl<A: BlockAllocator + Clone> Clone for Sds<A> {
    fn clone(&self) -> Self {
        Self::new_in(self.as_bytes(), self.alloc.clone())
    }
}

impl<A: BlockAllocator> Deref for Sds<A> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl<A: BlockAllocator> DerefMut for Sds<A> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_bytes_mut()
    }
}

impl<A: BlockAllocator> AsRef<[u8]> for Sds<A> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl<A: BlockAllocator> PartialEq for Sds<A> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<A: BlockAllocator> Eq for Sds<A> {}

impl<A: BlockAllocator> PartialEq<[u8]> for Sds<A> {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl<A: BlockAllocator> PartialEq<str> for Sds<A> {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<A: BlockAllocator> PartialOrd for Sds<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Bytewise comparison; on a common prefix the shorter buffer sorts first.
impl<A: BlockAllocator> Ord for Sds<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl<A: BlockAllocator> Hash for Sds<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl<A: BlockAllocator> fmt::Debug for Sds<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sds")
            .field("content", &String::from_utf8_lossy(self.as_bytes()))
            .field("len", &self.len)
            .field("avail", &self.free)
            .finish()
    }
}

impl<A: BlockAllocator> fmt::Display for Sds<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl<A: BlockAllocator> fmt::Write for Sds<A> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.cat_str(s);
        Ok(())
    }
}

impl From<&str> for Sds {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<&[u8]> for Sds {
    fn from(s: &[u8]) -> Self {
        Self::new(s)
    }
}
