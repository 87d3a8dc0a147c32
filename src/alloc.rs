//! Per-pipeline buffer allocator.
//!
//! One `BucketAlloc` is shared by all buckets of a logical connection or
//! transaction; it recycles scratch buffers instead of hitting the global
//! allocator on every read, and counts outstanding scratch blocks so tests
//! can assert a pipeline returned everything it borrowed. Single-threaded,
//! like the pipelines it serves.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

struct AllocInner {
    free: Vec<BytesMut>,
    outstanding: usize,
}

/// Cheaply clonable allocator handle scoped to one pipeline.
#[derive(Clone)]
pub struct BucketAlloc {
    inner: Rc<RefCell<AllocInner>>,
}

impl BucketAlloc {
    pub fn new() -> Self {
        BucketAlloc {
            inner: Rc::new(RefCell::new(AllocInner {
                free: Vec::new(),
                outstanding: 0,
            })),
        }
    }

    /// Take a cleared scratch buffer with at least `min_cap` capacity,
    /// reusing a released one when possible.
    pub fn scratch(&self, min_cap: usize) -> BytesMut {
        let mut inner = self.inner.borrow_mut();
        inner.outstanding += 1;
        for i in 0..inner.free.len() {
            if inner.free[i].capacity() >= min_cap {
                return inner.free.swap_remove(i);
            }
        }
        BytesMut::with_capacity(min_cap)
    }

    /// Return a scratch buffer for reuse.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let mut inner = self.inner.borrow_mut();
        debug_assert!(inner.outstanding > 0, "release without matching scratch");
        inner.outstanding = inner.outstanding.saturating_sub(1);
        inner.free.push(buf);
    }

    /// Copy `data` into an owned, refcounted block.
    pub fn copy(&self, data: &[u8]) -> Bytes {
        let mut buf = self.scratch(data.len());
        buf.extend_from_slice(data);
        let out = buf.split().freeze();
        self.release(buf);
        out
    }

    /// Number of scratch buffers currently out on loan.
    pub fn blocks_outstanding(&self) -> usize {
        self.inner.borrow().outstanding
    }
}

impl Default for BucketAlloc {
    fn default() -> Self {
        BucketAlloc::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_release_cycle() {
        let alloc = BucketAlloc::new();
        let buf = alloc.scratch(64);
        assert_eq!(alloc.blocks_outstanding(), 1);
        alloc.release(buf);
        assert_eq!(alloc.blocks_outstanding(), 0);
    }

    #[test]
    fn released_buffers_are_reused() {
        let alloc = BucketAlloc::new();
        let mut buf = alloc.scratch(128);
        buf.extend_from_slice(b"junk");
        let cap = buf.capacity();
        alloc.release(buf);

        let again = alloc.scratch(64);
        assert_eq!(again.capacity(), cap);
        assert!(again.is_empty());
        alloc.release(again);
    }

    #[test]
    fn copy_is_independent() {
        let alloc = BucketAlloc::new();
        let copied = alloc.copy(b"hello");
        assert_eq!(&copied[..], b"hello");
        assert_eq!(alloc.blocks_outstanding(), 0);
    }
}
