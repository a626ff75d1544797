//! Resizing heap allocations. Whenever possible the allocation keeps its
//! address:
//!
//! **Shrink**: the tail goes back to the free list, merged with whatever free
//! node follows.
//!
//! ```text
//!   +----------------+-------+            +--------+----------------+
//!   |   A, used 128  | free  |    ==>     | A, 64  |      free      |
//!   +----------------+-------+            +--------+----------------+
//! ```
//!
//! **Grow**: bytes are taken from the free node right after the allocation,
//! if there's one and it's big enough.
//!
//! ```text
//!   +--------+----------------+            +----------------+-------+
//!   | A, 64  |      free      |    ==>     |   A, used 128  | free  |
//!   +--------+----------------+            +----------------+-------+
//! ```
//!
//! Otherwise a new allocation is made, the contents are copied over and the
//! old allocation is freed.

use std::ptr;

use log::trace;

use crate::heap::{Allocation, HeapAllocator};

impl HeapAllocator {
    /// Resizes `allocation` so that it can hold at least `new_size` bytes,
    /// preserving its contents up to the smaller of both sizes.
    ///
    /// On failure the original allocation is handed back untouched in the
    /// `Err` variant: either it doesn't belong to this heap, the new size
    /// overflows, or there's no free node big enough.
    ///
    /// # Safety
    ///
    /// When the allocation can't be resized in place its bytes are copied,
    /// so the region this heap was built over must be committed memory that
    /// nothing else is writing to.
    pub unsafe fn realloc(
        &mut self,
        allocation: Allocation,
        new_size: usize,
    ) -> Result<Allocation, Allocation> {
        let Some(node) = self.node_of(&allocation) else {
            return Err(allocation);
        };

        let Some(needed) = self.size_for(new_size) else {
            return Err(allocation);
        };

        let current = allocation.size();

        if needed <= current {
            self.shrink_in_place(node, needed);
            trace!("heap realloc {current} -> {needed} bytes, shrunk in place");
            return Ok(self.allocation(node));
        }

        if self.grow_in_place(node, needed) {
            trace!("heap realloc {current} -> {needed} bytes, grown in place");
            return Ok(self.allocation(node));
        }

        let Some(moved) = self.alloc(new_size) else {
            return Err(allocation);
        };

        ptr::copy_nonoverlapping(allocation.as_ptr().as_ptr(), moved.as_ptr().as_ptr(), current);

        trace!(
            "heap realloc {current} -> {needed} bytes, moved from {:?} to {:?}",
            allocation.as_ptr(),
            moved.as_ptr()
        );

        self.free(allocation);

        Ok(moved)
    }
}
