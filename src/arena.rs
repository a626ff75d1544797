use std::ptr::NonNull;

use log::trace;

use crate::{bump::Cursor, handle::OwnerId, region::MemoryRegion};

/// Identifies the reservation slab an [`Arena`] was committed from, so that
/// the reservation can refuse arenas that aren't its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SlabTag {
    /// Owning reservation.
    pub reservation: OwnerId,
    /// Index of the slab inside the reservation.
    pub index: usize,
}

/// Linear (bump) allocator over one committed region, usually a whole slab
/// of a [`crate::Reservation`].
///
/// Allocating only moves a position counter forward. Individual allocations
/// can't be freed; instead there's a single save point to roll back to and a
/// [`Arena::reset`] that throws everything away in O(1):
///
/// ```text
///   push(a) push(b)  save()  push(c) push(d)   roll_back()
///
///   +---+----+                +---+----+---+--+       +---+----+
///   | a | b  |                | a | b  | c |d |  ==>  | a | b  |
///   +---+----+                +---+----+---+--+       +---+----+
///            ^ save                    ^ save   ^              ^ position
///                                               position
/// ```
///
/// The metadata (`capacity`, `position`, `save`) lives in this struct, not in
/// the region, so the whole region is usable and the first push lands at
/// offset 0.
///
/// An `Arena` is a move-only handle. Committed arenas go back to their
/// reservation through [`crate::Reservation::decommit_slab`], which consumes
/// the handle, so a decommitted arena can't be used by mistake.
#[derive(Debug)]
#[must_use = "an arena that is never decommitted keeps its slab committed"]
pub struct Arena {
    region: MemoryRegion,
    cursor: Cursor,
    slab: Option<SlabTag>,
}

impl Arena {
    /// Builds an arena over an arbitrary committed region, for example one
    /// carved out of another arena with [`Arena::push_region`]. Such an arena
    /// doesn't belong to any reservation.
    pub fn new(region: MemoryRegion) -> Self {
        Self {
            region,
            cursor: Cursor::new(region.size()),
            slab: None,
        }
    }

    pub(crate) fn for_slab(region: MemoryRegion, slab: SlabTag) -> Self {
        Self {
            slab: Some(slab),
            ..Self::new(region)
        }
    }

    pub(crate) fn slab(&self) -> Option<SlabTag> {
        self.slab
    }

    /// Bumps the position by `size` rounded up to `alignment` and returns the
    /// address where the allocation starts. `alignment` is itself rounded up
    /// to a power of two, `0` counts as `1`.
    ///
    /// Returns `None` without touching anything if the allocation doesn't
    /// fit or the arithmetic overflows.
    ///
    /// The returned pointer is the old position, so it is `alignment`-aligned
    /// as long as the position was. That holds when every push uses the same
    /// alignment, or alignments in non-increasing order, since the region
    /// base is page aligned for arenas that come from a reservation.
    pub fn push(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        let offset = self.cursor.push(size, alignment)?;
        trace!("arena push {size} bytes (align {alignment}) at offset {offset}");

        Some(self.region.pointer_at(offset))
    }

    /// Same as [`Arena::push`] but returns the whole aligned chunk as a
    /// region, ready to back a [`crate::StackAllocator`],
    /// [`crate::BlockAllocator`] or [`crate::HeapAllocator`].
    pub fn push_region(&mut self, size: usize, alignment: usize) -> Option<MemoryRegion> {
        let offset = self.cursor.push(size, alignment)?;
        let size = self.cursor.position() - offset;

        Some(self.region.slice(offset, size))
    }

    /// Remembers the current position. There's only one save slot, saving
    /// again overwrites it.
    pub fn save(&mut self) {
        self.cursor.save();
    }

    /// Moves the position back to the last save point (or to the start if
    /// nothing was saved). Anything pushed since then must not be used
    /// anymore, that's on the caller.
    pub fn roll_back(&mut self) {
        self.cursor.roll_back();
    }

    /// Discards every allocation and the save point. Memory is not zeroed.
    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    /// Usable bytes in total.
    pub fn capacity(&self) -> usize {
        self.cursor.capacity()
    }

    /// Bytes currently allocated.
    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    /// Position recorded by the last [`Arena::save`].
    pub fn saved(&self) -> usize {
        self.cursor.saved()
    }

    /// Bytes that can still be pushed.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// The whole region managed by this arena.
    pub fn region(&self) -> MemoryRegion {
        self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Heap-backed region for tests, aligned to 16 bytes.
    fn with_arena<const N: usize>(test: impl FnOnce(Arena)) {
        let mut backing = vec![0u128; N / 16];
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        let region = unsafe { MemoryRegion::from_raw_parts(base, N) };
        test(Arena::new(region));
    }

    #[test]
    fn push_beyond_capacity_fails_without_mutation() {
        with_arena::<1024>(|mut arena| {
            let base = arena.region().address();

            let first = arena.push(600, 8).unwrap();
            assert_eq!(first.as_ptr() as usize, base);
            assert_eq!(arena.position(), 600);

            assert!(arena.push(500, 8).is_none());
            assert_eq!(arena.position(), 600);
        });
    }

    #[test]
    fn save_and_roll_back() {
        with_arena::<1024>(|mut arena| {
            arena.push(200, 4).unwrap();
            arena.save();
            arena.push(300, 4).unwrap();
            assert_eq!(arena.position(), 500);

            arena.roll_back();
            assert_eq!(arena.position(), 200);
            assert_eq!(arena.saved(), 200);

            // Second save overwrites the first one.
            arena.push(100, 4).unwrap();
            arena.save();
            arena.push(100, 4).unwrap();
            arena.roll_back();
            assert_eq!(arena.position(), 300);

            arena.reset();
            assert_eq!(arena.position(), 0);
            assert_eq!(arena.saved(), 0);
            assert_eq!(arena.remaining(), 1024);
        });
    }

    #[test]
    fn allocations_are_usable_and_disjoint() {
        with_arena::<256>(|mut arena| {
            let a = arena.push(16, 16).unwrap();
            let b = arena.push(16, 16).unwrap();
            assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);

            unsafe {
                a.as_ptr().write_bytes(0xAA, 16);
                b.as_ptr().write_bytes(0xBB, 16);
                assert_eq!(*a.as_ptr().add(15), 0xAA);
                assert_eq!(*b.as_ptr(), 0xBB);
            }
        });
    }

    #[test]
    fn push_region_covers_the_aligned_size() {
        with_arena::<256>(|mut arena| {
            let region = arena.push_region(20, 16).unwrap();
            assert_eq!(region.size(), 32);
            assert_eq!(region.address(), arena.region().address());

            let nested = Arena::new(arena.push_region(64, 16).unwrap());
            assert_eq!(nested.capacity(), 64);
            assert!(nested.slab().is_none());
            assert_eq!(arena.position(), 96);
        });
    }
}
