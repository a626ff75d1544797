use std::ptr::NonNull;

use log::trace;

use crate::{arena::Arena, bump::Cursor, region::MemoryRegion};

/// LIFO allocator over one committed region. Pushes work exactly like
/// [`Arena::push`], but allocations can also be popped one at a time with
/// [`StackAllocator::pull`], as long as it happens in reverse order:
///
/// ```text
///   push(a) push(b) push(c)      pull(c)             pull(b)
///
///   +---+-----+---+               +---+-----+          +---+
///   | a |  b  | c |       ==>     | a |  b  |   ==>    | a |
///   +---+-----+---+               +---+-----+          +---+
/// ```
///
/// Useful for variable length scratch buffers with nested lifetimes. Pulls
/// are not checked against pushes: pulling a size that was never pushed
/// simply moves the position back by that much.
#[derive(Debug)]
pub struct StackAllocator {
    region: MemoryRegion,
    cursor: Cursor,
    /// Arena this stack was built from with [`From<Arena>`], kept so it can
    /// be decommitted later.
    arena: Option<Arena>,
}

impl StackAllocator {
    /// Builds an empty stack over `region`.
    pub fn new(region: MemoryRegion) -> Self {
        Self {
            region,
            cursor: Cursor::new(region.size()),
            arena: None,
        }
    }

    /// Carves `size` bytes aligned to `alignment` out of `arena` and builds a
    /// stack over them. `None` if the arena doesn't have enough room.
    pub fn from_arena(arena: &mut Arena, size: usize, alignment: usize) -> Option<Self> {
        arena.push_region(size, alignment).map(Self::new)
    }

    /// See [`Arena::push`].
    pub fn push(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        let offset = self.cursor.push(size, alignment)?;
        trace!("stack push {size} bytes (align {alignment}) at offset {offset}");

        Some(self.region.pointer_at(offset))
    }

    /// Pops the last allocation. `size` and `alignment` must be the values it
    /// was pushed with so that the same aligned size is given back. Returns
    /// `false` and changes nothing if more bytes are pulled than are in use.
    ///
    /// If the position drops below the save point, the save point is reset to
    /// the start: whatever it marked has been popped already.
    pub fn pull(&mut self, size: usize, alignment: usize) -> bool {
        let pulled = self.cursor.pull(size, alignment);
        trace!("stack pull {size} bytes (align {alignment}): {pulled}");

        pulled
    }

    /// See [`Arena::save`].
    pub fn save(&mut self) {
        self.cursor.save();
    }

    /// See [`Arena::roll_back`].
    pub fn roll_back(&mut self) {
        self.cursor.roll_back();
    }

    /// See [`Arena::reset`].
    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    pub fn capacity(&self) -> usize {
        self.cursor.capacity()
    }

    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    pub fn saved(&self) -> usize {
        self.cursor.saved()
    }

    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    /// Gives back the arena the stack was built from, so its slab can be
    /// decommitted. `None` for stacks built with [`StackAllocator::new`] or
    /// [`StackAllocator::from_arena`].
    pub fn into_arena(self) -> Option<Arena> {
        self.arena
    }
}

impl From<Arena> for StackAllocator {
    /// Turns a whole arena into a stack. Anything already pushed to the arena
    /// is forgotten. The arena itself is kept, see
    /// [`StackAllocator::into_arena`].
    fn from(arena: Arena) -> Self {
        let mut stack = Self::new(arena.region());
        stack.arena = Some(arena);
        stack
    }
}
