use std::{fmt, ptr::NonNull};

use log::trace;

use crate::{
    align,
    error::InitError,
    handle::{Generation, OwnerId},
    list::{Linked, LinkedList, Links, NodeId},
    region::MemoryRegion,
};

/// Slot bases are aligned to the slot size, but never to more than a page.
/// Bigger slots only need their base page aligned.
pub const MAX_SLOT_ALIGNMENT: usize = 4096;

/// Side table entry for one slot.
#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    links: Links,
    used: bool,
    generation: Generation,
}

impl Linked for Slot {
    fn links(&self) -> &Links {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}

/// A slot handed out by [`BlockAllocator::alloc`]. Move-only: giving it back
/// with [`BlockAllocator::free`] consumes it, so the same slot can't be freed
/// twice. If the slot is released through [`BlockAllocator::free_ptr`]
/// instead, the handle goes stale and the allocator refuses it from then on,
/// even after the slot is handed out again.
#[must_use = "dropping a block leaks its slot until the allocator is reset"]
pub struct Block {
    pointer: NonNull<u8>,
    size: usize,
    index: NodeId,
    owner: OwnerId,
    generation: Generation,
}

impl Block {
    /// First byte of the slot.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.pointer
    }

    /// Slot size, the number of bytes that can be used.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block(#{} at {:?}, {} bytes)", self.index, self.pointer, self.size)
    }
}

/// Accounting snapshot of a [`BlockAllocator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub size_free: usize,
    pub size_used: usize,
    pub blocks_free: usize,
    pub blocks_used: usize,
}

/// Pool allocator: the region is cut into slots of one power of two size and
/// every allocation takes exactly one slot.
///
/// Slots are tracked by two lists over a side table, one for free slots and
/// one for used slots. A slot is always in exactly one of them:
///
/// ```text
///   region:  +------+------+------+------+------+------+
///            |  s0  |  s1  |  s2  |  s3  |  s4  |  s5  |
///            +------+------+------+------+------+------+
///
///   free:    s1 <-> s4 <-> s5
///   used:    s3 <-> s0 <-> s2
/// ```
///
/// [`BlockAllocator::alloc`] pops the head of the free list and pushes it to
/// the head of the used list, [`BlockAllocator::free`] does the opposite.
/// Both are O(1) and neither touches the slot memory.
pub struct BlockAllocator {
    id: OwnerId,
    region: MemoryRegion,
    slot_size: usize,
    slots: Vec<Slot>,
    free: LinkedList,
    used: LinkedList,
}

impl BlockAllocator {
    /// Splits `region` into as many slots of `slot_size` (rounded up to a
    /// power of two) as fit. Leftover bytes at the end are never used.
    ///
    /// Fails if `slot_size` is zero or overflows, if not even one slot fits,
    /// or if the region base isn't aligned to
    /// `min(slot_size, MAX_SLOT_ALIGNMENT)`.
    pub fn new(region: MemoryRegion, slot_size: usize) -> Result<Self, InitError> {
        if slot_size == 0 {
            return Err(InitError::ZeroSize { what: "slot size" });
        }

        let slot_size = align::align_pow2(slot_size).ok_or(InitError::Overflow { what: "slot size" })?;

        let alignment = slot_size.min(MAX_SLOT_ALIGNMENT);
        if !align::is_aligned(region.address(), alignment) {
            return Err(InitError::Misaligned {
                address: region.address(),
                alignment,
            });
        }

        let slot_count = region.size() / slot_size;
        if slot_count == 0 {
            return Err(InitError::RegionTooSmall {
                size: region.size(),
                required: slot_size,
            });
        }

        let mut slots = vec![Slot::default(); slot_count];
        let mut free = LinkedList::new();
        for index in 0..slot_count {
            free.push_back(&mut slots, index);
        }

        trace!("block allocator over {region:?}: {slot_count} slots of {slot_size} bytes");

        Ok(Self {
            id: OwnerId::next(),
            region,
            slot_size,
            slots,
            free,
            used: LinkedList::new(),
        })
    }

    /// Takes a free slot. `None` when every slot is in use.
    pub fn alloc(&mut self) -> Option<Block> {
        let index = self.free.pop_front(&mut self.slots)?;
        self.used.push_front(&mut self.slots, index);
        let slot = &mut self.slots[index];
        slot.used = true;
        slot.generation = slot.generation.wrapping_add(1);

        Some(Block {
            pointer: self.region.pointer_at(index * self.slot_size),
            size: self.slot_size,
            index,
            owner: self.id,
            generation: slot.generation,
        })
    }

    /// Returns a slot. It becomes the next one [`BlockAllocator::alloc`]
    /// hands out.
    ///
    /// # Panics
    ///
    /// If `block` was allocated by a different allocator, or its slot was
    /// already released with [`BlockAllocator::free_ptr`].
    pub fn free(&mut self, block: Block) {
        assert!(
            self.owns(&block),
            "{block:?} does not belong to block allocator over {:?}",
            self.region
        );

        self.release_slot(block.index);
    }

    /// Returns the slot starting at `pointer`, for callers that only kept the
    /// raw address. Returns `false` and changes nothing if `pointer` isn't the
    /// start of a used slot of this allocator.
    pub fn free_ptr(&mut self, pointer: NonNull<u8>) -> bool {
        let Some(offset) = self.region.offset_of(pointer.as_ptr() as usize) else {
            return false;
        };

        let index = offset / self.slot_size;
        if offset % self.slot_size != 0 || index >= self.slots.len() || !self.slots[index].used {
            return false;
        }

        self.release_slot(index);
        true
    }

    /// Whether `block` was handed out by this allocator and its slot hasn't
    /// been released since.
    pub fn owns(&self, block: &Block) -> bool {
        block.owner == self.id
            && self
                .slots
                .get(block.index)
                .is_some_and(|slot| slot.used && slot.generation == block.generation)
    }

    fn release_slot(&mut self, index: NodeId) {
        debug_assert!(self.slots[index].used);

        self.used.remove(&mut self.slots, index);
        self.free.push_front(&mut self.slots, index);
        self.slots[index].used = false;
    }

    /// Size of every slot, a power of two.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Total number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    /// Free slots, counted by walking the free list.
    pub fn blocks_free(&self) -> usize {
        self.free.iter(&self.slots).count()
    }

    /// Used slots, counted by walking the used list.
    pub fn blocks_used(&self) -> usize {
        self.used.iter(&self.slots).count()
    }

    pub fn size_free(&self) -> usize {
        self.blocks_free() * self.slot_size
    }

    pub fn size_used(&self) -> usize {
        self.blocks_used() * self.slot_size
    }

    pub fn stats(&self) -> BlockStats {
        BlockStats {
            size_free: self.size_free(),
            size_used: self.size_used(),
            blocks_free: self.blocks_free(),
            blocks_used: self.blocks_used(),
        }
    }
}

impl fmt::Debug for BlockAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("region", &self.region)
            .field("slot_size", &self.slot_size)
            .field("slot_count", &self.slots.len())
            .field("blocks_free", &self.free.len())
            .field("blocks_used", &self.used.len())
            .finish()
    }
}
