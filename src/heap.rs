use std::{fmt, ptr::NonNull};

use log::trace;

use crate::{
    align,
    error::InitError,
    handle::{Generation, OwnerId},
    list::{Linked, LinkedList, Links, NodeId},
    region::MemoryRegion,
};

/// Region bases are aligned to the granularity, but never to more than a
/// page.
pub const MAX_NODE_ALIGNMENT: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeState {
    Free,
    Used,
    /// Side table entry not describing any range, waiting to be reused.
    Vacant,
}

/// Side table entry describing one range of the region. Offsets are relative
/// to the region base.
#[derive(Clone, Copy, Debug)]
struct Node {
    offset: usize,
    size: usize,
    links: Links,
    state: NodeState,
    /// Bumped every time the node is handed out. Kept across vacancy so a
    /// reused entry never repeats an old value.
    generation: Generation,
}

impl Node {
    fn end(&self) -> usize {
        self.offset + self.size
    }
}

impl Linked for Node {
    fn links(&self) -> &Links {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}

/// Memory handed out by [`HeapAllocator::alloc`]. Move-only, giving it back
/// with [`HeapAllocator::free`] consumes it. Freeing the same memory through
/// [`HeapAllocator::free_ptr`] makes the handle stale: the heap refuses it
/// afterwards, even once the same range is allocated again.
#[must_use = "dropping an allocation leaks it until the heap is rebuilt"]
pub struct Allocation {
    pointer: NonNull<u8>,
    size: usize,
    node: NodeId,
    owner: OwnerId,
    generation: Generation,
}

impl Allocation {
    /// First byte of the allocation, aligned to the heap granularity.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.pointer
    }

    /// Usable bytes. At least what was requested, usually more because of
    /// rounding.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Allocation(#{} at {:?}, {} bytes)", self.node, self.pointer, self.size)
    }
}

/// Accounting snapshot of a [`HeapAllocator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub size_free: usize,
    pub size_used: usize,
    pub nodes_free: usize,
    pub nodes_used: usize,
    /// Biggest allocation that would succeed right now, in bytes.
    pub largest_free: usize,
}

/// General purpose allocator for variable sized requests over one region.
///
/// The region is tiled by nodes, every byte belongs to exactly one of them.
/// Nodes live in a side table, so the managed memory holds nothing but user
/// data. Free nodes are linked in address order, used nodes in whatever
/// order they were allocated:
///
/// ```text
///                 +------+----------+------+----------------+------+
///   region:       |  A   |    B     |  C   |       D        |  E   |
///                 +------+----------+------+----------------+------+
///                  used     free     used        free         used
///
///   free list:    B <-> D
///   used list:    E <-> A <-> C
/// ```
///
/// Allocation is first fit over the free list. When the chosen node is
/// bigger than needed it's split and the remainder stays in the free list,
/// right where the original node was:
///
/// ```text
///   +----------------------+            +--------+-------------+
///   |      D, 256 free     |    ==>     | D, 64  |  D', 192    |
///   +----------------------+            +--------+-------------+
///                                          used       free
/// ```
///
/// Freeing does the inverse. The node goes back to the free list in address
/// order and is merged with its neighbours when they are free and touch it,
/// so two free nodes are never adjacent:
///
/// ```text
///   +--------+--------+--------+            +--------------------------+
///   | B free | C used | D free |    ==>     |         B, free          |
///   +--------+--------+--------+            +--------------------------+
///              free(C)
/// ```
pub struct HeapAllocator {
    id: OwnerId,
    region: MemoryRegion,
    granularity: usize,
    nodes: Vec<Node>,
    /// Side table entries that can be reused.
    vacant: Vec<NodeId>,
    free: LinkedList,
    used: LinkedList,
}

impl HeapAllocator {
    /// Builds a heap over `region`. The granularity is rounded up to a power
    /// of two and every allocation size is a multiple of it. Trailing bytes
    /// that don't make a full granularity unit are never used.
    ///
    /// Fails if the granularity is zero or overflows, if the region can't
    /// hold a single unit, or if the region base isn't aligned to
    /// `min(granularity, MAX_NODE_ALIGNMENT)`.
    pub fn new(region: MemoryRegion, granularity: usize) -> Result<Self, InitError> {
        if granularity == 0 {
            return Err(InitError::ZeroSize { what: "heap granularity" });
        }

        let granularity =
            align::align_pow2(granularity).ok_or(InitError::Overflow { what: "heap granularity" })?;

        let alignment = granularity.min(MAX_NODE_ALIGNMENT);
        if !align::is_aligned(region.address(), alignment) {
            return Err(InitError::Misaligned {
                address: region.address(),
                alignment,
            });
        }

        let size = align::align_down(region.size(), granularity);
        if size == 0 {
            return Err(InitError::RegionTooSmall {
                size: region.size(),
                required: granularity,
            });
        }

        let region = region.slice(0, size);

        let mut nodes = vec![Node {
            offset: 0,
            size,
            links: Links::default(),
            state: NodeState::Free,
            generation: 0,
        }];
        let mut free = LinkedList::new();
        free.push_back(&mut nodes, 0);

        trace!("heap over {region:?} with granularity {granularity}");

        Ok(Self {
            id: OwnerId::next(),
            region,
            granularity,
            nodes,
            vacant: Vec::new(),
            free,
            used: LinkedList::new(),
        })
    }

    /// Number of bytes a request of `size` bytes actually takes: at least one
    /// granularity unit, a multiple of the granularity and, past one unit, a
    /// power of two. `None` on overflow.
    pub fn size_for(&self, size: usize) -> Option<usize> {
        let size = align::align_up(size.max(1), self.granularity)?;

        if size > self.granularity {
            align::align_pow2(size)
        } else {
            Some(size)
        }
    }

    /// First fit allocation. `None` if no free node is big enough.
    pub fn alloc(&mut self, size: usize) -> Option<Allocation> {
        let needed = self.size_for(size)?;

        let node = self
            .free
            .iter(&self.nodes)
            .find(|&id| self.nodes[id].size >= needed)?;

        self.split(node, needed);

        self.free.remove(&mut self.nodes, node);
        self.used.push_front(&mut self.nodes, node);
        self.nodes[node].state = NodeState::Used;
        self.nodes[node].generation = self.nodes[node].generation.wrapping_add(1);

        trace!("heap alloc {size} bytes, using {needed} at offset {}", self.nodes[node].offset);

        Some(self.allocation(node))
    }

    /// Gives memory back. Returns `false` and changes nothing if `allocation`
    /// doesn't come from this heap or was already released with
    /// [`HeapAllocator::free_ptr`].
    pub fn free(&mut self, allocation: Allocation) -> bool {
        match self.node_of(&allocation) {
            Some(node) => {
                self.release(node);
                true
            }
            None => false,
        }
    }

    /// Same as [`HeapAllocator::free`] for callers that only kept the pointer.
    /// Returns `false` if `pointer` isn't the start of a used node.
    pub fn free_ptr(&mut self, pointer: NonNull<u8>) -> bool {
        let Some(offset) = self.region.offset_of(pointer.as_ptr() as usize) else {
            return false;
        };

        let node = self
            .used
            .iter(&self.nodes)
            .find(|&id| self.nodes[id].offset == offset);

        match node {
            Some(node) => {
                self.release(node);
                true
            }
            None => false,
        }
    }

    /// Whether `allocation` belongs to this heap and its memory hasn't been
    /// released since.
    pub fn owns(&self, allocation: &Allocation) -> bool {
        self.node_of(allocation).is_some()
    }

    /// Side table entry of a live allocation of this heap.
    pub(crate) fn node_of(&self, allocation: &Allocation) -> Option<NodeId> {
        if allocation.owner != self.id {
            return None;
        }

        let node = self.nodes.get(allocation.node)?;

        (node.state == NodeState::Used && node.generation == allocation.generation)
            .then_some(allocation.node)
    }

    /// Handle for a used node.
    pub(crate) fn allocation(&self, node: NodeId) -> Allocation {
        let Node {
            offset,
            size,
            generation,
            ..
        } = self.nodes[node];

        Allocation {
            pointer: self.region.pointer_at(offset),
            size,
            node,
            owner: self.id,
            generation,
        }
    }

    /// Moves a used node to the free list and merges it with free neighbours.
    fn release(&mut self, node: NodeId) {
        debug_assert_eq!(self.nodes[node].state, NodeState::Used);

        trace!(
            "heap free {} bytes at offset {}",
            self.nodes[node].size,
            self.nodes[node].offset
        );

        self.used.remove(&mut self.nodes, node);
        self.nodes[node].state = NodeState::Free;
        self.insert_free(node);
        self.merge(node);
    }

    /// Links a free node into the free list keeping address order.
    fn insert_free(&mut self, node: NodeId) {
        let offset = self.nodes[node].offset;

        let successor = self
            .free
            .iter(&self.nodes)
            .find(|&id| self.nodes[id].offset > offset);

        match successor {
            Some(successor) => self.free.insert_before(&mut self.nodes, successor, node),
            None => self.free.push_back(&mut self.nodes, node),
        }
    }

    /// Shrinks free node `node` to `size` bytes if it's bigger. The remainder
    /// becomes a new free node linked right after it, so address order holds.
    fn split(&mut self, node: NodeId, size: usize) {
        let Node { offset, size: current, .. } = self.nodes[node];
        debug_assert!(current >= size);

        if current == size {
            return;
        }

        let remainder = self.new_node(offset + size, current - size, NodeState::Free);
        self.free.insert_after(&mut self.nodes, node, remainder);
        self.nodes[node].size = size;

        trace!("heap split node at offset {offset}: {size} + {}", current - size);
    }

    /// Merges free node `node` with the free nodes right before and right
    /// after it, if they touch it. Returns the node that now covers `node`.
    pub(crate) fn merge(&mut self, mut node: NodeId) -> NodeId {
        if let Some(next) = self.nodes[node].links.next {
            if self.nodes[node].end() == self.nodes[next].offset {
                self.merge_next(node);
            }
        }

        if let Some(prev) = self.nodes[node].links.prev {
            if self.nodes[prev].end() == self.nodes[node].offset {
                self.merge_next(prev);
                node = prev;
            }
        }

        node
    }

    /// Absorbs the free list successor of `node` into `node`. Both must be
    /// free and adjacent.
    fn merge_next(&mut self, node: NodeId) {
        let Some(next) = self.nodes[node].links.next else {
            return;
        };
        debug_assert_eq!(self.nodes[node].end(), self.nodes[next].offset);

        self.nodes[node].size += self.nodes[next].size;
        self.free.remove(&mut self.nodes, next);
        self.vacate(next);
    }

    /// Shrinks used node `node` to `size` bytes, giving the tail back to the
    /// free list.
    pub(crate) fn shrink_in_place(&mut self, node: NodeId, size: usize) {
        let Node { offset, size: current, .. } = self.nodes[node];
        debug_assert_eq!(self.nodes[node].state, NodeState::Used);
        debug_assert!(current >= size);

        if current == size {
            return;
        }

        let tail = self.new_node(offset + size, current - size, NodeState::Free);
        self.nodes[node].size = size;
        self.insert_free(tail);
        self.merge(tail);
    }

    /// Grows used node `node` to `size` bytes by taking bytes from the free
    /// node right after it. Returns `false` and changes nothing if there's no
    /// such node or it's too small.
    pub(crate) fn grow_in_place(&mut self, node: NodeId, size: usize) -> bool {
        let Node { size: current, .. } = self.nodes[node];
        let end = self.nodes[node].end();
        debug_assert_eq!(self.nodes[node].state, NodeState::Used);
        debug_assert!(size > current);

        let extra = size - current;

        let next = self
            .free
            .iter(&self.nodes)
            .take_while(|&id| self.nodes[id].offset <= end)
            .find(|&id| self.nodes[id].offset == end);

        let Some(next) = next else {
            return false;
        };

        if self.nodes[next].size < extra {
            return false;
        }

        if self.nodes[next].size == extra {
            self.free.remove(&mut self.nodes, next);
            self.vacate(next);
        } else {
            // Still the same position in the free list, order holds.
            self.nodes[next].offset += extra;
            self.nodes[next].size -= extra;
        }

        self.nodes[node].size = size;
        true
    }

    fn new_node(&mut self, offset: usize, size: usize, state: NodeState) -> NodeId {
        let mut node = Node {
            offset,
            size,
            links: Links::default(),
            state,
            generation: 0,
        };

        match self.vacant.pop() {
            Some(id) => {
                node.generation = self.nodes[id].generation;
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn vacate(&mut self, node: NodeId) {
        self.nodes[node].state = NodeState::Vacant;
        self.nodes[node].size = 0;
        self.vacant.push(node);
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// Managed region. Might be shorter than the region given to
    /// [`HeapAllocator::new`] if its size wasn't a granularity multiple.
    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    pub fn size_free(&self) -> usize {
        self.free.iter(&self.nodes).map(|id| self.nodes[id].size).sum()
    }

    pub fn size_used(&self) -> usize {
        self.used.iter(&self.nodes).map(|id| self.nodes[id].size).sum()
    }

    pub fn nodes_free(&self) -> usize {
        self.free.iter(&self.nodes).count()
    }

    pub fn nodes_used(&self) -> usize {
        self.used.iter(&self.nodes).count()
    }

    /// Size of the biggest free node, 0 when the heap is full.
    pub fn largest_free(&self) -> usize {
        self.free
            .iter(&self.nodes)
            .map(|id| self.nodes[id].size)
            .max()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            size_free: self.size_free(),
            size_used: self.size_used(),
            nodes_free: self.nodes_free(),
            nodes_used: self.nodes_used(),
            largest_free: self.largest_free(),
        }
    }

    /// Free ranges in address order.
    pub fn free_ranges(&self) -> impl Iterator<Item = MemoryRegion> + '_ {
        self.free
            .iter(&self.nodes)
            .map(|id| self.region.slice(self.nodes[id].offset, self.nodes[id].size))
    }

    /// Used ranges, most recently allocated first.
    pub fn used_ranges(&self) -> impl Iterator<Item = MemoryRegion> + '_ {
        self.used
            .iter(&self.nodes)
            .map(|id| self.region.slice(self.nodes[id].offset, self.nodes[id].size))
    }
}

impl fmt::Debug for HeapAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("region", &self.region)
            .field("granularity", &self.granularity)
            .field("nodes_free", &self.free.len())
            .field("nodes_used", &self.used.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{platform::MockMemory, reservation::Reservation};

    /// Runs `test` with a page aligned region of `size` bytes.
    pub(crate) fn with_region(size: usize, test: impl FnOnce(MemoryRegion)) {
        let memory = MockMemory::new();
        let mut reservation = Reservation::acquire(&memory, size, size).unwrap();
        let arena = reservation.commit_slab().unwrap().unwrap();
        test(arena.region().slice(0, size));
    }

    /// Free and used nodes cover the region with no gaps and no overlap, and
    /// no two free nodes touch.
    pub(crate) fn assert_tiling(heap: &HeapAllocator) {
        let mut ranges: Vec<(usize, usize, bool)> = heap
            .free_ranges()
            .map(|r| (r.address(), r.size(), true))
            .chain(heap.used_ranges().map(|r| (r.address(), r.size(), false)))
            .collect();
        ranges.sort();

        let mut expected = heap.region().address();
        let mut previous_free = false;
        for (address, size, free) in ranges {
            assert_eq!(address, expected, "gap or overlap in {heap:?}");
            assert!(!(free && previous_free), "adjacent free nodes in {heap:?}");
            expected += size;
            previous_free = free;
        }
        assert_eq!(expected, heap.region().end());

        let free: Vec<usize> = heap.free_ranges().map(|r| r.address()).collect();
        assert!(free.windows(2).all(|w| w[0] < w[1]), "free list out of order");
    }

    #[test]
    fn size_rounding() {
        with_region(4096, |region| {
            let heap = HeapAllocator::new(region, 16).unwrap();
            assert_eq!(heap.size_for(0), Some(16));
            assert_eq!(heap.size_for(1), Some(16));
            assert_eq!(heap.size_for(16), Some(16));
            assert_eq!(heap.size_for(17), Some(32));
            assert_eq!(heap.size_for(100), Some(128));
            assert_eq!(heap.size_for(usize::MAX), None);
        });
    }

    #[test]
    fn free_in_any_order_coalesces_everything() {
        with_region(4096, |region| {
            let mut heap = HeapAllocator::new(region, 16).unwrap();

            let a = heap.alloc(100).unwrap();
            let b = heap.alloc(100).unwrap();
            let c = heap.alloc(100).unwrap();
            assert_eq!(heap.nodes_used(), 3);
            assert_eq!(heap.nodes_free(), 1);
            assert_tiling(&heap);

            assert!(heap.free(b));
            assert_eq!(heap.nodes_free(), 2);
            assert_tiling(&heap);

            assert!(heap.free(a));
            assert_eq!(heap.nodes_free(), 2);
            assert_tiling(&heap);

            assert!(heap.free(c));
            assert_eq!(
                heap.stats(),
                HeapStats {
                    size_free: 4096,
                    size_used: 0,
                    nodes_free: 1,
                    nodes_used: 0,
                    largest_free: 4096,
                }
            );
        });
    }

    #[test]
    fn first_fit_reuses_holes() {
        with_region(4096, |region| {
            let mut heap = HeapAllocator::new(region, 16).unwrap();

            let a = heap.alloc(64).unwrap();
            let b = heap.alloc(256).unwrap();
            let _c = heap.alloc(64).unwrap();
            let hole = b.as_ptr();
            assert!(heap.free(b));

            // Fits in the hole left by `b`, split from its start.
            let d = heap.alloc(32).unwrap();
            assert_eq!(d.as_ptr(), hole);
            let e = heap.alloc(128).unwrap();
            assert_eq!(e.as_ptr().as_ptr() as usize, hole.as_ptr() as usize + 32);
            assert_tiling(&heap);

            // Too big for what's left of the hole, goes after `c`.
            let f = heap.alloc(512).unwrap();
            assert_eq!(f.as_ptr().as_ptr() as usize, a.as_ptr().as_ptr() as usize + 64 + 256 + 64);
            assert_tiling(&heap);
        });
    }

    #[test]
    fn exhaustion_and_whole_region() {
        with_region(4096, |region| {
            let mut heap = HeapAllocator::new(region, 64).unwrap();

            assert!(heap.alloc(4097).is_none());
            let all = heap.alloc(4096).unwrap();
            assert_eq!(all.as_ptr(), region.base());
            assert_eq!(heap.largest_free(), 0);
            assert!(heap.alloc(1).is_none());

            assert!(heap.free(all));
            assert_eq!(heap.largest_free(), 4096);
        });
    }

    #[test]
    fn foreign_and_stale_pointers_are_rejected() {
        with_region(4096, |region| {
            let mut first = HeapAllocator::new(region.slice(0, 2048), 16).unwrap();
            let mut second = HeapAllocator::new(region.slice(2048, 2048), 16).unwrap();

            let allocation = first.alloc(16).unwrap();
            let pointer = allocation.as_ptr();
            assert!(!second.owns(&allocation));
            assert!(!second.free(allocation));
            assert_eq!(first.nodes_used(), 1);

            assert!(!first.free_ptr(region.pointer_at(8)));
            assert!(first.free_ptr(pointer));
            assert!(!first.free_ptr(pointer));
            assert_eq!(first.size_free(), 2048);
        });
    }

    #[test]
    fn memory_released_by_pointer_invalidates_the_handle() {
        with_region(4096, |region| {
            let mut heap = HeapAllocator::new(region, 16).unwrap();

            let stale = heap.alloc(64).unwrap();
            assert!(heap.free_ptr(stale.as_ptr()));

            let live = heap.alloc(64).unwrap();
            assert_eq!(live.as_ptr(), stale.as_ptr());
            assert!(!heap.owns(&stale));
            assert!(!heap.free(stale));

            // `live` is still allocated and nothing else can land on it.
            assert!(heap.owns(&live));
            assert_eq!(heap.nodes_used(), 1);
            let other = heap.alloc(64).unwrap();
            assert_ne!(other.as_ptr(), live.as_ptr());
            assert_tiling(&heap);
        });
    }

    #[test]
    fn stale_handle_survives_node_reuse() {
        with_region(4096, |region| {
            let mut heap = HeapAllocator::new(region, 16).unwrap();

            let a = heap.alloc(16).unwrap();
            let stale = heap.alloc(16).unwrap();
            assert!(heap.free_ptr(stale.as_ptr()));
            assert!(heap.free(a));

            // Both merges vacated side table entries, these allocations reuse them.
            let _first = heap.alloc(16).unwrap();
            let _second = heap.alloc(16).unwrap();
            let _third = heap.alloc(16).unwrap();
            assert!(!heap.owns(&stale));
        });
    }

    #[test]
    fn rebuilt_heap_rejects_old_allocations() {
        with_region(4096, |region| {
            let mut old = HeapAllocator::new(region, 16).unwrap();
            let allocation = old.alloc(32).unwrap();
            drop(old);

            let mut rebuilt = HeapAllocator::new(region, 16).unwrap();
            let fresh = rebuilt.alloc(32).unwrap();
            assert_eq!(fresh.as_ptr(), allocation.as_ptr());
            assert!(!rebuilt.owns(&allocation));
            assert!(!rebuilt.free(allocation));
            assert!(rebuilt.free(fresh));
        });
    }

    #[test]
    fn side_table_entries_are_reused() {
        with_region(4096, |region| {
            let mut heap = HeapAllocator::new(region, 16).unwrap();

            for _ in 0..10 {
                let a = heap.alloc(16).unwrap();
                let b = heap.alloc(16).unwrap();
                assert!(heap.free(a));
                assert!(heap.free(b));
            }

            assert!(heap.nodes.len() <= 3);
            assert_tiling(&heap);
        });
    }

    #[test]
    fn construction_errors() {
        with_region(4096, |region| {
            assert_eq!(
                HeapAllocator::new(region, 0).unwrap_err(),
                InitError::ZeroSize { what: "heap granularity" }
            );
            assert_eq!(
                HeapAllocator::new(region.slice(0, 8), 16).unwrap_err(),
                InitError::RegionTooSmall { size: 8, required: 16 }
            );
            assert!(matches!(
                HeapAllocator::new(region.slice(8, 64), 16),
                Err(InitError::Misaligned { alignment: 16, .. })
            ));

            let trimmed = HeapAllocator::new(region.slice(0, 100), 16).unwrap();
            assert_eq!(trimmed.region().size(), 96);
        });
    }
}
