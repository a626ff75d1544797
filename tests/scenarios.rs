use std::collections::HashSet;

use pretty_assertions::assert_eq;
use slabloc::{
    ArenaAllocator, ArenaAllocatorConfig, BlockAllocator, HeapAllocator, MemoryProvider,
    MockMemory, Reservation, SlabState, StackAllocator, SystemMemory,
};

const KIB: usize = 1 << 10;
const MIB: usize = 1 << 20;

#[test]
fn sixteen_slabs_out_of_one_mebibyte() {
    let memory = MockMemory::new();
    let mut reservation = Reservation::acquire(&memory, MIB, 64 * KIB).unwrap();
    assert_eq!(reservation.slab_count(), 16);

    let mut arenas = Vec::new();
    for _ in 0..16 {
        arenas.push(reservation.commit_slab().unwrap().unwrap());
    }
    assert!(reservation.commit_slab().unwrap().is_none());

    let mut ranges: Vec<(usize, usize)> = arenas
        .iter()
        .map(|arena| (arena.region().address(), arena.region().end()))
        .collect();
    ranges.sort();
    assert!(ranges.windows(2).all(|w| w[0].1 <= w[1].0));

    let arena = arenas.swap_remove(5);
    let start = arena.region().address();
    reservation.decommit_slab(arena).unwrap();
    assert_eq!(reservation.slab_state(5), Some(SlabState::Free));

    let again = reservation.commit_slab().unwrap().unwrap();
    assert_eq!(again.region().address(), start);

    reservation.release().unwrap();
    assert_eq!(memory.reservations(), 0);
}

#[test]
fn arena_push_and_save_points() {
    let memory = MockMemory::with_page_size(1024, 1024);
    let mut reservation = Reservation::acquire(&memory, 1024, 1024).unwrap();
    let mut arena = reservation.commit_slab().unwrap().unwrap();
    assert_eq!(arena.capacity(), 1024);

    let first = arena.push(600, 1).unwrap();
    assert_eq!(first, arena.region().base());
    assert!(arena.push(500, 1).is_none());
    assert_eq!(arena.position(), 600);

    arena.reset();
    arena.push(200, 4).unwrap();
    arena.save();
    arena.push(300, 4).unwrap();
    assert_eq!(arena.position(), 500);
    arena.roll_back();
    assert_eq!(arena.position(), 200);
}

#[test]
fn heap_coalesces_whatever_the_free_order() {
    let memory = MockMemory::new();
    let mut reservation = Reservation::acquire(&memory, 4096, 4096).unwrap();
    let arena = reservation.commit_slab().unwrap().unwrap();
    let mut heap = HeapAllocator::new(arena.region(), 16).unwrap();
    let capacity = heap.size_free();

    let a = heap.alloc(256).unwrap();
    let b = heap.alloc(256).unwrap();
    let c = heap.alloc(256).unwrap();

    assert!(heap.free(b));
    assert!(heap.free(a));
    assert!(heap.free(c));

    let free: Vec<_> = heap.free_ranges().collect();
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].size(), capacity);
    assert_eq!(capacity, 4096);
}

#[test]
fn block_pool_of_four() {
    let memory = MockMemory::new();
    let mut reservation = Reservation::acquire(&memory, 4096, 4096).unwrap();
    let mut arena = reservation.commit_slab().unwrap().unwrap();
    let region = arena.push_region(256, 64).unwrap();
    let mut blocks = BlockAllocator::new(region, 64).unwrap();

    let mut handed_out: Vec<_> = (0..4).map(|_| blocks.alloc().unwrap()).collect();
    let distinct: HashSet<_> = handed_out.iter().map(|block| block.as_ptr()).collect();
    assert_eq!(distinct.len(), 4);
    assert!(blocks.alloc().is_none());

    let block = handed_out.pop().unwrap();
    let freed = block.as_ptr();
    blocks.free(block);
    assert_eq!(blocks.alloc().unwrap().as_ptr(), freed);
}

#[test]
fn allocators_stacked_on_one_pool() {
    let memory = MockMemory::new();
    let config = ArenaAllocatorConfig::new().arena_size(64 * KIB).arena_count(4);
    let mut pool = ArenaAllocator::new(&memory, config).unwrap();

    let (mut scratch, _) = pool.commit().unwrap().unwrap();
    let (mut general, stats) = pool.commit().unwrap().unwrap();
    assert_eq!(stats.arenas_used, 2);

    let mut stack = StackAllocator::from_arena(&mut scratch, 8 * KIB, 16).unwrap();
    let heap_region = general.push_region(32 * KIB, 4096).unwrap();
    let blocks_region = general.push_region(16 * KIB, 4096).unwrap();

    let mut heap = HeapAllocator::new(heap_region, 32).unwrap();
    let mut blocks = BlockAllocator::new(blocks_region, 128).unwrap();

    let frame = stack.push(100, 16).unwrap();
    let allocation = heap.alloc(1000).unwrap();
    let block = blocks.alloc().unwrap();

    // Everything handed out is real, writable memory.
    unsafe {
        frame.as_ptr().write_bytes(1, 100);
        allocation.as_ptr().as_ptr().write_bytes(2, allocation.size());
        block.as_ptr().as_ptr().write_bytes(3, block.size());
    }

    assert!(stack.pull(100, 16));
    assert!(heap.free(allocation));
    blocks.free(block);

    pool.decommit(scratch).unwrap();
    let stats = pool.decommit(general).unwrap();
    assert_eq!(stats.arenas_used, 0);
    assert_eq!(memory.committed_pages(), 0);
}

#[cfg(any(unix, windows))]
#[test]
fn system_memory_round_trip() {
    let memory = SystemMemory::new();
    let page_size = memory.page_size();

    let mut reservation = Reservation::acquire(&memory, 4 * page_size, page_size).unwrap();
    let mut arena = reservation.commit_slab().unwrap().unwrap();
    assert!(memory.is_committed(arena.region().base()));

    let region = arena.push_region(page_size, 16).unwrap();
    let mut heap = HeapAllocator::new(region, 16).unwrap();
    let allocation = heap.alloc(64).unwrap();
    unsafe {
        allocation.as_ptr().as_ptr().write_bytes(0xAB, 64);
        assert_eq!(*allocation.as_ptr().as_ptr().add(63), 0xAB);
    }
    assert!(heap.free(allocation));

    let base = arena.region().base();
    reservation.decommit_slab(arena).unwrap();
    assert!(!memory.is_committed(base));
    assert!(memory.is_reserved(base));

    reservation.release().unwrap();
    assert!(!memory.is_reserved(base));
}
