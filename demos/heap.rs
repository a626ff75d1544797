use std::error::Error;

use slabloc::{HeapAllocator, Reservation, SystemMemory};

fn print_heap(heap: &HeapAllocator) {
    let stats = heap.stats();
    println!(
        "  {} bytes used in {} nodes, {} bytes free in {} nodes, largest free {}",
        stats.size_used, stats.nodes_used, stats.size_free, stats.nodes_free, stats.largest_free
    );
    for range in heap.free_ranges() {
        println!("    free {range:?}");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let memory = SystemMemory::new();
    let mut reservation = Reservation::acquire(&memory, 64 << 10, 64 << 10)?;
    let arena = reservation.commit_slab()?.ok_or("no free slab")?;

    let mut heap = HeapAllocator::new(arena.region(), 16)?;
    println!("Heap over {:?}:", heap.region());
    print_heap(&heap);

    let a = heap.alloc(100).ok_or("out of memory")?;
    let b = heap.alloc(1000).ok_or("out of memory")?;
    let c = heap.alloc(10).ok_or("out of memory")?;
    println!("Allocated {a:?}, {b:?} and {c:?}:");
    print_heap(&heap);

    heap.free(b);
    println!("Freed the middle one, notice the hole:");
    print_heap(&heap);

    let a = unsafe { heap.realloc(a, 500) }.map_err(|_| "realloc failed")?;
    println!("Grew the first one in place into the hole, now {a:?}:");
    print_heap(&heap);

    heap.free(a);
    heap.free(c);
    println!("Freed everything, all nodes merged back:");
    print_heap(&heap);

    Ok(())
}
