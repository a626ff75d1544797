use std::error::Error;

use slabloc::{MemoryProvider, Reservation, StackAllocator, SystemMemory};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let memory = SystemMemory::new();
    println!(
        "Page size is {} bytes, allocation granularity {} bytes.",
        memory.page_size(),
        memory.allocation_granularity()
    );

    let mut reservation = Reservation::acquire(&memory, 1 << 20, 64 << 10)?;
    println!(
        "Reserved {} bytes at {:?}, {} slabs of {} bytes.",
        reservation.total_size(),
        reservation.base(),
        reservation.slab_count(),
        reservation.slab_size()
    );

    let mut arenas = Vec::new();
    while let Some(arena) = reservation.commit_slab()? {
        arenas.push(arena);
    }
    println!("Committed {} arenas, nothing left:", arenas.len());
    for arena in &arenas {
        println!("  {:?}", arena.region());
    }

    let first = arenas.remove(0);
    reservation.decommit_slab(first).map_err(|err| err.source)?;
    println!("Decommitted the first one, {} slab free again.", reservation.slabs_free());

    let arena = reservation.commit_slab()?.ok_or("no free slab")?;
    let mut stack = StackAllocator::from(arena);

    let a = stack.push(100, 16).ok_or("stack is full")?;
    let b = stack.push(200, 16).ok_or("stack is full")?;
    println!("Stack pushes at {a:?} and {b:?}, position {}.", stack.position());

    stack.pull(200, 16);
    stack.pull(100, 16);
    println!("Pulled both, position {}.", stack.position());

    let arena = stack.into_arena().ok_or("stack was built over an arena")?;
    reservation.decommit_slab(arena).map_err(|err| err.source)?;
    println!("Decommitted the stack's arena, {} slab free.", reservation.slabs_free());

    reservation.release()?;
    println!("Released everything.");

    Ok(())
}
