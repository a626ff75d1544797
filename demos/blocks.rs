use std::error::Error;

use slabloc::{ArenaAllocator, ArenaAllocatorConfig, BlockAllocator, SystemMemory};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let memory = SystemMemory::new();
    let config = ArenaAllocatorConfig::new().arena_size(64 << 10).arena_count(8);
    let mut pool = ArenaAllocator::new(&memory, config)?;

    let (mut arena, stats) = pool.commit()?.ok_or("pool is exhausted")?;
    println!("Arena pool: {stats:?}");

    let region = arena.push_region(1024, 64).ok_or("arena is full")?;
    let mut blocks = BlockAllocator::new(region, 64)?;
    println!("{} slots of {} bytes over {region:?}.", blocks.slot_count(), blocks.slot_size());

    let mut live = Vec::new();
    while let Some(block) = blocks.alloc() {
        live.push(block);
    }
    println!("Allocated {} blocks until the pool ran out:", live.len());
    for block in &live {
        println!("  {block:?}");
    }

    let block = live.swap_remove(3);
    let address = block.as_ptr();
    blocks.free(block);

    let again = blocks.alloc().ok_or("no free slot")?;
    println!("Freed {address:?} and got {:?} back.", again.as_ptr());
    println!("{:?}", blocks.stats());

    let stats = pool.decommit(arena).map_err(|err| err.source)?;
    println!("Arena pool: {stats:?}");

    Ok(())
}
