//! Allocators layered on top of virtual memory pages.
//!
//! Everything starts with a [`Reservation`]: a range of address space that
//! the OS has set aside but not backed with physical memory. The reservation
//! is cut into equally sized slabs, and each slab can be committed on its own,
//! which turns it into an [`Arena`]:
//!
//! ```text
//!   Reservation (reserved, not accessible)
//!   +----------+----------+----------+----------+----------+
//!   |  slab 0  |  slab 1  |  slab 2  |  slab 3  |  slab 4  |
//!   +----------+----------+----------+----------+----------+
//!    committed    free     committed    free       free
//!        |                     |
//!        v                     v
//!      Arena                 Arena
//! ```
//!
//! Arenas are bump allocators. Memory carved out of an arena with
//! [`Arena::push_region`], or a whole arena, can then be handed to one of the
//! more specialized allocators:
//!
//! - [`StackAllocator`]: bump allocation that can also be popped in LIFO
//!   order.
//! - [`BlockAllocator`]: fixed size slots, O(1) alloc and free.
//! - [`HeapAllocator`]: variable sized allocations, first fit with splitting
//!   and coalescing.
//!
//! None of the allocators write bookkeeping into the memory they manage, it
//! all lives in side tables. The OS is reached through a [`MemoryProvider`],
//! either [`SystemMemory`] (mmap or VirtualAlloc) or [`MockMemory`] for tests.
//! Providers are passed around explicitly, there's no global state.
//!
//! ```rust
//! use slabloc::{HeapAllocator, MockMemory, Reservation};
//!
//! let memory = MockMemory::new();
//! let mut reservation = Reservation::acquire(&memory, 1 << 20, 64 << 10)?;
//!
//! let mut arena = reservation.commit_slab()?.expect("reservation is empty");
//! let region = arena.push_region(16 << 10, 4096).expect("arena is big enough");
//!
//! let mut heap = HeapAllocator::new(region, 16)?;
//! let allocation = heap.alloc(100).expect("heap is empty");
//! assert_eq!(allocation.size(), 128);
//! assert!(heap.free(allocation));
//!
//! reservation.decommit_slab(arena).map_err(|err| err.source)?;
//! reservation.release()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod align;
mod arena;
mod arena_allocator;
mod block;
mod bump;
pub mod config;
mod error;
mod handle;
mod heap;
mod list;
mod platform;
mod realloc;
mod region;
mod reservation;
mod stack;

pub use arena::Arena;
pub use arena_allocator::{ArenaAllocator, ArenaStats};
pub use block::{Block, BlockAllocator, BlockStats, MAX_SLOT_ALIGNMENT};
pub use config::{ArenaAllocatorConfig, ReservationConfig};
pub use error::{Error, InitError, OsError, Result};
pub use heap::{Allocation, HeapAllocator, HeapStats, MAX_NODE_ALIGNMENT};
pub use platform::{MemoryProvider, MockMemory, SystemMemory};
pub use region::MemoryRegion;
pub use reservation::{DecommitError, Reservation, SlabState};
pub use stack::StackAllocator;
