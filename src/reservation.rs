use std::ptr::NonNull;

use log::{debug, trace, warn};
use thiserror::Error;

use crate::{
    align,
    arena::{Arena, SlabTag},
    config::ReservationConfig,
    error::{InitError, OsError, Result},
    handle::OwnerId,
    platform::MemoryProvider,
    region::MemoryRegion,
};

/// Commit state of one slab.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlabState {
    /// Reserved but not backed by memory. Either never committed or
    /// decommitted, both look the same and both can be committed again.
    Free,
    /// Backed by memory and handed out as an [`Arena`].
    Committed,
}

/// Returned by [`Reservation::decommit_slab`] when the provider refuses to
/// decommit. The slab stays committed and the arena is handed back so the
/// caller can keep using it or try again.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct DecommitError {
    #[source]
    pub source: OsError,
    pub arena: Arena,
}

/// A range of address space claimed from a [`MemoryProvider`] and split into
/// uniform slabs that can be committed and decommitted one by one:
///
/// ```text
///   base                                                   base + total_size
///   |                                                              |
///   v                                                              v
///   +-----------+-----------+-----------+-----------+-----------+
///   |  slab 0   |  slab 1   |  slab 2   |  slab 3   |  slab 4   |
///   | Committed |   Free    | Committed |   Free    |   Free    |
///   +-----------+-----------+-----------+-----------+-----------+
///    <--------->
///     slab_size (page multiple)
/// ```
///
/// Every committed slab is owned by exactly one [`Arena`]. The reservation
/// borrows its provider, so the provider outlives it. Dropping a reservation
/// releases the whole range, same as [`Reservation::release`]; arenas that
/// are still around at that point must not be used anymore.
///
/// ```rust
/// use slabloc::{MockMemory, Reservation};
///
/// let memory = MockMemory::new();
/// let mut reservation = Reservation::acquire(&memory, 1 << 20, 64 << 10)?;
/// assert_eq!(reservation.slab_count(), 16);
///
/// let mut arena = reservation.commit_slab()?.expect("there are free slabs");
/// let bytes = arena.push(128, 16).expect("fits");
/// unsafe { bytes.as_ptr().write_bytes(0, 128) };
///
/// reservation.decommit_slab(arena).map_err(|err| err.source)?;
/// reservation.release()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Reservation<'p, P: MemoryProvider + ?Sized> {
    id: OwnerId,
    provider: &'p P,
    base: NonNull<u8>,
    total_size: usize,
    slab_size: usize,
    slabs: Vec<SlabState>,
    released: bool,
}

impl<'p, P: MemoryProvider + ?Sized> Reservation<'p, P> {
    /// Reserves at least `min_size` bytes split into slabs of at least
    /// `min_slab_size` bytes. See [`Reservation::with_config`].
    pub fn acquire(provider: &'p P, min_size: usize, min_slab_size: usize) -> Result<Self> {
        let config = ReservationConfig::new()
            .min_size(min_size)
            .min_slab_size(min_slab_size);

        Self::with_config(provider, config)
    }

    /// Rounds the slab size up to the page size and the total size up to a
    /// multiple of the slab size, then reserves (without committing) that
    /// much address space.
    pub fn with_config(provider: &'p P, config: ReservationConfig) -> Result<Self> {
        config.validate()?;

        let slab_size = provider
            .align_to_page(config.min_slab_size)
            .ok_or(InitError::Overflow { what: "slab size" })?;

        let total_size = align::round_up_to_multiple(config.min_size, slab_size)
            .ok_or(InitError::Overflow { what: "reservation size" })?;

        let base = provider.reserve(None, total_size)?;
        let slab_count = total_size / slab_size;

        debug!("reserved {total_size} bytes at {base:?} as {slab_count} slabs of {slab_size} bytes");

        Ok(Self {
            id: OwnerId::next(),
            provider,
            base,
            total_size,
            slab_size,
            slabs: vec![SlabState::Free; slab_count],
            released: false,
        })
    }

    /// Commits the first free slab (lowest index) and returns an empty arena
    /// spanning it. `Ok(None)` if every slab is already committed. If the
    /// provider fails, the slab stays free and the error is returned.
    pub fn commit_slab(&mut self) -> std::result::Result<Option<Arena>, OsError> {
        let Some(index) = self.slabs.iter().position(|state| *state == SlabState::Free) else {
            trace!("no free slabs left in reservation at {:?}", self.base);
            return Ok(None);
        };

        let address = self.slab_address(index);
        if let Err(err) = self.provider.commit(address, self.slab_size) {
            warn!("failed to commit slab {index} of reservation at {:?}: {err}", self.base);
            return Err(err);
        }

        self.slabs[index] = SlabState::Committed;
        trace!("committed slab {index} at {address:?}");

        // SAFETY: the slab was just committed and no other arena can exist
        // for it until it's decommitted, which consumes this arena.
        let region = unsafe { MemoryRegion::from_raw_parts(address, self.slab_size) };

        Ok(Some(Arena::for_slab(
            region,
            SlabTag {
                reservation: self.id,
                index,
            },
        )))
    }

    /// Decommits the slab backing `arena` and marks it free again.
    ///
    /// # Panics
    ///
    /// If `arena` wasn't committed from this reservation. That's a programmer
    /// error, not something to recover from.
    pub fn decommit_slab(&mut self, arena: Arena) -> std::result::Result<(), DecommitError> {
        let index = self.owned_slab(&arena);
        let address = self.slab_address(index);

        // SAFETY: the arena is the only handle to this slab and we own it now.
        if let Err(source) = unsafe { self.provider.decommit(address, self.slab_size) } {
            warn!("failed to decommit slab {index} of reservation at {:?}: {source}", self.base);
            return Err(DecommitError { source, arena });
        }

        self.slabs[index] = SlabState::Free;
        trace!("decommitted slab {index} at {address:?}");

        Ok(())
    }

    /// Returns the whole range to the provider, committed slabs included.
    /// Every slab counts as free afterwards and the reservation is consumed,
    /// so nothing else can be attempted on it. Arenas still alive dangle.
    ///
    /// This is final even when it fails: the error is reported but there is
    /// no reservation left to retry with, and dropping doesn't try again.
    /// The range stays reserved in the provider until the process exits or
    /// the provider itself cleans up (as [`crate::SystemMemory`] and
    /// [`crate::MockMemory`] do when dropped).
    pub fn release(mut self) -> std::result::Result<(), OsError> {
        self.release_address_space()
    }

    fn release_address_space(&mut self) -> std::result::Result<(), OsError> {
        self.released = true;
        self.slabs.fill(SlabState::Free);

        // SAFETY: the range was reserved by us with `total_size` and any
        // arenas left are the caller's problem, as documented.
        let result = unsafe { self.provider.release(self.base, self.total_size) };

        match &result {
            Ok(()) => debug!("released reservation at {:?}", self.base),
            Err(err) => warn!("failed to release reservation at {:?}: {err}", self.base),
        }

        result
    }

    /// Validates that `arena` was committed from one of our slabs and returns
    /// the slab index.
    fn owned_slab(&self, arena: &Arena) -> usize {
        let owned = arena.slab().filter(|slab| {
            slab.reservation == self.id
                && slab.index < self.slabs.len()
                && arena.region().address() == self.slab_address(slab.index).as_ptr() as usize
                && self.slabs[slab.index] == SlabState::Committed
        });

        match owned {
            Some(slab) => slab.index,
            None => panic!(
                "arena at {:?} does not belong to reservation at {:?}",
                arena.region(),
                self.base
            ),
        }
    }

    fn slab_address(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.slabs.len());
        // SAFETY: `index * slab_size < total_size`, still inside the range.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * self.slab_size)) }
    }

    /// First byte of the reserved range.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    fn address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Reserved bytes, always `slab_size * slab_count`.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// State of slab `index`, `None` if out of range.
    pub fn slab_state(&self, index: usize) -> Option<SlabState> {
        self.slabs.get(index).copied()
    }

    /// Index of the slab containing `address`, if it's inside the range.
    pub fn slab_index_of(&self, address: usize) -> Option<usize> {
        self.contains(address)
            .then(|| (address - self.address()) / self.slab_size)
    }

    /// Number of free slabs, counted by scanning.
    pub fn slabs_free(&self) -> usize {
        self.count(SlabState::Free)
    }

    /// Number of committed slabs, counted by scanning.
    pub fn slabs_committed(&self) -> usize {
        self.count(SlabState::Committed)
    }

    fn count(&self, state: SlabState) -> usize {
        self.slabs.iter().filter(|slab| **slab == state).count()
    }

    /// Whether `address` lies within `[base, base + total_size)`.
    pub fn contains(&self, address: usize) -> bool {
        (self.address()..self.address() + self.total_size).contains(&address)
    }

    /// The provider this reservation was claimed from.
    pub fn provider(&self) -> &'p P {
        self.provider
    }
}

impl<P: MemoryProvider + ?Sized> Drop for Reservation<'_, P> {
    fn drop(&mut self) {
        if !self.released {
            // Errors are already logged, there's nobody to return them to.
            let _ = self.release_address_space();
        }
    }
}

impl<P: MemoryProvider + ?Sized> std::fmt::Debug for Reservation<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("base", &self.base)
            .field("total_size", &self.total_size)
            .field("slab_size", &self.slab_size)
            .field("slabs", &self.slabs)
            .finish()
    }
}
