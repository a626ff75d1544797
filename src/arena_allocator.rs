use log::debug;

use crate::{
    arena::Arena,
    config::ArenaAllocatorConfig,
    error::{OsError, Result},
    platform::MemoryProvider,
    reservation::{DecommitError, Reservation},
};

/// Accounting snapshot of an [`ArenaAllocator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Bytes reserved for the whole pool.
    pub size_total: usize,
    /// Bytes in arenas that are not committed.
    pub size_free: usize,
    /// Bytes in committed arenas.
    pub size_used: usize,
    pub arenas_free: usize,
    pub arenas_used: usize,
}

/// A pool of equally sized arenas carved out of a single [`Reservation`].
///
/// This is a thin layer that speaks in arenas instead of slabs. Its
/// accounting is never cached: [`ArenaAllocator::stats`] scans the commit
/// state of every slab, so it stays correct even if arenas are decommitted
/// behind its back through [`ArenaAllocator::reservation_mut`].
///
/// ```rust
/// use slabloc::{ArenaAllocator, ArenaAllocatorConfig, MockMemory};
///
/// let memory = MockMemory::new();
/// let config = ArenaAllocatorConfig::new().arena_size(64 << 10).arena_count(4);
/// let mut pool = ArenaAllocator::new(&memory, config)?;
///
/// let (arena, stats) = pool.commit()?.expect("pool is empty");
/// assert_eq!(stats.arenas_used, 1);
/// assert_eq!(stats.arenas_free, 3);
///
/// let stats = pool.decommit(arena).map_err(|err| err.source)?;
/// assert_eq!(stats.size_used, 0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct ArenaAllocator<'p, P: MemoryProvider + ?Sized> {
    reservation: Reservation<'p, P>,
}

impl<'p, P: MemoryProvider + ?Sized> ArenaAllocator<'p, P> {
    /// Reserves room for `config.arena_count` arenas of at least
    /// `config.arena_size` bytes each. Nothing is committed yet.
    pub fn new(provider: &'p P, config: ArenaAllocatorConfig) -> Result<Self> {
        let reservation = Reservation::with_config(provider, config.reservation()?)?;

        debug!(
            "arena pool with {} arenas of {} bytes",
            reservation.slab_count(),
            reservation.slab_size()
        );

        Ok(Self { reservation })
    }

    /// Wraps an existing reservation, its slabs become the arenas.
    pub fn from_reservation(reservation: Reservation<'p, P>) -> Self {
        Self { reservation }
    }

    /// Commits one more arena and returns it along with the accounting after
    /// the commit. `Ok(None)` when the pool is exhausted.
    pub fn commit(&mut self) -> std::result::Result<Option<(Arena, ArenaStats)>, OsError> {
        let arena = self.reservation.commit_slab()?;
        Ok(arena.map(|arena| (arena, self.stats())))
    }

    /// Gives an arena back to the pool, returning the accounting afterwards.
    ///
    /// # Panics
    ///
    /// If `arena` doesn't come from this pool.
    pub fn decommit(&mut self, arena: Arena) -> std::result::Result<ArenaStats, DecommitError> {
        self.reservation.decommit_slab(arena)?;
        Ok(self.stats())
    }

    /// Current accounting, computed by scanning slab states.
    pub fn stats(&self) -> ArenaStats {
        let arena_size = self.reservation.slab_size();
        let arenas_free = self.reservation.slabs_free();
        let arenas_used = self.reservation.slabs_committed();

        ArenaStats {
            size_total: self.reservation.total_size(),
            size_free: arenas_free * arena_size,
            size_used: arenas_used * arena_size,
            arenas_free,
            arenas_used,
        }
    }

    /// Size of every arena in the pool.
    pub fn arena_size(&self) -> usize {
        self.reservation.slab_size()
    }

    /// Maximum number of arenas.
    pub fn arena_count(&self) -> usize {
        self.reservation.slab_count()
    }

    pub fn reservation(&self) -> &Reservation<'p, P> {
        &self.reservation
    }

    /// Raw access to the underlying reservation.
    pub fn reservation_mut(&mut self) -> &mut Reservation<'p, P> {
        &mut self.reservation
    }

    /// Releases the whole pool. Arenas still alive dangle afterwards.
    pub fn release(self) -> std::result::Result<(), OsError> {
        self.reservation.release()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::platform::MockMemory;

    fn pool(memory: &MockMemory, count: usize) -> ArenaAllocator<'_, MockMemory> {
        let config = ArenaAllocatorConfig::new().arena_size(4096).arena_count(count);
        ArenaAllocator::new(memory, config).unwrap()
    }

    #[test]
    fn accounting_follows_commits() {
        let memory = MockMemory::new();
        let mut pool = pool(&memory, 3);

        assert_eq!(
            pool.stats(),
            ArenaStats {
                size_total: 3 * 4096,
                size_free: 3 * 4096,
                size_used: 0,
                arenas_free: 3,
                arenas_used: 0,
            }
        );

        let (first, _) = pool.commit().unwrap().unwrap();
        let (second, stats) = pool.commit().unwrap().unwrap();
        assert_eq!(stats.arenas_used, 2);
        assert_eq!(stats.size_used, 2 * 4096);
        assert_eq!(stats.size_free + stats.size_used, stats.size_total);

        let (third, stats) = pool.commit().unwrap().unwrap();
        assert_eq!(stats.arenas_free, 0);
        assert!(pool.commit().unwrap().is_none());

        let stats = pool.decommit(second).unwrap();
        assert_eq!(stats.arenas_used, 2);
        let (again, _) = pool.commit().unwrap().unwrap();

        for arena in [first, third, again] {
            pool.decommit(arena).unwrap();
        }
        assert_eq!(pool.stats().arenas_used, 0);
    }

    #[test]
    fn out_of_band_decommit_is_seen() {
        let memory = MockMemory::new();
        let mut pool = pool(&memory, 2);

        let (arena, _) = pool.commit().unwrap().unwrap();
        pool.reservation_mut().decommit_slab(arena).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.arenas_used, 0);
        assert_eq!(stats.arenas_free, 2);
    }

    #[test]
    fn release_returns_everything() {
        let memory = MockMemory::new();
        let mut pool = pool(&memory, 2);
        let _arena = pool.commit().unwrap();

        pool.release().unwrap();
        assert_eq!(memory.reservations(), 0);
        assert_eq!(memory.committed_pages(), 0);
    }
}
