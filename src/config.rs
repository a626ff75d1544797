//! Tuning knobs for reservations and arena pools. Values are validated once,
//! when a [`crate::Reservation`] or [`crate::ArenaAllocator`] is built; the
//! structures themselves can't hold anything invalid after that.

use crate::error::InitError;

/// 1 MiB, the default amount of address space a reservation claims.
pub const DEFAULT_RESERVATION_SIZE: usize = 1 << 20;

/// 64 KiB, the default slab (and arena) size.
pub const DEFAULT_SLAB_SIZE: usize = 64 << 10;

/// Parameters for [`crate::Reservation::with_config`].
///
/// Both sizes are minimums: the slab size is rounded up to the provider page
/// size and the total size to a multiple of the resulting slab size.
///
/// ```rust
/// use slabloc::ReservationConfig;
///
/// let config = ReservationConfig::new().min_size(1 << 20).min_slab_size(64 << 10);
/// assert!(config.validate().is_ok());
/// assert!(ReservationConfig::new().min_slab_size(0).validate().is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReservationConfig {
    pub min_size: usize,
    pub min_slab_size: usize,
}

impl ReservationConfig {
    pub const fn new() -> Self {
        Self {
            min_size: DEFAULT_RESERVATION_SIZE,
            min_slab_size: DEFAULT_SLAB_SIZE,
        }
    }

    pub const fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    pub const fn min_slab_size(mut self, min_slab_size: usize) -> Self {
        self.min_slab_size = min_slab_size;
        self
    }

    /// Checks what can be checked without knowing the page size.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.min_size == 0 {
            return Err(InitError::ZeroSize { what: "reservation size" });
        }

        if self.min_slab_size == 0 {
            return Err(InitError::ZeroSize { what: "slab size" });
        }

        Ok(())
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters for [`crate::ArenaAllocator::new`]: how big each arena is and
/// how many of them the pool can hold at most.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaAllocatorConfig {
    pub arena_size: usize,
    pub arena_count: usize,
}

impl ArenaAllocatorConfig {
    pub const fn new() -> Self {
        Self {
            arena_size: DEFAULT_SLAB_SIZE,
            arena_count: DEFAULT_RESERVATION_SIZE / DEFAULT_SLAB_SIZE,
        }
    }

    pub const fn arena_size(mut self, arena_size: usize) -> Self {
        self.arena_size = arena_size;
        self
    }

    pub const fn arena_count(mut self, arena_count: usize) -> Self {
        self.arena_count = arena_count;
        self
    }

    pub fn validate(&self) -> Result<(), InitError> {
        self.reservation().map(|_| ())
    }

    /// The reservation this pool needs.
    pub(crate) fn reservation(&self) -> Result<ReservationConfig, InitError> {
        if self.arena_count == 0 {
            return Err(InitError::ZeroSize { what: "arena count" });
        }

        let min_size = self
            .arena_size
            .checked_mul(self.arena_count)
            .ok_or(InitError::Overflow { what: "arena pool size" })?;

        let config = ReservationConfig::new()
            .min_size(min_size)
            .min_slab_size(self.arena_size);
        config.validate()?;

        Ok(config)
    }
}

impl Default for ArenaAllocatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ReservationConfig::default().validate().is_ok());
        assert!(ArenaAllocatorConfig::default().validate().is_ok());
        assert_eq!(ArenaAllocatorConfig::default().arena_count, 16);
    }

    #[test]
    fn arena_pool_validation() {
        let overflow = ArenaAllocatorConfig::new().arena_size(usize::MAX).arena_count(2);
        assert_eq!(overflow.validate(), Err(InitError::Overflow { what: "arena pool size" }));

        let empty = ArenaAllocatorConfig::new().arena_count(0);
        assert_eq!(empty.validate(), Err(InitError::ZeroSize { what: "arena count" }));

        let zero_sized = ArenaAllocatorConfig::new().arena_size(0);
        assert!(zero_sized.validate().is_err());

        let config = ArenaAllocatorConfig::new().arena_size(4096).arena_count(3);
        assert_eq!(
            config.reservation(),
            Ok(ReservationConfig::new().min_size(3 * 4096).min_slab_size(4096))
        );
    }
}
