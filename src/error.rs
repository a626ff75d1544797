use thiserror::Error;

/// Shorter syntax for results that can fail with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a [`crate::MemoryProvider`]. These are never retried
/// internally, they travel up through [`crate::Reservation`] untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OsError {
    #[error("failed to reserve {size} bytes of address space: {reason}")]
    Reserve { size: usize, reason: String },

    #[error("failed to commit {size} bytes at 0x{address:x}: {reason}")]
    Commit {
        address: usize,
        size: usize,
        reason: String,
    },

    #[error("failed to decommit {size} bytes at 0x{address:x}: {reason}")]
    Decommit {
        address: usize,
        size: usize,
        reason: String,
    },

    #[error("failed to release {size} bytes at 0x{address:x}: {reason}")]
    Release {
        address: usize,
        size: usize,
        reason: String,
    },

    #[error("range 0x{address:x}..+{size} is not inside a reserved range")]
    NotReserved { address: usize, size: usize },
}

/// Reasons why a reservation or an allocator couldn't be built from the
/// parameters it was given. Once built, allocators can't reach an invalid
/// state, so this is the only place where bad parameters are reported.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    #[error("{what} must be greater than zero")]
    ZeroSize { what: &'static str },

    #[error("{what} overflows the address space")]
    Overflow { what: &'static str },

    #[error("region of {size} bytes is too small, at least {required} bytes are needed")]
    RegionTooSmall { size: usize, required: usize },

    #[error("region base 0x{address:x} is not aligned to {alignment} bytes")]
    Misaligned { address: usize, alignment: usize },
}

/// Every error this crate can return.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Os(#[from] OsError),

    #[error(transparent)]
    Init(#[from] InitError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let err = OsError::Commit {
            address: 0x1000,
            size: 4096,
            reason: "injected".into(),
        };
        assert_eq!(err.to_string(), "failed to commit 4096 bytes at 0x1000: injected");

        let err: Error = InitError::Misaligned {
            address: 0x1004,
            alignment: 16,
        }
        .into();
        assert_eq!(err.to_string(), "region base 0x1004 is not aligned to 16 bytes");
    }
}
