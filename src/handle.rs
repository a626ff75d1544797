//! Identity of allocators and of the handles they give out.
//!
//! Every handle ([`crate::Block`], [`crate::Allocation`], [`crate::Arena`])
//! records which allocator instance created it, and block and heap handles
//! also record the generation of the side table entry they refer to. An
//! entry's generation goes up every time it's handed out, so a handle whose
//! memory was already given back through a raw pointer no longer matches.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique per allocator instance. Two allocators built over the same memory,
/// one after the other, still get different ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct OwnerId(u64);

impl OwnerId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// How many times a side table entry has been handed out.
pub(crate) type Generation = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_never_repeated() {
        let first = OwnerId::next();
        let second = OwnerId::next();
        assert_ne!(first, second);
    }
}
