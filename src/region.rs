use std::{fmt, ptr::NonNull};

/// A contiguous range of committed bytes: `[base, base + size)`.
///
/// This is a plain value. It doesn't own the memory and dropping it does
/// nothing; whoever built it (usually an [`crate::Arena`]) decides how long
/// the bytes stay valid. Allocators built on top of a region treat it as their
/// exclusive backing store.
///
/// ```text
///  base                                                 base + size
///   |                                                        |
///   v                                                        v
///   +--------------------------------------------------------+
///   |                     size bytes                         |
///   +--------------------------------------------------------+
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    base: NonNull<u8>,
    size: usize,
}

impl MemoryRegion {
    /// Builds a region from raw parts.
    ///
    /// # Safety
    ///
    /// `size` bytes starting at `base` must be committed, readable and
    /// writable for as long as the region (or anything built on top of it) is
    /// in use, and must not be handed to anyone else in the meantime.
    /// `base + size` must not overflow.
    #[inline]
    pub const unsafe fn from_raw_parts(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }

    /// First byte of the region.
    #[inline]
    pub const fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Numeric address of the first byte.
    #[inline]
    pub fn address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Length in bytes.
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Address one past the last byte.
    #[inline]
    pub fn end(&self) -> usize {
        self.address() + self.size
    }

    /// Whether `address` points inside `[base, base + size)`.
    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        (self.address()..self.end()).contains(&address)
    }

    /// Offset of `address` from the base, if it's inside the region.
    #[inline]
    pub fn offset_of(&self, address: usize) -> Option<usize> {
        self.contains(address).then(|| address - self.address())
    }

    /// Pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// If `offset > size`. Pointing one past the end is allowed.
    #[inline]
    pub fn pointer_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.size, "offset {offset} out of region of {} bytes", self.size);
        // SAFETY: `offset` is within the bounds of the region (or one past
        // its end), so the result stays inside the same allocation and can't
        // be null.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Sub-region `[base + offset, base + offset + size)`.
    ///
    /// # Panics
    ///
    /// If the sub-region doesn't fit.
    #[inline]
    pub fn slice(&self, offset: usize, size: usize) -> MemoryRegion {
        let fits = offset.checked_add(size).is_some_and(|end| end <= self.size);
        assert!(fits, "sub-region {offset}+{size} out of region of {} bytes", self.size);
        Self {
            base: self.pointer_at(offset),
            size,
        }
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryRegion({:#x}..{:#x})", self.address(), self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        let mut backing = [0u8; 64];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        let region = unsafe { MemoryRegion::from_raw_parts(base, backing.len()) };

        assert_eq!(region.size(), 64);
        assert!(region.contains(region.address()));
        assert!(region.contains(region.address() + 63));
        assert!(!region.contains(region.end()));
        assert_eq!(region.offset_of(region.address() + 10), Some(10));
        assert_eq!(region.offset_of(region.end()), None);

        let sub = region.slice(16, 32);
        assert_eq!(sub.address(), region.address() + 16);
        assert_eq!(sub.end(), region.address() + 48);
    }

    #[test]
    #[should_panic]
    fn slice_out_of_bounds() {
        let mut backing = [0u8; 8];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        let region = unsafe { MemoryRegion::from_raw_parts(base, backing.len()) };
        region.slice(4, 8);
    }
}
