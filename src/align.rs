//! Alignment and rounding helpers. Every allocator in this crate funnels its
//! size arithmetic through these functions, so they are all checked: instead
//! of wrapping around on overflow they return `None` and the caller treats
//! that exactly like running out of memory.
//!
//! Quick reminder of the power of two trick used everywhere below. If `align`
//! is a power of two then `align - 1` is a mask with all the low bits set:
//!
//! ```text
//! align       = 0b0001_0000 (16)
//! align - 1   = 0b0000_1111
//! !(align - 1)= 0b1111_0000
//! ```
//!
//! Adding `align - 1` and clearing the low bits rounds up to the next multiple
//! of `align`; clearing the low bits alone rounds down.

/// Returns `true` if `value` is a power of two. Zero is not.
#[inline]
pub const fn is_power_of_two(value: usize) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Smallest power of two greater than or equal to `value`. `0` and `1` both
/// map to `1`. Returns `None` if the result doesn't fit in a [`usize`].
///
/// # Examples
///
/// ```rust
/// use slabloc::align::align_pow2;
///
/// assert_eq!(align_pow2(0), Some(1));
/// assert_eq!(align_pow2(13), Some(16));
/// assert_eq!(align_pow2(64), Some(64));
/// assert_eq!(align_pow2(usize::MAX), None);
/// ```
#[inline]
pub const fn align_pow2(value: usize) -> Option<usize> {
    value.checked_next_power_of_two()
}

/// Rounds `value` up to the next multiple of `align`, which must be a power of
/// two. Returns `None` on overflow.
///
/// # Examples
///
/// ```rust
/// use slabloc::align::align_up;
///
/// assert_eq!(align_up(13, 8), Some(16));
/// assert_eq!(align_up(16, 8), Some(16));
/// assert_eq!(align_up(0, 8), Some(0));
/// assert_eq!(align_up(usize::MAX, 8), None);
/// ```
#[inline]
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(is_power_of_two(align));
    let mask = align - 1;
    match value.checked_add(mask) {
        Some(sum) => Some(sum & !mask),
        None => None,
    }
}

/// Rounds `value` down to the previous multiple of `align`, which must be a
/// power of two. Can't overflow.
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(is_power_of_two(align));
    value & !(align - 1)
}

/// Returns `true` if `value` is a multiple of `align` (power of two).
#[inline]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    debug_assert!(is_power_of_two(align));
    value & (align - 1) == 0
}

/// Rounds `value` up to a multiple of `multiple`, which doesn't need to be a
/// power of two (slab sizes are page multiples, not necessarily powers of
/// two). `multiple` must be non-zero. Returns `None` on overflow.
#[inline]
pub const fn round_up_to_multiple(value: usize, multiple: usize) -> Option<usize> {
    debug_assert!(multiple != 0);
    let remainder = value % multiple;
    if remainder == 0 {
        Some(value)
    } else {
        value.checked_add(multiple - remainder)
    }
}

/// Size and alignment normalization shared by [`crate::Arena`] and
/// [`crate::StackAllocator`]: alignment goes up to a power of two, then size
/// goes up to a multiple of that alignment. `None` if either step overflows.
#[inline]
pub(crate) fn aligned_size(size: usize, alignment: usize) -> Option<usize> {
    let alignment = align_pow2(alignment)?;
    align_up(size, alignment)
}
