use crate::align;

/// Position bookkeeping shared by [`crate::Arena`] and
/// [`crate::StackAllocator`]. Pure arithmetic, no pointers: the owners turn
/// the offsets returned here into addresses inside their region.
///
/// ```text
///   0                  save           position                  capacity
///   |                   |                |                          |
///   v                   v                v                          v
///   +-------------------+----------------+--------------------------+
///   |     allocated     |   allocated    |        remaining         |
///   |  (survives a      | (dropped by a  |                          |
///   |   roll back)      |   roll back)   |                          |
///   +-------------------+----------------+--------------------------+
/// ```
///
/// Invariant: `save <= position <= capacity`, which every operation keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Cursor {
    capacity: usize,
    position: usize,
    save: usize,
}

impl Cursor {
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            position: 0,
            save: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn saved(&self) -> usize {
        self.save
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.position
    }

    #[inline]
    fn is_well_formed(&self) -> bool {
        self.save <= self.position && self.position <= self.capacity
    }

    /// Reserves `size` bytes rounded up to `alignment` (itself rounded up to
    /// a power of two) and returns the offset where they start. `None` if
    /// they don't fit, in which case nothing changes.
    pub fn push(&mut self, size: usize, alignment: usize) -> Option<usize> {
        debug_assert!(self.is_well_formed(), "malformed cursor {self:?}");

        let size = align::aligned_size(size, alignment)?;
        let new_position = self.position.checked_add(size).filter(|end| *end <= self.capacity)?;

        let offset = self.position;
        self.position = new_position;

        Some(offset)
    }

    /// Gives back the last `size` bytes pushed with `alignment`. Returns
    /// `false` and changes nothing if there aren't that many bytes in use.
    /// A save point that now lies beyond the position is forgotten.
    pub fn pull(&mut self, size: usize, alignment: usize) -> bool {
        debug_assert!(self.is_well_formed(), "malformed cursor {self:?}");

        let Some(size) = align::aligned_size(size, alignment).filter(|size| *size <= self.position) else {
            return false;
        };

        self.position -= size;
        if self.position < self.save {
            self.save = 0;
        }

        true
    }

    pub fn save(&mut self) {
        debug_assert!(self.is_well_formed(), "malformed cursor {self:?}");
        self.save = self.position;
    }

    pub fn roll_back(&mut self) {
        debug_assert!(self.is_well_formed(), "malformed cursor {self:?}");
        self.position = self.save;
    }

    pub fn reset(&mut self) {
        debug_assert!(self.is_well_formed(), "malformed cursor {self:?}");
        self.position = 0;
        self.save = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_until_full() {
        let mut cursor = Cursor::new(64);

        assert_eq!(cursor.push(10, 8), Some(0));
        assert_eq!(cursor.position(), 16);
        assert_eq!(cursor.push(48, 8), Some(16));
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.push(1, 1), None);
        assert_eq!(cursor.position(), 64);
    }

    #[test]
    fn overflowing_push_changes_nothing() {
        let mut cursor = Cursor::new(64);
        cursor.push(8, 8);

        assert_eq!(cursor.push(usize::MAX - 4, 8), None);
        assert_eq!(cursor.push(usize::MAX - 4, 1), None);
        assert_eq!(cursor.position(), 8);
    }

    #[test]
    fn pull_forgets_stale_save() {
        let mut cursor = Cursor::new(256);
        cursor.push(32, 16);
        cursor.push(32, 16);
        cursor.save();
        assert_eq!(cursor.saved(), 64);

        assert!(cursor.pull(20, 16));
        assert_eq!(cursor.position(), 32);
        assert_eq!(cursor.saved(), 0);

        assert!(!cursor.pull(64, 1));
        assert_eq!(cursor.position(), 32);
    }
}
