use std::collections::BTreeMap;

use crate::{align, error::OsError};

/// Bookkeeping for one reserved range: its length and which of its pages are
/// currently committed.
#[derive(Debug)]
struct ReservedRange {
    size: usize,
    committed: Vec<bool>,
}

/// Tracks every range a provider has reserved and the commit state of each
/// page inside it. The kernel knows all of this too, but asking it is either
/// impossible (Unix has no portable "is this page committed" query) or slow,
/// and both providers need the same answers, so they keep their own ledger.
///
/// ```text
///   ranges (keyed by base address)
///   +----------------+      +-----------------------------+
///   | 0x7f00_0000    | ---> | size: 64 KiB                |
///   +----------------+      | committed: [1,1,0,0,...,0]  |
///   | 0x7f10_0000    | ---> | ...                         |
///   +----------------+      +-----------------------------+
/// ```
#[derive(Debug)]
pub(crate) struct PageTable {
    page_size: usize,
    ranges: BTreeMap<usize, ReservedRange>,
}

impl PageTable {
    pub fn new(page_size: usize) -> Self {
        debug_assert!(align::is_power_of_two(page_size));
        Self {
            page_size,
            ranges: BTreeMap::new(),
        }
    }

    /// Records a freshly reserved range. Nothing is committed yet.
    pub fn insert(&mut self, base: usize, size: usize) {
        let pages = size.div_ceil(self.page_size);
        self.ranges.insert(
            base,
            ReservedRange {
                size,
                committed: vec![false; pages],
            },
        );
    }

    /// Forgets the range that starts exactly at `base`.
    pub fn remove(&mut self, base: usize, size: usize) -> Result<usize, OsError> {
        self.ranges
            .remove(&base)
            .map(|range| range.size)
            .ok_or(OsError::NotReserved { address: base, size })
    }

    /// Size of the range that starts exactly at `base`.
    pub fn reserved_size(&self, base: usize) -> Option<usize> {
        self.ranges.get(&base).map(|range| range.size)
    }

    /// Marks every page touched by `[address, address + size)` as committed or
    /// not. The whole span must live inside one reserved range.
    pub fn set_committed(&mut self, address: usize, size: usize, committed: bool) -> Result<(), OsError> {
        let not_reserved = OsError::NotReserved { address, size };
        let end = address.checked_add(size).ok_or_else(|| not_reserved.clone())?;

        let Some((&base, range)) = self.ranges.range_mut(..=address).next_back() else {
            return Err(not_reserved);
        };

        if size == 0 || end > base + range.size {
            return Err(not_reserved);
        }

        let first = (address - base) / self.page_size;
        let last = (end - base).div_ceil(self.page_size);
        range.committed[first..last].fill(committed);

        Ok(())
    }

    /// Whether `address` belongs to any reserved range.
    pub fn is_reserved(&self, address: usize) -> bool {
        self.find(address).is_some()
    }

    /// Whether the page containing `address` is committed.
    pub fn is_committed(&self, address: usize) -> bool {
        self.find(address)
            .is_some_and(|(base, range)| range.committed[(address - base) / self.page_size])
    }

    /// Number of live reservations.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Number of committed pages across all reservations.
    pub fn committed_pages(&self) -> usize {
        self.ranges
            .values()
            .map(|range| range.committed.iter().filter(|page| **page).count())
            .sum()
    }

    /// Drains all ranges, used by providers that must clean up on drop.
    pub fn drain(&mut self) -> impl Iterator<Item = (usize, usize)> {
        std::mem::take(&mut self.ranges)
            .into_iter()
            .map(|(base, range)| (base, range.size))
    }

    fn find(&self, address: usize) -> Option<(usize, &ReservedRange)> {
        self.ranges
            .range(..=address)
            .next_back()
            .filter(|(base, range)| address < **base + range.size)
            .map(|(base, range)| (*base, range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_tracking() {
        let mut table = PageTable::new(4096);
        table.insert(0x10000, 4 * 4096);

        assert!(table.is_reserved(0x10000));
        assert!(table.is_reserved(0x10000 + 4 * 4096 - 1));
        assert!(!table.is_reserved(0x10000 + 4 * 4096));
        assert!(!table.is_reserved(0xffff));
        assert!(!table.is_committed(0x10000));

        table.set_committed(0x10000 + 4096, 2 * 4096, true).unwrap();
        assert!(!table.is_committed(0x10000));
        assert!(table.is_committed(0x10000 + 4096));
        assert!(table.is_committed(0x10000 + 3 * 4096 - 1));
        assert!(!table.is_committed(0x10000 + 3 * 4096));
        assert_eq!(table.committed_pages(), 2);

        table.set_committed(0x10000 + 4096, 4096, false).unwrap();
        assert_eq!(table.committed_pages(), 1);
    }

    #[test]
    fn rejects_spans_outside_reservations() {
        let mut table = PageTable::new(4096);
        table.insert(0x10000, 4096);

        assert!(table.set_committed(0x10000, 2 * 4096, true).is_err());
        assert!(table.set_committed(0x8000, 4096, true).is_err());
        assert!(table.set_committed(0x10000, 0, true).is_err());
        assert!(table.remove(0x10001, 4096).is_err());
        assert_eq!(table.remove(0x10000, 4096), Ok(4096));
        assert_eq!(table.len(), 0);
    }
}
