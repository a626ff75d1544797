//! In-process [`MemoryProvider`] for tests and for environments without
//! virtual memory (Miri, for instance, has no FFI support so `mmap` is out of
//! the question). Reservations are plain zeroed allocations from the global
//! allocator; commit state is only bookkeeping, so touching an uncommitted
//! page won't crash, but [`MockMemory::is_committed`] will tell the truth and
//! decommitted pages lose their contents just like real ones do.

use std::{
    alloc::{self, Layout},
    cell::{Cell, RefCell},
    collections::BTreeMap,
    ptr::NonNull,
};

use log::trace;

use super::{MemoryProvider, PageTable};
use crate::{align, error::OsError};

/// Default page size of the mock, the most common page size out there.
pub const MOCK_PAGE_SIZE: usize = 4096;

/// Provider operations that can be told to fail.
#[derive(Clone, Copy, Debug)]
enum Fault {
    Reserve,
    Commit,
    Decommit,
    Release,
}

/// Fake OS memory. See the [module documentation](self).
///
/// ```rust
/// use slabloc::{MemoryProvider, MockMemory};
///
/// let memory = MockMemory::new();
/// let base = memory.reserve(None, 8192).unwrap();
///
/// assert!(memory.is_reserved(base));
/// assert!(!memory.is_committed(base));
///
/// memory.commit(base, 4096).unwrap();
/// assert!(memory.is_committed(base));
///
/// unsafe { memory.release(base, 8192).unwrap() };
/// assert_eq!(memory.reservations(), 0);
/// ```
#[derive(Debug)]
pub struct MockMemory {
    page_size: usize,
    granularity: usize,
    pages: RefCell<PageTable>,
    layouts: RefCell<BTreeMap<usize, Layout>>,
    faults: Cell<[bool; 4]>,
}

impl MockMemory {
    /// Mock with 4 KiB pages and 4 KiB granularity, like Linux on x86.
    pub fn new() -> Self {
        Self::with_page_size(MOCK_PAGE_SIZE, MOCK_PAGE_SIZE)
    }

    /// Mock with custom page size and allocation granularity. Use a 64 KiB
    /// granularity to mimic Windows.
    ///
    /// # Panics
    ///
    /// If either value is not a power of two or the granularity is smaller
    /// than the page size.
    pub fn with_page_size(page_size: usize, granularity: usize) -> Self {
        assert!(align::is_power_of_two(page_size), "page size must be a power of two");
        assert!(
            align::is_power_of_two(granularity) && granularity >= page_size,
            "granularity must be a power of two multiple of the page size"
        );

        Self {
            page_size,
            granularity,
            pages: RefCell::new(PageTable::new(page_size)),
            layouts: RefCell::new(BTreeMap::new()),
            faults: Cell::new([false; 4]),
        }
    }

    /// The next call to [`MemoryProvider::reserve`] fails.
    pub fn fail_next_reserve(&self) {
        self.arm(Fault::Reserve);
    }

    /// The next call to [`MemoryProvider::commit`] fails.
    pub fn fail_next_commit(&self) {
        self.arm(Fault::Commit);
    }

    /// The next call to [`MemoryProvider::decommit`] fails.
    pub fn fail_next_decommit(&self) {
        self.arm(Fault::Decommit);
    }

    /// The next call to [`MemoryProvider::release`] fails.
    pub fn fail_next_release(&self) {
        self.arm(Fault::Release);
    }

    /// Number of ranges currently reserved. Zero after every reservation has
    /// been released, which is how tests detect leaks.
    pub fn reservations(&self) -> usize {
        self.pages.borrow().len()
    }

    /// Number of pages currently committed across all reservations.
    pub fn committed_pages(&self) -> usize {
        self.pages.borrow().committed_pages()
    }

    fn arm(&self, fault: Fault) {
        let mut faults = self.faults.get();
        faults[fault as usize] = true;
        self.faults.set(faults);
    }

    /// Disarms `fault`, returning whether it was armed.
    fn take_fault(&self, fault: Fault) -> bool {
        let mut faults = self.faults.get();
        let armed = std::mem::take(&mut faults[fault as usize]);
        self.faults.set(faults);
        armed
    }
}

impl Default for MockMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider for MockMemory {
    fn reserve(&self, _hint: Option<NonNull<u8>>, size: usize) -> Result<NonNull<u8>, OsError> {
        if self.take_fault(Fault::Reserve) {
            return Err(OsError::Reserve {
                size,
                reason: "injected fault".into(),
            });
        }

        let length = self
            .align_to_granularity(size)
            .filter(|length| *length != 0)
            .ok_or_else(|| OsError::Reserve {
                size,
                reason: "invalid size".into(),
            })?;

        let layout = Layout::from_size_align(length, self.granularity).map_err(|err| OsError::Reserve {
            size,
            reason: err.to_string(),
        })?;

        // SAFETY: layout has non-zero size.
        let address = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or_else(|| OsError::Reserve {
            size,
            reason: "global allocator is out of memory".into(),
        })?;

        let base = address.as_ptr() as usize;
        self.pages.borrow_mut().insert(base, length);
        self.layouts.borrow_mut().insert(base, layout);
        trace!("mock reserved {length} bytes at {base:#x}");

        Ok(address)
    }

    fn commit(&self, address: NonNull<u8>, size: usize) -> Result<NonNull<u8>, OsError> {
        if self.take_fault(Fault::Commit) {
            return Err(OsError::Commit {
                address: address.as_ptr() as usize,
                size,
                reason: "injected fault".into(),
            });
        }

        self.pages
            .borrow_mut()
            .set_committed(address.as_ptr() as usize, size, true)?;

        Ok(address)
    }

    unsafe fn decommit(&self, address: NonNull<u8>, size: usize) -> Result<(), OsError> {
        if self.take_fault(Fault::Decommit) {
            return Err(OsError::Decommit {
                address: address.as_ptr() as usize,
                size,
                reason: "injected fault".into(),
            });
        }

        self.pages
            .borrow_mut()
            .set_committed(address.as_ptr() as usize, size, false)?;

        // Real decommits throw the contents away, so should we. Anyone still
        // reading these bytes sees zeros instead of stale data.
        address.as_ptr().write_bytes(0, size);

        Ok(())
    }

    unsafe fn release(&self, address: NonNull<u8>, size: usize) -> Result<(), OsError> {
        let base = address.as_ptr() as usize;

        if self.take_fault(Fault::Release) {
            return Err(OsError::Release {
                address: base,
                size,
                reason: "injected fault".into(),
            });
        }

        self.pages.borrow_mut().remove(base, size)?;

        if let Some(layout) = self.layouts.borrow_mut().remove(&base) {
            alloc::dealloc(address.as_ptr(), layout);
        }
        trace!("mock released reservation at {base:#x}");

        Ok(())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn allocation_granularity(&self) -> usize {
        self.granularity
    }

    fn is_reserved(&self, address: NonNull<u8>) -> bool {
        self.pages.borrow().is_reserved(address.as_ptr() as usize)
    }

    fn is_committed(&self, address: NonNull<u8>) -> bool {
        self.pages.borrow().is_committed(address.as_ptr() as usize)
    }
}

impl Drop for MockMemory {
    fn drop(&mut self) {
        // Whatever wasn't released goes back to the global allocator so that
        // leaky tests don't also leak in the test process.
        for (base, layout) in std::mem::take(self.layouts.get_mut()) {
            // SAFETY: allocated in `reserve` with this exact layout.
            unsafe { alloc::dealloc(base as *mut u8, layout) };
        }
    }
}
