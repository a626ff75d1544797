//! The OS memory provider contract and its implementations.
//!
//! Allocators in this crate only need four things from the kernel: reserve a
//! range of address space, commit pages inside it so they can be touched,
//! decommit them again and finally release the whole range. They don't care
//! which APIs provide that, so the contract is a trait, [`MemoryProvider`],
//! with two implementations:
//!
//! - [`SystemMemory`] talks to the real kernel (`mmap`, `mprotect`, `madvise`
//!   and `munmap` on Unix; `VirtualAlloc` and `VirtualFree` on Windows).
//!
//! - [`MockMemory`] fakes all of it on top of the global allocator so that
//!   allocator logic can be tested without system calls, with failure
//!   injection for the error paths.
//!
//! ```text
//!        reserve              commit            decommit            release
//!   ---------------->  +------------------+  -------------->  +--------------+
//!   address space is   | pages are backed |  pages lose their | address space |
//!   claimed, nothing   | by memory, reads |  contents, range  | goes back to  |
//!   can be touched     | and writes work  |  stays reserved   | the kernel    |
//!                      +------------------+                   +--------------+
//! ```

use std::{cell::RefCell, ptr::NonNull};

use log::{trace, warn};

use crate::{align, error::OsError};

mod mock;
mod pages;

pub use mock::MockMemory;
pub(crate) use pages::PageTable;

/// The OS memory provider contract consumed by [`crate::Reservation`].
///
/// Methods take `&self` so that several reservations can share one provider.
/// Implementations keep their bookkeeping behind interior mutability, which is
/// fine because nothing in this crate is meant to be used from more than one
/// thread at a time.
pub trait MemoryProvider {
    /// Claims `size` bytes of address space without backing them with memory.
    /// `hint` is a preferred base address that may be ignored.
    fn reserve(&self, hint: Option<NonNull<u8>>, size: usize) -> Result<NonNull<u8>, OsError>;

    /// Backs `[address, address + size)` with memory, which must lie inside a
    /// range returned by [`MemoryProvider::reserve`]. Returns the first
    /// committed address.
    fn commit(&self, address: NonNull<u8>, size: usize) -> Result<NonNull<u8>, OsError>;

    /// Drops the backing memory of `[address, address + size)` but keeps the
    /// range reserved.
    ///
    /// # Safety
    ///
    /// Nobody may read or write those bytes afterwards until they are
    /// committed again.
    unsafe fn decommit(&self, address: NonNull<u8>, size: usize) -> Result<(), OsError>;

    /// Returns a whole reserved range to the kernel. `address` and `size` must
    /// be exactly what [`MemoryProvider::reserve`] returned and was asked for.
    ///
    /// # Safety
    ///
    /// Nobody may touch any byte of the range afterwards.
    unsafe fn release(&self, address: NonNull<u8>, size: usize) -> Result<(), OsError>;

    /// Virtual memory page size in bytes.
    fn page_size(&self) -> usize;

    /// Alignment of the base addresses returned by
    /// [`MemoryProvider::reserve`]. Same as the page size on Unix, usually
    /// 64 KiB on Windows.
    fn allocation_granularity(&self) -> usize;

    /// Whether `address` falls inside a reserved range.
    fn is_reserved(&self, address: NonNull<u8>) -> bool;

    /// Whether the page containing `address` is committed.
    fn is_committed(&self, address: NonNull<u8>) -> bool;

    /// Rounds `size` up to a multiple of [`MemoryProvider::page_size`].
    fn align_to_page(&self, size: usize) -> Option<usize> {
        align::align_up(size, self.page_size())
    }

    /// Rounds `size` up to a multiple of
    /// [`MemoryProvider::allocation_granularity`].
    fn align_to_granularity(&self, size: usize) -> Option<usize> {
        align::align_up(size, self.allocation_granularity())
    }
}

/// Low level system calls, one implementation per OS. Mirrors
/// [`MemoryProvider`] minus the bookkeeping, which [`SystemMemory`] adds on
/// top.
trait PlatformSpecificMemory {
    /// Reserves `length` bytes with no access rights.
    unsafe fn reserve(hint: Option<NonNull<u8>>, length: usize) -> Result<NonNull<u8>, String>;

    /// Makes `length` bytes at `address` readable and writable.
    unsafe fn commit(address: NonNull<u8>, length: usize) -> Result<(), String>;

    /// Throws away the contents of `length` bytes at `address` and removes
    /// access rights.
    unsafe fn decommit(address: NonNull<u8>, length: usize) -> Result<(), String>;

    /// Unmaps the whole reservation.
    unsafe fn release(address: NonNull<u8>, length: usize) -> Result<(), String>;

    /// Page size and allocation granularity, in that order.
    unsafe fn page_size_and_granularity() -> (usize, usize);
}

/// Zero sized type that implements [`PlatformSpecificMemory`] for each OS.
struct Platform;

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

/// [`MemoryProvider`] backed by the real virtual memory system.
///
/// Page size and granularity are queried once when the provider is built and
/// then reused, there's no global state involved.
#[derive(Debug)]
pub struct SystemMemory {
    page_size: usize,
    granularity: usize,
    pages: RefCell<PageTable>,
}

impl SystemMemory {
    pub fn new() -> Self {
        // SAFETY: querying system information has no preconditions.
        let (page_size, granularity) = unsafe { Platform::page_size_and_granularity() };

        Self {
            page_size,
            granularity,
            pages: RefCell::new(PageTable::new(page_size)),
        }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider for SystemMemory {
    fn reserve(&self, hint: Option<NonNull<u8>>, size: usize) -> Result<NonNull<u8>, OsError> {
        let length = self.align_to_granularity(size).ok_or_else(|| OsError::Reserve {
            size,
            reason: "size overflows the address space".into(),
        })?;

        // SAFETY: a fresh mapping with no access rights can't alias anything.
        let address = unsafe { Platform::reserve(hint, length) }.map_err(|reason| OsError::Reserve { size, reason })?;

        trace!("reserved {length} bytes at {address:?}");
        self.pages.borrow_mut().insert(address.as_ptr() as usize, length);

        Ok(address)
    }

    fn commit(&self, address: NonNull<u8>, size: usize) -> Result<NonNull<u8>, OsError> {
        let start = align::align_down(address.as_ptr() as usize, self.page_size);
        let mut pages = self.pages.borrow_mut();

        // Validate before touching the kernel so that a bogus range can never
        // change protections of memory we don't own.
        if !pages.is_reserved(start) {
            return Err(OsError::NotReserved {
                address: address.as_ptr() as usize,
                size,
            });
        }
        pages.set_committed(address.as_ptr() as usize, size, true)?;

        // SAFETY: the range lies inside one of our reservations.
        if let Err(reason) = unsafe { Platform::commit(address, size) } {
            pages.set_committed(address.as_ptr() as usize, size, false)?;
            return Err(OsError::Commit {
                address: address.as_ptr() as usize,
                size,
                reason,
            });
        }

        Ok(address)
    }

    unsafe fn decommit(&self, address: NonNull<u8>, size: usize) -> Result<(), OsError> {
        let mut pages = self.pages.borrow_mut();
        if !pages.is_reserved(address.as_ptr() as usize) {
            return Err(OsError::NotReserved {
                address: address.as_ptr() as usize,
                size,
            });
        }

        Platform::decommit(address, size).map_err(|reason| OsError::Decommit {
            address: address.as_ptr() as usize,
            size,
            reason,
        })?;

        pages.set_committed(address.as_ptr() as usize, size, false)
    }

    unsafe fn release(&self, address: NonNull<u8>, size: usize) -> Result<(), OsError> {
        let base = address.as_ptr() as usize;
        let mut pages = self.pages.borrow_mut();

        // Reserve rounded the length up, unmap what was actually mapped.
        let Some(length) = pages.reserved_size(base) else {
            return Err(OsError::NotReserved { address: base, size });
        };

        Platform::release(address, length).map_err(|reason| OsError::Release {
            address: base,
            size,
            reason,
        })?;

        pages.remove(base, size)?;
        trace!("released {length} bytes at {address:?}");

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

impl Drop for SystemMemory {
    fn drop(&mut self) {
        // Reservations normally release themselves before the provider goes
        // away, anything left here was leaked by a caller.
        for (base, length) in self.pages.get_mut().drain() {
            warn!("system memory provider dropped with {length} bytes still reserved at {base:#x}");
            if let Some(address) = NonNull::new(base as *mut u8) {
                // SAFETY: the range was reserved by us and nothing can use it
                // once the provider is gone.
                if let Err(reason) = unsafe { Platform::release(address, length) } {
                    warn!("failed to release leaked range at {base:#x}: {reason}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_memory_round_trip() {
        let memory = SystemMemory::new();
        let page = memory.page_size();
        assert!(align::is_power_of_two(page));
        assert!(memory.allocation_granularity() >= page);

        let base = memory.reserve(None, 4 * page).unwrap();
        assert!(memory.is_reserved(base));
        assert!(!memory.is_committed(base));

        let second_page = NonNull::new(unsafe { base.as_ptr().add(page) }).unwrap();
        memory.commit(second_page, page).unwrap();
        assert!(memory.is_committed(second_page));
        assert!(!memory.is_committed(base));

        unsafe {
            second_page.as_ptr().write_bytes(0xAB, page);
            assert_eq!(*second_page.as_ptr().add(page - 1), 0xAB);
            memory.decommit(second_page, page).unwrap();
        }
        assert!(!memory.is_committed(second_page));

        unsafe { memory.release(base, 4 * page).unwrap() };
        assert!(!memory.is_reserved(base));
    }

    #[test]
    fn commit_outside_reservation_fails() {
        let memory = SystemMemory::new();
        let mut local = 0u8;
        let bogus = NonNull::from(&mut local);

        assert!(matches!(
            memory.commit(bogus, 1),
            Err(OsError::NotReserved { .. })
        ));
    }
}
