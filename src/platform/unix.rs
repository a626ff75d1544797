use std::{io, ptr::NonNull};

use super::{Platform, PlatformSpecificMemory};

fn last_error() -> String {
    io::Error::last_os_error().to_string()
}

impl PlatformSpecificMemory for Platform {
    unsafe fn reserve(hint: Option<NonNull<u8>>, length: usize) -> Result<NonNull<u8>, String> {
        let hint = hint.map_or(std::ptr::null_mut(), |address| address.as_ptr().cast());

        // No access at all. Pages become usable once `commit` flips them to
        // read-write, until then touching them is a segfault instead of a
        // silent write into memory that nobody committed.
        let protection = libc::PROT_NONE;

        // Private to our process and not mapped to any file.
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

        // For all the configuration options that `mmap` accepts see
        // https://man7.org/linux/man-pages/man2/mmap.2.html
        match libc::mmap(hint, length, protection, flags, -1, 0) {
            libc::MAP_FAILED => Err(last_error()),
            address => NonNull::new(address.cast()).ok_or_else(|| "mmap returned null".to_owned()),
        }
    }

    unsafe fn commit(address: NonNull<u8>, length: usize) -> Result<(), String> {
        let protection = libc::PROT_READ | libc::PROT_WRITE;

        match libc::mprotect(address.as_ptr().cast(), length, protection) {
            0 => Ok(()),
            _ => Err(last_error()),
        }
    }

    unsafe fn decommit(address: NonNull<u8>, length: usize) -> Result<(), String> {
        // Let the kernel drop the physical pages first, then make the range
        // inaccessible again. On Linux the next commit sees zeroed pages.
        if libc::madvise(address.as_ptr().cast(), length, libc::MADV_DONTNEED) != 0 {
            return Err(last_error());
        }

        match libc::mprotect(address.as_ptr().cast(), length, libc::PROT_NONE) {
            0 => Ok(()),
            _ => Err(last_error()),
        }
    }

    unsafe fn release(address: NonNull<u8>, length: usize) -> Result<(), String> {
        match libc::munmap(address.as_ptr().cast(), length) {
            0 => Ok(()),
            _ => Err(last_error()),
        }
    }

    unsafe fn page_size_and_granularity() -> (usize, usize) {
        let page_size = libc::sysconf(libc::_SC_PAGESIZE) as usize;
        (page_size, page_size)
    }
}
