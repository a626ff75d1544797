use std::{io, mem::MaybeUninit, ptr::NonNull};

use windows::Win32::System::{Memory, SystemInformation};

use super::{Platform, PlatformSpecificMemory};

fn last_error() -> String {
    io::Error::last_os_error().to_string()
}

impl PlatformSpecificMemory for Platform {
    unsafe fn reserve(hint: Option<NonNull<u8>>, length: usize) -> Result<NonNull<u8>, String> {
        let hint = hint.map(|address| address.as_ptr().cast_const().cast());

        // Unlike mmap, Windows splits this in two steps on its own: reserve
        // the address space now and commit pages later. See
        // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualalloc#parameters
        let address = Memory::VirtualAlloc(hint, length, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

        // The hint is only a preference, retry anywhere if it's taken.
        let address = if address.is_null() && hint.is_some() {
            Memory::VirtualAlloc(None, length, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS)
        } else {
            address
        };

        NonNull::new(address.cast()).ok_or_else(last_error)
    }

    unsafe fn commit(address: NonNull<u8>, length: usize) -> Result<(), String> {
        let address = address.as_ptr().cast_const().cast();
        let committed = Memory::VirtualAlloc(Some(address), length, Memory::MEM_COMMIT, Memory::PAGE_READWRITE);

        if committed.is_null() {
            Err(last_error())
        } else {
            Ok(())
        }
    }

    unsafe fn decommit(address: NonNull<u8>, length: usize) -> Result<(), String> {
        if Memory::VirtualFree(address.as_ptr().cast(), length, Memory::MEM_DECOMMIT).as_bool() {
            Ok(())
        } else {
            Err(last_error())
        }
    }

    unsafe fn release(address: NonNull<u8>, _length: usize) -> Result<(), String> {
        // MEM_RELEASE requires a length of 0 and releases the entire
        // reservation, committed pages included. See
        // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualfree#parameters
        if Memory::VirtualFree(address.as_ptr().cast(), 0, Memory::MEM_RELEASE).as_bool() {
            Ok(())
        } else {
            Err(last_error())
        }
    }

    unsafe fn page_size_and_granularity() -> (usize, usize) {
        let mut system_info = MaybeUninit::uninit();
        SystemInformation::GetSystemInfo(system_info.as_mut_ptr());
        let system_info = system_info.assume_init();

        (
            system_info.dwPageSize as usize,
            system_info.dwAllocationGranularity as usize,
        )
    }
}
