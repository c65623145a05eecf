//! Page-aligned anonymous mappings and page-level protection.
//!
//! The thread-locals block and the stack guard zones are built on two
//! primitives: a page-aligned, zero-initialized allocation, and the ability
//! to revoke/restore all access to a page range so that a stray access
//! becomes a trap instead of a corruption.

use core::{ffi::c_void, ptr, ptr::NonNull};

use crate::alignment;

/// Allocates a page-aligned, zero-initialized anonymous mapping.
///
/// `size` must be non-zero and a multiple of the page size. The returned
/// region is readable and writable; release it with [`free`].
pub fn allocate(size: usize) -> Result<NonNull<c_void>, AllocError> {
    if size == 0 {
        return Err(AllocError::InvalidSize);
    }
    if !alignment::is_aligned(size, alignment::page_size()) {
        return Err(AllocError::InvalidAlignment);
    }

    // SAFETY: Anonymous private mapping with no address hint; the kernel
    // picks a page-aligned region or reports failure.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(AllocError::Os(std::io::Error::last_os_error()));
    }

    // MAP_FAILED is the only error sentinel; a successful mapping is non-null.
    NonNull::new(ptr).ok_or_else(|| AllocError::Os(std::io::Error::last_os_error()))
}

/// Releases a mapping previously returned by [`allocate`].
///
/// # Safety
/// - `ptr` and `size` must denote exactly one region obtained from
///   [`allocate`] that has not been freed yet.
/// - No live references into the region may outlive this call.
pub unsafe fn free(ptr: NonNull<c_void>, size: usize) -> Result<(), FreeError> {
    // SAFETY: The caller guarantees this is a live mapping of `size` bytes.
    let rc = unsafe { libc::munmap(ptr.as_ptr(), size) };
    if rc != 0 {
        return Err(FreeError::Os(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Revokes all access to a page range.
///
/// Any subsequent read or write in the range faults. Re-protecting an
/// already inaccessible range succeeds and is a no-op at the OS level.
///
/// # Safety
/// - `[addr, addr + len)` must lie within a mapping owned by the caller and
///   be page-aligned on both ends.
/// - The caller must guarantee nothing accesses the range while protected
///   except code prepared to handle the fault.
pub unsafe fn protect(addr: NonNull<c_void>, len: usize) -> Result<(), ProtectError> {
    // SAFETY: Range validity is the caller's contract.
    let rc = unsafe { libc::mprotect(addr.as_ptr(), len, libc::PROT_NONE) };
    if rc != 0 {
        return Err(ProtectError::Os {
            addr: addr.as_ptr() as usize,
            len,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Restores read/write access to a page range previously revoked by
/// [`protect`].
///
/// # Safety
/// - Same range requirements as [`protect`].
pub unsafe fn unprotect(addr: NonNull<c_void>, len: usize) -> Result<(), ProtectError> {
    // SAFETY: Range validity is the caller's contract.
    let rc = unsafe { libc::mprotect(addr.as_ptr(), len, libc::PROT_READ | libc::PROT_WRITE) };
    if rc != 0 {
        return Err(ProtectError::Os {
            addr: addr.as_ptr() as usize,
            len,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Errors that can occur when allocating a page-aligned mapping.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// Size must be non-zero.
    #[error("Size must be non-zero")]
    InvalidSize,

    /// Size must be a multiple of the page size.
    #[error("Size must be page-aligned")]
    InvalidAlignment,

    /// The kernel refused the mapping.
    #[error("Anonymous mapping failed: {0}")]
    Os(#[source] std::io::Error),
}

/// Errors that can occur when releasing a mapping.
#[derive(Debug, thiserror::Error)]
pub enum FreeError {
    /// The kernel refused the unmap.
    #[error("Unmapping failed: {0}")]
    Os(#[source] std::io::Error),
}

/// Errors that can occur when toggling page protection.
#[derive(Debug, thiserror::Error)]
pub enum ProtectError {
    /// The kernel refused the protection change.
    #[error("Protection change failed for {len:#x} bytes at {addr:#x}: {source}")]
    Os {
        addr: usize,
        len: usize,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment;

    #[test]
    fn allocate_returns_page_aligned_zeroed_memory() {
        let page = alignment::page_size();
        let size = 4 * page;
        let ptr = allocate(size).expect("allocate failed");
        assert!(alignment::is_aligned(ptr.as_ptr() as usize, page));

        let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr() as *const u8, size) };
        assert!(bytes.iter().all(|&b| b == 0));

        unsafe { free(ptr, size).expect("free failed") };
    }

    #[test]
    fn allocate_rejects_bad_sizes() {
        assert!(matches!(allocate(0), Err(AllocError::InvalidSize)));
        assert!(matches!(allocate(123), Err(AllocError::InvalidAlignment)));
    }

    #[test]
    fn protect_roundtrip_restores_access() {
        let page = alignment::page_size();
        let size = 2 * page;
        let ptr = allocate(size).expect("allocate failed");

        unsafe {
            protect(ptr, page).expect("protect failed");
            // Protecting an already protected range is a no-op, not an error.
            protect(ptr, page).expect("re-protect failed");
            unprotect(ptr, page).expect("unprotect failed");
            unprotect(ptr, page).expect("re-unprotect failed");

            // Access restored: the first page is writable again.
            (ptr.as_ptr() as *mut u8).write(0xAB);
            assert_eq!((ptr.as_ptr() as *const u8).read(), 0xAB);

            free(ptr, size).expect("free failed");
        }
    }
}
