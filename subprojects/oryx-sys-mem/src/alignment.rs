//! Memory alignment utilities for page-aligned operations.
//!
//! The page size is a property of the host, so every helper takes it as an
//! explicit parameter; [`page_size`] queries and caches the platform value.

use std::sync::OnceLock;

/// Returns the platform page size in bytes.
///
/// The value is queried from the OS once and cached for the lifetime of the
/// process. Falls back to 4 KiB if the query fails.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 { 0x1000 } else { size as usize }
    })
}

/// Checks if a value (address or size) is page-aligned.
///
/// `page_size` must be a power of two.
#[inline]
pub const fn is_aligned(value: usize, page_size: usize) -> bool {
    value & (page_size - 1) == 0
}

/// Rounds up a value to the next page boundary.
///
/// If the value is already page-aligned, it returns the same value.
#[inline]
pub const fn round_up(value: usize, page_size: usize) -> usize {
    if value == 0 {
        0
    } else {
        (value + page_size - 1) & !(page_size - 1)
    }
}

/// Rounds down a value to the previous page boundary.
///
/// If the value is already page-aligned, it returns the same value.
#[inline]
pub const fn round_down(value: usize, page_size: usize) -> usize {
    value & !(page_size - 1)
}

/// Calculates the number of pages needed to cover a given size.
#[inline]
pub const fn pages_needed(size: usize, page_size: usize) -> usize {
    if size == 0 {
        0
    } else {
        (size + page_size - 1) / page_size
    }
}
