//! The native thread descriptor embedded in every thread-locals block.
//!
//! This is the C-compatible mirror of a thread that the trap handler and the
//! teardown path read without any VM-level cooperation: stack bounds, guard
//! zone addresses and protection states, and the block's own allocation
//! parameters. It lives inside the block (see `BlockLayout::descriptor`), so
//! it is reachable from any TLA copy via the `NativeThreadLocals` slot.

use core::ffi::c_void;

use static_assertions::const_assert;

/// Per-thread native state, stored inside the thread-locals block.
///
/// Addresses and sizes are plain `usize` so the struct can be inspected from
/// signal handlers and crash dumpers without pointer provenance concerns.
/// All fields are written by block initialization on the owning thread;
/// the guard zone protection flags are additionally toggled by the guard
/// module.
#[repr(C)]
#[derive(Debug)]
pub struct NativeThreadDescriptor {
    /// Lowest address of the thread's stack.
    pub stack_base: usize,
    /// Size of the stack in bytes.
    pub stack_size: usize,
    /// OS handle of the owning thread.
    pub handle: libc::pthread_t,
    /// Base address of the thread-locals block containing this descriptor.
    pub tl_block: usize,
    /// Size in bytes of the thread-locals block.
    pub tl_block_size: usize,
    /// Size in bytes of the stack reference map at the end of the block.
    ///
    /// Written at allocation time, before the owning thread exists, so that
    /// the second initialization phase needs no extra parameters.
    pub ref_map_size: usize,
    /// Lowest address of the red zone page(s).
    pub red_zone: usize,
    /// Lowest address of the yellow zone page(s).
    pub yellow_zone: usize,
    /// Lowest address of the blue zone page(s).
    pub blue_zone: usize,
    /// Non-zero while the red zone is access-protected by this substrate.
    pub red_zone_is_protected: usize,
    /// Non-zero while the yellow zone is access-protected.
    pub yellow_zone_is_protected: usize,
    /// Non-zero while the blue zone is access-protected.
    pub blue_zone_is_protected: usize,
    /// Opaque per-OS extension data; null unless a platform layer claims it.
    pub os_data: *mut c_void,
}

impl NativeThreadDescriptor {
    /// An all-zero descriptor, the state of a freshly allocated block.
    pub const fn zeroed() -> Self {
        Self {
            stack_base: 0,
            stack_size: 0,
            handle: 0 as libc::pthread_t,
            tl_block: 0,
            tl_block_size: 0,
            ref_map_size: 0,
            red_zone: 0,
            yellow_zone: 0,
            blue_zone: 0,
            red_zone_is_protected: 0,
            yellow_zone_is_protected: 0,
            blue_zone_is_protected: 0,
            os_data: core::ptr::null_mut(),
        }
    }

    /// One past the highest stack address.
    #[inline(always)]
    pub const fn stack_end(&self) -> usize {
        self.stack_base + self.stack_size
    }
}

// The block layout places the reference map directly after the descriptor
// at a word-aligned offset; the struct must not change that.
const_assert!(size_of::<NativeThreadDescriptor>() % size_of::<usize>() == 0);
const_assert!(align_of::<NativeThreadDescriptor>() == align_of::<usize>());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_descriptor_has_no_state() {
        let ntl = NativeThreadDescriptor::zeroed();
        assert_eq!(ntl.stack_base, 0);
        assert_eq!(ntl.stack_end(), 0);
        assert_eq!(ntl.tl_block_size, 0);
        assert!(ntl.os_data.is_null());
    }

    #[test]
    fn stack_end_is_base_plus_size() {
        let mut ntl = NativeThreadDescriptor::zeroed();
        ntl.stack_base = 0x1000;
        ntl.stack_size = 0x8000;
        assert_eq!(ntl.stack_end(), 0x9000);
    }
}
