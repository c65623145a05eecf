//! Address arithmetic over a thread-locals block.
//!
//! Every derived address inside a block is a pure function of the block's
//! base address and the page size; [`BlockLayout`] is the only place that
//! function is written down. All other modules go through it, so the layout
//! can never disagree with itself.

use oryx_sys_mem::alignment;
use oryx_sys_tla::{Tla, tla_size};

use crate::descriptor::NativeThreadDescriptor;

/// Size in bytes of one machine word.
pub const WORD_SIZE: usize = size_of::<usize>();

/// The regions of a thread-locals block, derived from its base address.
///
/// The triggered TLA starts one word before the end of the first page, so
/// exactly its safepoint-latch slot (slot 0) lies on the protected page. The
/// enabled and disabled copies, the native thread descriptor and the stack
/// reference map follow contiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    base: usize,
    page_size: usize,
}

impl BlockLayout {
    /// Describes the block starting at `base`.
    ///
    /// `base` must be page-aligned and `page_size` a power of two; both are
    /// invariants of block allocation, checked here in debug builds only.
    pub fn new(base: usize, page_size: usize) -> Self {
        debug_assert!(page_size.is_power_of_two());
        debug_assert!(alignment::is_aligned(base, page_size));
        Self { base, page_size }
    }

    /// Recovers the layout from the address of the enabled TLA copy.
    ///
    /// Inverse of [`BlockLayout::tla_enabled`]; used by code that only holds
    /// a TLA (e.g. the trap handler) to get back to the block.
    pub fn from_enabled_tla(etla: Tla, page_size: usize) -> Self {
        Self::new(etla.addr() + WORD_SIZE - page_size - tla_size(), page_size)
    }

    /// The block's base address (page-aligned).
    #[inline(always)]
    pub const fn base(self) -> usize {
        self.base
    }

    #[inline(always)]
    pub const fn page_size(self) -> usize {
        self.page_size
    }

    /// Start of the access-protected first page.
    #[inline(always)]
    pub const fn trigger_page(self) -> usize {
        self.base
    }

    /// Start of the triggered TLA copy: the last word of the first page.
    #[inline(always)]
    pub const fn tla_triggered(self) -> usize {
        self.base + self.page_size - WORD_SIZE
    }

    /// Start of the enabled TLA copy.
    #[inline(always)]
    pub const fn tla_enabled(self) -> usize {
        self.tla_triggered() + tla_size()
    }

    /// Start of the disabled TLA copy.
    #[inline(always)]
    pub const fn tla_disabled(self) -> usize {
        self.tla_triggered() + 2 * tla_size()
    }

    /// Start of the native thread descriptor.
    #[inline(always)]
    pub const fn descriptor(self) -> usize {
        self.tla_triggered() + 3 * tla_size()
    }

    /// Start of the stack reference map.
    #[inline(always)]
    pub const fn reference_map(self) -> usize {
        self.descriptor() + size_of::<NativeThreadDescriptor>()
    }

    /// Total block size for a reference map of `ref_map_size` bytes, rounded
    /// up to whole pages.
    pub const fn total_size(page_size: usize, ref_map_size: usize) -> usize {
        let used = page_size - WORD_SIZE
            + 3 * tla_size()
            + size_of::<NativeThreadDescriptor>()
            + ref_map_size;
        alignment::round_up(used, page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 0x1000;

    #[test]
    fn regions_are_contiguous_and_ordered() {
        let l = BlockLayout::new(0x7000_0000, PAGE);
        assert_eq!(l.trigger_page(), l.base());
        assert_eq!(l.tla_triggered(), l.base() + PAGE - WORD_SIZE);
        assert_eq!(l.tla_enabled(), l.tla_triggered() + tla_size());
        assert_eq!(l.tla_disabled(), l.tla_enabled() + tla_size());
        assert_eq!(l.descriptor(), l.tla_disabled() + tla_size());
        assert_eq!(
            l.reference_map(),
            l.descriptor() + size_of::<NativeThreadDescriptor>()
        );
    }

    #[test]
    fn only_the_triggered_latch_word_is_on_the_first_page() {
        let l = BlockLayout::new(0x7000_0000, PAGE);
        let first_page_end = l.base() + PAGE;
        // Slot 0 of the triggered copy is the last word of the page...
        assert_eq!(l.tla_triggered() + WORD_SIZE, first_page_end);
        // ...and every other region starts past it.
        assert!(l.tla_enabled() >= first_page_end);
    }

    #[test]
    fn total_size_covers_all_regions() {
        for ref_map_size in [0usize, 1, 64, 4096, 65536] {
            let total = BlockLayout::total_size(PAGE, ref_map_size);
            assert_eq!(total % PAGE, 0);
            let l = BlockLayout::new(0, PAGE);
            assert!(l.reference_map() + ref_map_size <= total);
        }
    }

    #[test]
    fn total_size_is_deterministic() {
        assert_eq!(
            BlockLayout::total_size(PAGE, 1234),
            BlockLayout::total_size(PAGE, 1234)
        );
    }

    #[test]
    fn from_enabled_tla_inverts_tla_enabled() {
        let l = BlockLayout::new(0x7000_0000, PAGE);
        let etla = unsafe { Tla::from_addr_unchecked(l.tla_enabled()) };
        assert_eq!(BlockLayout::from_enabled_tla(etla, PAGE), l);
    }
}
