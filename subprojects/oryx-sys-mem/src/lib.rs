//! Page-granular memory provider for the Oryx runtime substrate.
//!
//! Everything the thread-locals block machinery needs from the host
//! virtual-memory system lives here: the platform page size, alignment
//! arithmetic, page-aligned anonymous mappings, and page-level protection
//! toggling. Higher layers never call `mmap`/`mprotect` directly.

pub mod alignment;
pub mod page;
