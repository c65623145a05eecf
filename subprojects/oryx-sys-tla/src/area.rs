//! The [`Tla`] accessor type.
//!
//! A `Tla` is a typed view over one of the three thread-local-area copies
//! inside a thread-locals block. It is `Copy` and pointer-sized; all slot
//! access goes through it so that no caller performs manual address
//! arithmetic over the block.
//!
//! Slot loads and stores are volatile: the safepoint latch slot is written
//! by other threads (the one sanctioned cross-thread write), and the
//! compiler must not cache or tear those accesses.

use core::{fmt, ptr, ptr::NonNull};

use crate::slots::{SLOT_COUNT, ThreadLocal};

/// A thread-local area: `SLOT_COUNT` word-sized slots at a fixed address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tla(NonNull<usize>);

impl Tla {
    /// Wraps a raw pointer to the first slot of an area.
    ///
    /// # Safety
    /// - `ptr` must point to at least [`SLOT_COUNT`] consecutive words that
    ///   live as long as any use of the returned value.
    #[inline]
    pub const unsafe fn from_ptr(ptr: NonNull<usize>) -> Self {
        Self(ptr)
    }

    /// Wraps a raw address known to be a valid area base.
    ///
    /// # Safety
    /// - `addr` must be non-zero and satisfy the [`Tla::from_ptr`] contract.
    #[inline]
    pub const unsafe fn from_addr_unchecked(addr: usize) -> Self {
        // SAFETY: The caller guarantees `addr` is non-zero.
        Self(unsafe { NonNull::new_unchecked(addr as *mut usize) })
    }

    /// The area's base address.
    #[inline(always)]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Raw pointer to the first slot.
    #[inline(always)]
    pub fn as_ptr(self) -> *mut usize {
        self.0.as_ptr()
    }

    /// Reads the value of a slot in this copy only.
    ///
    /// # Safety
    /// - The slot's backing word must be accessible: reading any slot of a
    ///   fully mapped copy is fine, but the triggered copy's latch slot lies
    ///   on the protected page and faults.
    #[inline(always)]
    pub unsafe fn get(self, slot: ThreadLocal) -> usize {
        // SAFETY: `slot.index() < SLOT_COUNT` by construction; the caller
        // guarantees the word is accessible.
        unsafe { ptr::read_volatile(self.0.as_ptr().add(slot.index())) }
    }

    /// Writes a value into a slot in this copy only.
    ///
    /// # Safety
    /// - Same accessibility contract as [`Tla::get`].
    #[inline(always)]
    pub unsafe fn set(self, slot: ThreadLocal, value: usize) {
        // SAFETY: `slot.index() < SLOT_COUNT` by construction; the caller
        // guarantees the word is accessible.
        unsafe { ptr::write_volatile(self.0.as_ptr().add(slot.index()), value) }
    }

    /// The address of a slot within this copy.
    ///
    /// Never dereferences; safe to compute even for the triggered copy's
    /// latch slot.
    #[inline(always)]
    pub fn address_of(self, slot: ThreadLocal) -> NonNull<usize> {
        // SAFETY: Offsetting within the area keeps the pointer non-null.
        unsafe { NonNull::new_unchecked(self.0.as_ptr().add(slot.index())) }
    }

    /// The enabled sibling copy, read from this copy's `Etla` slot.
    ///
    /// # Safety
    /// - This copy's navigation slots must have been initialized, and the
    ///   `Etla` slot must be readable from this copy.
    #[inline]
    pub unsafe fn enabled(self) -> Tla {
        // SAFETY: Initialization stores a non-zero sibling address.
        unsafe { Tla::from_addr_unchecked(self.get(ThreadLocal::Etla)) }
    }

    /// The disabled sibling copy, read from this copy's `Dtla` slot.
    ///
    /// # Safety
    /// - Same contract as [`Tla::enabled`].
    #[inline]
    pub unsafe fn disabled(self) -> Tla {
        // SAFETY: Initialization stores a non-zero sibling address.
        unsafe { Tla::from_addr_unchecked(self.get(ThreadLocal::Dtla)) }
    }

    /// The triggered sibling copy, read from this copy's `Ttla` slot.
    ///
    /// # Safety
    /// - Same contract as [`Tla::enabled`].
    #[inline]
    pub unsafe fn triggered(self) -> Tla {
        // SAFETY: Initialization stores a non-zero sibling address.
        unsafe { Tla::from_addr_unchecked(self.get(ThreadLocal::Ttla)) }
    }

    /// Writes `value` into the same slot of the enabled, disabled and
    /// triggered copies.
    ///
    /// For slots that must be visible regardless of safepoint state (e.g.
    /// `Id`, `NativeEnv`). Not atomic across the three copies with respect
    /// to a concurrent safepoint trigger; only use it for slots whose update
    /// is idempotent under redirection.
    ///
    /// # Safety
    /// - The navigation slots of this copy must be initialized.
    /// - `slot` must not be the safepoint latch: the triggered copy's latch
    ///   word lives on the protected page.
    pub unsafe fn triple_set(self, slot: ThreadLocal, value: usize) {
        debug_assert!(
            slot != ThreadLocal::SafepointLatch,
            "the safepoint latch is never triple-written"
        );
        // SAFETY: Per the function contract, the sibling copies are wired up
        // and `slot` is outside the protected page in all three copies.
        unsafe {
            self.enabled().set(slot, value);
            self.disabled().set(slot, value);
            self.triggered().set(slot, value);
        }
    }

    /// Zeroes every slot of this copy.
    ///
    /// # Safety
    /// - All `SLOT_COUNT` words of this copy must be writable (i.e. the
    ///   trigger page, if this is the triggered copy, is not yet protected).
    pub unsafe fn zero(self) {
        // SAFETY: The caller guarantees the full area is writable.
        unsafe { ptr::write_bytes(self.0.as_ptr(), 0, SLOT_COUNT) }
    }

    /// A read-only, `Display`-able dump of this copy's named slots.
    ///
    /// # Safety
    /// - Every named slot of this copy must be readable for as long as the
    ///   dump is formatted (in particular, not the triggered copy).
    pub unsafe fn dump(self) -> TlaDump {
        TlaDump(self)
    }
}

/// Human-readable dump of the named slots of one TLA copy.
///
/// Produced by [`Tla::dump`]; formatting reads the slots but mutates
/// nothing.
pub struct TlaDump(Tla);

impl fmt::Display for TlaDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TLA {:#x}:", self.0.addr())?;
        for &slot in ThreadLocal::ALL {
            // SAFETY: Tla::dump's contract makes every named slot readable.
            let value = unsafe { self.0.get(slot) };
            writeln!(f, "  {:<24} [{:>2}] = {:#x}", slot.name(), slot.index(), value)?;
        }
        Ok(())
    }
}
