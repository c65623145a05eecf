//! Stack guard zones.
//!
//! Three zones sit at the low end of every VM thread's stack, ordered
//! red < yellow < blue from the bottom up:
//!
//! - **red**: hitting it means the overflow handler itself overflowed;
//!   the process cannot continue.
//! - **yellow**: the recoverable overflow tripwire. The trap handler
//!   unprotects it to gain working room, raises the language-level overflow
//!   error, and re-protects it once the stack unwinds past it.
//! - **blue**: optional, for platforms that commit stack lazily; not
//!   protected by default.
//!
//! Zone addresses and protection states live in the thread's
//! [`NativeThreadDescriptor`], so protect/unprotect are idempotent per zone
//! and the teardown path can tell exactly what to undo.

use core::{ffi::c_void, ptr::NonNull};

use oryx_sys_mem::{alignment, page};

use crate::descriptor::NativeThreadDescriptor;

/// Pages in each guard zone.
pub const RED_ZONE_PAGES: usize = 1;
pub const YELLOW_ZONE_PAGES: usize = 1;
pub const BLUE_ZONE_PAGES: usize = 1;

/// Minimum pages of usable stack that must remain above the zones.
const MIN_USABLE_PAGES: usize = 4;

/// One of the three stack guard zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardZone {
    Red,
    Yellow,
    Blue,
}

impl GuardZone {
    pub const fn pages(self) -> usize {
        match self {
            GuardZone::Red => RED_ZONE_PAGES,
            GuardZone::Yellow => YELLOW_ZONE_PAGES,
            GuardZone::Blue => BLUE_ZONE_PAGES,
        }
    }

    pub fn size(self) -> usize {
        self.pages() * alignment::page_size()
    }

    fn base(self, ntl: &NativeThreadDescriptor) -> usize {
        match self {
            GuardZone::Red => ntl.red_zone,
            GuardZone::Yellow => ntl.yellow_zone,
            GuardZone::Blue => ntl.blue_zone,
        }
    }

    fn flag(self, ntl: &NativeThreadDescriptor) -> usize {
        match self {
            GuardZone::Red => ntl.red_zone_is_protected,
            GuardZone::Yellow => ntl.yellow_zone_is_protected,
            GuardZone::Blue => ntl.blue_zone_is_protected,
        }
    }

    fn set_flag(self, ntl: &mut NativeThreadDescriptor, protected: bool) {
        let value = protected as usize;
        match self {
            GuardZone::Red => ntl.red_zone_is_protected = value,
            GuardZone::Yellow => ntl.yellow_zone_is_protected = value,
            GuardZone::Blue => ntl.blue_zone_is_protected = value,
        }
    }
}

/// Computes the zone addresses from the descriptor's stack bounds and
/// protects the red and yellow zones. The blue zone address is recorded but
/// left accessible.
///
/// # Safety
/// - `ntl.stack_base`/`ntl.stack_size` must describe a live stack mapping
///   owned by the calling thread, with no frames in the zone range.
pub unsafe fn install(ntl: &mut NativeThreadDescriptor) -> Result<(), GuardError> {
    if ntl.stack_base == 0 || ntl.stack_size == 0 {
        return Err(GuardError::MissingStackBounds);
    }
    let page_size = alignment::page_size();
    let red = alignment::round_up(ntl.stack_base, page_size);
    let yellow = red + RED_ZONE_PAGES * page_size;
    let blue = yellow + YELLOW_ZONE_PAGES * page_size;
    let zones_end = blue + BLUE_ZONE_PAGES * page_size;
    if zones_end + MIN_USABLE_PAGES * page_size > ntl.stack_end() {
        return Err(GuardError::StackTooSmall {
            stack_size: ntl.stack_size,
        });
    }
    ntl.red_zone = red;
    ntl.yellow_zone = yellow;
    ntl.blue_zone = blue;

    // SAFETY: The zone pages lie inside the stack mapping, below any frame,
    // per the function contract.
    unsafe {
        protect(ntl, GuardZone::Red)?;
        if let Err(err) = protect(ntl, GuardZone::Yellow) {
            let _ = unprotect(ntl, GuardZone::Red);
            return Err(err.into());
        }
    }
    Ok(())
}

/// Access-protects one guard zone. Idempotent: protecting an already
/// protected zone is a no-op.
///
/// # Safety
/// - The zone addresses in `ntl` must have been set by [`install`] and the
///   underlying stack mapping must still be live.
pub unsafe fn protect(
    ntl: &mut NativeThreadDescriptor,
    zone: GuardZone,
) -> Result<(), page::ProtectError> {
    if is_protected(ntl, zone) {
        return Ok(());
    }
    // A zero base means install has not run; there is nothing to protect.
    let Some(base) = NonNull::new(zone.base(ntl) as *mut c_void) else {
        return Ok(());
    };
    // SAFETY: Per the function contract the range is a live stack mapping.
    unsafe { page::protect(base, zone.size())? };
    zone.set_flag(ntl, true);
    Ok(())
}

/// Restores access to one guard zone. Idempotent.
///
/// # Safety
/// - Same contract as [`protect`].
pub unsafe fn unprotect(
    ntl: &mut NativeThreadDescriptor,
    zone: GuardZone,
) -> Result<(), page::ProtectError> {
    if !is_protected(ntl, zone) {
        return Ok(());
    }
    let Some(base) = NonNull::new(zone.base(ntl) as *mut c_void) else {
        return Ok(());
    };
    // SAFETY: Per the function contract the range is a live stack mapping.
    unsafe { page::unprotect(base, zone.size())? };
    zone.set_flag(ntl, false);
    Ok(())
}

/// Whether this substrate currently has the zone access-protected.
pub fn is_protected(ntl: &NativeThreadDescriptor, zone: GuardZone) -> bool {
    zone.flag(ntl) != 0
}

/// Whether `addr` falls inside the given zone.
pub fn zone_contains(ntl: &NativeThreadDescriptor, zone: GuardZone, addr: usize) -> bool {
    let base = zone.base(ntl);
    base != 0 && addr >= base && addr < base + zone.size()
}

/// Restores access to every protected zone, ignoring failures.
///
/// Teardown path only: the stack may already be half-dismantled, so each
/// zone is attempted independently and errors are swallowed.
///
/// # Safety
/// - `ntl` must be the descriptor of the calling thread's block.
pub unsafe fn remove_all(ntl: &mut NativeThreadDescriptor) {
    for zone in [GuardZone::Red, GuardZone::Yellow, GuardZone::Blue] {
        if zone.base(ntl) != 0 {
            // SAFETY: Zone addresses were set by install on this stack.
            let _ = unsafe { unprotect(ntl, zone) };
        }
    }
}

/// Guard zone installation failed.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The descriptor carries no stack bounds.
    #[error("Descriptor has no stack bounds; initialize them before installing guard zones")]
    MissingStackBounds,

    /// The stack cannot hold the zones plus a minimum of usable space.
    #[error("Stack of {stack_size:#x} bytes is too small for guard zones")]
    StackTooSmall { stack_size: usize },

    /// The kernel refused a protection change.
    #[error(transparent)]
    Protect(#[from] page::ProtectError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use oryx_sys_mem::page;

    /// A synthetic "stack": a plain anonymous mapping the tests treat as a
    /// stack region, so no live thread stack is ever protected.
    struct FakeStack {
        ptr: NonNull<c_void>,
        size: usize,
        ntl: NativeThreadDescriptor,
    }

    impl FakeStack {
        fn new(pages: usize) -> Self {
            let size = pages * alignment::page_size();
            let ptr = page::allocate(size).expect("allocate failed");
            let mut ntl = NativeThreadDescriptor::zeroed();
            ntl.stack_base = ptr.as_ptr() as usize;
            ntl.stack_size = size;
            Self { ptr, size, ntl }
        }
    }

    impl Drop for FakeStack {
        fn drop(&mut self) {
            unsafe {
                remove_all(&mut self.ntl);
                page::free(self.ptr, self.size).expect("free failed");
            }
        }
    }

    #[test]
    fn install_orders_zones_and_protects_red_and_yellow() {
        let mut s = FakeStack::new(16);
        unsafe { install(&mut s.ntl).expect("install failed") };

        assert!(s.ntl.red_zone < s.ntl.yellow_zone);
        assert!(s.ntl.yellow_zone < s.ntl.blue_zone);
        assert!(s.ntl.blue_zone + GuardZone::Blue.size() < s.ntl.stack_end());

        assert!(is_protected(&s.ntl, GuardZone::Red));
        assert!(is_protected(&s.ntl, GuardZone::Yellow));
        assert!(!is_protected(&s.ntl, GuardZone::Blue));
    }

    #[test]
    fn protect_and_unprotect_are_idempotent() {
        let mut s = FakeStack::new(16);
        unsafe {
            install(&mut s.ntl).expect("install failed");

            protect(&mut s.ntl, GuardZone::Yellow).expect("re-protect failed");
            assert!(is_protected(&s.ntl, GuardZone::Yellow));

            unprotect(&mut s.ntl, GuardZone::Yellow).expect("unprotect failed");
            unprotect(&mut s.ntl, GuardZone::Yellow).expect("re-unprotect failed");
            assert!(!is_protected(&s.ntl, GuardZone::Yellow));

            // The zone is writable again.
            (s.ntl.yellow_zone as *mut u8).write(0x5A);
        }
    }

    #[test]
    fn blue_zone_can_be_protected_on_demand() {
        let mut s = FakeStack::new(16);
        unsafe {
            install(&mut s.ntl).expect("install failed");
            protect(&mut s.ntl, GuardZone::Blue).expect("protect blue failed");
            assert!(is_protected(&s.ntl, GuardZone::Blue));
            unprotect(&mut s.ntl, GuardZone::Blue).expect("unprotect blue failed");
        }
    }

    #[test]
    fn zone_contains_matches_zone_bounds() {
        let mut s = FakeStack::new(16);
        unsafe { install(&mut s.ntl).expect("install failed") };

        assert!(zone_contains(&s.ntl, GuardZone::Red, s.ntl.red_zone));
        assert!(zone_contains(
            &s.ntl,
            GuardZone::Yellow,
            s.ntl.yellow_zone + GuardZone::Yellow.size() - 1
        ));
        assert!(!zone_contains(
            &s.ntl,
            GuardZone::Red,
            s.ntl.red_zone + GuardZone::Red.size()
        ));
        assert!(!zone_contains(&s.ntl, GuardZone::Blue, 0));
    }

    #[test]
    fn install_rejects_a_stack_with_no_room_above_the_zones() {
        let mut s = FakeStack::new(RED_ZONE_PAGES + YELLOW_ZONE_PAGES + BLUE_ZONE_PAGES + 2);
        assert!(matches!(
            unsafe { install(&mut s.ntl) },
            Err(GuardError::StackTooSmall { .. })
        ));
        assert!(!is_protected(&s.ntl, GuardZone::Red));
    }

    #[test]
    fn install_rejects_missing_stack_bounds() {
        let mut ntl = NativeThreadDescriptor::zeroed();
        assert!(matches!(
            unsafe { install(&mut ntl) },
            Err(GuardError::MissingStackBounds)
        ));
    }

    #[test]
    fn remove_all_restores_access_to_every_zone() {
        let mut s = FakeStack::new(16);
        unsafe {
            install(&mut s.ntl).expect("install failed");
            protect(&mut s.ntl, GuardZone::Blue).expect("protect blue failed");
            remove_all(&mut s.ntl);
        }
        for zone in [GuardZone::Red, GuardZone::Yellow, GuardZone::Blue] {
            assert!(!is_protected(&s.ntl, zone));
        }
        // Fully writable again.
        unsafe { (s.ntl.red_zone as *mut u8).write(1) };
    }
}
