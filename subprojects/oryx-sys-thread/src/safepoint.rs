//! The safepoint protocol.
//!
//! Every slot access of a running thread goes through the latch: the enabled
//! copy's latch slot holds the address of whichever TLA copy the thread is
//! currently steered to. Asking a thread to pause is a single word store of
//! the triggered copy's address into the enabled latch; the thread's next
//! [`poll`] dereferences through the latch, lands on the protected trigger
//! page and faults into the trap handler. That store is the one sanctioned
//! cross-thread write into another thread's block, which is why latch
//! accesses are volatile.
//!
//! The disabled copy's latch permanently points at the disabled copy itself,
//! so a thread running with safepoints disabled polls harmlessly no matter
//! how often it is triggered; the pending trigger takes effect when the
//! thread transitions back to enabled and reloads the enabled latch.

use core::ptr;

use oryx_sys_mem::alignment;
use oryx_sys_tla::{Tla, ThreadLocal};

use crate::{current, layout::BlockLayout};

/// Safepoint state of a thread, as encoded in its enabled latch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafepointState {
    /// Cooperative checks go through the enabled copy; a trigger will fault.
    Enabled,
    /// The thread runs native or otherwise uninterruptible code; triggers
    /// stay pending.
    Disabled,
    /// A pause request is pending; the next enabled-state poll faults.
    Triggered,
}

/// The calling thread's enabled TLA copy, if a block is registered.
pub fn current_tla() -> Option<Tla> {
    let block = current::current_block()?;
    let layout = BlockLayout::new(block.as_ptr() as usize, alignment::page_size());
    // SAFETY: A registered block has fully initialized TLA copies.
    Some(unsafe { Tla::from_addr_unchecked(layout.tla_enabled()) })
}

/// Requests that the thread owning `etla` pause at its next safepoint.
///
/// May be called from any thread; this is the protocol's one sanctioned
/// cross-thread write. Idempotent.
///
/// # Safety
/// - `etla` must be the enabled copy of a live, initialized block whose
///   owning thread has not destroyed it.
pub unsafe fn trigger(etla: Tla) {
    // SAFETY: Navigation slots are initialized for the life of the block,
    // and the latch store is a volatile word write.
    unsafe { etla.set(ThreadLocal::SafepointLatch, etla.triggered().addr()) }
}

/// Withdraws a pause request, returning the thread to [`SafepointState::Enabled`].
///
/// Called by the trap handler once the pause is served, before the thread
/// resumes.
///
/// # Safety
/// - Same contract as [`trigger`], and no concurrent [`trigger`] may race
///   this reset (the pause rendezvous serializes them).
pub unsafe fn reset(etla: Tla) {
    // SAFETY: Volatile word store into a live block.
    unsafe { etla.set(ThreadLocal::SafepointLatch, etla.addr()) }
}

/// Reads the safepoint state encoded in `etla`'s latch slot.
///
/// # Safety
/// - `etla` must be the enabled copy of a live, initialized block.
pub unsafe fn state(etla: Tla) -> SafepointState {
    // SAFETY: The enabled copy's latch word is always mapped.
    let latch = unsafe { etla.get(ThreadLocal::SafepointLatch) };
    if latch == etla.addr() {
        SafepointState::Enabled
    } else if latch == unsafe { etla.disabled().addr() } {
        SafepointState::Disabled
    } else {
        SafepointState::Triggered
    }
}

/// Moves the calling thread between the enabled and disabled states.
///
/// Only the owning thread transitions itself; other threads use [`trigger`].
/// Entering `Disabled` while a trigger is pending overwrites the pending
/// trigger, which is why the transition is only legal at a point where the
/// thread has either served or not yet observed the request.
///
/// # Safety
/// - `etla` must be the calling thread's enabled copy.
pub unsafe fn set_state(etla: Tla, state: SafepointState) {
    // SAFETY: Volatile word stores into the calling thread's own block.
    unsafe {
        match state {
            SafepointState::Enabled => etla.set(ThreadLocal::SafepointLatch, etla.addr()),
            SafepointState::Disabled => {
                etla.set(ThreadLocal::SafepointLatch, etla.disabled().addr())
            }
            SafepointState::Triggered => trigger(etla),
        }
    }
}

/// One cooperative safepoint check.
///
/// Loads the latch and dereferences slot 0 of the copy it points at. While
/// no pause is pending this is two dependent loads of mapped words; while
/// triggered it faults on the trigger page and enters the trap handler.
///
/// # Safety
/// - `etla` must be the calling thread's enabled copy.
/// - A trap handler able to recognize the trigger page fault must be
///   installed before any poll can actually fault.
pub unsafe fn poll(etla: Tla) {
    // SAFETY: The latch always holds the address of one of the three copies;
    // slot 0 of that copy is either mapped or the intended fault target.
    unsafe {
        let latch = etla.get(ThreadLocal::SafepointLatch);
        ptr::read_volatile(latch as *const usize);
    }
}
