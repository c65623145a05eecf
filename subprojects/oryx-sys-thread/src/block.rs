//! Thread-locals block lifecycle.
//!
//! A block is created in one of two ways:
//!
//! - **Two-phase**, for threads the VM starts itself: the creating thread
//!   allocates the block up front (so allocation failure surfaces before the
//!   OS thread exists), and the new thread initializes and registers it as
//!   its first action.
//! - **Single-phase**, for threads attaching from outside the VM: the
//!   attaching thread allocates, initializes and registers in one call.
//!
//! Either way, registration is the last step: a block is never visible to
//! lookups in a partially initialized state. [`destroy`] undoes everything
//! and also serves as the thread-locals key destructor, so it tolerates
//! blocks in any state of assembly.

use core::{ptr, ptr::NonNull};

use oryx_sys_mem::{alignment, page};
use oryx_sys_tla::{Tla, ThreadLocal};

use crate::{
    current,
    descriptor::NativeThreadDescriptor,
    guard, init,
    layout::BlockLayout,
    stack::{self, StackQueryError},
};

/// Creates a thread-locals block for the calling thread, or runs one phase
/// of the two-phase protocol.
///
/// - `id > 0` and `tl_block` is `None`: phase one. Allocates a block sized
///   for a stack of `stack_size` bytes and returns it without touching the
///   calling thread's registration. The new thread completes creation by
///   calling this again with the returned block.
/// - `tl_block` is `Some`: phase two, on the new thread. Initializes the
///   given block for the calling thread and registers it. `stack_size` is
///   ignored; the real bounds are queried from the OS.
/// - `id <= 0` and `tl_block` is `None`: single-phase attach of a thread
///   not started by the VM, under a temporary non-positive id.
///
/// On any failure after allocation the block is torn back down before the
/// error is returned, except in phase two, where the caller keeps ownership
/// of the (still unregistered) block.
pub fn create(
    id: i32,
    tl_block: Option<NonNull<u8>>,
    stack_size: usize,
) -> Result<NonNull<u8>, CreateError> {
    match tl_block {
        Some(block) => {
            debug_assert!(id > 0, "preallocated blocks are for VM-started threads");
            // SAFETY: Per the two-phase protocol the block came from phase
            // one and is owned by the calling thread.
            unsafe { initialize_block(block, id)? };
            Ok(block)
        }
        None if id > 0 => allocate_block(stack_size),
        None => {
            let (_, actual_stack_size) = stack::current_stack_bounds()?;
            let block = allocate_block(actual_stack_size)?;
            // SAFETY: The block was just allocated for this thread.
            if let Err(err) = unsafe { initialize_block(block, id) } {
                // SAFETY: Nothing else holds the block yet.
                unsafe { release_allocation(block) };
                return Err(err);
            }
            Ok(block)
        }
    }
}

/// Single-phase creation for a thread attaching from outside the VM.
///
/// `id` is the temporary non-positive id the attach protocol assigned.
pub fn create_for_existing_thread(id: i32) -> Result<NonNull<u8>, CreateError> {
    debug_assert!(id <= 0, "attaching threads carry temporary non-positive ids");
    create(id, None, 0)
}

/// Allocates a zeroed block and stamps its allocation parameters into the
/// descriptor, where phase two finds them.
fn allocate_block(stack_size: usize) -> Result<NonNull<u8>, CreateError> {
    let cfg = init::config().ok_or(CreateError::NotInitialized)?;
    let page_size = alignment::page_size();
    let ref_map_size = (cfg.reference_map_size)(stack_size);
    let total = BlockLayout::total_size(page_size, ref_map_size);

    let block = page::allocate(total)?.cast::<u8>();
    let layout = BlockLayout::new(block.as_ptr() as usize, page_size);
    // SAFETY: The descriptor region lies past the first page of a mapping we
    // just created; nothing else references it yet.
    let ntl = unsafe { &mut *(layout.descriptor() as *mut NativeThreadDescriptor) };
    ntl.tl_block = layout.base();
    ntl.tl_block_size = total;
    ntl.ref_map_size = ref_map_size;
    Ok(block)
}

/// Initializes and registers `block` for the calling thread.
///
/// On failure every side effect made here is undone; the block reverts to
/// its freshly allocated state.
///
/// # Safety
/// - `block` must be an unregistered block from [`allocate_block`], owned by
///   the calling thread, with its trigger page still accessible.
unsafe fn initialize_block(block: NonNull<u8>, id: i32) -> Result<(), CreateError> {
    let page_size = alignment::page_size();
    let layout = BlockLayout::new(block.as_ptr() as usize, page_size);
    // SAFETY: The block is owned by this thread and not yet shared.
    let ntl = unsafe { &mut *(layout.descriptor() as *mut NativeThreadDescriptor) };

    let (stack_base, stack_size) = stack::current_stack_bounds()?;
    ntl.stack_base = stack_base;
    ntl.stack_size = stack_size;
    // SAFETY: pthread_self has no preconditions.
    ntl.handle = unsafe { libc::pthread_self() };
    ntl.os_data = ptr::null_mut();

    // SAFETY: All three copies lie inside the block and every page of it is
    // still accessible, including the trigger page.
    unsafe {
        let ttla = Tla::from_addr_unchecked(layout.tla_triggered());
        let etla = Tla::from_addr_unchecked(layout.tla_enabled());
        let dtla = Tla::from_addr_unchecked(layout.tla_disabled());

        for tla in [ttla, etla, dtla] {
            tla.zero();
            tla.set(ThreadLocal::Etla, etla.addr());
            tla.set(ThreadLocal::Dtla, dtla.addr());
            tla.set(ThreadLocal::Ttla, ttla.addr());
            tla.set(ThreadLocal::NativeThreadLocals, layout.descriptor());
            tla.set(ThreadLocal::Id, id as usize);
            tla.set(ThreadLocal::StackReferenceMap, layout.reference_map());
            tla.set(ThreadLocal::StackReferenceMapSize, ntl.ref_map_size);
        }

        // The enabled and disabled latches point at their own copy, so a
        // cooperative check in either state reads an accessible word. The
        // triggered latch stays zero; it lives on the page protected below
        // and is only ever an address, never a load target that succeeds.
        etla.set(ThreadLocal::SafepointLatch, etla.addr());
        dtla.set(ThreadLocal::SafepointLatch, dtla.addr());
    }

    // SAFETY: The stack bounds were just queried for this thread and no
    // frame of ours reaches the guard range.
    unsafe { guard::install(ntl)? };

    // SAFETY: The first page belongs to the mapping allocated for this
    // block; no live data besides the triggered latch word is on it.
    if let Err(err) = unsafe { page::protect(block.cast(), page_size) } {
        // SAFETY: Same descriptor the zones were installed with.
        unsafe { guard::remove_all(ntl) };
        return Err(err.into());
    }

    // Registration last: the destructor must only ever see complete blocks.
    // SAFETY: The block is now fully initialized and owned by this thread.
    if let Err(err) = unsafe { current::set_current_block(block) } {
        // SAFETY: Undoing the two steps above on the same block.
        unsafe {
            guard::remove_all(ntl);
            let _ = page::unprotect(block.cast(), page_size);
        }
        return Err(err.into());
    }
    Ok(())
}

/// Destroys the calling thread's thread-locals block.
///
/// Also installed as the thread-locals key destructor, so it must cope with
/// a block in any state: every step is attempted and failures are ignored.
///
/// # Safety
/// - `block` must have come from [`create`] (either phase) and must not be
///   used again afterwards, by this thread or the key destructor.
pub unsafe fn destroy(block: NonNull<u8>) {
    let page_size = alignment::page_size();
    let layout = BlockLayout::new(block.as_ptr() as usize, page_size);

    current::clear_current_block();

    // SAFETY: The descriptor lies past the first page, which is never
    // protected; the caller guarantees the mapping is still live.
    let ntl = unsafe { &mut *(layout.descriptor() as *mut NativeThreadDescriptor) };
    // SAFETY: Zone state is whatever initialization left; remove_all and
    // unprotect tolerate partially assembled blocks.
    unsafe {
        guard::remove_all(ntl);
        let _ = page::unprotect(block.cast(), page_size);
    }

    let size = ntl.tl_block_size;
    debug_assert!(size != 0, "descriptor lost its allocation size");
    if size != 0 {
        // SAFETY: `block`/`size` are exactly the allocation parameters
        // stamped into the descriptor by allocate_block.
        let _ = unsafe { page::free(block.cast(), size) };
    }
}

/// Releases a block that never got past allocation.
///
/// # Safety
/// - `block` must be an unregistered result of [`allocate_block`].
unsafe fn release_allocation(block: NonNull<u8>) {
    let layout = BlockLayout::new(block.as_ptr() as usize, alignment::page_size());
    // SAFETY: Freshly allocated block, descriptor readable, nothing shared.
    unsafe {
        let size = (*(layout.descriptor() as *const NativeThreadDescriptor)).tl_block_size;
        let _ = page::free(block.cast(), size);
    }
}

/// The calling thread's native thread descriptor, if a block is registered.
pub fn current_descriptor() -> Option<NonNull<NativeThreadDescriptor>> {
    let block = current::current_block()?;
    let layout = BlockLayout::new(block.as_ptr() as usize, alignment::page_size());
    NonNull::new(layout.descriptor() as *mut NativeThreadDescriptor)
}

/// Block creation failed.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    /// [`crate::initialize`] has not been called.
    #[error("Thread-locals substrate not initialized")]
    NotInitialized,

    /// The block mapping could not be allocated.
    #[error("Thread-locals block allocation failed: {0}")]
    Allocation(#[from] page::AllocError),

    /// The calling thread's stack bounds could not be queried.
    #[error(transparent)]
    StackQuery(#[from] StackQueryError),

    /// The stack guard zones could not be installed.
    #[error("Guard zone installation failed: {0}")]
    GuardZones(#[from] guard::GuardError),

    /// The trigger page could not be protected.
    #[error("Trigger page protection failed: {0}")]
    Protection(#[from] page::ProtectError),

    /// The block could not be registered under the thread-locals key.
    #[error("Thread-locals block registration failed: {0}")]
    Registration(#[from] current::KeyError),
}
