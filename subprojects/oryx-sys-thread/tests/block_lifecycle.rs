//! End-to-end block lifecycle on real OS threads: creation in both modes,
//! layout and slot wiring, safepoint transitions, guard zones, teardown.

use std::sync::mpsc;

use oryx_sys_mem::alignment;
use oryx_sys_thread::{
    BlockLayout, Config, CreateError, GuardZone, InitError, SafepointState,
    tla::{Tla, ThreadLocal},
};

/// Stack size for test threads; big enough for the guard zones plus the
/// test closure with plenty of room.
const STACK: usize = 1024 * 1024;

/// One bit of reference map per stack word.
fn reference_map_bytes(stack_size: usize) -> usize {
    stack_size / (size_of::<usize>() * u8::BITS as usize)
}

/// The substrate initializes once per process; every test goes through here.
fn ensure_initialized() {
    match oryx_sys_thread::initialize(Config {
        reference_map_size: reference_map_bytes,
    }) {
        Ok(()) | Err(InitError::AlreadyInitialized) => {}
        Err(err) => panic!("initialize failed: {err}"),
    }
}

#[test]
fn initialize_is_once_only() {
    ensure_initialized();
    assert!(matches!(
        oryx_sys_thread::initialize(Config {
            reference_map_size: reference_map_bytes,
        }),
        Err(InitError::AlreadyInitialized)
    ));
}

#[test]
fn two_phase_creation_registers_the_new_thread() {
    ensure_initialized();
    std::thread::Builder::new()
        .stack_size(STACK)
        .spawn(|| {
            // Phase one: allocate only; the calling thread stays unregistered.
            let block = oryx_sys_thread::create(7, None, STACK).expect("phase one failed");
            assert!(oryx_sys_thread::current_block().is_none());

            // Phase two: initialize and register on "the new thread".
            let block = oryx_sys_thread::create(7, Some(block), 0).expect("phase two failed");
            assert_eq!(oryx_sys_thread::current_block(), Some(block));

            let page_size = alignment::page_size();
            let base = block.as_ptr() as usize;
            assert!(alignment::is_aligned(base, page_size));
            let layout = BlockLayout::new(base, page_size);

            // The enabled copy sits where the layout says, and its
            // navigation slots resolve to the sibling copies.
            let etla = oryx_sys_thread::current_tla().expect("no current TLA");
            assert_eq!(etla.addr(), layout.tla_enabled());
            unsafe {
                assert_eq!(etla.disabled().addr(), layout.tla_disabled());
                assert_eq!(etla.triggered().addr(), layout.tla_triggered());
                assert_eq!(etla.get(ThreadLocal::Id), 7);
                assert_eq!(
                    etla.get(ThreadLocal::NativeThreadLocals),
                    layout.descriptor()
                );
                assert_eq!(
                    etla.get(ThreadLocal::StackReferenceMap),
                    layout.reference_map()
                );
                assert_eq!(
                    etla.get(ThreadLocal::StackReferenceMapSize),
                    reference_map_bytes(STACK)
                );
            }

            // The descriptor knows the thread and the block.
            let ntl = oryx_sys_thread::current_descriptor().expect("no descriptor");
            let ntl = unsafe { ntl.as_ref() };
            assert_eq!(ntl.tl_block, base);
            assert!(ntl.tl_block_size >= BlockLayout::total_size(page_size, 0));
            assert_eq!(ntl.ref_map_size, reference_map_bytes(STACK));
            assert!(ntl.stack_size >= STACK);
            assert_eq!(ntl.handle, unsafe { libc::pthread_self() });
            let local = 0u8;
            let local_addr = &local as *const u8 as usize;
            assert!(local_addr >= ntl.stack_base && local_addr < ntl.stack_end());

            // Guard zones: ordered, inside the stack, red and yellow armed.
            assert!(ntl.red_zone < ntl.yellow_zone);
            assert!(ntl.yellow_zone < ntl.blue_zone);
            assert!(ntl.blue_zone + GuardZone::Blue.size() < ntl.stack_end());
            assert!(oryx_sys_thread::is_protected(ntl, GuardZone::Red));
            assert!(oryx_sys_thread::is_protected(ntl, GuardZone::Yellow));
            assert!(!oryx_sys_thread::is_protected(ntl, GuardZone::Blue));
            assert!(oryx_sys_thread::zone_contains(
                ntl,
                GuardZone::Yellow,
                ntl.yellow_zone
            ));

            unsafe {
                // Writes meant for all safepoint states reach every copy;
                // only slot 0 of the triggered copy is behind the protected
                // page, so the sibling slots stay accessible.
                etla.triple_set(ThreadLocal::NativeEnv, 0xABCD);
                assert_eq!(etla.disabled().get(ThreadLocal::NativeEnv), 0xABCD);
                assert_eq!(etla.triggered().get(ThreadLocal::NativeEnv), 0xABCD);

                // Safepoint protocol against the real protected page.
                assert_eq!(oryx_sys_thread::state(etla), SafepointState::Enabled);
                oryx_sys_thread::trigger(etla);
                assert_eq!(oryx_sys_thread::state(etla), SafepointState::Triggered);
                assert_eq!(
                    etla.get(ThreadLocal::SafepointLatch),
                    layout.tla_triggered()
                );
                // Triggering redirects the latch and nothing else.
                assert_eq!(etla.get(ThreadLocal::NativeEnv), 0xABCD);
                oryx_sys_thread::reset(etla);
                assert_eq!(oryx_sys_thread::state(etla), SafepointState::Enabled);
                oryx_sys_thread::poll(etla);

                oryx_sys_thread::set_state(etla, SafepointState::Disabled);
                assert_eq!(oryx_sys_thread::state(etla), SafepointState::Disabled);
                oryx_sys_thread::set_state(etla, SafepointState::Enabled);
            }

            // Diagnostics read the live block.
            let mut text = String::new();
            unsafe {
                oryx_sys_thread::diag::dump_tla(etla, &mut text).expect("dump failed");
            }
            assert!(text.contains("SafepointLatch"));
            assert!(text.contains("0xabcd"));
            let mut text = String::new();
            oryx_sys_thread::diag::dump_descriptor(ntl, &mut text).expect("dump failed");
            assert!(text.contains("yellow zone"));

            unsafe { oryx_sys_thread::destroy(block) };
            assert!(oryx_sys_thread::current_block().is_none());
            assert!(oryx_sys_thread::current_tla().is_none());
        })
        .expect("spawn failed")
        .join()
        .expect("test thread panicked");
}

#[test]
fn attach_creates_and_registers_in_one_call() {
    ensure_initialized();
    std::thread::Builder::new()
        .stack_size(STACK)
        .spawn(|| {
            let block = oryx_sys_thread::create_for_existing_thread(-3).expect("attach failed");
            assert_eq!(oryx_sys_thread::current_block(), Some(block));

            let etla = oryx_sys_thread::current_tla().expect("no current TLA");
            assert_eq!(unsafe { etla.get(ThreadLocal::Id) }, -3i32 as usize);

            // The attach path sized the block from the real stack bounds.
            let ntl = oryx_sys_thread::current_descriptor().expect("no descriptor");
            let ntl = unsafe { ntl.as_ref() };
            assert_eq!(ntl.ref_map_size, reference_map_bytes(ntl.stack_size));

            unsafe { oryx_sys_thread::destroy(block) };
            assert!(oryx_sys_thread::current_block().is_none());
        })
        .expect("spawn failed")
        .join()
        .expect("test thread panicked");
}

#[test]
fn trigger_from_another_thread_is_observable() {
    ensure_initialized();
    let (to_main, from_worker) = mpsc::channel();
    let (to_worker, from_main) = mpsc::channel::<()>();

    let worker = std::thread::Builder::new()
        .stack_size(STACK)
        .spawn(move || {
            let block = oryx_sys_thread::create_for_existing_thread(-2).expect("attach failed");
            let etla = oryx_sys_thread::current_tla().expect("no current TLA");
            to_main.send(etla.addr()).expect("send failed");
            // Hold still while the main thread triggers and resets.
            from_main.recv().expect("recv failed");
            unsafe {
                assert_eq!(oryx_sys_thread::state(etla), SafepointState::Enabled);
                oryx_sys_thread::destroy(block);
            }
        })
        .expect("spawn failed");

    let etla_addr = from_worker.recv().expect("recv failed");
    // SAFETY: The worker's block stays live until it is released below.
    let etla = unsafe { Tla::from_addr_unchecked(etla_addr) };
    unsafe {
        oryx_sys_thread::trigger(etla);
        assert_eq!(oryx_sys_thread::state(etla), SafepointState::Triggered);
        oryx_sys_thread::reset(etla);
    }
    to_worker.send(()).expect("send failed");
    worker.join().expect("worker panicked");
}

#[test]
fn key_destructor_reclaims_blocks_on_thread_exit() {
    ensure_initialized();
    std::thread::Builder::new()
        .stack_size(STACK)
        .spawn(|| {
            let block = oryx_sys_thread::create_for_existing_thread(-1).expect("attach failed");
            assert_eq!(oryx_sys_thread::current_block(), Some(block));
            // No orderly detach: the thread-locals key destructor must tear
            // the block down when this thread exits.
        })
        .expect("spawn failed")
        .join()
        .expect("test thread panicked");
}

#[test]
fn phase_one_failure_modes_do_not_register_anything() {
    ensure_initialized();
    // A phase-one allocation the test abandons: destroy must reclaim it
    // even though it was never initialized or registered.
    let block = oryx_sys_thread::create(9, None, STACK).expect("phase one failed");
    assert!(oryx_sys_thread::current_block().is_none());
    unsafe { oryx_sys_thread::destroy(block) };
    assert!(oryx_sys_thread::current_block().is_none());

    // An absurd allocation size must fail cleanly.
    let result = oryx_sys_thread::create(9, None, usize::MAX / 2);
    assert!(matches!(result, Err(CreateError::Allocation(_))));
}
