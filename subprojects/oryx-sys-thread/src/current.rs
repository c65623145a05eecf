//! The per-process thread-locals key.
//!
//! One `pthread` key maps each OS thread to its thread-locals block. The
//! key's destructor runs on thread exit and tears the block down, so a
//! thread that dies without an orderly detach still releases its block
//! exactly once.

use core::{ffi::c_void, ptr::NonNull};
use std::sync::OnceLock;

/// `pthread_key_t` is plain data; the wrapper only exists so the key can sit
/// in a process-wide static.
struct BlockKey(libc::pthread_key_t);

// SAFETY: The key value is an index into the pthread TSD table, not a
// pointer; sharing it across threads is the whole point.
unsafe impl Send for BlockKey {}
unsafe impl Sync for BlockKey {}

static BLOCK_KEY: OnceLock<BlockKey> = OnceLock::new();

/// Creates the thread-locals key if it does not exist yet.
pub(crate) fn ensure_key() -> Result<(), KeyError> {
    if BLOCK_KEY.get().is_some() {
        return Ok(());
    }
    let mut key: libc::pthread_key_t = 0;
    // SAFETY: key is a plain out-parameter; the destructor is a static fn.
    let rc = unsafe { libc::pthread_key_create(&mut key, Some(block_key_destructor)) };
    if rc != 0 {
        return Err(KeyError::Os(std::io::Error::from_raw_os_error(rc)));
    }
    if BLOCK_KEY.set(BlockKey(key)).is_err() {
        // Lost a creation race; release the duplicate key.
        // SAFETY: `key` was just created and never handed out.
        unsafe { libc::pthread_key_delete(key) };
    }
    Ok(())
}

fn key() -> Option<libc::pthread_key_t> {
    BLOCK_KEY.get().map(|k| k.0)
}

/// The calling thread's thread-locals block, if one is registered.
pub fn current_block() -> Option<NonNull<u8>> {
    let key = key()?;
    // SAFETY: The key is live for the lifetime of the process.
    NonNull::new(unsafe { libc::pthread_getspecific(key) } as *mut u8)
}

/// Registers `block` as the calling thread's thread-locals block.
///
/// # Safety
/// - `block` must be a fully initialized thread-locals block owned by the
///   calling thread; the key destructor will destroy it on thread exit.
pub(crate) unsafe fn set_current_block(block: NonNull<u8>) -> Result<(), KeyError> {
    let key = key().ok_or(KeyError::NotInitialized)?;
    // SAFETY: The key is live; the value outlives the association per the
    // function contract.
    let rc = unsafe { libc::pthread_setspecific(key, block.as_ptr() as *const c_void) };
    if rc != 0 {
        return Err(KeyError::Os(std::io::Error::from_raw_os_error(rc)));
    }
    Ok(())
}

/// Drops the calling thread's block association, if any.
///
/// Clearing before the block is released keeps the key destructor from
/// seeing a dangling value.
pub(crate) fn clear_current_block() {
    if let Some(key) = key() {
        // SAFETY: Setting a live key to null is always valid.
        unsafe { libc::pthread_setspecific(key, core::ptr::null()) };
    }
}

/// Key destructor: runs on thread exit for threads that still have a block
/// registered, i.e. threads that died without an orderly detach.
unsafe extern "C" fn block_key_destructor(value: *mut c_void) {
    if let Some(block) = NonNull::new(value as *mut u8) {
        // SAFETY: Only set_current_block stores values under this key, and
        // it only stores initialized blocks owned by this thread.
        unsafe { crate::block::destroy(block) };
    }
}

/// The thread-locals key could not be used.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// [`crate::initialize`] has not been called.
    #[error("Thread-locals key not created; initialize() must run first")]
    NotInitialized,

    /// The threading library refused the operation.
    #[error("Thread-locals key operation failed: {0}")]
    Os(#[source] std::io::Error),
}
