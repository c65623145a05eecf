//! Querying the calling thread's stack bounds from the OS.

use core::{ffi::c_void, mem, ptr};

/// Returns `(stack_base, stack_size)` of the calling thread.
///
/// `stack_base` is the lowest address of the stack. The bounds come straight
/// from the threading library and include any guard area it reserved below
/// the stack.
pub fn current_stack_bounds() -> Result<(usize, usize), StackQueryError> {
    // SAFETY: attr is a plain out-parameter filled by pthread_getattr_np;
    // it is destroyed before this function returns.
    unsafe {
        let mut attr: libc::pthread_attr_t = mem::zeroed();
        let rc = libc::pthread_getattr_np(libc::pthread_self(), &mut attr);
        if rc != 0 {
            return Err(StackQueryError::Os(std::io::Error::from_raw_os_error(rc)));
        }

        let mut addr: *mut c_void = ptr::null_mut();
        let mut size: usize = 0;
        let rc = libc::pthread_attr_getstack(&attr, &mut addr, &mut size);
        libc::pthread_attr_destroy(&mut attr);
        if rc != 0 {
            return Err(StackQueryError::Os(std::io::Error::from_raw_os_error(rc)));
        }

        Ok((addr as usize, size))
    }
}

/// The threading library could not report the calling thread's stack.
#[derive(Debug, thiserror::Error)]
pub enum StackQueryError {
    #[error("Stack bounds query failed: {0}")]
    Os(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_contain_a_local_variable() {
        let (base, size) = current_stack_bounds().expect("stack query failed");
        assert!(size > 0);
        let local = 0u8;
        let addr = &local as *const u8 as usize;
        assert!(addr >= base && addr < base + size);
    }

    #[test]
    fn bounds_are_stable_within_a_thread() {
        let first = current_stack_bounds().expect("stack query failed");
        let second = current_stack_bounds().expect("stack query failed");
        assert_eq!(first, second);
    }
}
