//! Diagnostic dumps of thread-local areas and block state.
//!
//! Crash-path helpers: they only read, format with `core::fmt`, and print to
//! stderr, so they stay usable when the VM is in a bad state.

use core::fmt::{self, Write as _};

use oryx_sys_tla::{Tla, ThreadLocal};

use crate::descriptor::NativeThreadDescriptor;

/// Writes a dump of one TLA copy's named slots into `out`.
///
/// # Safety
/// - Every named slot of `tla` must be readable (so not the triggered copy
///   of a live block).
pub unsafe fn dump_tla(tla: Tla, out: &mut dyn fmt::Write) -> fmt::Result {
    // SAFETY: Forwarded contract.
    write!(out, "{}", unsafe { tla.dump() })
}

/// Prints a dump of one TLA copy to stderr.
///
/// # Safety
/// - Same contract as [`dump_tla`].
pub unsafe fn print_tla(tla: Tla) {
    // SAFETY: Forwarded contract.
    eprint!("{}", unsafe { tla.dump() });
}

/// Upper bound on areas dumped from one list. A corrupted or cyclic
/// `ForwardLink` chain must not hang the crash path.
const LIST_DUMP_LIMIT: usize = 1024;

/// Writes dumps of `tla` and every area reachable through its forward
/// links, in list order.
///
/// The VM's thread list links enabled copies through the `ForwardLink`
/// slot, terminated by zero. Dumping stops after [`LIST_DUMP_LIMIT`] areas
/// and notes the truncation.
///
/// # Safety
/// - `tla` and every forward-linked area must satisfy the [`dump_tla`]
///   contract, and the list must not be mutated while dumping.
pub unsafe fn dump_tla_list(tla: Tla, out: &mut dyn fmt::Write) -> fmt::Result {
    let mut next = Some(tla);
    let mut dumped = 0;
    while let Some(t) = next {
        if dumped == LIST_DUMP_LIMIT {
            writeln!(out, "... truncated after {LIST_DUMP_LIMIT} areas")?;
            break;
        }
        dumped += 1;
        // SAFETY: Forwarded contract for every list member.
        unsafe {
            dump_tla(t, out)?;
            let link = t.get(ThreadLocal::ForwardLink);
            next = if link == 0 {
                None
            } else {
                Some(Tla::from_addr_unchecked(link))
            };
        }
    }
    Ok(())
}

/// Prints dumps of `tla` and every forward-linked area to stderr.
///
/// # Safety
/// - Same contract as [`dump_tla_list`].
pub unsafe fn print_tla_list(tla: Tla) {
    let mut text = String::new();
    // SAFETY: Forwarded contract.
    if unsafe { dump_tla_list(tla, &mut text) }.is_ok() {
        eprint!("{text}");
    }
}

/// Writes a human-readable rendering of a native thread descriptor.
pub fn dump_descriptor(ntl: &NativeThreadDescriptor, out: &mut dyn fmt::Write) -> fmt::Result {
    writeln!(out, "NativeThreadDescriptor:")?;
    writeln!(
        out,
        "  stack            [{:#x}, {:#x}) ({:#x} bytes)",
        ntl.stack_base,
        ntl.stack_end(),
        ntl.stack_size
    )?;
    writeln!(
        out,
        "  tl block         [{:#x}, {:#x}) ({:#x} bytes)",
        ntl.tl_block,
        ntl.tl_block + ntl.tl_block_size,
        ntl.tl_block_size
    )?;
    writeln!(out, "  ref map size     {:#x}", ntl.ref_map_size)?;
    for (name, zone, protected) in [
        ("red zone   ", ntl.red_zone, ntl.red_zone_is_protected),
        ("yellow zone", ntl.yellow_zone, ntl.yellow_zone_is_protected),
        ("blue zone  ", ntl.blue_zone, ntl.blue_zone_is_protected),
    ] {
        writeln!(
            out,
            "  {name}      {:#x} ({})",
            zone,
            if protected != 0 {
                "protected"
            } else {
                "unprotected"
            }
        )?;
    }
    writeln!(out, "  handle           {:#x}", ntl.handle as usize)
}
