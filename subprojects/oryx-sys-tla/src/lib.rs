//! # Thread-Local Areas (TLAs) for the Oryx runtime
//!
//! A thread-local area is a fixed array of [`SLOT_COUNT`] word-sized slots
//! holding the VM's per-thread state. Every VM-managed thread owns **three**
//! value-duplicate copies of this array inside its thread-locals block:
//!
//! - **enabled**: the copy ordinary slot reads/writes go through while the
//!   thread is schedulable,
//! - **disabled**: the copy used while the thread runs with safepoints
//!   disabled (e.g. inside native code),
//! - **triggered**: a copy whose first slot lies on a permanently
//!   access-protected page, so that a cooperative safepoint check
//!   dereferencing it faults.
//!
//! Each copy stores the addresses of all three copies in its `Etla` /
//! `Dtla` / `Ttla` slots, so any copy can navigate to its siblings; this is
//! what makes [`Tla::triple_set`] and the safepoint redirection work without
//! consulting the block header.
//!
//! This crate owns the authoritative slot table, the [`Tla`] accessor type,
//! the consistency check against the boot image's copy of the table, and a
//! read-only dump used by diagnostics. The block layout and the safepoint
//! protocol live in `oryx-sys-thread`.

mod area;
mod slots;

pub use area::*;
pub use slots::*;
