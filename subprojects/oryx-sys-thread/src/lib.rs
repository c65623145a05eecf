//! # Thread-locals blocks for the Oryx runtime
//!
//! Every VM-managed thread owns one page-aligned block of memory holding all
//! of its VM and native thread-local data. The block is laid out as follows:
//!
//! ```text
//! (low addresses)
//!
//!   page aligned --> ┌─────────────────────────────────┐ <-- current_block()
//!                    │ X X X   protected page    X X X │
//!                    │ X X X                     X X X │
//!                    ├─────────────────────────────────┤ (last word of the
//!                    │        TLA (triggered)          │  page is the
//!                    ├─────────────────────────────────┤  triggered latch)
//!                    │        TLA (enabled)            │ <-- current_tla()
//!                    ├─────────────────────────────────┤
//!                    │        TLA (disabled)           │
//!                    ├─────────────────────────────────┤
//!                    │    NativeThreadDescriptor       │
//!                    ├─────────────────────────────────┤
//!                    │                                 │
//!                    │        reference map            │
//!                    │                                 │
//!                    └─────────────────────────────────┘
//!
//! (high addresses)
//! ```
//!
//! The triggered TLA begins one word before the end of the first page, so
//! that exactly its safepoint-latch slot (slot 0) is covered by the page
//! protection. A thread is asked to pause by storing the triggered copy's
//! address into the enabled copy's latch slot; the thread's next cooperative
//! check dereferences through the latch and faults, handing control to the
//! trap handler. The non-triggered path is an ordinary load, so the check
//! costs nothing extra and takes no lock.
//!
//! The block is created by [`create`] (two-phase for VM-started threads,
//! single-phase for threads attaching from outside), registered as the
//! calling OS thread's current block, and torn down by [`destroy`]. The same
//! `destroy` is the destructor of the per-process thread-locals key, so the
//! block is released exactly once even on abnormal thread termination.

mod block;
mod current;
mod descriptor;
mod guard;
mod init;
mod layout;
mod safepoint;
mod stack;

pub mod diag;

pub use block::*;
pub use current::{KeyError, current_block};
pub use descriptor::*;
pub use guard::*;
pub use init::*;
pub use layout::*;
pub use oryx_sys_tla as tla;
pub use safepoint::*;
pub use stack::*;
