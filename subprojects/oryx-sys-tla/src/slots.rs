//! The VM thread-local slot table.
//!
//! The slot indices are a process-wide agreement between this substrate and
//! the higher runtime layer: the boot image carries its own copy of the
//! `(name, index)` pairs and cross-checks them against ours at load time,
//! before any thread runs. Gaps in the numbering are indices owned entirely
//! by the higher layer; this core neither reads nor writes them, but the
//! areas reserve space for the full range.
//!
//! The table below is the single authority: the enum, the name lookup,
//! `from_index`, and the slot count are all generated from it.

use static_assertions::const_assert;

/// The one authoritative ordered table of `(variant, index)` pairs.
///
/// Invoked with a callback macro that receives the whole list, so the index
/// assignments are never written twice.
macro_rules! for_all_thread_locals {
    ($action:ident) => {
        $action! {
            SafepointLatch = 0,
            Etla = 1,
            Dtla = 2,
            Ttla = 3,
            NativeThreadLocals = 4,
            ForwardLink = 5,
            BackwardLink = 6,
            Id = 9,
            NativeEnv = 11,
            LastFrameAnchor = 12,
            TrapNumber = 15,
            TrapInstructionPointer = 16,
            TrapFaultAddress = 17,
            TrapLatchRegister = 18,
            StackReferenceMap = 22,
            StackReferenceMapSize = 23,
        }
    };
}

macro_rules! declare_thread_locals {
    ($($name:ident = $index:literal,)+) => {
        /// Index of a VM thread-local slot, identical in all three TLA copies.
        #[repr(usize)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ThreadLocal {
            $(
                $name = $index,
            )+
        }

        impl ThreadLocal {
            /// Every named slot, in table order.
            pub const ALL: &'static [ThreadLocal] = &[$(ThreadLocal::$name),+];

            /// The slot's index into a TLA.
            #[inline(always)]
            pub const fn index(self) -> usize {
                self as usize
            }

            /// The slot's agreed name, as carried in the boot image table.
            pub const fn name(self) -> &'static str {
                match self {
                    $(ThreadLocal::$name => stringify!($name),)+
                }
            }

            /// Maps a raw index back to the named slot.
            ///
            /// Returns `None` for reserved gaps and for indices outside
            /// `[0, SLOT_COUNT)`; raw-index callers must treat that as a
            /// programming error, not a recoverable condition.
            pub const fn from_index(index: usize) -> Option<ThreadLocal> {
                match index {
                    $($index => Some(ThreadLocal::$name),)+
                    _ => None,
                }
            }
        }
    };
}

for_all_thread_locals!(declare_thread_locals);

/// Number of word-sized slots in one thread-local area.
///
/// One past the highest assigned index; the gaps are reserved storage.
pub const SLOT_COUNT: usize = ThreadLocal::StackReferenceMapSize.index() + 1;

// The latch must be slot 0: the triggered copy is placed so that exactly its
// first word lies on the protected page, and the cooperative check reads the
// latch slot of whatever copy it was redirected to.
const_assert!(ThreadLocal::SafepointLatch.index() == 0);
const_assert!(SLOT_COUNT == 24);

/// Size in bytes of one thread-local area.
#[inline(always)]
pub const fn tla_size() -> usize {
    SLOT_COUNT * size_of::<usize>()
}

/// Cross-checks the slot table against the boot image's copy.
///
/// Called by the image loader before any VM thread runs; any mismatch is a
/// fatal startup error. `agreed` holds the `(name, index)` pairs compiled
/// into the image, covering every named slot exactly once.
pub fn verify_agreed_table(agreed: &[(&str, usize)]) -> Result<(), ConsistencyError> {
    if agreed.len() != ThreadLocal::ALL.len() {
        return Err(ConsistencyError::CountMismatch {
            expected: ThreadLocal::ALL.len(),
            actual: agreed.len(),
        });
    }
    // Equal lengths alone do not make the tables agree: a repeated entry
    // can hide an omitted slot. Track which named slots have matched.
    let mut seen = vec![false; ThreadLocal::ALL.len()];
    for &(name, index) in agreed {
        let Some(pos) = ThreadLocal::ALL.iter().position(|s| s.name() == name) else {
            return Err(ConsistencyError::UnknownSlot {
                name: name.to_owned(),
            });
        };
        let slot = ThreadLocal::ALL[pos];
        if slot.index() != index {
            return Err(ConsistencyError::IndexMismatch {
                name: name.to_owned(),
                expected: slot.index(),
                actual: index,
            });
        }
        if seen[pos] {
            return Err(ConsistencyError::DuplicateSlot {
                name: name.to_owned(),
            });
        }
        seen[pos] = true;
    }
    Ok(())
}

/// Slot table disagreement with the boot image, detected at load time.
#[derive(Debug, thiserror::Error)]
pub enum ConsistencyError {
    /// The image names a slot this substrate does not define.
    #[error("Unknown thread-local slot '{name}' in boot image table")]
    UnknownSlot { name: String },

    /// The image assigns a different index to a known slot.
    #[error("Thread-local slot '{name}' index mismatch: substrate has {expected}, image has {actual}")]
    IndexMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// The image lists the same slot more than once (and so omits another).
    #[error("Thread-local slot '{name}' appears more than once in boot image table")]
    DuplicateSlot { name: String },

    /// The image table has a different number of entries.
    #[error("Thread-local table size mismatch: substrate has {expected} slots, image has {actual}")]
    CountMismatch { expected: usize, actual: usize },
}
