//! One-time substrate initialization.

use std::sync::OnceLock;

use crate::current;

/// Process-wide configuration supplied by the runtime at startup.
pub struct Config {
    /// Computes the stack reference map size in bytes for a thread with the
    /// given stack size. Called once per block allocation; the result is
    /// recorded in the block's descriptor.
    pub reference_map_size: fn(stack_size: usize) -> usize,
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Initializes the thread-locals substrate.
///
/// Creates the per-process thread-locals key and records `config`. Must be
/// called exactly once, before any block is created; a second call fails
/// with [`InitError::AlreadyInitialized`] and changes nothing.
pub fn initialize(config: Config) -> Result<(), InitError> {
    current::ensure_key()?;
    CONFIG
        .set(config)
        .map_err(|_| InitError::AlreadyInitialized)?;
    Ok(())
}

pub(crate) fn config() -> Option<&'static Config> {
    CONFIG.get()
}

/// Substrate initialization failed.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// [`initialize`] already ran in this process.
    #[error("Thread-locals substrate is already initialized")]
    AlreadyInitialized,

    /// The thread-locals key could not be created.
    #[error(transparent)]
    Key(#[from] crate::current::KeyError),
}
