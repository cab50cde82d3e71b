use std::sync::{MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the segment allocator facade.
///
/// Every variant carries a context string naming the operation and its
/// arguments, e.g. `propel (group=orders)`.
#[derive(Error, Debug)]
pub enum AllocatorError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource unavailable during {context}: {source}")]
    ResourceUnavailable {
        context: String,
        #[source]
        source: PoolError,
    },

    #[error("Store failure during {context}: {source}")]
    StoreFailure {
        context: String,
        #[source]
        source: StoreError,
    },
}

impl AllocatorError {
    /// Returns true if the caller may retry the same operation unchanged.
    ///
    /// Pool timeouts and lost compare-and-swap races are transient;
    /// everything else needs a different input or operator attention.
    pub fn is_transient(&self) -> bool {
        match self {
            AllocatorError::InvalidArgument(_) => false,
            AllocatorError::ResourceUnavailable { .. } => true,
            AllocatorError::StoreFailure { source, .. } => {
                matches!(source, StoreError::Conflict(_))
            }
        }
    }
}

/// Extension trait for converting lock errors to StoreError.
pub trait LockResultExt<T> {
    /// Converts a lock error to a StoreError.
    fn map_lock_err(self) -> Result<T, StoreError>;
}

impl<'a, T> LockResultExt<MutexGuard<'a, T>>
    for Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<MutexGuard<'a, T>, StoreError> {
        self.map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error (sql={statement}): {source}")]
    Sqlite {
        statement: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Range overflow for group '{group}': {detail}")]
    Overflow { group: String, detail: String },

    #[error("Group '{0}' was modified concurrently")]
    Conflict(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool '{0}' must hold at least one resource")]
    EmptyPool(String),

    #[error("Pool '{0}' had no room for a resource while filling")]
    Overfilled(String),

    #[error("Timed out after {timeout:?} waiting on pool '{pool}'")]
    Timeout { pool: String, timeout: Duration },
}
