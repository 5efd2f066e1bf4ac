//! Error types for `strata` arenas.
//!
//! Only recoverable conditions live here. Protocol violations (double
//! free, releasing a block through the wrong allocator, stale slot or child
//! ids) are programming errors and panic where they are detected.

use std::fmt;

/// Errors reported by arena and heap operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The system allocator refused a block.
    OutOfMemory {
        /// Size in bytes of the refused system allocation.
        size: usize,
    },

    /// `size * count` (plus header) does not fit in `usize`.
    SizeOverflow {
        /// Element size in bytes.
        size: usize,
        /// Element count.
        count: usize,
    },

    /// The deferred-cleanup table has used every representable index.
    SlotTableFull,

    /// A sequence index was not below the sequence length.
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The sequence length at the time of the call.
        len: usize,
    },

    /// An [`ArenaConfig`](crate::ArenaConfig) was rejected.
    InvalidConfig {
        /// Why the configuration is unusable.
        reason: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory { size } => {
                write!(f, "Out of memory: failed to allocate {size} bytes")
            }
            Error::SizeOverflow { size, count } => {
                write!(
                    f,
                    "Allocation size overflow: {count} elements of {size} bytes"
                )
            }
            Error::SlotTableFull => {
                write!(f, "Deferred cleanup table is full")
            }
            Error::IndexOutOfBounds { index, len } => {
                write!(f, "Index {index} out of bounds for length {len}")
            }
            Error::InvalidConfig { reason } => {
                write!(f, "Invalid arena configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for `strata` operations.
pub type Result<T> = std::result::Result<T, Error>;
