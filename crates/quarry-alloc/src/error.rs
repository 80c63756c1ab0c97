//! Error types for buffer sub-allocation.

use thiserror::Error;

/// Errors produced by the sub-allocation layer.
#[derive(Error, Debug)]
pub enum AllocError {
    /// Zero-size allocation request.
    #[error("zero-size allocations are not supported")]
    ZeroSize,

    /// Growing the backing buffer would exceed the configured maximum.
    #[error("allocating {requested} bytes would grow the buffer past its maximum of {max} bytes")]
    ExceedsMaxSize {
        /// Bytes requested by the allocation that triggered the growth.
        requested: u64,
        /// Configured maximum backing size in bytes.
        max: u64,
    },

    /// Write outside the bounds of a sub-buffer.
    #[error("write of {len} bytes at offset {offset} exceeds sub-buffer size {size}")]
    WriteOutOfBounds {
        /// Offset of the write relative to the sub-buffer start.
        offset: u64,
        /// Length of the write in bytes.
        len: u64,
        /// Size of the sub-buffer in bytes.
        size: u64,
    },

    /// Initial data larger than the allocation it should fill.
    #[error("initial data of {len} bytes does not fit allocation of {size} bytes")]
    DataTooLarge {
        /// Length of the provided data in bytes.
        len: u64,
        /// Size of the allocation in bytes.
        size: u64,
    },

    /// Internal bookkeeping no longer matches the backing store.
    #[error("invalid allocator state: {0}")]
    InvalidState(String),

    /// The backing store failed.
    #[error("backing store failure: {0}")]
    Backing(String),
}

/// Result type alias using [`AllocError`].
pub type Result<T> = std::result::Result<T, AllocError>;
