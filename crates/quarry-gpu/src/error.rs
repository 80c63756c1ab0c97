//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("no suitable GPU found")]
    NoSuitableDevice,

    /// Memory allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Sub-allocation layer failure.
    #[error("sub-allocation failed: {0}")]
    Alloc(#[from] quarry_alloc::AllocError),

    /// Async loader job failed or was lost.
    #[error("pipeline load failed: {0}")]
    PipelineLoad(String),

    /// Invalid state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
