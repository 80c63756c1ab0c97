//! Vulkan substrate and GPU-bound buffer strategies for quarry.
//!
//! This crate provides:
//! - Headless Vulkan instance, device, and queue management
//! - Memory allocation via gpu-allocator
//! - The device-buffer [`Backing`](quarry_alloc::Backing) implementation,
//!   with deferred retirement of relocated backings
//! - A staging belt and per-frame swap buffers built on the resizable core
//! - Double-buffered secondary command recording and an async two-stage
//!   pipeline loader

pub mod backing;
pub mod command;
pub mod context;
pub mod deferred;
pub mod error;
pub mod instance;
pub mod limits;
pub mod loader;
pub mod memory;
pub mod staging;
pub mod swap_buffer;
pub mod swap_cmd;
pub mod sync;
pub mod worker;

pub use backing::{
    create_host_buffer, create_storage_buffer, create_uniform_buffer, GpuBacking,
    GpuDynamicBuffer, GpuSubBuffer, GpuUniformBuffer,
};
pub use command::CommandPool;
pub use context::{GpuContext, GpuContextBuilder};
pub use deferred::{DeferredDeletionQueue, DeferredQueue};
pub use error::{GpuError, Result};
pub use limits::{DeviceLimits, GpuVendor};
pub use loader::{JobId, PipelineLoader};
pub use memory::{GpuAllocator, GpuBuffer};
pub use staging::{StagingBuffer, StagingConfig};
pub use swap_buffer::SwapBuffer;
pub use swap_cmd::SwapCommandBufferGroup;
pub use sync::Fence;
pub use worker::WorkerThread;
