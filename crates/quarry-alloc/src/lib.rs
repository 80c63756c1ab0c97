//! Free-list buffer sub-allocation for the quarry GPU library.
//!
//! This crate provides the allocation core, independent of any GPU API:
//! - A sorted, coalescing free list and a best-fit range allocator
//! - Dynamic resizable buffers that grow their backing store on demand
//! - A fixed-stride (uniform) variant for descriptor-style element slots
//! - The [`Backing`] storage trait, with a host-memory reference
//!   implementation; `quarry-gpu` supplies the Vulkan one

pub mod allocator;
pub mod backing;
pub mod error;
pub mod free_list;
pub mod math;
pub mod range;
pub mod resizable;
pub mod uniform;

pub use allocator::RangeAllocator;
pub use backing::{Backing, HostBacking};
pub use error::{AllocError, Result};
pub use free_list::FreeList;
pub use range::MemoryRange;
pub use resizable::{BufferStats, DynamicBufferConfig, DynamicResizableBuffer, SubBuffer};
pub use uniform::{UniformBufferConfig, UniformResizableBuffer};
