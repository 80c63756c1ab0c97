//! Vulkan implementation of the resizable-buffer backing store.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use quarry_alloc::{
    AllocError, Backing, DynamicBufferConfig, DynamicResizableBuffer, SubBuffer,
    UniformBufferConfig, UniformResizableBuffer,
};
use tracing::debug;

use crate::command::CommandPool;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::memory::GpuBuffer;

/// A resizable buffer backed by GPU memory.
pub type GpuDynamicBuffer = DynamicResizableBuffer<GpuBacking>;
/// A fixed-stride resizable buffer backed by GPU memory.
pub type GpuUniformBuffer = UniformResizableBuffer<GpuBacking>;
/// A sub-buffer view into GPU memory.
pub type GpuSubBuffer = SubBuffer<GpuBacking>;

/// Device-buffer backing for resizable buffers.
///
/// Growth creates a replacement buffer, copies old contents forward, and
/// retires the old buffer to the context's deferred deletion queue, since
/// commands recorded for in-flight frames may still reference it.
pub struct GpuBacking {
    context: Arc<GpuContext>,
    // None until the first growth when created at size zero.
    buffer: Option<GpuBuffer>,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    name: String,
}

impl GpuBacking {
    /// Create a backing of `initial_size` bytes (zero defers buffer creation
    /// to the first growth).
    pub fn new(
        context: Arc<GpuContext>,
        initial_size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: impl Into<String>,
    ) -> Result<Self> {
        // Growth and staged writes always need both transfer directions.
        let usage = usage | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        let name = name.into();

        let buffer = if initial_size == 0 {
            None
        } else {
            Some(
                context
                    .allocator()
                    .lock()
                    .create_buffer(initial_size, usage, location, &name)?,
            )
        };

        Ok(Self {
            context,
            buffer,
            usage,
            location,
            name,
        })
    }

    /// Raw handle of the current device buffer.
    ///
    /// Null before the first growth of a zero-size backing. Invalidated by
    /// relocation; callers watch the owning buffer's reallocation count.
    #[must_use]
    pub fn buffer_handle(&self) -> vk::Buffer {
        self.buffer.as_ref().map_or(vk::Buffer::null(), |b| b.buffer)
    }

    /// The context this backing allocates from.
    #[must_use]
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Copy `[0, len)` from `src` to `dst` on the transfer queue, waiting
    /// for completion.
    fn copy_forward(&self, src: &GpuBuffer, dst: &GpuBuffer, len: u64) -> Result<()> {
        // Host-visible on both sides: plain memcpy through the mappings.
        if src.is_mapped() && dst.is_mapped() {
            let mut bytes = vec![0u8; len as usize];
            src.read_bytes(0, &mut bytes)?;
            dst.write_bytes(0, &bytes)?;
            return Ok(());
        }

        let pool = CommandPool::new(
            self.context.device_arc(),
            self.context.transfer_queue_family(),
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;
        let device = self.context.device();
        unsafe {
            pool.submit_once(self.context.transfer_queue(), |cmd| {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: len,
                };
                device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]);
            })
        }
    }

    fn grow_impl(&mut self, new_len: u64) -> Result<()> {
        let new_buffer = self.context.allocator().lock().create_buffer(
            new_len,
            self.usage,
            self.location,
            &self.name,
        )?;

        if let Some(old) = self.buffer.take() {
            if old.size > 0 {
                self.copy_forward(&old, &new_buffer, old.size)?;
            }
            let frame = self.context.current_frame();
            debug!(
                name = %self.name,
                old_size = old.size,
                new_size = new_len,
                frame,
                "retiring replaced backing buffer"
            );
            self.context.deletion_queue().lock().retire(old, frame);
        }

        self.buffer = Some(new_buffer);
        Ok(())
    }

    fn write_impl(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("write into empty backing".to_string()))?;

        if buffer.is_mapped() {
            return buffer.write_bytes(offset, bytes);
        }

        // Device-local: stage through a transient host-visible buffer.
        let mut staging = self.context.allocator().lock().create_buffer(
            bytes.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "quarry_backing_staging",
        )?;
        staging.write_bytes(0, bytes)?;

        let pool = CommandPool::new(
            self.context.device_arc(),
            self.context.transfer_queue_family(),
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;
        let device = self.context.device();
        let result = unsafe {
            pool.submit_once(self.context.transfer_queue(), |cmd| {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: offset,
                    size: bytes.len() as u64,
                };
                device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
            })
        };

        // The submit was fence-waited, so the staging buffer is done.
        self.context.allocator().lock().free_buffer(&mut staging)?;
        result
    }
}

impl Backing for GpuBacking {
    fn len(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |b| b.size)
    }

    fn grow(&mut self, new_len: u64) -> quarry_alloc::Result<()> {
        self.grow_impl(new_len)
            .map_err(|e| AllocError::Backing(e.to_string()))
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> quarry_alloc::Result<()> {
        self.write_impl(offset, bytes)
            .map_err(|e| AllocError::Backing(e.to_string()))
    }
}

impl Drop for GpuBacking {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            let frame = self.context.current_frame();
            self.context.deletion_queue().lock().retire(buffer, frame);
        }
    }
}

/// Create a resizable storage buffer in device-local memory.
pub fn create_storage_buffer(
    context: Arc<GpuContext>,
    initial_size: u64,
    config: DynamicBufferConfig,
    name: impl Into<String>,
) -> Result<GpuDynamicBuffer> {
    let backing = GpuBacking::new(
        context,
        initial_size,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryLocation::GpuOnly,
        name,
    )?;
    Ok(DynamicResizableBuffer::new(backing, config))
}

/// Create a resizable host-visible buffer, suitable for upload pools.
pub fn create_host_buffer(
    context: Arc<GpuContext>,
    initial_size: u64,
    config: DynamicBufferConfig,
    name: impl Into<String>,
) -> Result<GpuDynamicBuffer> {
    let backing = GpuBacking::new(
        context,
        initial_size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        name,
    )?;
    Ok(DynamicResizableBuffer::new(backing, config))
}

/// Create a fixed-stride uniform buffer, aligned to the device's minimum
/// uniform-buffer offset alignment.
pub fn create_uniform_buffer(
    context: Arc<GpuContext>,
    element_size: u64,
    config: UniformBufferConfig,
    name: impl Into<String>,
) -> Result<GpuUniformBuffer> {
    let alignment = context.limits().min_uniform_buffer_offset_alignment;
    let backing = GpuBacking::new(
        context,
        0,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        MemoryLocation::CpuToGpu,
        name,
    )?;
    Ok(UniformResizableBuffer::new(
        backing,
        element_size,
        alignment,
        config,
    )?)
}
