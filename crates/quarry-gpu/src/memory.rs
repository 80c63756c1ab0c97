//! GPU memory allocation.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;

use crate::error::{GpuError, Result};

/// Wrapper over the gpu-allocator Vulkan allocator.
///
/// Tracks the number of live buffers so callers can watch their distance to
/// the device's `max_memory_allocation_count`.
pub struct GpuAllocator {
    // None after shutdown.
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
    live_buffers: usize,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: cfg!(debug_assertions),
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
            live_buffers: 0,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("allocator already shut down".to_string()))
    }

    /// Create a buffer and bind memory to it.
    ///
    /// The buffer handle is cleaned up again if allocation or binding fails
    /// partway.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        if let Err(err) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            // Unwind both halves; the free failure here is secondary.
            if let Ok(allocator) = self.inner() {
                let _ = allocator.free(allocation);
            }
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(err.into());
        }

        self.live_buffers += 1;
        Ok(GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Free a buffer and its memory.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.inner()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
            self.live_buffers = self.live_buffers.saturating_sub(1);
        }

        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
        }
        buffer.buffer = vk::Buffer::null();

        Ok(())
    }

    /// Number of buffers created and not yet freed.
    #[must_use]
    pub const fn live_buffers(&self) -> usize {
        self.live_buffers
    }

    /// Shut the allocator down, freeing all GPU memory.
    ///
    /// Must happen before the Vulkan device is destroyed. Remaining
    /// allocations are freed and logged as leaks.
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A GPU buffer with its memory allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// Map the buffer memory for CPU access.
    #[must_use]
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr().cast::<u8>())
    }

    /// Whether the buffer is host-visible and persistently mapped.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.allocation
            .as_ref()
            .is_some_and(|a| a.mapped_ptr().is_some())
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self.checked_range(offset, data.len() as u64)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        }
        Ok(())
    }

    /// Write typed data at the given offset (must be host-visible).
    pub fn write_range<T: bytemuck::NoUninit>(&self, offset: u64, data: &[T]) -> Result<()> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }

    /// Read raw bytes at the given offset (must be host-visible).
    pub fn read_bytes(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let ptr = self.checked_range(offset, out.len() as u64)?;
        unsafe {
            std::ptr::copy_nonoverlapping(ptr, out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    /// Resolve `offset` into the mapping, checking `len` bytes fit.
    fn checked_range(&self, offset: u64, len: u64) -> Result<*mut u8> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("buffer not mapped".to_string()))?;

        let end = offset
            .checked_add(len)
            .ok_or_else(|| GpuError::InvalidState("offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "range [{offset}..{end}) exceeds buffer size {}",
                self.size
            )));
        }

        // Safe: end <= size was just checked.
        Ok(unsafe { ptr.add(offset as usize) })
    }
}
