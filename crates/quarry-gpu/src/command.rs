//! Command pool and recording helpers.

use std::sync::Arc;

use ash::vk;

use crate::error::Result;
use crate::sync::Fence;

/// An owned command pool, destroyed on drop.
///
/// Pools are externally synchronized in Vulkan; one pool per recording
/// thread is the rule everything in this crate follows.
pub struct CommandPool {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a command pool on `queue_family`.
    pub fn new(
        device: Arc<ash::Device>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe { device.create_command_pool(&create_info, None)? };

        Ok(Self {
            device,
            pool,
            queue_family,
        })
    }

    /// Get the raw pool handle.
    #[must_use]
    pub const fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    #[must_use]
    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a primary command buffer.
    pub fn allocate_primary(&self) -> Result<vk::CommandBuffer> {
        self.allocate(vk::CommandBufferLevel::PRIMARY)
    }

    /// Allocate a secondary command buffer.
    pub fn allocate_secondary(&self) -> Result<vk::CommandBuffer> {
        self.allocate(vk::CommandBufferLevel::SECONDARY)
    }

    fn allocate(&self, level: vk::CommandBufferLevel) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info)? };
        Ok(buffers[0])
    }

    /// Reset the pool, recycling every command buffer allocated from it.
    ///
    /// # Safety
    /// No command buffer from this pool may be pending execution.
    pub unsafe fn reset(&self) -> Result<()> {
        self.device
            .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        Ok(())
    }

    /// Record a one-shot primary buffer via `f`, submit it on `queue`, and
    /// block on a fence until it completes.
    ///
    /// # Safety
    /// `queue` must belong to this pool's queue family, and every resource
    /// `f` records against must stay alive until this returns.
    pub unsafe fn submit_once<F>(&self, queue: vk::Queue, f: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let cmd = self.allocate_primary()?;

        begin_command_buffer(&self.device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        f(cmd);
        end_command_buffer(&self.device, cmd)?;

        let fence = Fence::new(Arc::clone(&self.device))?;
        let cmd_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
        self.device
            .queue_submit(queue, &[submit_info], fence.handle())?;
        fence.wait(u64::MAX)?;

        self.device.free_command_buffers(self.pool, &[cmd]);
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Begin recording a primary command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// Begin recording a secondary command buffer.
///
/// Recorded without render-pass inheritance; transfer and compute
/// secondaries need none.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_secondary_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let inheritance = vk::CommandBufferInheritanceInfo::default();
    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(flags)
        .inheritance_info(&inheritance);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}
