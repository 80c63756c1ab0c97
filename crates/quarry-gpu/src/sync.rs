//! Fence wrapper for copy submissions.

use std::sync::Arc;

use ash::vk;

use crate::error::Result;

/// An owned fence, destroyed on drop.
///
/// The grow and staged-write paths submit single-time transfer work and
/// block on one of these until the copy lands.
pub struct Fence {
    device: Arc<ash::Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Create an unsignaled fence.
    pub fn new(device: Arc<ash::Device>) -> Result<Self> {
        Self::with_flags(device, vk::FenceCreateFlags::empty())
    }

    /// Create a fence that starts signaled.
    pub fn new_signaled(device: Arc<ash::Device>) -> Result<Self> {
        Self::with_flags(device, vk::FenceCreateFlags::SIGNALED)
    }

    fn with_flags(device: Arc<ash::Device>, flags: vk::FenceCreateFlags) -> Result<Self> {
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.create_fence(&create_info, None)? };
        Ok(Self { device, fence })
    }

    /// Raw fence handle for submit calls.
    #[must_use]
    pub const fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Block until the fence signals or `timeout_ns` elapses.
    pub fn wait(&self, timeout_ns: u64) -> Result<()> {
        unsafe {
            self.device.wait_for_fences(&[self.fence], true, timeout_ns)?;
        }
        Ok(())
    }

    /// Return the fence to the unsignaled state.
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device.reset_fences(&[self.fence])?;
        }
        Ok(())
    }

    /// Whether the fence has signaled.
    pub fn is_signaled(&self) -> Result<bool> {
        let signaled = unsafe { self.device.get_fence_status(self.fence)? };
        Ok(signaled)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}
