//! GPU context management.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::deferred::DeferredDeletionQueue;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::limits::DeviceLimits;
use crate::memory::GpuAllocator;

/// Main GPU context holding Vulkan resources.
///
/// Frame numbering drives the deferred deletion queue: callers bump the
/// frame counter once per frame via [`end_frame`](Self::end_frame), which
/// also releases retired backings whose in-flight window has passed.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    limits: DeviceLimits,
    allocator: Mutex<GpuAllocator>,
    deletion_queue: Mutex<DeferredDeletionQueue>,
    frame: AtomicU64,
    queues: Queues,
}

/// Graphics and transfer queue handles with their families.
struct Queues {
    graphics_family: u32,
    transfer_family: u32,
    graphics: vk::Queue,
    transfer: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the device handle as a shareable `Arc`.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the device limits.
    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.queues.graphics
    }

    /// Get the transfer queue (dedicated when the device has one, otherwise
    /// an alias of the graphics queue).
    pub fn transfer_queue(&self) -> vk::Queue {
        self.queues.transfer
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.queues.graphics_family
    }

    /// Get the transfer queue family index.
    pub fn transfer_queue_family(&self) -> u32 {
        self.queues.transfer_family
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Get access to the deferred deletion queue.
    pub fn deletion_queue(&self) -> &Mutex<DeferredDeletionQueue> {
        &self.deletion_queue
    }

    /// Current frame number.
    pub fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Advance the frame counter and free retired backings whose in-flight
    /// window has passed.
    pub fn end_frame(&self) -> Result<()> {
        let frame = self.frame.fetch_add(1, Ordering::AcqRel) + 1;
        let mut deletion_queue = self.deletion_queue.lock();
        let mut allocator = self.allocator.lock();
        deletion_queue.process(&mut allocator, frame)
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Retired backings first, then the allocator, then the device.
            // Lock order matches end_frame: deletion queue, then allocator.
            {
                let mut deletion_queue = self.deletion_queue.lock();
                let mut allocator = self.allocator.lock();
                if let Err(err) = deletion_queue.flush(&mut allocator) {
                    tracing::warn!("failed to flush deferred deletions: {err}");
                }
                allocator.shutdown();
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    frames_in_flight: usize,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "quarry".to_string(),
            enable_validation: cfg!(debug_assertions),
            frames_in_flight: 2,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Set the frames-in-flight window for deferred deletion.
    pub fn frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let physical_device = unsafe { select_physical_device(&instance) }?;

        let limits = unsafe { DeviceLimits::query(&instance, physical_device) };
        if !limits.meets_requirements() {
            return Err(GpuError::NoSuitableDevice);
        }
        tracing::info!("selected GPU: {}", limits.summary());

        let (device, queues) = unsafe { create_device(&instance, physical_device) }?;
        let device = Arc::new(device);

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            limits,
            allocator: Mutex::new(allocator),
            deletion_queue: Mutex::new(DeferredDeletionQueue::new(self.frames_in_flight)),
            frame: AtomicU64::new(0),
            queues,
        })
    }
}

/// Pick queue families: graphics is required, transfer prefers a dedicated
/// family (no graphics, no compute) and falls back to the graphics family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn pick_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<(u32, u32)> {
    let families = instance.get_physical_device_queue_family_properties(physical_device);

    let graphics = families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .ok_or(GpuError::NoSuitableDevice)? as u32;

    let transfer = families
        .iter()
        .position(|f| {
            f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !f
                    .queue_flags
                    .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map_or(graphics, |i| i as u32);

    Ok((graphics, transfer))
}

/// Create the logical device and retrieve queue handles.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<(ash::Device, Queues)> {
    let (graphics_family, transfer_family) = pick_queue_families(instance, physical_device)?;

    let queue_priority = 1.0_f32;
    let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];
    if transfer_family != graphics_family {
        queue_create_infos.push(
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(transfer_family)
                .queue_priorities(std::slice::from_ref(&queue_priority)),
        );
    }

    // Vulkan 1.3 synchronization2 covers any barriers callers record around
    // the copies this library submits.
    let mut vulkan_1_3_features =
        vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .push_next(&mut vulkan_1_3_features);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let queues = Queues {
        graphics_family,
        transfer_family,
        graphics: device.get_device_queue(graphics_family, 0),
        transfer: device.get_device_queue(transfer_family, 0),
    };

    Ok((device, queues))
}
