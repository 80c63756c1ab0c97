//! Device limit detection.
//!
//! Only the limits a buffer sub-allocation library actually consumes:
//! offset alignments for descriptor-backed sub-buffers, copy alignment for
//! the staging path, and memory budget information for sizing caps.

use ash::vk;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    #[must_use]
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Device limits consumed by the buffer layer.
#[derive(Debug, Clone)]
pub struct DeviceLimits {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,

    /// Minimum offset alignment for uniform buffer descriptors.
    pub min_uniform_buffer_offset_alignment: u64,
    /// Minimum offset alignment for storage buffer descriptors.
    pub min_storage_buffer_offset_alignment: u64,
    /// Optimal offset alignment for buffer copies.
    pub optimal_buffer_copy_offset_alignment: u64,
    /// Non-coherent memory flush granularity.
    pub non_coherent_atom_size: u64,
    /// Maximum live `VkDeviceMemory` allocations.
    pub max_memory_allocation_count: u32,
    /// Device-local memory in MB.
    pub device_local_memory_mb: u64,
}

impl DeviceLimits {
    /// Query limits from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let vendor = GpuVendor::from_vendor_id(properties.vendor_id);
        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor,
            device_name,
            api_version: properties.api_version,
            min_uniform_buffer_offset_alignment: properties
                .limits
                .min_uniform_buffer_offset_alignment,
            min_storage_buffer_offset_alignment: properties
                .limits
                .min_storage_buffer_offset_alignment,
            optimal_buffer_copy_offset_alignment: properties
                .limits
                .optimal_buffer_copy_offset_alignment,
            non_coherent_atom_size: properties.limits.non_coherent_atom_size,
            max_memory_allocation_count: properties.limits.max_memory_allocation_count,
            device_local_memory_mb,
        }
    }

    /// Check that the device meets the library's minimum requirements.
    #[must_use]
    pub fn meets_requirements(&self) -> bool {
        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);

        api_major > 1 || (api_major == 1 && api_minor >= 3)
    }

    /// Human-readable device summary for startup logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0xFFFF), GpuVendor::Other(0xFFFF));
    }
}
