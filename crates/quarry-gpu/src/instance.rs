//! Vulkan instance creation and physical device selection.

use std::ffi::{CStr, CString};

use ash::vk;
use tracing::{debug, warn};

use crate::error::{GpuError, Result};

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a headless Vulkan instance.
///
/// No surface extensions; only portability enumeration on macOS, which
/// MoltenVK requires.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::Other("application name contains a NUL byte".to_string()))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"quarry")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let mut extension_names: Vec<*const i8> = Vec::new();
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let layers = if enable_validation {
        available_validation_layers(entry)?
    } else {
        vec![]
    };
    let layer_names: Vec<*const i8> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

/// Filter the requested validation layers down to those the loader offers.
///
/// Validation is best-effort: a missing layer warns instead of failing.
unsafe fn available_validation_layers(entry: &ash::Entry) -> Result<Vec<&'static CStr>> {
    let available = entry.enumerate_instance_layer_properties()?;

    let layers = validation_layers()
        .into_iter()
        .filter(|layer| {
            let found = available
                .iter()
                .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == *layer);
            if !found {
                warn!("validation layer {:?} not available", layer);
            }
            found
        })
        .collect();

    Ok(layers)
}

/// Select the physical device with the highest score.
///
/// Scoring requires Vulkan 1.3, prefers discrete over integrated GPUs, and
/// weights by VRAM (one point per GiB).
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    let mut candidates: Vec<(i64, vk::PhysicalDevice)> = instance
        .enumerate_physical_devices()?
        .into_iter()
        .filter_map(|device| {
            let properties = instance.get_physical_device_properties(device);
            let score = score_device(instance, device, &properties)?;

            let name = CStr::from_ptr(properties.device_name.as_ptr());
            debug!(device = ?name, score, "physical device candidate");
            Some((score, device))
        })
        .collect();

    candidates.sort_by_key(|(score, _)| *score);
    candidates
        .pop()
        .map(|(_, device)| device)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Score a device, or `None` when it fails the hard requirements.
unsafe fn score_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    properties: &vk::PhysicalDeviceProperties,
) -> Option<i64> {
    let major = vk::api_version_major(properties.api_version);
    let minor = vk::api_version_minor(properties.api_version);
    if major < 1 || (major == 1 && minor < 3) {
        return None;
    }

    let type_score: i64 = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };

    let memory = instance.get_physical_device_memory_properties(device);
    let vram_gb: i64 = memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| (h.size >> 30) as i64)
        .sum();

    Some(type_score + vram_gb)
}
