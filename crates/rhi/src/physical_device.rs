//! GPU selection and ranking.
//!
//! Every enumerated GPU is checked against the engine's hard requirements
//! (graphics + present queues, Vulkan 1.3, a usable surface) and the
//! survivors are scored; the highest-scoring device wins. Discrete GPUs
//! outrank everything else.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue families the engine requires from a GPU.
///
/// All submission (graphics, compute dispatches, transfers) goes through
/// the graphics family. Presentation may live in a different family and
/// is tracked separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Family with graphics support (implies compute and transfer).
    pub graphics: u32,
    /// Family able to present to the target surface.
    pub present: u32,
}

impl QueueFamilies {
    /// Families that need their own queue create info.
    ///
    /// Graphics and present usually share a family, and Vulkan rejects
    /// duplicate family indices at device creation, so the shared case
    /// collapses to a single entry.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// A GPU that passed the suitability checks.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types; the score reads total device-local size.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Resolved queue family indices.
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Device name, lossily decoded from the driver's fixed buffer.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Human-readable device category.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Supported Vulkan version as (major, minor, patch).
    pub fn api_version(&self) -> (u32, u32, u32) {
        let v = self.properties.api_version;
        (
            vk::api_version_major(v),
            vk::api_version_minor(v),
            vk::api_version_patch(v),
        )
    }

    /// Total bytes across all device-local memory heaps.
    pub fn device_local_memory(&self) -> u64 {
        let heap_count = self.memory_properties.memory_heap_count as usize;
        self.memory_properties.memory_heaps[..heap_count]
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the most suitable GPU for rendering and presentation.
///
/// Requirements are a graphics queue family, a present-capable family for
/// the given surface, Vulkan 1.3 (dynamic rendering and synchronization2
/// as core features), and at least one surface format and present mode.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} Vulkan device(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| evaluate_device(instance, device, surface, surface_loader))
        .max_by_key(|(_, score)| *score);

    let Some((selected, score)) = best else {
        warn!("No GPU meets the engine's requirements");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}), Vulkan {}.{}.{}, score {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected)
}

/// Checks one device against the requirements and scores it.
///
/// Returns `None` when the device cannot run the engine at all.
fn evaluate_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<(PhysicalDeviceInfo, u32)> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown")
    };

    // Version numbers with the same variant compare numerically.
    if properties.api_version < vk::API_VERSION_1_3 {
        debug!(
            "'{}' rejected: needs Vulkan 1.3, driver reports {}.{}",
            name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        );
        return None;
    }

    let Some(queue_families) = find_queue_families(instance, device, surface, surface_loader)
    else {
        debug!("'{}' rejected: no graphics + present queue families", name);
        return None;
    };

    if !surface_is_usable(device, surface, surface_loader) {
        debug!("'{}' rejected: surface reports no formats or present modes", name);
        return None;
    }

    let info = PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    };
    let score = score_device(&info);
    debug!(
        "'{}' ({}) qualifies with score {}",
        info.device_name(),
        info.device_type_name(),
        score
    );

    Some((info, score))
}

/// Finds a graphics family and a present-capable family.
///
/// Takes the first match for each; on most hardware that is the same
/// family, which keeps the device on a single queue.
fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<QueueFamilies> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut graphics = None;
    let mut present = None;

    for (index, family) in families.iter().enumerate() {
        if family.queue_count == 0 {
            continue;
        }
        let index = index as u32;

        if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
        }

        if present.is_none() {
            let supported = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false)
            };
            if supported {
                present = Some(index);
            }
        }

        if graphics.is_some() && present.is_some() {
            break;
        }
    }

    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

/// The surface must expose at least one format and one present mode,
/// otherwise no swapchain can ever be built against it.
fn surface_is_usable(
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> bool {
    let formats = unsafe {
        surface_loader
            .get_physical_device_surface_formats(device, surface)
            .unwrap_or_default()
    };
    let present_modes = unsafe {
        surface_loader
            .get_physical_device_surface_present_modes(device, surface)
            .unwrap_or_default()
    };
    !formats.is_empty() && !present_modes.is_empty()
}

/// Scores a qualifying device; higher is better.
fn score_device(info: &PhysicalDeviceInfo) -> u32 {
    let type_score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    // VRAM as a tiebreaker within a device class, capped so a huge heap
    // cannot outrank a better class.
    let vram_mb = (info.device_local_memory() / (1024 * 1024)) as u32;

    type_score + info.properties.limits.max_image_dimension2_d + vram_mb.min(16_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with(device_type: vk::PhysicalDeviceType, vram: u64) -> PhysicalDeviceInfo {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties::default();
        memory_properties.memory_heap_count = 1;
        memory_properties.memory_heaps[0] = vk::MemoryHeap {
            size: vram,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };

        PhysicalDeviceInfo {
            device: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties {
                device_type,
                ..Default::default()
            },
            memory_properties,
            queue_families: QueueFamilies {
                graphics: 0,
                present: 0,
            },
        }
    }

    #[test]
    fn test_unique_families_shared() {
        let families = QueueFamilies {
            graphics: 2,
            present: 2,
        };
        assert_eq!(families.unique(), vec![2]);
    }

    #[test]
    fn test_unique_families_distinct() {
        let families = QueueFamilies {
            graphics: 0,
            present: 1,
        };
        assert_eq!(families.unique(), vec![0, 1]);
    }

    #[test]
    fn test_discrete_outranks_integrated() {
        let discrete = info_with(vk::PhysicalDeviceType::DISCRETE_GPU, 0);
        let integrated = info_with(vk::PhysicalDeviceType::INTEGRATED_GPU, 1 << 34);
        assert!(score_device(&discrete) > score_device(&integrated));
    }

    #[test]
    fn test_vram_breaks_ties_within_class() {
        let small = info_with(vk::PhysicalDeviceType::DISCRETE_GPU, 2 << 30);
        let large = info_with(vk::PhysicalDeviceType::DISCRETE_GPU, 8 << 30);
        assert!(score_device(&large) > score_device(&small));
    }

    #[test]
    fn test_device_local_memory_skips_host_heaps() {
        let mut info = info_with(vk::PhysicalDeviceType::DISCRETE_GPU, 1024);
        info.memory_properties.memory_heap_count = 2;
        info.memory_properties.memory_heaps[1] = vk::MemoryHeap {
            size: 4096,
            flags: vk::MemoryHeapFlags::empty(),
        };
        assert_eq!(info.device_local_memory(), 1024);
    }

    #[test]
    fn test_device_type_names() {
        let info = info_with(vk::PhysicalDeviceType::DISCRETE_GPU, 0);
        assert_eq!(info.device_type_name(), "Discrete GPU");
        let info = info_with(vk::PhysicalDeviceType::CPU, 0);
        assert_eq!(info.device_type_name(), "CPU");
    }
}
