//! Logical device, queues, and the GPU memory allocator.
//!
//! [`Device`] is the hub the rest of the crate hangs off: every wrapper
//! holds an `Arc<Device>` and destroys its Vulkan handles through it.
//! The gpu-allocator instance lives here too, behind a `Mutex`, so
//! buffers and images can allocate from any thread.

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::error::RhiResult;
use crate::instance::Instance;
use crate::physical_device::PhysicalDeviceInfo;

/// Device extensions the engine cannot run without.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Owns the `VkDevice`, its queues, and the memory allocator.
///
/// Dropping the `Device` waits for the GPU to go idle, tears down the
/// allocator, then destroys the logical device. Everything that borrows
/// the device via `Arc` must therefore be gone first; the engine enforces
/// that with explicit drop ordering.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    /// `ManuallyDrop` so [`Drop`] can release the allocator before
    /// `destroy_device`; the allocator frees its memory blocks through
    /// the device handle it captured at creation.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    graphics_family: u32,
    present_family: u32,
}

impl Device {
    /// Creates the logical device and allocator for a selected GPU.
    ///
    /// Enables the swapchain extension plus the core features the
    /// renderer depends on: buffer device address and descriptor indexing
    /// from Vulkan 1.2, dynamic rendering and synchronization2 from 1.3.
    /// One queue is created per unique family; graphics and present share
    /// a queue when they share a family.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator setup fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> RhiResult<Arc<Self>> {
        let families = physical_device_info.queue_families;

        let queue_priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Requesting {} queue(s) (graphics family {}, present family {})",
            queue_infos.len(),
            families.graphics,
            families.present
        );

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .descriptor_indexing(true);
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let extension_names: Vec<*const std::os::raw::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };
        info!("Created logical device");

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            // Mesh buffers hand their addresses to shaders, so every
            // device allocation must be BDA-capable.
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;
        debug!("Created GPU memory allocator");

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            graphics_family: families.graphics,
            present_family: families.present,
        }))
    }

    /// Raw `ash` device for issuing Vulkan calls.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Physical device this logical device was created from.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Queue used for all graphics, compute, and transfer submission.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Queue used for presentation (may equal the graphics queue).
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Family index of the graphics queue.
    #[inline]
    pub fn graphics_family_index(&self) -> u32 {
        self.graphics_family
    }

    /// Family index of the present queue.
    #[inline]
    pub fn present_family_index(&self) -> u32 {
        self.present_family
    }

    /// GPU memory allocator, shared behind a `Mutex`.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Blocks until every queue on the device has drained.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is lost while waiting.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits synchronization2 batches to the graphics queue.
    ///
    /// # Safety
    ///
    /// All referenced command buffers must be fully recorded, and `fence`
    /// (if not null) must be unsignaled and not owned by a pending submit.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo2],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit2(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            // Nothing may still be executing when handles start dying.
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("device_wait_idle failed during teardown: {:?}", e);
            }

            // Allocator first: it returns memory through the device handle.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Destroyed logical device");
    }
}

// Safety: the raw handles are plain identifiers, ash::Device is Send+Sync,
// and the allocator is behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_extension_required() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
