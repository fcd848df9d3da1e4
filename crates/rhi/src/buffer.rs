//! GPU buffers backed by gpu-allocator.
//!
//! Three kinds of buffer cover the renderer's needs. Vertex buffers are
//! device-local storage buffers the vertex shader reads through a buffer
//! device address, so they never touch fixed-function vertex input. Index
//! buffers use the classic binding. Staging buffers are host-visible
//! transfer sources that feed the other two through a copy.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What a buffer is for. Picks both usage flags and memory location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Device-local storage buffer addressed from the vertex shader.
    Vertex,
    /// Device-local index buffer.
    Index,
    /// Host-visible transfer source.
    Staging,
}

impl BufferUsage {
    /// Vulkan usage flags for this kind of buffer.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Where the allocation should live.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            // Geometry gets filled by a GPU copy, never by the CPU.
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Label used for the allocation and in logs.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Staging => "staging",
        }
    }
}

/// A `VkBuffer` plus its memory allocation.
///
/// The allocation is returned to gpu-allocator on drop, before the buffer
/// handle is destroyed.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates and binds a buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Buffer`] for a zero size, and allocation or
    /// Vulkan errors otherwise.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::Buffer("buffer size must be nonzero".to_string()));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };
        let allocation = {
            let mut allocator = device
                .allocator()
                .lock()
                .map_err(|_| RhiError::Buffer("allocator mutex poisoned".to_string()))?;
            allocator.allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: usage.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created {} buffer ({} bytes)", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Copies `data` into the buffer at `offset`.
    ///
    /// Only valid for host-visible buffers ([`BufferUsage::Staging`]);
    /// device-local buffers are filled by GPU copies instead.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Buffer`] when the write would run past the end
    /// of the buffer or the memory is not mapped.
    pub fn write_data(&mut self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let offset = offset as usize;
        let end = offset + data.len();
        if end as vk::DeviceSize > self.size {
            return Err(RhiError::Buffer(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                self.size
            )));
        }

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| RhiError::Buffer("buffer memory is not host-visible".to_string()))?;

        mapped[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// GPU virtual address of the buffer.
    ///
    /// Requires the `SHADER_DEVICE_ADDRESS` usage flag, which
    /// [`BufferUsage::Vertex`] sets.
    pub fn device_address(&self) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        unsafe { self.device.handle().get_buffer_device_address(&info) }
    }

    /// Raw buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take()
            && let Ok(mut allocator) = self.device.allocator().lock()
            && let Err(e) = allocator.free(allocation)
        {
            tracing::error!("Failed to free {} buffer allocation: {:?}", self.usage.name(), e);
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_buffers_support_device_address() {
        let flags = BufferUsage::Vertex.to_vk_usage();
        assert!(flags.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(flags.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
        assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));
        // Device address is a vertex-buffer concern only.
        assert!(!BufferUsage::Index
            .to_vk_usage()
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
    }

    #[test]
    fn test_staging_is_host_visible_transfer_source() {
        assert!(BufferUsage::Staging
            .to_vk_usage()
            .contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert_eq!(
            BufferUsage::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
    }

    #[test]
    fn test_geometry_lives_on_the_gpu() {
        assert_eq!(
            BufferUsage::Vertex.memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(BufferUsage::Index.memory_location(), MemoryLocation::GpuOnly);
    }

    #[test]
    fn test_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Buffer>();
    }
}
