//! Mesh data and GPU upload.
//!
//! Vertex data never goes through fixed-function vertex input. Vertices
//! live in a device-local storage buffer and the vertex shader indexes
//! them through a buffer device address carried in the push constants, so
//! mesh pipelines declare no vertex attributes at all. Only the index
//! buffer uses a classic binding.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracing::debug;

use ember_rhi::buffer::{Buffer, BufferUsage};
use ember_rhi::device::Device;
use ember_rhi::immediate::ImmediateContext;
use ember_rhi::{RhiError, RhiResult, vk};

/// A single vertex as shaders read it from the vertex storage buffer.
///
/// UV coordinates are interleaved into the padding std430 layout would
/// otherwise insert after each vec3.
///
/// # Memory Layout
///
/// - Offset 0: position (12 bytes) + uv_x (4 bytes)
/// - Offset 16: normal (12 bytes) + uv_y (4 bytes)
/// - Offset 32: color (16 bytes)
/// - 48 bytes total
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Texture coordinate U
    pub uv_x: f32,
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate V
    pub uv_y: f32,
    /// Per-vertex RGBA color
    pub color: [f32; 4],
}

impl Vertex {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Push constants for the mesh vertex shader.
///
/// # Memory Layout
///
/// - Offset 0: world matrix (64 bytes)
/// - Offset 64: vertex buffer device address (8 bytes)
/// - Offset 72: padding (8 bytes, Mat4 forces 16-byte struct alignment)
/// - 80 bytes total
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DrawPushConstants {
    /// Object-to-clip transform applied to every vertex
    pub world_matrix: Mat4,
    /// Device address of the vertex storage buffer
    pub vertex_buffer: vk::DeviceAddress,
    /// Pads the block to a 16-byte multiple.
    pub _padding: [u32; 2],
}

impl DrawPushConstants {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Creates push constants for one draw.
    pub fn new(world_matrix: Mat4, vertex_buffer: vk::DeviceAddress) -> Self {
        Self {
            world_matrix,
            vertex_buffer,
            _padding: [0; 2],
        }
    }
}

/// GPU-resident geometry for one mesh.
///
/// Owns the vertex and index buffers. The vertex buffer's device address
/// is captured at upload time for use in [`DrawPushConstants`].
pub struct MeshBuffers {
    /// Vertex storage buffer, read by the vertex shader through its address
    vertex_buffer: Buffer,
    /// Index buffer bound through the classic binding point
    index_buffer: Buffer,
    vertex_buffer_address: vk::DeviceAddress,
    index_count: u32,
}

impl MeshBuffers {
    /// Uploads mesh data to device-local memory.
    ///
    /// Both buffers are filled through a single staging buffer and one
    /// immediate submission. The staging buffer is dropped as soon as the
    /// submission's fence wait returns, so no transient allocation
    /// outlives this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the mesh is empty, allocation fails, or the
    /// copy submission fails.
    pub fn upload(
        device: Arc<Device>,
        immediate: &ImmediateContext,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> RhiResult<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RhiError::Buffer("cannot upload an empty mesh".to_string()));
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let vertex_size = vertex_bytes.len() as vk::DeviceSize;
        let index_size = index_bytes.len() as vk::DeviceSize;

        let vertex_buffer = Buffer::new(device.clone(), BufferUsage::Vertex, vertex_size)?;
        let index_buffer = Buffer::new(device.clone(), BufferUsage::Index, index_size)?;

        // One staging buffer covers both copies: vertices first, indices
        // right after them.
        let mut staging = Buffer::new(device, BufferUsage::Staging, vertex_size + index_size)?;
        staging.write_data(0, vertex_bytes)?;
        staging.write_data(vertex_size, index_bytes)?;

        immediate.submit(|cmd| {
            cmd.copy_buffer(
                staging.handle(),
                vertex_buffer.handle(),
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: vertex_size,
                }],
            );
            cmd.copy_buffer(
                staging.handle(),
                index_buffer.handle(),
                &[vk::BufferCopy {
                    src_offset: vertex_size,
                    dst_offset: 0,
                    size: index_size,
                }],
            );
            Ok(())
        })?;
        // The submission has fully completed; the staging buffer is safe
        // to free.
        drop(staging);

        let vertex_buffer_address = vertex_buffer.device_address();
        debug!(
            "Uploaded mesh: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_buffer_address,
            index_count: indices.len() as u32,
        })
    }

    /// Returns the vertex storage buffer.
    #[inline]
    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    /// Returns the index buffer.
    #[inline]
    pub fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    /// Returns the device address of the vertex buffer.
    #[inline]
    pub fn vertex_buffer_address(&self) -> vk::DeviceAddress {
        self.vertex_buffer_address
    }

    /// Returns the number of indices in the mesh.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Builds the built-in demo rectangle.
///
/// Two triangles covering the center of the viewport with a different
/// color in each corner.
pub fn rectangle() -> (Vec<Vertex>, Vec<u32>) {
    let normal = [0.0, 0.0, 1.0];
    let vertices = vec![
        Vertex {
            position: [0.5, -0.5, 0.0],
            normal,
            color: [0.0, 0.0, 0.0, 1.0],
            ..Vertex::default()
        },
        Vertex {
            position: [0.5, 0.5, 0.0],
            normal,
            color: [0.5, 0.5, 0.5, 1.0],
            ..Vertex::default()
        },
        Vertex {
            position: [-0.5, -0.5, 0.0],
            normal,
            color: [1.0, 0.0, 0.0, 1.0],
            ..Vertex::default()
        },
        Vertex {
            position: [-0.5, 0.5, 0.0],
            normal,
            color: [0.0, 1.0, 0.0, 1.0],
            ..Vertex::default()
        },
    ];
    let indices = vec![0, 1, 2, 2, 1, 3];
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use std::mem::offset_of;

    use super::*;

    #[test]
    fn test_vertex_size() {
        assert_eq!(Vertex::SIZE, 48);
    }

    #[test]
    fn test_vertex_field_offsets() {
        // The shader-side struct interleaves UVs into the vec3 padding;
        // the offsets must match exactly
        assert_eq!(offset_of!(Vertex, position), 0);
        assert_eq!(offset_of!(Vertex, uv_x), 12);
        assert_eq!(offset_of!(Vertex, normal), 16);
        assert_eq!(offset_of!(Vertex, uv_y), 28);
        assert_eq!(offset_of!(Vertex, color), 32);
    }

    #[test]
    fn test_vertex_pod_cast() {
        let vertices = [Vertex::default(), Vertex::default()];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 2 * Vertex::SIZE);
    }

    #[test]
    fn test_draw_push_constants_size() {
        assert_eq!(DrawPushConstants::SIZE, 80);
        // Must fit the 128 bytes of push constant space every Vulkan
        // device guarantees
        assert!(DrawPushConstants::SIZE <= 128);
    }

    #[test]
    fn test_draw_push_constants_layout() {
        assert_eq!(std::mem::align_of::<DrawPushConstants>(), 16);
        assert_eq!(offset_of!(DrawPushConstants, world_matrix), 0);
        assert_eq!(offset_of!(DrawPushConstants, vertex_buffer), 64);
    }

    #[test]
    fn test_rectangle_indices_in_bounds() {
        let (vertices, indices) = rectangle();
        assert_eq!(vertices.len(), 4);
        assert_eq!(indices.len(), 6);
        for &index in &indices {
            assert!((index as usize) < vertices.len());
        }
    }
}
