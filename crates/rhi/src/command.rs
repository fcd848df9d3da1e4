//! Command pools and command buffer recording.
//!
//! [`CommandBuffer`] wraps the raw handle with the recording operations
//! the renderer actually issues, including synchronization2 layout
//! transitions with masks derived from how each layout pair is used, and
//! scaled blits between color images.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Owned `VkCommandPool` tied to one queue family.
///
/// Pools are single-threaded; recording from several threads means one
/// pool per thread.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Creates a pool whose buffers can be individually reset.
    ///
    /// This is the shape the frame ring wants: one long-lived buffer per
    /// slot, reset and re-recorded every time the slot comes around.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::create(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )
    }

    /// Creates a pool for short-lived, record-once buffers.
    ///
    /// Used by immediate submission, where buffers are recorded, submitted,
    /// and reset in one call.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn transient(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::create(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER | vk::CommandPoolCreateFlags::TRANSIENT,
        )
    }

    fn create(
        device: Arc<Device>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(flags);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!(
            "Created command pool for queue family {} ({:?})",
            queue_family_index, flags
        );

        Ok(Self { device, pool })
    }

    /// Raw pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!("Destroyed command pool");
    }
}

/// Recording interface over a primary command buffer.
///
/// Does not own the underlying handle; that is freed with the pool it
/// was allocated from, which must therefore outlive this wrapper.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocates one primary buffer from `pool`.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(Self {
            device,
            buffer: buffers[0],
        })
    }

    /// Raw command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Starts recording, flagged for one-time submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is already recording.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    /// Finishes recording, leaving the buffer ready to submit.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer was not recording.
    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        Ok(())
    }

    /// Returns the buffer to its initial state for re-recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    /// Transitions an image between layouts with a synchronization2
    /// barrier.
    ///
    /// Stage and access masks come from [`barrier_masks`]: layout pairs
    /// the frame graph uses get precise masks, anything else falls back
    /// to an ALL_COMMANDS barrier that is correct but over-blocks. The
    /// barrier spans every mip level and array layer.
    pub fn transition_image(
        &self,
        image: vk::Image,
        current_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let masks = barrier_masks(current_layout, new_layout);

        let aspect_mask = if new_layout == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let subresource_range = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect_mask)
            .base_mip_level(0)
            .level_count(vk::REMAINING_MIP_LEVELS)
            .base_array_layer(0)
            .layer_count(vk::REMAINING_ARRAY_LAYERS);

        let image_barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(masks.src_stage)
            .src_access_mask(masks.src_access)
            .dst_stage_mask(masks.dst_stage)
            .dst_access_mask(masks.dst_access)
            .old_layout(current_layout)
            .new_layout(new_layout)
            .subresource_range(subresource_range)
            .image(image);

        let barriers = [image_barrier];
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

        unsafe {
            self.device
                .handle()
                .cmd_pipeline_barrier2(self.buffer, &dependency_info);
        }
    }

    /// Starts a dynamic rendering pass (no `VkRenderPass`).
    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    /// Ends the current dynamic rendering pass.
    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle().cmd_end_rendering(self.buffer);
        }
    }

    /// Binds a pipeline at the given bind point.
    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
        }
    }

    /// Binds descriptor sets starting at `first_set`.
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                bind_point,
                layout,
                first_set,
                descriptor_sets,
                dynamic_offsets,
            );
        }
    }

    /// Binds an index buffer.
    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
        }
    }

    /// Sets the dynamic viewport.
    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(viewport));
        }
    }

    /// Sets the dynamic scissor rectangle.
    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(scissor));
        }
    }

    /// Records an indexed draw.
    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Records a compute dispatch.
    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe {
            self.device.handle().cmd_dispatch(
                self.buffer,
                group_count_x,
                group_count_y,
                group_count_z,
            );
        }
    }

    /// Pushes `data` into the push constant range at `offset`.
    ///
    /// `T` must be `#[repr(C)]` plain old data; the engine's push constant
    /// structs derive `Pod` to guarantee it.
    pub fn push_constants<T: Copy>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &T,
    ) {
        let bytes = unsafe {
            std::slice::from_raw_parts(data as *const T as *const u8, std::mem::size_of::<T>())
        };
        unsafe {
            self.device
                .handle()
                .cmd_push_constants(self.buffer, layout, stages, offset, bytes);
        }
    }

    /// Records buffer-to-buffer copies.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }

    /// Blits one color image onto another, scaling with a linear filter
    /// when the extents differ.
    ///
    /// Covers mip 0, layer 0 of both images. The source must be in
    /// `TRANSFER_SRC_OPTIMAL` and the destination in `TRANSFER_DST_OPTIMAL`.
    pub fn blit_image_to_image(
        &self,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        let blit_region = vk::ImageBlit2::default()
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: src_extent.width as i32,
                    y: src_extent.height as i32,
                    z: 1,
                },
            ])
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: dst_extent.width as i32,
                    y: dst_extent.height as i32,
                    z: 1,
                },
            ])
            .src_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .dst_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let regions = [blit_region];
        let blit_info = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .filter(vk::Filter::LINEAR)
            .regions(&regions);

        unsafe {
            self.device.handle().cmd_blit_image2(self.buffer, &blit_info);
        }
    }
}

/// Stage and access masks for an image layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BarrierMasks {
    src_stage: vk::PipelineStageFlags2,
    src_access: vk::AccessFlags2,
    dst_stage: vk::PipelineStageFlags2,
    dst_access: vk::AccessFlags2,
}

/// Derives synchronization2 masks for a layout transition.
///
/// Known transitions get precise masks matching how the frame graph uses
/// each layout. Anything else falls back to ALL_COMMANDS with full memory
/// visibility.
fn barrier_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> BarrierMasks {
    use vk::{AccessFlags2 as Access, ImageLayout as Layout, PipelineStageFlags2 as Stage};

    match (old, new) {
        // Draw target starting a new frame. The image is shared by both
        // frames in flight, so the first scope must cover the previous
        // frame's compute writes, attachment writes, and blit reads.
        (Layout::UNDEFINED, Layout::GENERAL) => BarrierMasks {
            src_stage: Stage::COMPUTE_SHADER | Stage::COLOR_ATTACHMENT_OUTPUT | Stage::TRANSFER,
            src_access: Access::MEMORY_WRITE,
            dst_stage: Stage::COMPUTE_SHADER,
            dst_access: Access::SHADER_WRITE | Access::SHADER_READ,
        },
        // Compute output becomes a color attachment for geometry
        (Layout::GENERAL, Layout::COLOR_ATTACHMENT_OPTIMAL) => BarrierMasks {
            src_stage: Stage::COMPUTE_SHADER,
            src_access: Access::SHADER_WRITE,
            dst_stage: Stage::COLOR_ATTACHMENT_OUTPUT,
            dst_access: Access::COLOR_ATTACHMENT_WRITE | Access::COLOR_ATTACHMENT_READ,
        },
        // Finished color attachment becomes a blit source
        (Layout::COLOR_ATTACHMENT_OPTIMAL, Layout::TRANSFER_SRC_OPTIMAL) => BarrierMasks {
            src_stage: Stage::COLOR_ATTACHMENT_OUTPUT,
            src_access: Access::COLOR_ATTACHMENT_WRITE,
            dst_stage: Stage::TRANSFER,
            dst_access: Access::TRANSFER_READ,
        },
        // Acquired swapchain image becomes a blit destination. The first
        // scope matches the acquire-semaphore wait stage so the transition
        // chains after the presentation engine releases the image.
        (Layout::UNDEFINED, Layout::TRANSFER_DST_OPTIMAL) => BarrierMasks {
            src_stage: Stage::COLOR_ATTACHMENT_OUTPUT,
            src_access: Access::empty(),
            dst_stage: Stage::TRANSFER,
            dst_access: Access::TRANSFER_WRITE,
        },
        // Blitted swapchain image becomes an attachment for overlay passes
        (Layout::TRANSFER_DST_OPTIMAL, Layout::COLOR_ATTACHMENT_OPTIMAL) => BarrierMasks {
            src_stage: Stage::TRANSFER,
            src_access: Access::TRANSFER_WRITE,
            dst_stage: Stage::COLOR_ATTACHMENT_OUTPUT,
            dst_access: Access::COLOR_ATTACHMENT_WRITE | Access::COLOR_ATTACHMENT_READ,
        },
        // Finished swapchain image handed to the presentation engine
        (Layout::COLOR_ATTACHMENT_OPTIMAL, Layout::PRESENT_SRC_KHR) => BarrierMasks {
            src_stage: Stage::COLOR_ATTACHMENT_OUTPUT,
            src_access: Access::COLOR_ATTACHMENT_WRITE,
            dst_stage: Stage::BOTTOM_OF_PIPE,
            dst_access: Access::empty(),
        },
        _ => BarrierMasks {
            src_stage: Stage::ALL_COMMANDS,
            src_access: Access::MEMORY_WRITE,
            dst_stage: Stage::ALL_COMMANDS,
            dst_access: Access::MEMORY_WRITE | Access::MEMORY_READ,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_types_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandPool>();
        assert_send::<CommandBuffer>();
    }

    #[test]
    fn test_barrier_masks_compute_target() {
        let masks = barrier_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL);
        // The draw target is shared across frames in flight, and the frame
        // fence only proves the slot two frames back is done. The first
        // scope must cover every stage the previous frame touched it at.
        assert!(masks.src_stage.contains(
            vk::PipelineStageFlags2::COMPUTE_SHADER
                | vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags2::TRANSFER
        ));
        assert!(masks.src_access.contains(vk::AccessFlags2::MEMORY_WRITE));
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert!(masks.dst_access.contains(vk::AccessFlags2::SHADER_WRITE));
    }

    #[test]
    fn test_barrier_masks_blit_target_chains_with_acquire_wait() {
        let masks = barrier_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        // Submission waits the acquire semaphore at COLOR_ATTACHMENT_OUTPUT;
        // the transition's first scope must include that stage to chain
        // after the wait, or the blit can race the presentation engine.
        assert!(
            masks
                .src_stage
                .contains(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
        );
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(masks.dst_access, vk::AccessFlags2::TRANSFER_WRITE);
    }

    #[test]
    fn test_barrier_masks_blit_source() {
        let masks = barrier_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert_eq!(
            masks.src_stage,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(masks.dst_access, vk::AccessFlags2::TRANSFER_READ);
    }

    #[test]
    fn test_barrier_masks_present() {
        let masks = barrier_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
        assert_eq!(masks.dst_access, vk::AccessFlags2::empty());
    }

    #[test]
    fn test_barrier_masks_unknown_pair_falls_back() {
        let masks = barrier_masks(
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::GENERAL,
        );
        assert_eq!(masks.src_stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert!(masks.dst_access.contains(vk::AccessFlags2::MEMORY_READ));
        assert!(masks.dst_access.contains(vk::AccessFlags2::MEMORY_WRITE));
    }
}
