//! Engine orchestration: owns the GPU stack and drives the frame loop.
//!
//! # Initialization order
//!
//! Instance, surface, device, swapchain, draw image, descriptors, effect
//! and mesh pipelines, immediate context, demo mesh, frame ring. Teardown
//! runs in reverse inside `Drop`, after a device wait and a flush of the
//! engine-lifetime deletion queue.
//!
//! # Frame structure
//!
//! Every frame renders into a fixed offscreen draw image, never into the
//! swapchain directly:
//!
//! 1. Background compute effect writes the draw image (storage image)
//! 2. Geometry pass renders on top with dynamic rendering
//! 3. The draw image is blitted into the acquired swapchain image
//! 4. Overlay pass draws UI directly on the swapchain image
//! 5. The swapchain image is presented
//!
//! The draw image keeps its startup size for the engine's lifetime.
//! Window resizes rebuild only the swapchain; the per-frame render extent
//! is clamped to the smaller of the two surfaces and the blit rescales.
//!
//! # Swapchain invalidation
//!
//! Resize events and OUT_OF_DATE/suboptimal results only latch a flag.
//! The rebuild happens at the top of the next [`Engine::draw`] call, and a
//! frame that loses its image at acquire aborts before touching its fence,
//! so the slot can be reused immediately.

use std::mem::ManuallyDrop;
use std::path::Path;
use std::sync::Arc;

use glam::Mat4;
use tracing::{debug, error, info};

use ember_core::FrameStats;
use ember_platform::{InputState, KeyCode, Surface, Window, get_required_extensions};
use ember_rhi::command::CommandBuffer;
use ember_rhi::deletion::DeletionQueue;
use ember_rhi::descriptor::{
    self, DescriptorAllocator, DescriptorLayoutBuilder, PoolSizeRatio,
};
use ember_rhi::device::Device;
use ember_rhi::image::AllocatedImage;
use ember_rhi::immediate::ImmediateContext;
use ember_rhi::instance::Instance;
use ember_rhi::physical_device::select_physical_device;
use ember_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use ember_rhi::shader::{Shader, ShaderStage};
use ember_rhi::swapchain::Swapchain;
use ember_rhi::{RhiError, vk};

use crate::config::EngineConfig;
use crate::effects::BackgroundEffects;
use crate::error::EngineResult;
use crate::frame::FrameRing;
use crate::mesh::{self, DrawPushConstants, MeshBuffers};
use crate::overlay::OverlayRenderer;

/// Format of the offscreen draw image.
///
/// 16-bit float color lets effects overshoot [0, 1]; the blit into the
/// swapchain brings the result back to presentable range.
const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Workgroup edge length of the background compute shaders.
const COMPUTE_WORKGROUP_SIZE: u32 = 16;

/// The rendering engine.
///
/// Owns every GPU object and the frame loop state. Created against an
/// existing window and driven by the application calling
/// [`update`](Engine::update), [`draw`](Engine::draw), and
/// [`request_resize`](Engine::request_resize) from its event loop.
pub struct Engine {
    // Destroyed explicitly in Drop, in reverse creation order.
    instance: ManuallyDrop<Instance>,
    surface: ManuallyDrop<Surface>,
    device: ManuallyDrop<Arc<Device>>,
    swapchain: ManuallyDrop<Swapchain>,

    draw_image: ManuallyDrop<AllocatedImage>,
    /// Storage image set pointing at the draw image; written once at init.
    /// The pool and layout behind it live in the main deletion queue.
    draw_image_descriptors: vk::DescriptorSet,

    background_effects: ManuallyDrop<BackgroundEffects>,
    mesh_pipeline_layout: ManuallyDrop<PipelineLayout>,
    mesh_pipeline: ManuallyDrop<Pipeline>,
    rectangle: ManuallyDrop<MeshBuffers>,

    immediate: ManuallyDrop<ImmediateContext>,
    frames: ManuallyDrop<FrameRing>,

    /// Engine-lifetime deferred destruction, flushed once at shutdown
    main_deletion_queue: DeletionQueue,

    overlay: Box<dyn OverlayRenderer>,

    /// Swapchain must be rebuilt before the next frame
    resize_requested: bool,
    /// Last drawable size reported by the window
    window_extent: (u32, u32),

    stats: FrameStats,
}

impl Engine {
    /// Initializes the full GPU stack against an existing window.
    ///
    /// # Errors
    ///
    /// Returns an error if any Vulkan object fails to initialize, no
    /// suitable GPU is found, or a shader binary is missing from
    /// `config.shader_dir`.
    pub fn new(
        window: &Window,
        config: &EngineConfig,
        overlay: Box<dyn OverlayRenderer>,
    ) -> EngineResult<Self> {
        let display_handle = window
            .display_handle()
            .map_err(|e| ember_core::Error::Window(format!("no display handle: {e}")))?;
        let extensions = get_required_extensions(display_handle.as_raw())?;

        let instance = Instance::new(config.enable_validation, &extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device_info)?;

        let (width, height) = window.drawable_extent();
        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            width,
            height,
            config.vsync,
        )?;

        // The draw image is sized once at startup and never recreated.
        let draw_image = AllocatedImage::new(
            device.clone(),
            vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            DRAW_IMAGE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        )?;

        let draw_image_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .build(device.clone(), vk::ShaderStageFlags::COMPUTE)?;
        let descriptor_allocator = DescriptorAllocator::new(
            device.clone(),
            1,
            &[PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                ratio: 1.0,
            }],
        )?;
        let draw_image_descriptors = descriptor_allocator.allocate(draw_image_layout.handle())?;

        // Written once; the binding target never changes because the draw
        // image survives resizes.
        descriptor::write_image(
            &device,
            draw_image_descriptors,
            0,
            vk::DescriptorType::STORAGE_IMAGE,
            draw_image.view(),
            vk::ImageLayout::GENERAL,
        );

        let background_effects =
            BackgroundEffects::new(device.clone(), &config.shader_dir, &draw_image_layout)?;

        // Only the set handle is needed from here on; the layout and pool
        // just have to outlive it, so they ride the engine-lifetime queue.
        let mut main_deletion_queue = DeletionQueue::new();
        main_deletion_queue.defer(draw_image_layout);
        main_deletion_queue.defer(descriptor_allocator);

        let (mesh_pipeline_layout, mesh_pipeline) =
            create_mesh_pipeline(device.clone(), &config.shader_dir, draw_image.format())?;

        let immediate = ImmediateContext::new(device.clone())?;

        let (vertices, indices) = mesh::rectangle();
        let rectangle = MeshBuffers::upload(device.clone(), &immediate, &vertices, &indices)?;

        let frames = FrameRing::new(device.clone())?;

        info!(
            "Engine initialized: {}x{} draw target, {} swapchain images",
            width,
            height,
            swapchain.image_count()
        );

        Ok(Self {
            instance: ManuallyDrop::new(instance),
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            swapchain: ManuallyDrop::new(swapchain),
            draw_image: ManuallyDrop::new(draw_image),
            draw_image_descriptors,
            background_effects: ManuallyDrop::new(background_effects),
            mesh_pipeline_layout: ManuallyDrop::new(mesh_pipeline_layout),
            mesh_pipeline: ManuallyDrop::new(mesh_pipeline),
            rectangle: ManuallyDrop::new(rectangle),
            immediate: ManuallyDrop::new(immediate),
            frames: ManuallyDrop::new(frames),
            main_deletion_queue,
            overlay,
            resize_requested: false,
            window_extent: (width, height),
            stats: FrameStats::new(),
        })
    }

    /// Notes a new drawable size and marks the swapchain for rebuild.
    ///
    /// Cheap to call from the event loop; the rebuild itself happens at
    /// the top of the next [`draw`](Engine::draw).
    pub fn request_resize(&mut self, width: u32, height: u32) {
        if (width, height) != self.window_extent {
            debug!("Resize requested: {}x{}", width, height);
            self.window_extent = (width, height);
            self.resize_requested = true;
        }
    }

    /// Applies input to engine state.
    ///
    /// Space or the right arrow key selects the next background effect;
    /// the left arrow key selects the previous one.
    pub fn update(&mut self, input: &InputState) {
        if input.is_key_just_pressed(KeyCode::Space)
            || input.is_key_just_pressed(KeyCode::ArrowRight)
        {
            self.background_effects.cycle_next();
            info!(
                "Background effect: {}",
                self.background_effects.current().name
            );
        } else if input.is_key_just_pressed(KeyCode::ArrowLeft) {
            self.background_effects.cycle_prev();
            info!(
                "Background effect: {}",
                self.background_effects.current().name
            );
        }
    }

    /// Renders and presents one frame.
    ///
    /// Runs the frame protocol end to end: fence wait and ledger flush,
    /// image acquisition, command recording, submission, presentation.
    /// Frames abort cleanly when the swapchain is stale, without resetting
    /// the slot fence or advancing the frame counter; the rebuild runs at
    /// the top of the next call. A zero-area drawable (minimized window)
    /// also skips the frame.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FrameTimeout`](crate::EngineError::FrameTimeout)
    /// if the GPU fails to finish a frame within the fence wait bound, or
    /// any Vulkan error from recording, submission, or presentation.
    pub fn draw(&mut self) -> EngineResult<()> {
        if self.resize_requested && !self.rebuild_swapchain()? {
            // Zero-area drawable; retry on a later frame.
            return Ok(());
        }

        self.frames.begin_frame()?;
        self.background_effects.animate(self.frames.frame_number());

        let swapchain_semaphore = self.frames.current().swapchain_semaphore().handle();
        let image_index = match self.swapchain.acquire_next_image(swapchain_semaphore) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    // Still usable; render this frame and rebuild next call.
                    self.resize_requested = true;
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date at acquire, frame aborted");
                self.resize_requested = true;
                return Ok(());
            }
            Err(e) => return Err(RhiError::from(e).into()),
        };

        // Only reset the fence once the frame is certain to be submitted.
        self.frames.current().render_fence().reset()?;

        self.record_commands(image_index)?;
        self.submit_commands()?;

        let render_semaphore = self.frames.current().render_semaphore().handle();
        match self
            .swapchain
            .present(self.device.present_queue(), image_index, render_semaphore)
        {
            Ok(suboptimal) => {
                if suboptimal {
                    self.resize_requested = true;
                }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date at present");
                self.resize_requested = true;
            }
            Err(e) => return Err(RhiError::from(e).into()),
        }

        self.frames.advance();
        self.stats.record_frame();

        Ok(())
    }

    /// Rebuilds the swapchain at the latest drawable size.
    ///
    /// Returns `false` without touching the swapchain when the drawable
    /// area is zero (minimized window); the request stays latched until
    /// the window comes back.
    fn rebuild_swapchain(&mut self) -> EngineResult<bool> {
        let (width, height) = self.window_extent;
        if !can_rebuild_at(width, height) {
            debug!("Deferring swapchain rebuild while drawable area is zero");
            return Ok(false);
        }

        self.swapchain
            .recreate(&self.instance, self.surface.handle(), width, height)?;
        self.resize_requested = false;

        Ok(true)
    }

    /// Extent actually rendered this frame.
    fn draw_extent(&self) -> vk::Extent2D {
        clamped_draw_extent(self.draw_image.extent_2d(), self.swapchain.extent())
    }

    /// Records all rendering commands for the frame.
    ///
    /// Pass structure, in order:
    /// 1. Draw image UNDEFINED -> GENERAL, background compute dispatch
    /// 2. Draw image GENERAL -> COLOR_ATTACHMENT_OPTIMAL, geometry pass
    /// 3. Draw image -> TRANSFER_SRC, swapchain image UNDEFINED ->
    ///    TRANSFER_DST, blit
    /// 4. Swapchain image -> COLOR_ATTACHMENT_OPTIMAL, overlay pass
    /// 5. Swapchain image -> PRESENT_SRC
    fn record_commands(&mut self, image_index: u32) -> EngineResult<()> {
        let draw_extent = self.draw_extent();
        let swapchain_extent = self.swapchain.extent();
        let swapchain_image = self.swapchain.image(image_index as usize);
        let swapchain_view = self.swapchain.image_view(image_index as usize);

        let cmd = self.frames.current().command_buffer();
        cmd.reset()?;
        cmd.begin()?;

        // Background: the compute effect writes the draw image in GENERAL
        // layout. Previous frame contents are discarded.
        cmd.transition_image(
            self.draw_image.handle(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );

        let effect = self.background_effects.current();
        cmd.bind_pipeline(effect.pipeline.bind_point(), effect.pipeline.handle());
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            self.background_effects.layout().handle(),
            0,
            &[self.draw_image_descriptors],
            &[],
        );
        cmd.push_constants(
            self.background_effects.layout().handle(),
            vk::ShaderStageFlags::COMPUTE,
            0,
            &effect.params,
        );
        cmd.dispatch(
            draw_extent.width.div_ceil(COMPUTE_WORKGROUP_SIZE),
            draw_extent.height.div_ceil(COMPUTE_WORKGROUP_SIZE),
            1,
        );

        // Geometry on top of the background.
        cmd.transition_image(
            self.draw_image.handle(),
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        self.record_geometry(cmd, draw_extent);

        // Copy the frame into the swapchain image, rescaling if the
        // surfaces differ.
        cmd.transition_image(
            self.draw_image.handle(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        cmd.transition_image(
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        cmd.blit_image_to_image(
            self.draw_image.handle(),
            swapchain_image,
            draw_extent,
            swapchain_extent,
        );

        // Overlay pass straight onto the swapchain image, at native
        // resolution.
        cmd.transition_image(
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(swapchain_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: swapchain_extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        cmd.begin_rendering(&rendering_info);
        self.overlay.draw(cmd, swapchain_view, swapchain_extent);
        cmd.end_rendering();

        cmd.transition_image(
            swapchain_image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        cmd.end()?;

        Ok(())
    }

    /// Records the geometry pass into the draw image.
    fn record_geometry(&self, cmd: &CommandBuffer, draw_extent: vk::Extent2D) {
        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(self.draw_image.view())
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            // Keep the compute background
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: draw_extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        cmd.begin_rendering(&rendering_info);
        cmd.bind_pipeline(self.mesh_pipeline.bind_point(), self.mesh_pipeline.handle());

        let viewport = vk::Viewport::default()
            .x(0.0)
            .y(0.0)
            .width(draw_extent.width as f32)
            .height(draw_extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        cmd.set_viewport(&viewport);
        cmd.set_scissor(&vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: draw_extent,
        });

        let push_constants =
            DrawPushConstants::new(Mat4::IDENTITY, self.rectangle.vertex_buffer_address());
        cmd.push_constants(
            self.mesh_pipeline_layout.handle(),
            vk::ShaderStageFlags::VERTEX,
            0,
            &push_constants,
        );
        cmd.bind_index_buffer(self.rectangle.index_buffer().handle(), 0, vk::IndexType::UINT32);
        cmd.draw_indexed(self.rectangle.index_count(), 1, 0, 0, 0);

        cmd.end_rendering();
    }

    /// Submits the recorded frame with the slot's synchronization objects.
    fn submit_commands(&self) -> EngineResult<()> {
        let slot = self.frames.current();

        let wait_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(slot.swapchain_semaphore().handle())
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .value(1)];
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(slot.render_semaphore().handle())
            .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS)
            .value(1)];
        let buffer_infos = [vk::CommandBufferSubmitInfo::default()
            .command_buffer(slot.command_buffer().handle())
            .device_mask(0)];

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&buffer_infos);

        unsafe {
            self.device
                .submit_graphics(&[submit_info], slot.render_fence().handle())?;
        }

        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        info!(
            "Shutting down after {} frames, {:.1} average FPS ({:.2} ms per frame)",
            self.stats.frames(),
            self.stats.average_fps(),
            self.stats.average_frame_time().as_secs_f64() * 1000.0,
        );

        // Nothing may be destroyed while the GPU still reads it.
        if let Err(e) = self.device.wait_idle() {
            error!("Device wait failed during shutdown: {e}");
        }

        self.main_deletion_queue.flush();

        // Reverse creation order. Every wrapper keeps the device alive
        // through its own Arc; the instance must outlive both the device
        // and the surface.
        unsafe {
            ManuallyDrop::drop(&mut self.frames);
            ManuallyDrop::drop(&mut self.immediate);
            ManuallyDrop::drop(&mut self.rectangle);
            ManuallyDrop::drop(&mut self.mesh_pipeline);
            ManuallyDrop::drop(&mut self.mesh_pipeline_layout);
            ManuallyDrop::drop(&mut self.background_effects);
            ManuallyDrop::drop(&mut self.draw_image);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Engine destroyed");
    }
}

/// Builds the graphics pipeline for mesh drawing.
///
/// No vertex input state: the vertex shader pulls vertex data through the
/// buffer device address in [`DrawPushConstants`].
fn create_mesh_pipeline(
    device: Arc<Device>,
    shader_dir: &Path,
    color_format: vk::Format,
) -> EngineResult<(PipelineLayout, Pipeline)> {
    let vertex_shader = Shader::from_spirv_file(
        device.clone(),
        &shader_dir.join("mesh.vert.spv"),
        ShaderStage::Vertex,
        "main",
    )?;
    let fragment_shader = Shader::from_spirv_file(
        device.clone(),
        &shader_dir.join("mesh.frag.spv"),
        ShaderStage::Fragment,
        "main",
    )?;

    let push_constant_range = vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .offset(0)
        .size(DrawPushConstants::SIZE as u32);
    let layout = PipelineLayout::new(device.clone(), &[], &[push_constant_range])?;

    let pipeline = GraphicsPipelineBuilder::new()
        .vertex_shader(&vertex_shader)
        .fragment_shader(&fragment_shader)
        .color_attachment_format(color_format)
        .build(device, &layout)?;

    Ok((layout, pipeline))
}

/// Clamps the render extent to the smaller of the draw image and the
/// swapchain, per axis.
fn clamped_draw_extent(draw_image: vk::Extent2D, swapchain: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: draw_image.width.min(swapchain.width),
        height: draw_image.height.min(swapchain.height),
    }
}

/// True when the drawable size can back a swapchain. A minimized window
/// reports a zero dimension; the resize request stays latched until the
/// window comes back.
fn can_rebuild_at(width: u32, height: u32) -> bool {
    width != 0 && height != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_draw_extent_swapchain_smaller() {
        let extent = clamped_draw_extent(
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_clamped_draw_extent_draw_image_smaller() {
        let extent = clamped_draw_extent(
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            vk::Extent2D {
                width: 2560,
                height: 1440,
            },
        );
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_clamped_draw_extent_mixed_axes() {
        let extent = clamped_draw_extent(
            vk::Extent2D {
                width: 800,
                height: 1440,
            },
            vk::Extent2D {
                width: 2560,
                height: 600,
            },
        );
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_compute_dispatch_covers_extent() {
        // Partial workgroups still cover the edge texels
        assert_eq!(800u32.div_ceil(COMPUTE_WORKGROUP_SIZE), 50);
        assert_eq!(801u32.div_ceil(COMPUTE_WORKGROUP_SIZE), 51);
        assert_eq!(1u32.div_ceil(COMPUTE_WORKGROUP_SIZE), 1);
    }

    #[test]
    fn test_rebuild_deferred_while_any_dimension_zero() {
        assert!(!can_rebuild_at(0, 720));
        assert!(!can_rebuild_at(1280, 0));
        assert!(!can_rebuild_at(0, 0));
    }

    #[test]
    fn test_rebuild_proceeds_at_nonzero_extent() {
        assert!(can_rebuild_at(1280, 720));
        assert!(can_rebuild_at(1, 1));
    }
}
