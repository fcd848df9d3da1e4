//! Pipeline layouts and graphics/compute pipelines.
//!
//! Everything here targets dynamic rendering: graphics pipelines carry
//! attachment formats instead of render pass references, and viewport and
//! scissor are always dynamic. The fixed-function vertex input stage is
//! left empty because vertex data is pulled from buffer device addresses
//! inside the vertex shader.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use ember_rhi::device::Device;
//! use ember_rhi::shader::{Shader, ShaderStage};
//! use ember_rhi::pipeline::{GraphicsPipelineBuilder, PipelineLayout};
//! use ash::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), ember_rhi::RhiError> {
//! let vertex = Shader::from_spirv_file(
//!     device.clone(),
//!     Path::new("shaders/mesh.vert.spv"),
//!     ShaderStage::Vertex,
//!     "main",
//! )?;
//! let fragment = Shader::from_spirv_file(
//!     device.clone(),
//!     Path::new("shaders/mesh.frag.spv"),
//!     ShaderStage::Fragment,
//!     "main",
//! )?;
//!
//! // World matrix plus the vertex buffer address, pushed every draw.
//! let push_range = vk::PushConstantRange {
//!     stage_flags: vk::ShaderStageFlags::VERTEX,
//!     offset: 0,
//!     size: 80,
//! };
//! let layout = PipelineLayout::new(device.clone(), &[], &[push_range])?;
//!
//! let pipeline = GraphicsPipelineBuilder::new()
//!     .vertex_shader(&vertex)
//!     .fragment_shader(&fragment)
//!     .color_attachment_format(vk::Format::R16G16B16A16_SFLOAT)
//!     .build(device, &layout)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderStage};

/// Owned `VkPipelineLayout`: the descriptor set layouts and push constant
/// ranges a pipeline can reach.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a pipeline layout.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };
        debug!(
            "Created pipeline layout ({} set layout(s), {} push range(s))",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    /// Raw layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// An owned graphics or compute pipeline.
///
/// Remembers its bind point so callers never have to.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    /// Creates a compute pipeline around a single compute shader.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Pipeline`] if the shader was loaded for a
    /// different stage, or a Vulkan error if creation fails.
    pub fn new_compute(
        device: Arc<Device>,
        shader: &Shader,
        layout: &PipelineLayout,
    ) -> RhiResult<Self> {
        if shader.stage() != ShaderStage::Compute {
            return Err(RhiError::Pipeline(format!(
                "expected a compute shader, got {}",
                shader.stage()
            )));
        }

        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(shader.stage_create_info())
            .layout(layout.handle());

        let pipeline = unsafe {
            device
                .handle()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?[0]
        };
        info!("Compute pipeline created");

        Ok(Self {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        })
    }

    /// Raw pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Bind point to use with `vkCmdBindPipeline`.
    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Pipeline destroyed ({:?})", self.bind_point);
    }
}

/// Color blending presets for a single attachment.
///
/// The engine composites in shaders or by blitting, so pipelines pick one
/// of these rather than spelling out blend equations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// Source overwrites destination.
    #[default]
    Disabled,
    /// `dst + src * src_alpha`, for glows and particles.
    Additive,
    /// Standard transparency: `src * src_alpha + dst * (1 - src_alpha)`.
    Alpha,
}

impl BlendMode {
    /// Attachment state implementing this preset.
    pub fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let base = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);

        match self {
            BlendMode::Disabled => base,
            BlendMode::Additive => base
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
            BlendMode::Alpha => base
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
    }
}

/// Depth testing presets.
///
/// The engine's geometry pass renders color-only, so depth stays off by
/// default; pipelines drawing against a depth attachment pick the test
/// they need. The stencil half is never used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DepthMode {
    /// No depth test, no depth writes.
    #[default]
    Disabled,
    /// Test against the given compare op, optionally writing depth back.
    Enabled {
        write: bool,
        compare_op: vk::CompareOp,
    },
}

impl DepthMode {
    /// Depth/stencil state implementing this preset.
    pub fn depth_stencil_state(self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        let base = vk::PipelineDepthStencilStateCreateInfo::default()
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        match self {
            DepthMode::Disabled => base,
            DepthMode::Enabled { write, compare_op } => base
                .depth_test_enable(true)
                .depth_write_enable(write)
                .depth_compare_op(compare_op),
        }
    }
}

/// Builder for dynamic-rendering graphics pipelines.
///
/// Defaults match the engine's geometry pass: triangle list, filled
/// polygons, no culling, counter-clockwise front faces, blending off,
/// depth off, one sample.
pub struct GraphicsPipelineBuilder<'a> {
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    blend_mode: BlendMode,
    depth_mode: DepthMode,
    color_format: Option<vk::Format>,
    depth_format: Option<vk::Format>,
}

impl GraphicsPipelineBuilder<'_> {
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend_mode: BlendMode::Disabled,
            depth_mode: DepthMode::Disabled,
            color_format: None,
            depth_format: None,
        }
    }
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    /// Sets the vertex shader. Required.
    pub fn vertex_shader(mut self, shader: &'a Shader) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    /// Sets the fragment shader. Required.
    pub fn fragment_shader(mut self, shader: &'a Shader) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    /// Sets how vertices assemble into primitives.
    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Sets fill/line/point rasterization.
    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    /// Sets face culling and the winding that counts as front-facing.
    pub fn cull_mode(mut self, mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = mode;
        self.front_face = front_face;
        self
    }

    /// Sets the blending preset for the color attachment.
    pub fn blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    /// Sets the depth testing preset.
    pub fn depth_mode(mut self, mode: DepthMode) -> Self {
        self.depth_mode = mode;
        self
    }

    /// Sets the format of the color attachment rendered to. Required.
    pub fn color_attachment_format(mut self, format: vk::Format) -> Self {
        self.color_format = Some(format);
        self
    }

    /// Sets the format of the depth attachment rendered against.
    ///
    /// Only meaningful together with an enabled [`DepthMode`].
    pub fn depth_attachment_format(mut self, format: vk::Format) -> Self {
        self.depth_format = Some(format);
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Pipeline`] when a shader is missing or was
    /// loaded for the wrong stage, or when no color attachment format was
    /// set; Vulkan errors from pipeline creation pass through.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        let vertex = expect_stage(self.vertex_shader, ShaderStage::Vertex)?;
        let fragment = expect_stage(self.fragment_shader, ShaderStage::Fragment)?;
        let Some(color_format) = self.color_format else {
            return Err(RhiError::Pipeline(
                "no color attachment format set".to_string(),
            ));
        };

        let stages = [vertex.stage_create_info(), fragment.stage_create_info()];

        // Empty on purpose: vertices come from a buffer device address.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(self.topology);

        // Counts only; the actual rects are set at record time.
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let depth_stencil = self.depth_mode.depth_stencil_state();

        let blend_attachments = [self.blend_mode.attachment_state()];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [color_format];
        let mut rendering =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
        if let Some(depth_format) = self.depth_format {
            rendering = rendering.depth_attachment_format(depth_format);
        }

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout.handle())
            .push_next(&mut rendering);

        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?[0]
        };
        info!("Graphics pipeline created");

        Ok(Pipeline {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }
}

fn expect_stage(shader: Option<&Shader>, stage: ShaderStage) -> RhiResult<&Shader> {
    match shader {
        Some(s) if s.stage() == stage => Ok(s),
        Some(s) => Err(RhiError::Pipeline(format!(
            "expected a {} shader, got {}",
            stage,
            s.stage()
        ))),
        None => Err(RhiError::Pipeline(format!("{} shader not set", stage))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_disabled_writes_rgba() {
        let state = BlendMode::Disabled.attachment_state();
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_blend_alpha_preset() {
        let state = BlendMode::Alpha.attachment_state();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            state.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }

    #[test]
    fn test_blend_additive_preset() {
        let state = BlendMode::Additive.attachment_state();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE);
    }

    #[test]
    fn test_depth_disabled_turns_everything_off() {
        let state = DepthMode::Disabled.depth_stencil_state();
        assert_eq!(state.depth_test_enable, vk::FALSE);
        assert_eq!(state.depth_write_enable, vk::FALSE);
    }

    #[test]
    fn test_depth_enabled_preset() {
        let state = DepthMode::Enabled {
            write: true,
            compare_op: vk::CompareOp::LESS_OR_EQUAL,
        }
        .depth_stencil_state();
        assert_eq!(state.depth_test_enable, vk::TRUE);
        assert_eq!(state.depth_write_enable, vk::TRUE);
        assert_eq!(state.depth_compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(state.max_depth_bounds, 1.0);
    }

    #[test]
    fn test_depth_read_only_test_leaves_writes_off() {
        let state = DepthMode::Enabled {
            write: false,
            compare_op: vk::CompareOp::GREATER,
        }
        .depth_stencil_state();
        assert_eq!(state.depth_test_enable, vk::TRUE);
        assert_eq!(state.depth_write_enable, vk::FALSE);
        assert_eq!(state.depth_compare_op, vk::CompareOp::GREATER);
    }

    #[test]
    fn test_builder_defaults_match_geometry_pass() {
        let builder = GraphicsPipelineBuilder::new();
        assert!(builder.vertex_shader.is_none());
        assert!(builder.fragment_shader.is_none());
        assert_eq!(builder.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(builder.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(builder.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(builder.blend_mode, BlendMode::Disabled);
        assert_eq!(builder.depth_mode, DepthMode::Disabled);
        assert!(builder.color_format.is_none());
        assert!(builder.depth_format.is_none());
    }

    #[test]
    fn test_builder_setters() {
        let builder = GraphicsPipelineBuilder::new()
            .topology(vk::PrimitiveTopology::LINE_LIST)
            .polygon_mode(vk::PolygonMode::LINE)
            .cull_mode(vk::CullModeFlags::BACK, vk::FrontFace::CLOCKWISE)
            .blend_mode(BlendMode::Additive)
            .depth_mode(DepthMode::Enabled {
                write: true,
                compare_op: vk::CompareOp::LESS_OR_EQUAL,
            })
            .color_attachment_format(vk::Format::R16G16B16A16_SFLOAT)
            .depth_attachment_format(vk::Format::D32_SFLOAT);

        assert_eq!(builder.topology, vk::PrimitiveTopology::LINE_LIST);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::LINE);
        assert_eq!(builder.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(builder.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(builder.blend_mode, BlendMode::Additive);
        assert_eq!(
            builder.depth_mode,
            DepthMode::Enabled {
                write: true,
                compare_op: vk::CompareOp::LESS_OR_EQUAL,
            }
        );
        assert_eq!(
            builder.color_format,
            Some(vk::Format::R16G16B16A16_SFLOAT)
        );
        assert_eq!(builder.depth_format, Some(vk::Format::D32_SFLOAT));
    }
}
