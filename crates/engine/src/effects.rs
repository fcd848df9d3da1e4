//! Compute-driven background effects.
//!
//! Backgrounds are produced by compute shaders writing directly to the
//! offscreen draw image through a storage image binding. Every effect
//! shares one pipeline layout: the draw image at set 0, binding 0, plus a
//! 64-byte push constant block of four vec4 parameters whose meaning is up
//! to the individual shader.

use std::path::Path;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::info;

use ember_rhi::descriptor::DescriptorSetLayout;
use ember_rhi::device::Device;
use ember_rhi::pipeline::{Pipeline, PipelineLayout};
use ember_rhi::shader::{Shader, ShaderStage};
use ember_rhi::vk;

use crate::error::EngineResult;

/// Push constant block shared by all background compute shaders.
///
/// Matches the GLSL declaration:
///
/// ```glsl
/// layout(push_constant) uniform constants {
///     vec4 data1;
///     vec4 data2;
///     vec4 data3;
///     vec4 data4;
/// } pc;
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EffectParams {
    pub data1: [f32; 4],
    pub data2: [f32; 4],
    pub data3: [f32; 4],
    pub data4: [f32; 4],
}

impl EffectParams {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// A named compute effect with its pipeline and current parameters.
pub struct ComputeEffect {
    /// Display name used in logs
    pub name: &'static str,
    /// Compute pipeline that renders the effect
    pub pipeline: Pipeline,
    /// Parameters pushed to the shader on every dispatch
    pub params: EffectParams,
}

/// Index of the animated gradient in the built-in effect list.
const GRADIENT_INDEX: usize = 0;

/// Frames per radian of the gradient color oscillation.
const GRADIENT_PERIOD: f32 = 120.0;

/// The available background effects and the active selection.
pub struct BackgroundEffects {
    effects: Vec<ComputeEffect>,
    current: usize,
    /// Layout shared by every effect pipeline
    layout: PipelineLayout,
}

impl BackgroundEffects {
    /// Loads the built-in effects (gradient and sky) from `shader_dir`.
    ///
    /// Expects `gradient.comp.spv` and `sky.comp.spv` in the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a shader binary cannot be loaded or pipeline
    /// creation fails.
    pub fn new(
        device: Arc<Device>,
        shader_dir: &Path,
        draw_image_layout: &DescriptorSetLayout,
    ) -> EngineResult<Self> {
        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(EffectParams::SIZE as u32);

        let layout = PipelineLayout::new(
            device.clone(),
            &[draw_image_layout.handle()],
            &[push_constant_range],
        )?;

        let gradient_shader = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join("gradient.comp.spv"),
            ShaderStage::Compute,
            "main",
        )?;
        let sky_shader = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join("sky.comp.spv"),
            ShaderStage::Compute,
            "main",
        )?;

        let gradient = ComputeEffect {
            name: "gradient",
            pipeline: Pipeline::new_compute(device.clone(), &gradient_shader, &layout)?,
            params: EffectParams {
                // Top color red, bottom color blue; data1 is animated
                // every frame while this effect is active
                data1: [1.0, 0.0, 0.0, 1.0],
                data2: [0.0, 0.0, 1.0, 1.0],
                ..EffectParams::default()
            },
        };
        let sky = ComputeEffect {
            name: "sky",
            pipeline: Pipeline::new_compute(device, &sky_shader, &layout)?,
            params: EffectParams {
                // Base sky color; w is the star generation threshold
                data1: [0.1, 0.2, 0.4, 0.97],
                ..EffectParams::default()
            },
        };

        let effects = vec![gradient, sky];
        info!(
            "Loaded {} background effects: {}",
            effects.len(),
            effects.iter().map(|e| e.name).collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            effects,
            current: 0,
            layout,
        })
    }

    /// Returns the active effect.
    #[inline]
    pub fn current(&self) -> &ComputeEffect {
        &self.effects[self.current]
    }

    /// Returns the active effect mutably.
    #[inline]
    pub fn current_mut(&mut self) -> &mut ComputeEffect {
        &mut self.effects[self.current]
    }

    /// Returns the index of the active effect.
    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Returns the number of loaded effects.
    #[inline]
    pub fn count(&self) -> usize {
        self.effects.len()
    }

    /// Returns the pipeline layout shared by every effect.
    #[inline]
    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    /// Selects the next effect, wrapping at the end of the list.
    pub fn cycle_next(&mut self) {
        self.current = next_index(self.current, self.effects.len());
    }

    /// Selects the previous effect, wrapping at the start of the list.
    pub fn cycle_prev(&mut self) {
        self.current = prev_index(self.current, self.effects.len());
    }

    /// Advances time-driven effect parameters.
    ///
    /// The gradient's top color oscillates with the frame counter so that
    /// motion is visible without any scene content.
    pub fn animate(&mut self, frame_number: u64) {
        if self.current == GRADIENT_INDEX {
            let flash = gradient_flash(frame_number);
            self.effects[GRADIENT_INDEX].params.data1 = [flash, 0.0, 1.0 - flash, 1.0];
        }
    }
}

#[inline]
fn next_index(current: usize, count: usize) -> usize {
    (current + 1) % count
}

#[inline]
fn prev_index(current: usize, count: usize) -> usize {
    (current + count - 1) % count
}

/// Oscillation value for the animated gradient, always in `[0, 1]`.
#[inline]
fn gradient_flash(frame_number: u64) -> f32 {
    (frame_number as f32 / GRADIENT_PERIOD).sin().abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_params_size() {
        // Four vec4s, comfortably inside the 128 bytes of push constant
        // space every Vulkan device guarantees
        assert_eq!(EffectParams::SIZE, 64);
        assert!(EffectParams::SIZE <= 128);
    }

    #[test]
    fn test_effect_params_pod_cast() {
        let params = EffectParams {
            data1: [1.0, 2.0, 3.0, 4.0],
            ..EffectParams::default()
        };
        let bytes: &[u8] = bytemuck::bytes_of(&params);
        assert_eq!(bytes.len(), EffectParams::SIZE);
    }

    #[test]
    fn test_effect_params_zeroed_is_default() {
        let zeroed: EffectParams = Zeroable::zeroed();
        assert_eq!(zeroed, EffectParams::default());
    }

    #[test]
    fn test_cycle_indices_wrap() {
        assert_eq!(next_index(0, 2), 1);
        assert_eq!(next_index(1, 2), 0);
        assert_eq!(prev_index(0, 2), 1);
        assert_eq!(prev_index(1, 2), 0);

        // Round trip returns to the start
        assert_eq!(prev_index(next_index(0, 3), 3), 0);
    }

    #[test]
    fn test_gradient_flash_bounds() {
        for frame in [0u64, 1, 60, 120, 188, 1_000, 1_000_000] {
            let flash = gradient_flash(frame);
            assert!((0.0..=1.0).contains(&flash), "frame {frame}: {flash}");
        }
        assert_eq!(gradient_flash(0), 0.0);
    }
}
