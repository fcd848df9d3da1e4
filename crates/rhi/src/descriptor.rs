//! Descriptor layouts, allocation, and writes.
//!
//! The engine binds exactly one resource through descriptors: the
//! offscreen draw target, as a storage image for compute effects. Mesh
//! data reaches shaders through buffer device addresses and push
//! constants, so there is no per-frame descriptor churn to manage.
//! The abstractions here stay correspondingly small: a layout builder,
//! a pool sized by descriptor-type ratios, and a single-image write.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use ember_rhi::device::Device;
//! use ember_rhi::descriptor::{DescriptorAllocator, DescriptorLayoutBuilder, PoolSizeRatio};
//!
//! # fn example(device: Arc<Device>) -> Result<(), ember_rhi::RhiError> {
//! let layout = DescriptorLayoutBuilder::new()
//!     .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
//!     .build(device.clone(), vk::ShaderStageFlags::COMPUTE)?;
//!
//! let allocator = DescriptorAllocator::new(
//!     device.clone(),
//!     4,
//!     &[PoolSizeRatio { ty: vk::DescriptorType::STORAGE_IMAGE, ratio: 1.0 }],
//! )?;
//! let set = allocator.allocate(layout.handle())?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Accumulates bindings for a descriptor set layout.
///
/// Bindings are declared by index and type; the shader stages are applied
/// uniformly at [`build`](DescriptorLayoutBuilder::build) time, which is
/// all the engine's single-stage layouts need.
#[derive(Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<(u32, vk::DescriptorType)>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares one descriptor at `binding`.
    pub fn add_binding(mut self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.bindings.push((binding, ty));
        self
    }

    /// Creates the layout with every binding visible to `stages`.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn build(
        self,
        device: Arc<Device>,
        stages: vk::ShaderStageFlags,
    ) -> RhiResult<DescriptorSetLayout> {
        let bindings = self.vk_bindings(stages);
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };
        debug!("Created descriptor set layout ({} binding(s))", bindings.len());

        Ok(DescriptorSetLayout { device, layout })
    }

    fn vk_bindings(&self, stages: vk::ShaderStageFlags) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.bindings
            .iter()
            .map(|&(binding, ty)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(stages)
            })
            .collect()
    }
}

/// Owned `VkDescriptorSetLayout`.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Raw layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// How much of a pool to reserve for one descriptor type.
///
/// The actual `VkDescriptorPoolSize` count is `ratio * max_sets`, rounded
/// up, so a ratio of 1.0 gives every set one descriptor of that type.
#[derive(Clone, Copy, Debug)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

/// Descriptor pool with ratio-based sizing.
///
/// Sets allocated here live as long as the pool; nothing in the engine
/// frees individual sets.
pub struct DescriptorAllocator {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
}

impl DescriptorAllocator {
    /// Creates a pool able to hand out `max_sets` sets.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, max_sets: u32, ratios: &[PoolSizeRatio]) -> RhiResult<Self> {
        let pool_sizes = pool_sizes(max_sets, ratios);
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
        debug!(
            "Created descriptor pool (max_sets={}, {} type(s))",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self { device, pool })
    }

    /// Allocates one set with the given layout.
    ///
    /// # Errors
    ///
    /// Returns an error when the pool is exhausted.
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }

    /// Raw pool handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|r| {
            vk::DescriptorPoolSize::default()
                .ty(r.ty)
                .descriptor_count((r.ratio * max_sets as f32).ceil() as u32)
        })
        .collect()
}

/// Points one image descriptor at a view.
///
/// Samplers are not part of the engine's descriptor usage, so the write
/// leaves the sampler null; that is what storage images expect.
pub fn write_image(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    ty: vk::DescriptorType,
    view: vk::ImageView,
    layout: vk::ImageLayout,
) {
    let image_info = [vk::DescriptorImageInfo::default()
        .image_view(view)
        .image_layout(layout)];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(ty)
        .image_info(&image_info);

    unsafe {
        device
            .handle()
            .update_descriptor_sets(std::slice::from_ref(&write), &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_builder_collects_bindings() {
        let builder = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .add_binding(1, vk::DescriptorType::UNIFORM_BUFFER);

        let bindings = builder.vk_bindings(vk::ShaderStageFlags::COMPUTE);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(bindings[0].descriptor_count, 1);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_pool_sizes_scale_with_max_sets() {
        let sizes = pool_sizes(
            10,
            &[
                PoolSizeRatio {
                    ty: vk::DescriptorType::STORAGE_IMAGE,
                    ratio: 1.0,
                },
                PoolSizeRatio {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    ratio: 0.5,
                },
            ],
        );
        assert_eq!(sizes[0].descriptor_count, 10);
        assert_eq!(sizes[1].descriptor_count, 5);
    }

    #[test]
    fn test_pool_sizes_round_up() {
        let sizes = pool_sizes(
            3,
            &[PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                ratio: 0.5,
            }],
        );
        assert_eq!(sizes[0].descriptor_count, 2);
    }
}
