//! Swapchain creation, acquisition, and presentation.
//!
//! [`Swapchain`] owns the `VkSwapchainKHR` handle and one view per image.
//! Images carry `COLOR_ATTACHMENT | TRANSFER_DST` usage: every frame is
//! blitted into the acquired image, then overlay passes render on top of
//! it. Window resizes go through [`Swapchain::recreate`], which swaps the
//! Vulkan objects underneath the wrapper while the rest of the engine
//! keeps its reference.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// What the surface offers for swapchain creation.
struct SurfaceSupport {
    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Queries the surface, failing if it offers no format or no present
    /// mode at all. Device selection already screens for this, so a
    /// failure here means the surface changed underneath us.
    fn query(
        device: &Device,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let physical_device = device.physical_device();
        let capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(|e| RhiError::Surface(format!("capabilities query: {e}")))?
        };
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(|e| RhiError::Surface(format!("format query: {e}")))?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(|e| RhiError::Surface(format!("present mode query: {e}")))?
        };

        if formats.is_empty() || present_modes.is_empty() {
            return Err(RhiError::Surface(
                "no formats or present modes offered".to_string(),
            ));
        }

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// `B8G8R8A8_SRGB` with the sRGB nonlinear color space when offered,
    /// otherwise whatever the surface lists first.
    fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.formats
            .iter()
            .copied()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .unwrap_or(self.formats[0])
    }

    /// MAILBOX for low latency without tearing, unless vsync is requested
    /// or the surface lacks it. FIFO is always available as the fallback.
    fn present_mode(&self, vsync: bool) -> vk::PresentModeKHR {
        if !vsync && self.present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        }
    }

    /// The surface-fixed extent when the platform defines one, otherwise
    /// the requested size clamped into the supported range.
    fn extent_for(&self, width: u32, height: u32) -> vk::Extent2D {
        let caps = &self.capabilities;
        if caps.current_extent.width != u32::MAX {
            return caps.current_extent;
        }
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }

    /// One image above the minimum so acquisition rarely blocks, capped
    /// when the surface caps the count (a zero maximum means uncapped).
    fn image_count(&self) -> u32 {
        let caps = &self.capabilities;
        let wanted = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            wanted.min(caps.max_image_count)
        } else {
            wanted
        }
    }
}

/// Vulkan objects produced by one swapchain build.
///
/// Plain data, no `Drop`, so [`Swapchain::recreate`] can move them into
/// an existing wrapper without double-free gymnastics.
struct Parts {
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
}

/// Presentation chain: the swapchain handle, its images, and their views.
///
/// Not internally synchronized. Acquisition, presentation, and recreation
/// all happen on the render thread.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
    vsync: bool,
}

impl Swapchain {
    /// Creates a swapchain for `surface` at the given drawable size.
    ///
    /// `vsync` forces FIFO presentation; otherwise MAILBOX is used when
    /// the surface offers it.
    ///
    /// # Errors
    ///
    /// Returns an error if the surface queries fail, the surface offers
    /// no formats or present modes, or swapchain or view creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> RhiResult<Self> {
        let parts = build(
            instance,
            &device,
            surface,
            width,
            height,
            vsync,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            device,
            loader: parts.loader,
            swapchain: parts.swapchain,
            images: parts.images,
            views: parts.views,
            extent: parts.extent,
            vsync,
        })
    }

    /// Rebuilds the swapchain at a new drawable size.
    ///
    /// Waits for the device to go idle first, so no submitted work still
    /// references the old images. The old handle is passed to creation
    /// for driver-side resource reuse, then destroyed.
    ///
    /// # Errors
    ///
    /// Returns an error if the idle wait or the rebuild fails. On failure
    /// the old swapchain handle is kept so teardown stays sound, but the
    /// chain is unusable for rendering.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;
        self.destroy_views();

        let parts = build(
            instance,
            &self.device,
            surface,
            width,
            height,
            self.vsync,
            self.swapchain,
        )?;

        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }

        self.loader = parts.loader;
        self.swapchain = parts.swapchain;
        self.images = parts.images;
        self.views = parts.views;
        self.extent = parts.extent;

        info!(
            "Swapchain recreated at {}x{}",
            self.extent.width, self.extent.height
        );
        Ok(())
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// Blocks without bound until the presentation engine frees an image.
    /// Returns the image index and whether the chain is suboptimal for
    /// the surface; an out-of-date chain comes back as
    /// `Err(ERROR_OUT_OF_DATE_KHR)`. Recreation is the caller's call in
    /// both cases, which is why this returns the raw `vk::Result`.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Queues image `image_index` for presentation after `wait_semaphore`
    /// signals.
    ///
    /// Returns whether the chain is suboptimal; out-of-date chains come
    /// back as `Err(ERROR_OUT_OF_DATE_KHR)`, same contract as
    /// [`acquire_next_image`](Self::acquire_next_image).
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    /// Current swapchain extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of images in the chain.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Image at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    /// View over the image at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.views[index]
    }

    fn destroy_views(&mut self) {
        for view in self.views.drain(..) {
            unsafe {
                self.device.handle().destroy_image_view(view, None);
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_views();
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        debug!(
            "Destroyed swapchain ({}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Builds the swapchain and its image views.
///
/// Shared by initial creation and recreation; `old_swapchain` is null for
/// the former and the outgoing handle for the latter. The caller keeps
/// ownership of `old_swapchain` either way.
fn build(
    instance: &Instance,
    device: &Device,
    surface: vk::SurfaceKHR,
    width: u32,
    height: u32,
    vsync: bool,
    old_swapchain: vk::SwapchainKHR,
) -> RhiResult<Parts> {
    let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
    let support = SurfaceSupport::query(device, surface, &surface_loader)?;

    let surface_format = support.surface_format();
    let present_mode = support.present_mode(vsync);
    let extent = support.extent_for(width, height);
    let image_count = support.image_count();

    info!(
        "Creating swapchain: {}x{}, {:?} {:?}, {:?}, {} images requested",
        extent.width,
        extent.height,
        surface_format.format,
        surface_format.color_space,
        present_mode,
        image_count
    );

    // Distinct graphics and present families share images concurrently;
    // the common single-family case keeps exclusive ownership.
    let queue_families = [
        device.graphics_family_index(),
        device.present_family_index(),
    ];
    let concurrent = queue_families[0] != queue_families[1];

    // TRANSFER_DST because every frame is blitted into the acquired image,
    // COLOR_ATTACHMENT for the overlay pass that renders on top of it.
    let mut create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(if concurrent {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        })
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);
    if concurrent {
        create_info = create_info.queue_family_indices(&queue_families);
    }

    let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
    let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
    let images = unsafe { loader.get_swapchain_images(swapchain)? };
    debug!("Swapchain has {} images", images.len());

    let views = match create_views(device, &images, surface_format.format) {
        Ok(views) => views,
        Err(e) => {
            unsafe {
                loader.destroy_swapchain(swapchain, None);
            }
            return Err(e);
        }
    };

    Ok(Parts {
        loader,
        swapchain,
        images,
        views,
        extent,
    })
}

/// Creates a color view per swapchain image, unwinding on failure.
fn create_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        match unsafe { device.handle().create_image_view(&view_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe {
                        device.handle().destroy_image_view(view, None);
                    }
                }
                return Err(e.into());
            }
        }
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn support_with(
        formats: Vec<vk::SurfaceFormatKHR>,
        present_modes: Vec<vk::PresentModeKHR>,
        capabilities: vk::SurfaceCapabilitiesKHR,
    ) -> SurfaceSupport {
        SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        }
    }

    fn format_pair(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn test_srgb_format_preferred() {
        let support = support_with(
            vec![
                format_pair(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format_pair(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format_pair(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            vec![vk::PresentModeKHR::FIFO],
            vk::SurfaceCapabilitiesKHR::default(),
        );

        let picked = support.surface_format();
        assert_eq!(picked.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(picked.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_first_format_when_srgb_missing() {
        let support = support_with(
            vec![
                format_pair(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format_pair(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            vec![vk::PresentModeKHR::FIFO],
            vk::SurfaceCapabilitiesKHR::default(),
        );

        assert_eq!(support.surface_format().format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_mailbox_unless_vsync() {
        let support = support_with(
            vec![format_pair(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            vec![
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ],
            vk::SurfaceCapabilitiesKHR::default(),
        );

        assert_eq!(support.present_mode(false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(support.present_mode(true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_fifo_when_mailbox_unavailable() {
        let support = support_with(
            vec![format_pair(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE],
            vk::SurfaceCapabilitiesKHR::default(),
        );

        assert_eq!(support.present_mode(false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_fixed_by_surface() {
        let support = support_with(
            vec![],
            vec![],
            vk::SurfaceCapabilitiesKHR {
                current_extent: vk::Extent2D {
                    width: 1920,
                    height: 1080,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                ..Default::default()
            },
        );

        let extent = support.extent_for(800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_extent_clamped_to_surface_range() {
        let support = support_with(
            vec![],
            vec![],
            vk::SurfaceCapabilitiesKHR {
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 100,
                    height: 100,
                },
                max_image_extent: vk::Extent2D {
                    width: 2000,
                    height: 2000,
                },
                ..Default::default()
            },
        );

        let too_big = support.extent_for(3000, 3000);
        assert_eq!((too_big.width, too_big.height), (2000, 2000));

        let too_small = support.extent_for(50, 50);
        assert_eq!((too_small.width, too_small.height), (100, 100));

        let in_range = support.extent_for(800, 600);
        assert_eq!((in_range.width, in_range.height), (800, 600));
    }

    #[test]
    fn test_image_count_one_above_min() {
        let uncapped = support_with(
            vec![],
            vec![],
            vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                ..Default::default()
            },
        );
        assert_eq!(uncapped.image_count(), 3);

        let roomy = support_with(
            vec![],
            vec![],
            vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                ..Default::default()
            },
        );
        assert_eq!(roomy.image_count(), 3);
    }

    #[test]
    fn test_image_count_respects_cap() {
        let tight = support_with(
            vec![],
            vec![],
            vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 2,
                ..Default::default()
            },
        );
        assert_eq!(tight.image_count(), 2);
    }
}
