//! Window and surface plumbing over winit.
//!
//! [`Window`] wraps the winit window and is the only place that touches
//! raw display/window handles; everything Vulkan-side works with the
//! [`Surface`] it creates.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use ember_core::{Error, Result};

/// Owned `vk::SurfaceKHR` plus the loader needed to destroy it.
///
/// The Vulkan instance the surface was created from must outlive this
/// value.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Raw surface handle.
    ///
    /// Valid only while this `Surface` is alive; do not store it.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Surface extension loader, for capability queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle came from ash_window::create_surface and the
        // loader from the same instance; this is the only destroy site.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Destroyed Vulkan surface");
    }
}

/// Application window.
///
/// Created from inside the winit event loop (winit 0.30 only hands out
/// window creation through [`ActiveEventLoop`]).
pub struct Window {
    window: WinitWindow,
}

impl Window {
    /// Creates a window with the given initial size and title.
    ///
    /// The size is a request; the compositor may hand back something else.
    /// [`drawable_extent`](Self::drawable_extent) reports what was actually
    /// granted.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height));

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(format!("creation: {e}")))?;

        tracing::info!("Created {}x{} window", width, height);

        Ok(Self { window })
    }

    /// Queries the live drawable size in pixels.
    ///
    /// Either dimension is zero while the window is minimized; the engine
    /// defers swapchain rebuilds until both are nonzero again.
    pub fn drawable_extent(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// Display handle for instance extension enumeration.
    pub fn display_handle(
        &self,
    ) -> std::result::Result<raw_window_handle::DisplayHandle<'_>, raw_window_handle::HandleError>
    {
        self.window.display_handle()
    }

    /// Asks the compositor for another redraw.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Creates a Vulkan surface targeting this window.
    ///
    /// The returned [`Surface`] destroys itself on drop; the `instance` it
    /// was created from must outlive it.
    ///
    /// # Errors
    ///
    /// Returns an error if the raw handles cannot be obtained or surface
    /// creation fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("no display handle: {e}")))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("no window handle: {e}")))?;

        // SAFETY: entry and instance are live, and the raw handles come
        // straight from the winit window we own.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("surface creation: {e}")))?
        };

        let loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Created Vulkan surface");

        Ok(Surface { handle, loader })
    }
}

/// Instance extensions the platform needs for surface creation.
///
/// The pointers reference static strings owned by the Vulkan loader and
/// stay valid for the life of the process.
///
/// # Errors
///
/// Returns an error if the windowing system is not supported.
pub fn get_required_extensions(
    display_handle: raw_window_handle::RawDisplayHandle,
) -> Result<Vec<*const std::os::raw::c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| Error::Vulkan(format!("extension enumeration: {e}")))?;

    tracing::debug!(
        "Surface extensions: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window hands back valid null-terminated C strings.
            .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}
