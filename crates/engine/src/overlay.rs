//! Overlay rendering hook.
//!
//! After the draw image is blitted into the swapchain image, the engine
//! opens one more dynamic rendering pass directly on the swapchain view
//! and hands it to the installed [`OverlayRenderer`]. UI runs at native
//! swapchain resolution, unaffected by draw image scaling.

use tracing::debug;

use ember_rhi::command::CommandBuffer;
use ember_rhi::vk;

/// Hook for drawing UI on top of the finished frame.
///
/// Implementations record into `cmd` inside an already-open dynamic
/// rendering pass targeting `target_view`. The image is in
/// COLOR_ATTACHMENT_OPTIMAL layout with the blitted frame loaded, so
/// overlays composite over it rather than replacing it.
pub trait OverlayRenderer {
    /// Records overlay draw commands for the current frame.
    fn draw(&mut self, cmd: &CommandBuffer, target_view: vk::ImageView, extent: vk::Extent2D);
}

/// Overlay that draws nothing.
///
/// Keeps the overlay pass wired without pulling in a UI stack. Logs once
/// on first use.
#[derive(Debug, Default)]
pub struct NoOverlay {
    logged: bool,
}

impl NoOverlay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverlayRenderer for NoOverlay {
    fn draw(&mut self, _cmd: &CommandBuffer, _target_view: vk::ImageView, extent: vk::Extent2D) {
        if !self.logged {
            debug!(
                "Overlay pass active at {}x{}, no overlay installed",
                extent.width, extent.height
            );
            self.logged = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_renderer_is_object_safe() {
        fn takes_dyn(_: &dyn OverlayRenderer) {}
        takes_dyn(&NoOverlay::new());
    }

    #[test]
    fn test_no_overlay_starts_unlogged() {
        let overlay = NoOverlay::new();
        assert!(!overlay.logged);
    }
}
