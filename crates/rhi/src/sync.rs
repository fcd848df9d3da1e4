//! Semaphores and fences.
//!
//! The frame loop leans on exactly two primitives: semaphores order work
//! on the GPU timeline (acquire before render, render before present),
//! and fences let the host wait for a submission to retire before its
//! per-frame resources are reused.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_rhi::device::Device;
//! use ember_rhi::sync::{Semaphore, Fence, FENCE_WAIT_TIMEOUT_NS};
//!
//! # fn example(device: Arc<Device>) -> Result<(), ember_rhi::RhiError> {
//! let image_acquired = Semaphore::new(device.clone())?;
//!
//! // Frame fences start signaled so the first frame doesn't wait.
//! let render_fence = Fence::new(device.clone(), true)?;
//! render_fence.wait(FENCE_WAIT_TIMEOUT_NS)?;
//! render_fence.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Bounded wait for per-frame fences: one second, in nanoseconds.
///
/// A frame fence that stays unsignaled this long means the GPU hung.
/// Callers treat the resulting `vk::Result::TIMEOUT` as fatal instead of
/// retrying.
pub const FENCE_WAIT_TIMEOUT_NS: u64 = 1_000_000_000;

/// Owned binary semaphore for GPU-to-GPU ordering.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        debug!("Created semaphore");
        Ok(Self { device, semaphore })
    }

    /// Raw semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// Owned fence for GPU-to-host waits.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled.
    ///
    /// Frame fences are created signaled so the first wait on a slot that
    /// has never been submitted returns immediately. One-shot fences (for
    /// immediate submits) start unsignaled.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        debug!(
            "Created {} fence",
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { device, fence })
    }

    /// Raw fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence signals or `timeout` nanoseconds elapse.
    ///
    /// # Errors
    ///
    /// Returns `RhiError::Vulkan(vk::Result::TIMEOUT)` when the wait
    /// expires; other Vulkan errors pass through.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&fences, true, timeout)?
        };
        Ok(())
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// Must not be called while the fence is owned by a pending submit.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence");
    }
}

/// True when the error is a fence-wait timeout, which the frame loop
/// escalates to a GPU-hang failure.
pub fn is_wait_timeout(err: &RhiError) -> bool {
    matches!(err, RhiError::Vulkan(vk::Result::TIMEOUT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_wait_timeout_only_matches_timeout() {
        assert!(is_wait_timeout(&RhiError::Vulkan(vk::Result::TIMEOUT)));
        assert!(!is_wait_timeout(&RhiError::Vulkan(
            vk::Result::ERROR_DEVICE_LOST
        )));
        assert!(!is_wait_timeout(&RhiError::NoSuitableGpu));
    }

    #[test]
    fn test_sync_primitives_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
    }
}
