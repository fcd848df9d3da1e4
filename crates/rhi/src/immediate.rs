//! Immediate command execution.
//!
//! [`ImmediateContext`] records and submits one-off command buffers outside
//! the frame loop, blocking until the GPU has finished them. The engine uses
//! it for resource uploads (staging copies into device-local buffers), where
//! returning from the call is the completion barrier: the caller may free
//! the staging memory immediately afterwards.

use std::sync::Arc;

use ash::vk;

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::RhiResult;
use crate::sync::Fence;

/// Fence wait bound for immediate submissions, in nanoseconds.
///
/// Far above the per-frame fence timeout; uploads finish in milliseconds,
/// so hitting this means the device is lost.
const IMMEDIATE_WAIT_TIMEOUT_NS: u64 = 10_000_000_000;

/// Context for synchronous one-off command submission.
///
/// Holds a dedicated transient command pool, one command buffer, and a
/// fence. The pool lives on the graphics queue family; submissions go to
/// the graphics queue.
pub struct ImmediateContext {
    device: Arc<Device>,
    // Pool must outlive the command buffer allocated from it.
    _pool: CommandPool,
    buffer: CommandBuffer,
    fence: Fence,
}

impl ImmediateContext {
    /// Creates a new immediate execution context.
    ///
    /// # Errors
    ///
    /// Returns an error if pool, buffer, or fence creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let pool = CommandPool::transient(device.clone(), device.graphics_family_index())?;
        let buffer = CommandBuffer::new(device.clone(), &pool)?;
        let fence = Fence::new(device.clone(), false)?;

        Ok(Self {
            device,
            _pool: pool,
            buffer,
            fence,
        })
    }

    /// Records commands via the closure, submits them, and blocks until the
    /// GPU has executed them.
    ///
    /// Any resource referenced by the recorded commands only needs to stay
    /// alive until this call returns.
    ///
    /// # Errors
    ///
    /// Returns an error if recording, submission, or the fence wait fails.
    pub fn submit<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        self.fence.reset()?;
        self.buffer.reset()?;

        self.buffer.begin()?;
        record(&self.buffer)?;
        self.buffer.end()?;

        let buffer_info = vk::CommandBufferSubmitInfo::default()
            .command_buffer(self.buffer.handle())
            .device_mask(0);
        let buffer_infos = [buffer_info];

        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(&buffer_infos);

        unsafe {
            self.device
                .submit_graphics(&[submit_info], self.fence.handle())?;
        }

        // Completion barrier: the upload is done when this returns.
        self.fence.wait(IMMEDIATE_WAIT_TIMEOUT_NS)?;

        Ok(())
    }
}
