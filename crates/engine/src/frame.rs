//! Frame ring and per-frame GPU resources.
//!
//! The engine records up to [`FRAME_OVERLAP`] frames ahead of the GPU. Each
//! ring slot owns the command buffer, synchronization primitives, and
//! deletion queue for one in-flight frame; while the GPU consumes frame N,
//! the CPU records frame N+1 into the next slot.
//!
//! # Slot reuse protocol
//!
//! Reusing a slot starts with [`FrameRing::begin_frame`]:
//!
//! 1. Wait on the slot's render fence, bounded by
//!    [`FENCE_WAIT_TIMEOUT_NS`]. A timeout is reported as
//!    [`EngineError::FrameTimeout`] and treated as a GPU hang.
//! 2. Flush the slot's deletion queue. The fence proves the GPU has
//!    finished the commands that last used those resources.
//!
//! The render fence is NOT reset here. It is only reset once the frame has
//! acquired a swapchain image and will definitely be submitted; a frame
//! that aborts before submission leaves the fence signaled so the next
//! wait on the slot passes.

use std::sync::Arc;

use tracing::debug;

use ember_rhi::RhiResult;
use ember_rhi::command::{CommandBuffer, CommandPool};
use ember_rhi::deletion::DeletionQueue;
use ember_rhi::device::Device;
use ember_rhi::sync::{FENCE_WAIT_TIMEOUT_NS, Fence, Semaphore, is_wait_timeout};

use crate::error::{EngineError, EngineResult};

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAME_OVERLAP: usize = 2;

/// Maps a monotonically increasing frame number to its ring slot.
#[inline]
pub fn slot_for_frame(frame_number: u64) -> usize {
    (frame_number % FRAME_OVERLAP as u64) as usize
}

/// Per-frame GPU resources.
///
/// All resources in a slot are only touched again after the slot's render
/// fence has signaled.
pub struct FrameSlot {
    /// Owns the command buffer allocation; kept alive for the slot's lifetime
    _command_pool: CommandPool,
    /// Command buffer re-recorded every time the slot is reused
    command_buffer: CommandBuffer,
    /// Signaled by the presentation engine when the acquired image is ready
    swapchain_semaphore: Semaphore,
    /// Signaled by the graphics queue when the frame's commands finish
    render_semaphore: Semaphore,
    /// Signaled by the same submission; gates CPU reuse of this slot
    render_fence: Fence,
    /// Resources whose destruction waits for this slot's fence
    deletion_queue: DeletionQueue,
}

impl FrameSlot {
    fn new(device: Arc<Device>) -> RhiResult<Self> {
        let command_pool = CommandPool::new(device.clone(), device.graphics_family_index())?;
        let command_buffer = CommandBuffer::new(device.clone(), &command_pool)?;
        let swapchain_semaphore = Semaphore::new(device.clone())?;
        let render_semaphore = Semaphore::new(device.clone())?;
        // Created signaled so the first wait on the slot passes immediately
        let render_fence = Fence::new(device, true)?;

        Ok(Self {
            _command_pool: command_pool,
            command_buffer,
            swapchain_semaphore,
            render_semaphore,
            render_fence,
            deletion_queue: DeletionQueue::new(),
        })
    }

    /// Returns the slot's command buffer.
    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    /// Returns the semaphore signaled when the acquired image is ready.
    #[inline]
    pub fn swapchain_semaphore(&self) -> &Semaphore {
        &self.swapchain_semaphore
    }

    /// Returns the semaphore signaled when the frame's rendering finishes.
    #[inline]
    pub fn render_semaphore(&self) -> &Semaphore {
        &self.render_semaphore
    }

    /// Returns the fence gating CPU reuse of this slot.
    #[inline]
    pub fn render_fence(&self) -> &Fence {
        &self.render_fence
    }

    /// Returns the slot's deletion queue for deferring resource destruction.
    ///
    /// Anything pushed here is destroyed the next time this slot passes its
    /// fence wait, which guarantees the GPU no longer uses it.
    #[inline]
    pub fn deletion_queue_mut(&mut self) -> &mut DeletionQueue {
        &mut self.deletion_queue
    }
}

/// Ring of [`FRAME_OVERLAP`] frame slots indexed by frame number.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    /// Total frames completed since startup; never reset
    frame_number: u64,
}

impl FrameRing {
    /// Creates the ring with all fences signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if command pool or synchronization object creation
    /// fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let slots = (0..FRAME_OVERLAP)
            .map(|_| FrameSlot::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;

        debug!("Created frame ring with {} slots", FRAME_OVERLAP);

        Ok(Self {
            slots,
            frame_number: 0,
        })
    }

    /// Returns the number of frames completed since startup.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Returns the ring index of the current frame's slot.
    #[inline]
    pub fn slot_index(&self) -> usize {
        slot_for_frame(self.frame_number)
    }

    /// Returns the current frame's slot.
    #[inline]
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.slot_index()]
    }

    /// Returns the current frame's slot mutably.
    #[inline]
    pub fn current_mut(&mut self) -> &mut FrameSlot {
        let index = self.slot_index();
        &mut self.slots[index]
    }

    /// Blocks until the current slot's previous frame has finished on the
    /// GPU, then flushes the slot's deletion queue.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FrameTimeout`] if the fence does not signal
    /// within [`FENCE_WAIT_TIMEOUT_NS`], or the underlying error for any
    /// other wait failure.
    pub fn begin_frame(&mut self) -> EngineResult<()> {
        let index = self.slot_index();
        let slot = &mut self.slots[index];

        slot.render_fence.wait(FENCE_WAIT_TIMEOUT_NS).map_err(|e| {
            if is_wait_timeout(&e) {
                EngineError::FrameTimeout
            } else {
                EngineError::from(e)
            }
        })?;

        // The fence has signaled: the GPU is done with everything this
        // slot deferred.
        slot.deletion_queue.flush();

        Ok(())
    }

    /// Advances to the next frame.
    ///
    /// Call only after the frame was submitted and handed to presentation.
    /// Aborted frames reuse the same slot, whose fence is still signaled.
    #[inline]
    pub fn advance(&mut self) {
        self.frame_number += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_frame_overlap_bounds() {
        // Double buffering at minimum, and no deeper than typical
        // swapchain image counts
        assert!(FRAME_OVERLAP >= 2);
        assert!(FRAME_OVERLAP <= 3);
    }

    #[test]
    fn test_slot_for_frame_wraps() {
        assert_eq!(slot_for_frame(0), 0);
        assert_eq!(slot_for_frame(1), 1);
        assert_eq!(slot_for_frame(2), 0);
        assert_eq!(slot_for_frame(3), 1);
        assert_eq!(slot_for_frame(100), 0);
        assert_eq!(slot_for_frame(101), 1);
    }

    #[test]
    fn test_slot_for_frame_in_range() {
        for frame in 0..1000u64 {
            assert!(slot_for_frame(frame) < FRAME_OVERLAP);
        }
    }

    #[test]
    fn test_consecutive_frames_use_distinct_slots() {
        for frame in 0..100u64 {
            assert_ne!(slot_for_frame(frame), slot_for_frame(frame + 1));
        }
    }

    #[test]
    fn test_slot_ledgers_release_one_overlap_behind() {
        // Simulate the per-slot deletion queues over ten frames: each frame
        // flushes its slot's queue at reuse time, then defers one entry.
        // An entry must only run when its frame's slot comes around again,
        // exactly FRAME_OVERLAP frames later.
        let log: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let mut queues: Vec<DeletionQueue> =
            (0..FRAME_OVERLAP).map(|_| DeletionQueue::new()).collect();

        for frame in 0..10u64 {
            let slot = slot_for_frame(frame);
            queues[slot].flush();

            let log = Arc::clone(&log);
            queues[slot].push(move || log.lock().unwrap().push(frame));
        }

        // Frames 8 and 9 are still pending; everything earlier ran in
        // frame order because each slot releases exactly one frame per
        // reuse.
        let released = log.lock().unwrap().clone();
        assert_eq!(released, (0..8).collect::<Vec<u64>>());

        for queue in &mut queues {
            queue.flush();
        }
        let released = log.lock().unwrap().clone();
        assert_eq!(released, (0..10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_frame_slot_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameSlot>();
        assert_send::<FrameRing>();
    }
}
