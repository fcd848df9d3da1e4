//! Deferred release of GPU resources.
//!
//! GPU objects cannot be destroyed while a submitted command buffer may still
//! reference them. A [`DeletionQueue`] collects release actions and runs them
//! later, once a fence or idle wait proves the GPU is done:
//!
//! - the engine-lifetime queue is flushed once at shutdown, after
//!   `device_wait_idle`;
//! - each frame slot owns a queue flushed right after that slot's fence wait,
//!   immediately before the slot is reused.
//!
//! Flushing executes entries in reverse insertion order (LIFO), so resources
//! release in the opposite order of their acquisition.
//!
//! # Example
//!
//! ```
//! use ember_rhi::deletion::DeletionQueue;
//!
//! let mut queue = DeletionQueue::new();
//! queue.push(|| println!("released second"));
//! queue.push(|| println!("released first"));
//! queue.flush();
//! assert!(queue.is_empty());
//! ```

use tracing::{debug, warn};

/// A LIFO queue of release actions for GPU resources.
///
/// Entries are zero-argument closures, typically capturing an RAII wrapper
/// ([`crate::buffer::Buffer`], [`crate::image::AllocatedImage`], ...) by move
/// so the wrapper's `Drop` runs at flush time instead of scope exit.
#[derive(Default)]
pub struct DeletionQueue {
    actions: Vec<Box<dyn FnOnce() + Send>>,
}

impl DeletionQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Appends a release action.
    ///
    /// The action runs on the next `flush`, after all actions pushed later.
    pub fn push(&mut self, action: impl FnOnce() + Send + 'static) {
        self.actions.push(Box::new(action));
    }

    /// Takes ownership of `resource` and defers its drop to the next `flush`.
    pub fn defer<T: Send + 'static>(&mut self, resource: T) {
        self.push(move || drop(resource));
    }

    /// Executes all queued actions in reverse insertion order and clears the
    /// queue.
    ///
    /// The caller must guarantee the GPU no longer references any resource a
    /// queued action releases (slot fence observed, or device idle).
    pub fn flush(&mut self) {
        if self.actions.is_empty() {
            return;
        }
        debug!("Flushing {} deferred release action(s)", self.actions.len());
        while let Some(action) = self.actions.pop() {
            action();
        }
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true when no actions are pending.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        // Dropping unflushed entries would still run the captured destructors,
        // but in insertion order. Flush instead to keep the LIFO guarantee.
        if !self.actions.is_empty() {
            warn!(
                remaining = self.actions.len(),
                "deletion queue dropped without an explicit flush"
            );
            self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_flush_runs_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut queue = DeletionQueue::new();

        for name in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            queue.push(move || order.lock().unwrap().push(name));
        }

        queue.flush();
        assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_flush_clears_and_queue_is_reusable() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut queue = DeletionQueue::new();

        let c = Arc::clone(&counter);
        queue.push(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(queue.len(), 1);

        queue.flush();
        assert!(queue.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let c = Arc::clone(&counter);
        queue.push(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        queue.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_flush_on_empty_queue_is_noop() {
        let mut queue = DeletionQueue::new();
        queue.flush();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_defer_drops_resource_at_flush() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let mut queue = DeletionQueue::new();
        queue.defer(Tracked(Arc::clone(&drops)));

        assert_eq!(drops.load(Ordering::SeqCst), 0);
        queue.flush();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_without_flush_still_releases() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut queue = DeletionQueue::new();
            let c = Arc::clone(&counter);
            queue.push(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_per_slot_queues_flush_each_entry_exactly_once() {
        // Simulates the frame ring over ten frames: every frame defers one
        // release into its slot's queue, which is flushed at the slot's next
        // turn. A final pass (shutdown) flushes whatever remains.
        const SLOTS: usize = 2;
        const FRAMES: u64 = 10;

        let counter = Arc::new(AtomicUsize::new(0));
        let mut queues: Vec<DeletionQueue> = (0..SLOTS).map(|_| DeletionQueue::new()).collect();

        for frame in 0..FRAMES {
            let slot = (frame % SLOTS as u64) as usize;
            queues[slot].flush();
            let c = Arc::clone(&counter);
            queues[slot].push(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        for queue in &mut queues {
            queue.flush();
        }

        assert_eq!(counter.load(Ordering::SeqCst), FRAMES as usize);
        assert!(queues.iter().all(|q| q.is_empty()));
    }

    #[test]
    fn test_deletion_queue_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<DeletionQueue>();
    }
}
