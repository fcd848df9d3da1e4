//! Render hardware interface: Ember's Vulkan layer.
//!
//! Thin RAII wrappers over `ash`, shaped around how the engine renders:
//! dynamic rendering instead of render passes, synchronization2 barriers,
//! buffer device addresses for mesh data, and memory through
//! `gpu-allocator`. Higher layers never hold a raw Vulkan handle they
//! would have to destroy themselves.

mod error;

pub mod buffer;
pub mod command;
pub mod deletion;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod immediate;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Callers assemble their own create-infos and submit-infos, so the raw
// types stay reachable without importing ash directly.
pub use ash::vk;
