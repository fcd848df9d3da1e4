//! Engine orchestration built on the RHI.
//!
//! This crate wires the platform window, the GPU stack, the frame ring,
//! and the render passes into a single [`Engine`] driven by the
//! application event loop:
//! - Frame lifecycle with bounded fence waits and deferred destruction
//! - Compute background effects and mesh drawing into an offscreen target
//! - Swapchain invalidation and rebuild
//! - Overlay hook on top of the finished frame

pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod overlay;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use frame::FRAME_OVERLAP;
pub use overlay::{NoOverlay, OverlayRenderer};
