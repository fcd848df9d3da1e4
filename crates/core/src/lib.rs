//! Shared foundation for the Ember workspace.
//!
//! Deliberately free of anything Vulkan- or window-specific: the base
//! error type, tracing setup, and frame timing live here so every other
//! crate can depend on them without cycles.

mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FrameStats, Timer};
