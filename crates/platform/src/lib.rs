//! Windowing and input for Ember.
//!
//! Everything that talks to the OS lives here: winit windows, keyboard
//! state, and Vulkan surface creation from raw window handles. The rest
//! of the workspace stays platform-agnostic.

mod input;
mod window;

pub use input::{InputState, KeyCode};
pub use window::{Surface, Window, get_required_extensions};
