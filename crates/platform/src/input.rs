//! Keyboard state assembled from window events.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Keyboard state with per-frame edge detection.
///
/// The event loop feeds raw press and release events in; the engine asks
/// edge questions ("did Space just go down?") once per frame. Mouse state
/// is out of scope, nothing consumes it.
#[derive(Debug, Default)]
pub struct InputState {
    held: HashSet<KeyCode>,
    pressed_this_frame: HashSet<KeyCode>,
    released_this_frame: HashSet<KeyCode>,
}

impl InputState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the edge sets. Call once per frame, before pumping events.
    pub fn begin_frame(&mut self) {
        self.pressed_this_frame.clear();
        self.released_this_frame.clear();
    }

    /// Records a press. OS key repeat delivers duplicate presses while a
    /// key is held; only the first counts as an edge.
    pub fn on_key_pressed(&mut self, key: KeyCode) {
        if self.held.insert(key) {
            self.pressed_this_frame.insert(key);
        }
    }

    /// Records a release.
    pub fn on_key_released(&mut self, key: KeyCode) {
        if self.held.remove(&key) {
            self.released_this_frame.insert(key);
        }
    }

    /// Whether `key` is currently held down.
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.held.contains(&key)
    }

    /// Whether `key` went down since the last [`begin_frame`](Self::begin_frame).
    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.pressed_this_frame.contains(&key)
    }

    /// Whether `key` came up since the last [`begin_frame`](Self::begin_frame).
    pub fn is_key_just_released(&self, key: KeyCode) -> bool {
        self.released_this_frame.contains(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_just_pressed_cleared_next_frame() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::Space);
        assert!(input.is_key_just_pressed(KeyCode::Space));
        assert!(input.is_key_pressed(KeyCode::Space));

        input.begin_frame();
        assert!(!input.is_key_just_pressed(KeyCode::Space));
        assert!(input.is_key_pressed(KeyCode::Space));
    }

    #[test]
    fn test_repeat_press_is_not_just_pressed() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::Space);
        input.begin_frame();
        // Key repeat delivers another press without a release in between.
        input.on_key_pressed(KeyCode::Space);
        assert!(!input.is_key_just_pressed(KeyCode::Space));
    }

    #[test]
    fn test_release_tracking() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::Escape);
        input.on_key_released(KeyCode::Escape);
        assert!(!input.is_key_pressed(KeyCode::Escape));
        assert!(input.is_key_just_released(KeyCode::Escape));
    }
}
