//! Engine startup configuration.

use std::path::PathBuf;

/// Startup configuration for the engine.
///
/// Constructed by the application before the window exists and passed to
/// [`Engine::new`](crate::Engine::new). The defaults are suitable for a
/// development build.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Initial window width in pixels
    pub width: u32,
    /// Initial window height in pixels
    pub height: u32,
    /// Window title
    pub title: String,
    /// Directory containing compiled SPIR-V shader binaries
    pub shader_dir: PathBuf,
    /// Force FIFO presentation instead of preferring MAILBOX
    pub vsync: bool,
    /// Enable Vulkan validation layers
    pub enable_validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "Ember".to_string(),
            shader_dir: PathBuf::from("shaders"),
            vsync: false,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.width, 800);
        assert_eq!(config.height, 600);
        assert_eq!(config.title, "Ember");
        assert_eq!(config.shader_dir, PathBuf::from("shaders"));
        assert!(!config.vsync);
    }
}
