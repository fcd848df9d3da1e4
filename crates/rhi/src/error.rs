//! Errors the RHI can produce.

use thiserror::Error;

/// Everything that can go wrong inside the RHI.
///
/// Raw `vk::Result` codes, loader failures, and allocator failures convert
/// via `From`; the string variants add context the raw code lacks.
#[derive(Error, Debug)]
pub enum RhiError {
    /// A Vulkan call returned an error code
    #[error("Vulkan: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// The Vulkan library could not be loaded
    #[error("Vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU memory allocation failed
    #[error("GPU allocation: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// Buffer creation or host access failed
    #[error("buffer: {0}")]
    Buffer(String),

    /// No adapter met the engine's device requirements
    #[error("no suitable GPU (Vulkan 1.3 with graphics, present, and surface support)")]
    NoSuitableGpu,

    /// SPIR-V loading or module creation failed
    #[error("shader: {0}")]
    Shader(String),

    /// Surface query failed
    #[error("surface: {0}")]
    Surface(String),

    /// Swapchain creation or rebuild failed
    #[error("swapchain: {0}")]
    Swapchain(String),

    /// Pipeline state was incomplete or creation failed
    #[error("pipeline: {0}")]
    Pipeline(String),
}

/// Result alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
