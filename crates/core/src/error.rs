//! Base error taxonomy shared across the workspace.

use thiserror::Error;

/// Errors from platform and application code.
///
/// The RHI carries its own richer error type; this one covers everything
/// in front of it.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan failures surfaced outside the RHI, such as surface creation
    #[error("Vulkan: {0}")]
    Vulkan(String),

    /// Window creation or windowing-system failures
    #[error("window: {0}")]
    Window(String),

    /// Shader source or binary problems
    #[error("shader: {0}")]
    Shader(String),

    /// Filesystem and other I/O failures
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Failures without a more specific home
    #[error("internal: {0}")]
    Internal(String),
}

/// Workspace-wide result alias over [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
