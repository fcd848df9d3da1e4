//! Engine error type.

use thiserror::Error;

/// Errors produced by engine setup and the frame loop.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Errors from the GPU abstraction layer
    #[error(transparent)]
    Rhi(#[from] ember_rhi::RhiError),

    /// Errors from core or platform utilities
    #[error(transparent)]
    Core(#[from] ember_core::Error),

    /// A frame fence did not signal within the wait bound.
    /// Almost always means the GPU hung or a submission was lost.
    #[error("Frame fence wait timed out")]
    FrameTimeout,

    /// Unrecoverable engine state
    #[error("Fatal engine error: {0}")]
    Fatal(String),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rhi_error_converts() {
        let err: EngineError = ember_rhi::RhiError::NoSuitableGpu.into();
        assert!(matches!(err, EngineError::Rhi(_)));
    }

    #[test]
    fn test_core_error_converts() {
        let err: EngineError = ember_core::Error::Internal("boom".to_string()).into();
        assert!(matches!(err, EngineError::Core(_)));
    }

    #[test]
    fn test_frame_timeout_message() {
        let err = EngineError::FrameTimeout;
        assert!(err.to_string().contains("timed out"));
    }
}
