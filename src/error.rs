//! Central error handling for the luxtrace engine
//!
//! Provides a unified EngineError enum with one variant per failure
//! category so callers can distinguish downgrades from hard failures.

/// Centralized error type for all engine operations
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// The host lacks a usable parallel compute device. Non-fatal: the
    /// factory downgrades the instance to the reference engine.
    #[error("Capability error: {0}")]
    Capability(String),

    /// Compute shader or pipeline failed to build. Disables the
    /// accelerated path for the instance; the reference engine stays usable.
    #[error("Shader build error: {0}")]
    ShaderBuild(String),

    /// Device-side failure during a simulation call (submit, out-of-memory).
    /// Triggers a one-call retry on the reference engine.
    #[error("Device error: {0}")]
    Device(String),

    /// Accumulation buffer could not be transferred back to host memory.
    #[error("Readback error: {0}")]
    Readback(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Scene validation error: {0}")]
    SceneValidation(String),

    /// `statistics()` was called before any simulation completed.
    #[error("no simulation results available")]
    NoResults,

    /// A method was invoked after `dispose()`.
    #[error("engine has been disposed")]
    Disposed,
}

impl EngineError {
    /// Convenience constructors for common error types
    pub fn capability<T: ToString>(msg: T) -> Self {
        EngineError::Capability(msg.to_string())
    }

    pub fn shader_build<T: ToString>(msg: T) -> Self {
        EngineError::ShaderBuild(msg.to_string())
    }

    pub fn device<T: ToString>(msg: T) -> Self {
        EngineError::Device(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        EngineError::Readback(msg.to_string())
    }

    pub fn invalid_parameters<T: ToString>(msg: T) -> Self {
        EngineError::InvalidParameters(msg.to_string())
    }

    pub fn scene_validation<T: ToString>(msg: T) -> Self {
        EngineError::SceneValidation(msg.to_string())
    }

    /// True for failures the accelerated engine may transparently retry on
    /// the reference engine within the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Device(_) | EngineError::Readback(_))
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
