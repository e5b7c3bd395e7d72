//! Error types for the runtime crate.

use thiserror::Error;

/// Runtime execution errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Error raised by a core type or a kernel implementation.
    #[error(transparent)]
    Core(#[from] strata_core::Error),

    /// A scope input had no data when execution started.
    #[error("Input tensor '{0}' has no data")]
    MissingInputData(String),

    /// A kernel failed; execution stopped at this kernel.
    #[error("Kernel '{kernel}' failed: {source}")]
    KernelFailed {
        kernel: String,
        #[source]
        source: Box<RuntimeError>,
    },

    /// Shape inference failed while resizing or executing a kernel.
    #[error("Shape inference failed for '{kernel}': {reason}")]
    InferShape { kernel: String, reason: String },

    /// Lifecycle method called in the wrong state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Kernels left over once no kernel is ready.
    #[error("Kernels never became ready: {0:?}")]
    Unreachable(Vec<String>),

    /// Tensor not found.
    #[error("Tensor not found: {0}")]
    TensorNotFound(String),
}

impl RuntimeError {
    /// Name of the innermost failing kernel, if any.
    pub fn failing_kernel(&self) -> Option<&str> {
        match self {
            RuntimeError::KernelFailed { kernel, source } => {
                source.failing_kernel().or(Some(kernel.as_str()))
            }
            _ => None,
        }
    }
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
