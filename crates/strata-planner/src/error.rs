//! Error types for the planner crate.

use strata_core::{DataType, DeviceType};
use thiserror::Error;

/// Scheduling errors.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Error from the graph model, tensors or context.
    #[error(transparent)]
    Core(#[from] strata_core::Error),

    /// Error building runtime units.
    #[error(transparent)]
    Runtime(#[from] strata_runtime::RuntimeError),

    /// Graph structure the scheduler cannot work with.
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// No shape function registered for an op type.
    #[error("No shape function registered for operator '{0}'")]
    MissingShapeFunction(String),

    /// A shape function failed.
    #[error("Shape inference failed for node '{node}': {reason}")]
    InferShape { node: String, reason: String },

    /// No kernel registered for the node on any probed architecture.
    #[error("No kernel for node '{node}': ({arch}, {dtype}, {op_type}) is not registered")]
    KernelNotFound {
        node: String,
        arch: DeviceType,
        dtype: DataType,
        op_type: String,
    },

    /// The scheduled kernels depend on each other in a cycle.
    #[error("Graph contains a cycle through: {0:?}")]
    Cycle(Vec<String>),
}

/// Result type for planner operations.
pub type Result<T> = std::result::Result<T, ScheduleError>;
