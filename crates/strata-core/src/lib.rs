//! Core graph model, tensor storage and registries for strata.
//!
//! This crate provides the foundational abstractions that the planner and
//! runtime crates build on:
//! - Op-level dataflow graph (`Graph`, `Node`, `SubgraphDef`)
//! - Tensor arena with allocator-owned, ref-counted buffers (`TensorArena`, `Tensor`)
//! - Allocators (`Allocator`, `DefaultAllocator`)
//! - Shape functions and kernel implementations (`Operator`, `OpKernel`)
//! - Explicit registries for both (`OperatorRegistry`, `KernelRegistry`)
//! - Scheduling configuration (`Context`)

pub mod allocator;
pub mod context;
pub mod graph;
pub mod kernel;
pub mod operator;
pub mod precision;
pub mod registry;
pub mod tensor;
pub mod types;

// Re-export commonly used types
pub use allocator::{Allocator, AllocatorStats, Buffer, DefaultAllocator, MAX_MALLOC_SIZE};
pub use context::{Context, CpuDeviceInfo, GpuDeviceInfo, NpuDeviceInfo, ProviderDevice};
pub use graph::{Graph, Node, NodeId, PARTIAL_OP, SUBGRAPH_INDEX_ATTR, SubgraphDef};
pub use kernel::{KernelCreateCtx, KernelCtx, OpKernel};
pub use operator::{InferCtx, InferOutcome, InferStatus, Operator, run_shape_inference};
pub use registry::{KernelCreator, KernelKey, KernelRegistry, OperatorRegistry};
pub use tensor::{Tensor, TensorArena, TensorId, TensorList, TensorStorage};
pub use types::{AttributeValue, DataType, DeviceType, TensorCategory, TensorShape};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for strata-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Tensor not found: {0}")]
    TensorNotFound(String),

    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Kernel error: {0}")]
    Kernel(String),
}
