//! Execution of scheduled strata models.
//!
//! The planner turns a graph into an ordered list of [`ExecUnit`]s, each a
//! single [`Kernel`] or a [`SubGraph`] of kernels sharing an execution
//! wrapper. This crate runs them.
//!
//! # Architecture
//!
//! - [`Kernel`] binds one node to an [`strata_core::OpKernel`] and owns its
//!   resize/re-infer lifecycle.
//! - [`Executor`] runs any list of [`Executable`]s in dependency order with a
//!   ready queue and releases intermediate buffers by reference count.
//! - [`SubGraph`] variants add device-specific behavior around the executor:
//!   allocator wiring on CPU, float16 boundary conversion, and strictly
//!   sequential provider subgraphs.
//! - [`ScheduledModel`] owns the units and the tensor arena.
//!
//! # Example
//!
//! ```no_run
//! use strata_runtime::ScheduledModel;
//!
//! fn infer(model: &mut ScheduledModel, input: &[f32]) -> strata_runtime::Result<Vec<f32>> {
//!     model.set_input(0, input)?;
//!     model.run()?;
//!     Ok(model.output("output")?.to_vec::<f32>()?)
//! }
//! ```

mod error;
mod executor;
mod kernel;
mod model;
mod sub_graph;

// Public exports
pub use error::{Result, RuntimeError};
pub use executor::{Executor, KernelAdjacency};
pub use kernel::{CAST_OP, Executable, Kernel, SubGraphType};
pub use model::{ExecUnit, ScheduledModel};
pub use sub_graph::{
    CpuFp16SubGraph, CpuSubGraph, CustomSubGraph, SubGraph, SubGraphKernel, SubGraphState,
};
