//! Graph partitioning and kernel scheduling for strata.
//!
//! This crate takes an op graph built by a model loader and turns it into a
//! [`ScheduledModel`] that `strata-runtime` can execute:
//! - shape inference over the declared input shapes;
//! - cost-balanced partitioning between a major and a minor device;
//! - kernel selection by architecture, data type and op type;
//! - grouping of kernels into per-device, per-precision subgraphs.
//!
//! # Example
//!
//! ```no_run
//! use strata_core::{Context, Graph, KernelRegistry, OperatorRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let graph = Graph::new();
//! let operators = OperatorRegistry::new();
//! let kernels = KernelRegistry::new();
//! let context = Context::new().with_thread_num(4).with_parallel(true);
//!
//! let mut model = strata_planner::schedule(graph, &operators, &kernels, &context)?;
//! model.prepare()?;
//! model.run()?;
//! println!("Ran {} kernels", model.kernel_names().len());
//! # Ok(())
//! # }
//! ```

pub mod balance;
pub mod cost;
pub mod error;
pub mod kernel_select;
pub mod partition;
pub mod scheduler;
pub mod shape_inference;

pub use balance::{assign_major, closest_subset};
pub use cost::{CostModel, node_cost, nodes_cost};
pub use error::{Result, ScheduleError};
pub use kernel_select::natural_dtype;
pub use partition::{Candidate, DeviceAssignment, SearchSubGraph};
pub use scheduler::{Scheduler, topological_order};
pub use shape_inference::{InferState, ShapePass, infer_graph};

use strata_core::{Context, Graph, KernelRegistry, OperatorRegistry};
use strata_runtime::ScheduledModel;

/// Schedule `graph` into a runnable model.
///
/// This is the main entry point for the planner crate. It is equivalent to
/// `Scheduler::new(operators, kernels, context).build(graph)`.
///
/// # Errors
///
/// Returns a [`ScheduleError`] if the graph or context is invalid, a shape
/// function fails, no kernel is registered for a node, or the graph has a
/// dependency cycle.
pub fn schedule(
    graph: Graph,
    operators: &OperatorRegistry,
    kernels: &KernelRegistry,
    context: &Context,
) -> Result<ScheduledModel> {
    Scheduler::new(operators, kernels, context).build(graph)
}
