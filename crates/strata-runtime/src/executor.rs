//! Ready-queue executor.
//!
//! The executor walks a kernel list in dependency order: every kernel whose
//! inputs are available is queued, and after a kernel runs its consumers are
//! checked and queued once they become ready. Tensor buffers are released as
//! soon as their last consumer in the scope has run.

use crate::error::{Result, RuntimeError};
use crate::kernel::Executable;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use strata_core::{Allocator, TensorArena, TensorId};

/// Producer/consumer relations between kernels of one scope, derived from
/// the tensors they share.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelAdjacency {
    in_kernels: Vec<Vec<usize>>,
    out_kernels: Vec<Vec<usize>>,
}

impl KernelAdjacency {
    /// Build adjacency for `kernels`. Indices refer to positions in the slice.
    pub fn build<K: Executable>(kernels: &[K]) -> Self {
        let mut producer: HashMap<TensorId, usize> = HashMap::new();
        for (index, kernel) in kernels.iter().enumerate() {
            for &output in kernel.outputs() {
                producer.insert(output, index);
            }
        }

        let mut in_kernels = vec![Vec::new(); kernels.len()];
        let mut out_kernels = vec![Vec::new(); kernels.len()];
        for (index, kernel) in kernels.iter().enumerate() {
            for input in kernel.inputs() {
                let Some(&from) = producer.get(input) else {
                    continue;
                };
                if from == index {
                    continue;
                }
                if !in_kernels[index].contains(&from) {
                    in_kernels[index].push(from);
                }
                if !out_kernels[from].contains(&index) {
                    out_kernels[from].push(index);
                }
            }
        }
        for list in &mut out_kernels {
            list.sort_unstable();
        }

        Self {
            in_kernels,
            out_kernels,
        }
    }

    /// Kernels producing an input of `index`.
    pub fn in_kernels(&self, index: usize) -> &[usize] {
        &self.in_kernels[index]
    }

    /// Kernels consuming an output of `index`, in list order.
    pub fn out_kernels(&self, index: usize) -> &[usize] {
        &self.out_kernels[index]
    }

    /// Kernels with no producer in the scope.
    pub fn entry_kernels(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.in_kernels.len()).filter(|&i| self.in_kernels[i].is_empty())
    }
}

/// Distinct inputs of a kernel, in first-seen order.
fn unique_inputs<K: Executable>(kernel: &K) -> Vec<TensorId> {
    let mut seen = Vec::with_capacity(kernel.inputs().len());
    for &input in kernel.inputs() {
        if !seen.contains(&input) {
            seen.push(input);
        }
    }
    seen
}

/// Per-run bookkeeping of which tensors hold valid data.
struct Availability<'a> {
    scope_inputs: &'a HashSet<TensorId>,
    produced: HashSet<TensorId>,
}

impl Availability<'_> {
    fn is_ready<K: Executable>(&self, kernel: &K, tensors: &TensorArena) -> Result<bool> {
        for &input in kernel.inputs() {
            if self.scope_inputs.contains(&input) || self.produced.contains(&input) {
                continue;
            }
            let tensor = tensors.get(input)?;
            if tensor.is_const() || tensor.is_graph_input() {
                continue;
            }
            return Ok(false);
        }
        Ok(true)
    }
}

/// Single-threaded topological executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Executor;

impl Executor {
    pub fn new() -> Self {
        Self
    }

    /// Run every kernel in `kernels` exactly once in dependency order.
    ///
    /// # Arguments
    ///
    /// * `inputs` - Tensors supplied from outside the scope; they must hold data.
    /// * `outputs` - Tensors that must survive the run.
    /// * `kernels` - Kernels of the scope. Ties between ready kernels are
    ///   broken by their position in this slice.
    /// * `allocator` - Allocator for outputs that have none of their own.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::MissingInputData` if a scope input has no data,
    /// `RuntimeError::KernelFailed` naming the first kernel that fails, and
    /// `RuntimeError::Unreachable` if some kernels never became ready.
    #[tracing::instrument(skip_all, fields(num_kernels = kernels.len()))]
    pub fn run<K: Executable>(
        &self,
        inputs: &[TensorId],
        outputs: &[TensorId],
        kernels: &mut [K],
        tensors: &mut TensorArena,
        allocator: &Arc<dyn Allocator>,
    ) -> Result<()> {
        for &id in inputs {
            let tensor = tensors.get(id)?;
            if tensor.list.is_none() && !tensor.has_data() && !tensor.is_const() {
                return Err(RuntimeError::MissingInputData(tensor.name.clone()));
            }
        }

        let adjacency = KernelAdjacency::build(kernels);
        let kernel_inputs: Vec<Vec<TensorId>> = kernels.iter().map(unique_inputs).collect();

        // Only tensors produced in this scope are counted here. Counts of
        // scope inputs belong to the enclosing scope.
        let mut consumers: HashMap<TensorId, usize> = HashMap::new();
        for kernel in kernels.iter() {
            for &output in kernel.outputs() {
                consumers.insert(output, 0);
            }
        }
        for list in &kernel_inputs {
            for input in list {
                if let Some(count) = consumers.get_mut(input) {
                    *count += 1;
                }
            }
        }
        for (&id, &count) in &consumers {
            let tensor = tensors.get_mut(id)?;
            tensor.set_init_ref_count(count);
            tensor.set_ref_count(0);
        }

        let scope_inputs: HashSet<TensorId> = inputs.iter().copied().collect();
        let retained: HashSet<TensorId> = outputs.iter().copied().collect();
        let mut availability = Availability {
            scope_inputs: &scope_inputs,
            produced: HashSet::new(),
        };

        let mut queue = VecDeque::new();
        let mut enqueued = vec![false; kernels.len()];
        for index in adjacency.entry_kernels() {
            if availability.is_ready(&kernels[index], tensors)? {
                queue.push_back(index);
                enqueued[index] = true;
            }
        }

        let mut executed = 0;
        while let Some(index) = queue.pop_front() {
            let kernel = &mut kernels[index];
            {
                let _span = tracing::debug_span!("kernel", name = kernel.name()).entered();
                kernel
                    .execute(tensors, allocator)
                    .map_err(|e| RuntimeError::KernelFailed {
                        kernel: kernel.name().to_string(),
                        source: Box::new(e),
                    })?;
            }
            executed += 1;

            // A nested scope counts the tensors it produces against its own
            // consumers, so the count is set again from this scope.
            for &output in kernel.outputs() {
                availability.produced.insert(output);
                let tensor = tensors.get_mut(output)?;
                tensor.set_init_ref_count(consumers.get(&output).copied().unwrap_or(0));
                tensor.reset_ref_count();
            }

            // Release inputs this kernel was the last consumer of.
            for &input in &kernel_inputs[index] {
                if availability.produced.contains(&input) && !retained.contains(&input) {
                    tensors.get_mut(input)?.dec_ref_count();
                }
            }

            for &next in adjacency.out_kernels(index) {
                if !enqueued[next] && availability.is_ready(&kernels[next], tensors)? {
                    queue.push_back(next);
                    enqueued[next] = true;
                }
            }
        }

        if executed < kernels.len() {
            let stuck = kernels
                .iter()
                .zip(&enqueued)
                .filter(|(_, queued)| !**queued)
                .map(|(k, _)| k.name().to_string())
                .collect();
            return Err(RuntimeError::Unreachable(stuck));
        }

        Ok(())
    }
}
