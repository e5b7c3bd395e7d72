//! Scheduled model: top-level execution units plus the tensors they share.

use crate::error::{Result, RuntimeError};
use crate::executor::Executor;
use crate::kernel::{Executable, Kernel};
use crate::sub_graph::SubGraph;
use std::sync::Arc;
use strata_core::{Allocator, Buffer, Tensor, TensorArena, TensorId, TensorShape};

/// One top-level unit of a scheduled model.
#[derive(Debug)]
pub enum ExecUnit {
    Kernel(Kernel),
    SubGraph(SubGraph),
}

impl ExecUnit {
    /// Names of the kernels in this unit, in execution order.
    pub fn kernel_names(&self) -> Vec<&str> {
        match self {
            ExecUnit::Kernel(kernel) => vec![kernel.name()],
            ExecUnit::SubGraph(sub) => sub.nodes().iter().map(|k| k.name()).collect(),
        }
    }

    pub fn as_subgraph(&self) -> Option<&SubGraph> {
        match self {
            ExecUnit::SubGraph(sub) => Some(sub),
            ExecUnit::Kernel(_) => None,
        }
    }

    pub fn as_kernel(&self) -> Option<&Kernel> {
        match self {
            ExecUnit::Kernel(kernel) => Some(kernel),
            ExecUnit::SubGraph(_) => None,
        }
    }
}

impl Executable for ExecUnit {
    fn name(&self) -> &str {
        match self {
            ExecUnit::Kernel(kernel) => kernel.name(),
            ExecUnit::SubGraph(sub) => sub.name(),
        }
    }

    fn inputs(&self) -> &[TensorId] {
        match self {
            ExecUnit::Kernel(kernel) => kernel.inputs(),
            ExecUnit::SubGraph(sub) => sub.inputs(),
        }
    }

    fn outputs(&self) -> &[TensorId] {
        match self {
            ExecUnit::Kernel(kernel) => kernel.outputs(),
            ExecUnit::SubGraph(sub) => sub.outputs(),
        }
    }

    fn prepare(&mut self, tensors: &mut TensorArena) -> Result<()> {
        match self {
            ExecUnit::Kernel(kernel) => kernel.prepare(tensors),
            ExecUnit::SubGraph(sub) => sub.prepare(tensors),
        }
    }

    fn resize(&mut self, tensors: &mut TensorArena) -> Result<()> {
        match self {
            ExecUnit::Kernel(kernel) => kernel.resize(tensors),
            ExecUnit::SubGraph(sub) => sub.resize(tensors),
        }
    }

    fn execute(
        &mut self,
        tensors: &mut TensorArena,
        allocator: &Arc<dyn Allocator>,
    ) -> Result<()> {
        match self {
            ExecUnit::Kernel(kernel) => kernel.execute(tensors, allocator),
            ExecUnit::SubGraph(sub) => sub.execute(tensors, allocator),
        }
    }
}

/// A model ready to run: ordered units, the tensor arena and the model's
/// boundary tensors.
///
/// Call [`ScheduledModel::prepare`] once, set inputs, then
/// [`ScheduledModel::run`] as often as needed.
#[derive(Debug)]
pub struct ScheduledModel {
    units: Vec<ExecUnit>,
    tensors: TensorArena,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    allocator: Arc<dyn Allocator>,
    executor: Executor,
    prepared: bool,
}

impl ScheduledModel {
    pub fn new(
        units: Vec<ExecUnit>,
        tensors: TensorArena,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
        allocator: Arc<dyn Allocator>,
    ) -> Self {
        Self {
            units,
            tensors,
            inputs,
            outputs,
            allocator,
            executor: Executor::new(),
            prepared: false,
        }
    }

    pub fn units(&self) -> &[ExecUnit] {
        &self.units
    }

    pub fn tensors(&self) -> &TensorArena {
        &self.tensors
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// Names of all kernels, flattened across units in execution order.
    pub fn kernel_names(&self) -> Vec<&str> {
        self.units.iter().flat_map(ExecUnit::kernel_names).collect()
    }

    /// Prepare every unit. Must be called once before [`ScheduledModel::run`].
    pub fn prepare(&mut self) -> Result<()> {
        for unit in &mut self.units {
            unit.prepare(&mut self.tensors)?;
        }
        self.prepared = true;
        Ok(())
    }

    fn input_tensor(&mut self, index: usize) -> Result<&mut Tensor> {
        let id = *self.inputs.get(index).ok_or_else(|| {
            RuntimeError::TensorNotFound(format!("model input {index}"))
        })?;
        Ok(self.tensors.get_mut(id)?)
    }

    /// Copy `values` into model input `index`.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::TensorNotFound` for an unknown index and a shape
    /// error if `values` does not match the input's byte size.
    pub fn set_input<T: bytemuck::Pod>(&mut self, index: usize, values: &[T]) -> Result<()> {
        let tensor = self.input_tensor(index)?;
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let expected = tensor.size_in_bytes()?;
        if bytes.len() != expected {
            return Err(strata_core::Error::Shape(format!(
                "input '{}' expects {} bytes, got {}",
                tensor.name,
                expected,
                bytes.len()
            ))
            .into());
        }
        tensor.set_data(Buffer::from_bytes(bytes), false);
        Ok(())
    }

    /// Change input shapes and re-infer every unit in order.
    ///
    /// Input data is dropped; set it again before the next run.
    pub fn resize(&mut self, shapes: &[(TensorId, Vec<usize>)]) -> Result<()> {
        if !self.prepared {
            return Err(RuntimeError::InvalidState(
                "resize called before prepare".to_string(),
            ));
        }

        for (id, shape) in shapes {
            if !self.inputs.contains(id) {
                return Err(RuntimeError::TensorNotFound(format!(
                    "tensor {id} is not a model input"
                )));
            }
            let tensor = self.tensors.get_mut(*id)?;
            tensor.free_data();
            tensor.shape = TensorShape::Static(shape.clone());
        }

        for unit in &mut self.units {
            unit.resize(&mut self.tensors)?;
        }
        Ok(())
    }

    /// Run the model once.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::InvalidState` before [`ScheduledModel::prepare`]
    /// and any execution error, wrapped with the failing unit's name.
    #[tracing::instrument(skip_all, fields(units = self.units.len()))]
    pub fn run(&mut self) -> Result<()> {
        if !self.prepared {
            return Err(RuntimeError::InvalidState(
                "run called before prepare".to_string(),
            ));
        }
        self.executor.run(
            &self.inputs,
            &self.outputs,
            &mut self.units,
            &mut self.tensors,
            &self.allocator,
        )
    }

    /// Look up a model output by name.
    pub fn output(&self, name: &str) -> Result<&Tensor> {
        for &id in &self.outputs {
            let tensor = self.tensors.get(id)?;
            if tensor.name == name {
                return Ok(tensor);
            }
        }
        Err(RuntimeError::TensorNotFound(name.to_string()))
    }
}
