//! Runtime binding of a graph node to one kernel implementation.

use crate::error::{Result, RuntimeError};
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{
    Allocator, AttributeValue, DataType, DeviceType, InferStatus, KernelCtx, KernelKey, OpKernel,
    Operator, TensorArena, TensorId, run_shape_inference,
};

/// Op type of cast kernels, whose outputs keep their declared type inside a
/// float16 subgraph.
pub const CAST_OP: &str = "Cast";

/// Execution wrapper a kernel needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubGraphType {
    CpuFp32,
    CpuFp16,
    Gpu,
    Npu,
    Custom,
}

impl SubGraphType {
    /// Subgraph type implied by a kernel key.
    pub fn of(key: &KernelKey) -> Self {
        if key.provider.is_some() {
            return SubGraphType::Custom;
        }
        match key.arch {
            DeviceType::Gpu => SubGraphType::Gpu,
            DeviceType::Npu => SubGraphType::Npu,
            DeviceType::Cpu if key.data_type == DataType::F16 => SubGraphType::CpuFp16,
            DeviceType::Cpu => SubGraphType::CpuFp32,
        }
    }
}

/// Anything the [`crate::Executor`] can run: a single kernel, a subgraph, or
/// a top-level unit wrapping either.
pub trait Executable {
    fn name(&self) -> &str;

    fn inputs(&self) -> &[TensorId];

    fn outputs(&self) -> &[TensorId];

    /// One-time setup after scheduling.
    fn prepare(&mut self, tensors: &mut TensorArena) -> Result<()>;

    /// Re-run shape inference and resize after input shapes changed.
    fn resize(&mut self, tensors: &mut TensorArena) -> Result<()>;

    /// Run once. Output buffers are allocated from `allocator` unless the
    /// output tensor already has its own.
    fn execute(&mut self, tensors: &mut TensorArena, allocator: &Arc<dyn Allocator>)
        -> Result<()>;
}

/// A node bound to a concrete [`OpKernel`].
pub struct Kernel {
    name: String,
    key: KernelKey,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    attributes: HashMap<String, AttributeValue>,
    operator: Option<Arc<dyn Operator>>,
    infer_deferred: bool,
    thread_num: usize,
    model_output: bool,
    imp: Box<dyn OpKernel>,
}

impl Kernel {
    pub fn new(
        name: impl Into<String>,
        key: KernelKey,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
        imp: Box<dyn OpKernel>,
    ) -> Self {
        Self {
            name: name.into(),
            key,
            inputs,
            outputs,
            attributes: HashMap::new(),
            operator: None,
            infer_deferred: false,
            thread_num: 1,
            model_output: false,
            imp,
        }
    }

    /// Attach the shape function used by `resize` and deferred inference.
    pub fn with_operator(
        mut self,
        operator: Arc<dyn Operator>,
        attributes: HashMap<String, AttributeValue>,
    ) -> Self {
        self.operator = Some(operator);
        self.attributes = attributes;
        self
    }

    /// Mark output shapes as unknown until the kernel runs.
    pub fn with_infer_deferred(mut self, deferred: bool) -> Self {
        self.infer_deferred = deferred;
        self
    }

    pub fn with_thread_num(mut self, thread_num: usize) -> Self {
        self.thread_num = thread_num.max(1);
        self
    }

    pub fn with_model_output(mut self, model_output: bool) -> Self {
        self.model_output = model_output;
        self
    }

    pub fn key(&self) -> &KernelKey {
        &self.key
    }

    pub fn op_type(&self) -> &str {
        &self.key.op_type
    }

    pub fn subgraph_type(&self) -> SubGraphType {
        SubGraphType::of(&self.key)
    }

    pub fn is_cast(&self) -> bool {
        self.key.op_type == CAST_OP
    }

    pub fn infer_deferred(&self) -> bool {
        self.infer_deferred
    }

    pub fn thread_num(&self) -> usize {
        self.thread_num
    }

    /// Check if this kernel produces a graph output.
    pub fn is_model_output(&self) -> bool {
        self.model_output
    }

    fn infer_shape(&self, tensors: &mut TensorArena) -> Result<InferStatus> {
        let Some(operator) = &self.operator else {
            return Ok(InferStatus::Inferred);
        };
        run_shape_inference(
            operator.as_ref(),
            &self.name,
            &self.attributes,
            &self.inputs,
            &self.outputs,
            tensors,
        )
        .map_err(|e| RuntimeError::InferShape {
            kernel: self.name.clone(),
            reason: e.to_string(),
        })
    }

    fn allocate_outputs(
        &self,
        tensors: &mut TensorArena,
        allocator: &Arc<dyn Allocator>,
    ) -> Result<()> {
        for &id in &self.outputs {
            let tensor = tensors.get_mut(id)?;
            if tensor.list.is_none() {
                tensor.malloc_data(allocator)?;
            }
        }
        Ok(())
    }
}

impl Executable for Kernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    fn prepare(&mut self, _tensors: &mut TensorArena) -> Result<()> {
        self.imp.prepare()?;
        Ok(())
    }

    fn resize(&mut self, tensors: &mut TensorArena) -> Result<()> {
        for &id in &self.outputs {
            tensors.get_mut(id)?.free_data();
        }
        match self.infer_shape(tensors)? {
            InferStatus::Inferred => {
                self.infer_deferred = false;
                self.imp.resize(tensors, &self.inputs, &self.outputs)?;
            }
            InferStatus::Deferred => {
                tracing::info!(kernel = %self.name, "shape inference deferred to run time");
                self.infer_deferred = true;
            }
        }
        Ok(())
    }

    fn execute(
        &mut self,
        tensors: &mut TensorArena,
        allocator: &Arc<dyn Allocator>,
    ) -> Result<()> {
        if self.infer_deferred {
            if self.infer_shape(tensors)? == InferStatus::Deferred {
                return Err(RuntimeError::InferShape {
                    kernel: self.name.clone(),
                    reason: "output shapes still unknown with all inputs available".to_string(),
                });
            }
            self.imp.resize(tensors, &self.inputs, &self.outputs)?;
        }

        self.allocate_outputs(tensors, allocator)?;

        let mut ctx = KernelCtx {
            name: &self.name,
            tensors,
            inputs: &self.inputs,
            outputs: &self.outputs,
            thread_num: self.thread_num,
        };
        self.imp.run(&mut ctx)?;
        Ok(())
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("infer_deferred", &self.infer_deferred)
            .finish_non_exhaustive()
    }
}
