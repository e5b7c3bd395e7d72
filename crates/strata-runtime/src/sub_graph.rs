//! Subgraph execution units.
//!
//! A subgraph groups consecutive kernels that share an execution wrapper.
//! The plain [`SubGraphKernel`] runs its kernels through the [`Executor`];
//! the CPU variants add allocator wiring and float16 boundary conversion,
//! and [`CustomSubGraph`] runs provider kernels strictly in order.

use crate::error::{Result, RuntimeError};
use crate::executor::Executor;
use crate::kernel::{Executable, Kernel, SubGraphType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use strata_core::{Allocator, DataType, TensorArena, TensorId, TensorStorage, precision};

/// Lifecycle of a subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubGraphState {
    Constructed,
    Prepared,
    Executing,
}

/// Ordered group of kernels with boundary tensors and an allocator.
#[derive(Debug)]
pub struct SubGraphKernel {
    name: String,
    kind: SubGraphType,
    nodes: Vec<Kernel>,
    in_nodes: Vec<usize>,
    out_nodes: Vec<usize>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    allocator: Arc<dyn Allocator>,
    executor: Executor,
    state: SubGraphState,
}

impl SubGraphKernel {
    /// Create a subgraph over `nodes`, which must already be in a valid
    /// execution order.
    pub fn new(
        name: impl Into<String>,
        kind: SubGraphType,
        nodes: Vec<Kernel>,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
        allocator: Arc<dyn Allocator>,
    ) -> Self {
        let in_nodes = (0..nodes.len())
            .filter(|&i| nodes[i].inputs().iter().any(|t| inputs.contains(t)))
            .collect();
        let out_nodes = (0..nodes.len())
            .filter(|&i| nodes[i].outputs().iter().any(|t| outputs.contains(t)))
            .collect();

        Self {
            name: name.into(),
            kind,
            nodes,
            in_nodes,
            out_nodes,
            inputs,
            outputs,
            allocator,
            executor: Executor::new(),
            state: SubGraphState::Constructed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SubGraphType {
        self.kind
    }

    pub fn state(&self) -> SubGraphState {
        self.state
    }

    pub fn nodes(&self) -> &[Kernel] {
        &self.nodes
    }

    /// Kernels consuming a subgraph input.
    pub fn in_nodes(&self) -> impl Iterator<Item = &Kernel> {
        self.in_nodes.iter().map(|&i| &self.nodes[i])
    }

    /// Kernels producing a subgraph output.
    pub fn out_nodes(&self) -> impl Iterator<Item = &Kernel> {
        self.out_nodes.iter().map(|&i| &self.nodes[i])
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    /// Prepare every kernel and move to [`SubGraphState::Prepared`].
    pub fn prepare_nodes(&mut self, tensors: &mut TensorArena) -> Result<()> {
        for node in &mut self.nodes {
            node.prepare(tensors)
                .map_err(|e| RuntimeError::KernelFailed {
                    kernel: node.name().to_string(),
                    source: Box::new(e),
                })?;
        }
        self.state = SubGraphState::Prepared;
        Ok(())
    }

    /// Resize kernels in execution order so each sees its producers' shapes.
    pub fn resize_nodes(&mut self, tensors: &mut TensorArena) -> Result<()> {
        for node in &mut self.nodes {
            node.resize(tensors)?;
        }
        Ok(())
    }

    /// Run all kernels once through the executor.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::InvalidState` unless the subgraph is prepared.
    pub fn run_nodes(&mut self, tensors: &mut TensorArena) -> Result<()> {
        if self.state != SubGraphState::Prepared {
            return Err(RuntimeError::InvalidState(format!(
                "subgraph '{}' run while {:?}",
                self.name, self.state
            )));
        }

        self.state = SubGraphState::Executing;
        let result = self.executor.run(
            &self.inputs,
            &self.outputs,
            &mut self.nodes,
            tensors,
            &self.allocator,
        );
        self.state = SubGraphState::Prepared;
        result
    }

    /// Give every non-list output of every kernel `allocator`.
    fn assign_output_allocator(&self, tensors: &mut TensorArena) -> Result<()> {
        for node in &self.nodes {
            for &id in node.outputs() {
                let tensor = tensors.get_mut(id)?;
                if tensor.list.is_none() {
                    tensor.set_allocator(self.allocator.clone());
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for SubGraphKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:?}]:", self.name, self.kind)?;
        for node in &self.nodes {
            write!(f, " {}", node.name())?;
        }
        Ok(())
    }
}

/// float32 CPU subgraph. Kernel outputs use the subgraph's allocator.
#[derive(Debug)]
pub struct CpuSubGraph {
    base: SubGraphKernel,
}

impl CpuSubGraph {
    pub fn new(base: SubGraphKernel) -> Self {
        Self { base }
    }

    pub fn prepare(&mut self, tensors: &mut TensorArena) -> Result<()> {
        self.base.prepare_nodes(tensors)?;
        self.base.assign_output_allocator(tensors)
    }
}

/// float16 CPU subgraph.
///
/// float32 inputs are converted to float16 before the kernels run and put
/// back afterwards, so code outside the subgraph sees its original buffers
/// again. float16 outputs are handed out as float32.
#[derive(Debug)]
pub struct CpuFp16SubGraph {
    base: SubGraphKernel,
    origin_input_data: HashMap<TensorId, TensorStorage>,
    converted_lists: Vec<TensorId>,
}

impl CpuFp16SubGraph {
    pub fn new(base: SubGraphKernel) -> Self {
        Self {
            base,
            origin_input_data: HashMap::new(),
            converted_lists: Vec::new(),
        }
    }

    /// Number of inputs currently swapped to float16.
    pub fn swapped_inputs(&self) -> usize {
        self.origin_input_data.len()
    }

    pub fn prepare(&mut self, tensors: &mut TensorArena) -> Result<()> {
        self.base.prepare_nodes(tensors)?;
        self.base.assign_output_allocator(tensors)?;
        self.retype_outputs(tensors)
    }

    fn swap_input(&mut self, id: TensorId, tensors: &mut TensorArena) -> Result<()> {
        if self.origin_input_data.contains_key(&id) {
            return Ok(());
        }
        let tensor = tensors.get_mut(id)?;
        if tensor.dtype != DataType::F32 || tensor.is_const() {
            return Ok(());
        }
        let original = precision::swap_to_f16(tensor, &self.base.allocator)?;
        self.origin_input_data.insert(id, original);
        Ok(())
    }

    /// Convert float32 inputs to float16, keeping the originals aside.
    pub fn pre_process(&mut self, tensors: &mut TensorArena) -> Result<()> {
        for index in 0..self.base.inputs.len() {
            let id = self.base.inputs[index];
            let list = tensors.get(id)?.list.clone();
            match list {
                Some(list) if list.element_dtype == DataType::F32 => {
                    for element in list.elements {
                        self.swap_input(element, tensors)?;
                    }
                    if let Some(list) = tensors.get_mut(id)?.list.as_mut() {
                        list.element_dtype = DataType::F16;
                    }
                    self.converted_lists.push(id);
                }
                Some(_) => {}
                None => self.swap_input(id, tensors)?,
            }
        }
        self.retype_outputs(tensors)
    }

    /// float32 outputs of non-cast kernels are produced as float16 here.
    fn retype_outputs(&self, tensors: &mut TensorArena) -> Result<()> {
        for node in self.base.nodes.iter().filter(|n| !n.is_cast()) {
            for &id in node.outputs() {
                let tensor = tensors.get_mut(id)?;
                if tensor.dtype == DataType::F32 {
                    tensor.dtype = DataType::F16;
                }
            }
        }
        Ok(())
    }

    /// Restore original inputs, then convert float16 outputs to float32.
    ///
    /// The side table is empty afterwards even if a conversion fails.
    pub fn post_process(&mut self, tensors: &mut TensorArena) -> Result<()> {
        let restored = self.restore_inputs(tensors);
        let converted = self.convert_outputs(tensors);
        restored.and(converted)
    }

    fn restore_inputs(&mut self, tensors: &mut TensorArena) -> Result<()> {
        let mut result = Ok(());
        for (id, storage) in self.origin_input_data.drain() {
            match tensors.get_mut(id) {
                Ok(tensor) => precision::restore_f32(tensor, storage),
                Err(e) => {
                    storage.release();
                    result = Err(e.into());
                }
            }
        }
        for id in self.converted_lists.drain(..) {
            if let Some(list) = tensors.get_mut(id)?.list.as_mut() {
                list.element_dtype = DataType::F32;
            }
        }
        result
    }

    fn convert_outputs(&self, tensors: &mut TensorArena) -> Result<()> {
        let allocator = &self.base.allocator;
        for node in self.base.nodes.iter().filter(|n| !n.is_cast()) {
            for &id in node.outputs() {
                if !self.base.outputs.contains(&id) {
                    continue;
                }
                let list = tensors.get(id)?.list.clone();
                match list {
                    Some(list) if list.element_dtype == DataType::F16 => {
                        for element in list.elements {
                            let tensor = tensors.get_mut(element)?;
                            if tensor.dtype == DataType::F16 {
                                precision::convert_to_f32(tensor, allocator)?;
                            }
                        }
                        if let Some(list) = tensors.get_mut(id)?.list.as_mut() {
                            list.element_dtype = DataType::F32;
                        }
                    }
                    Some(_) => {}
                    None => {
                        let tensor = tensors.get_mut(id)?;
                        if tensor.dtype == DataType::F16 {
                            precision::convert_to_f32(tensor, allocator)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, tensors: &mut TensorArena) -> Result<()> {
        let result = self
            .pre_process(tensors)
            .and_then(|()| self.base.run_nodes(tensors));
        let post = self.post_process(tensors);
        result.and(post)
    }
}

/// Subgraph of provider kernels, run strictly in list order.
///
/// Intermediate outputs live in the provider's allocator; outputs of the
/// last kernel use the context allocator so the rest of the model can read
/// them.
#[derive(Debug)]
pub struct CustomSubGraph {
    base: SubGraphKernel,
    context_allocator: Arc<dyn Allocator>,
}

impl CustomSubGraph {
    pub fn new(base: SubGraphKernel, context_allocator: Arc<dyn Allocator>) -> Self {
        Self {
            base,
            context_allocator,
        }
    }

    pub fn prepare(&mut self, tensors: &mut TensorArena) -> Result<()> {
        self.base.prepare_nodes(tensors)?;
        let last = self.base.nodes.len().saturating_sub(1);
        for (index, node) in self.base.nodes.iter().enumerate() {
            let allocator = if index == last {
                &self.context_allocator
            } else {
                &self.base.allocator
            };
            for &id in node.outputs() {
                tensors.get_mut(id)?.set_allocator(allocator.clone());
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, tensors: &mut TensorArena) -> Result<()> {
        if self.base.state != SubGraphState::Prepared {
            return Err(RuntimeError::InvalidState(format!(
                "subgraph '{}' run while {:?}",
                self.base.name, self.base.state
            )));
        }

        self.base.state = SubGraphState::Executing;
        let allocator = self.base.allocator.clone();
        let mut result = Ok(());
        for node in &mut self.base.nodes {
            if let Err(e) = node.execute(tensors, &allocator) {
                result = Err(RuntimeError::KernelFailed {
                    kernel: node.name().to_string(),
                    source: Box::new(e),
                });
                break;
            }
        }
        self.base.state = SubGraphState::Prepared;
        result
    }
}

/// A subgraph of any kind.
#[derive(Debug)]
pub enum SubGraph {
    /// GPU and NPU groups, run through the executor as is.
    Generic(SubGraphKernel),
    Cpu(CpuSubGraph),
    CpuFp16(CpuFp16SubGraph),
    Custom(CustomSubGraph),
}

impl SubGraph {
    /// Wrap `base` in the variant its kind calls for.
    pub fn build(base: SubGraphKernel, context_allocator: Arc<dyn Allocator>) -> Self {
        match base.kind() {
            SubGraphType::CpuFp32 => SubGraph::Cpu(CpuSubGraph::new(base)),
            SubGraphType::CpuFp16 => SubGraph::CpuFp16(CpuFp16SubGraph::new(base)),
            SubGraphType::Custom => SubGraph::Custom(CustomSubGraph::new(base, context_allocator)),
            SubGraphType::Gpu | SubGraphType::Npu => SubGraph::Generic(base),
        }
    }

    pub fn base(&self) -> &SubGraphKernel {
        match self {
            SubGraph::Generic(base) => base,
            SubGraph::Cpu(sub) => &sub.base,
            SubGraph::CpuFp16(sub) => &sub.base,
            SubGraph::Custom(sub) => &sub.base,
        }
    }

    fn base_mut(&mut self) -> &mut SubGraphKernel {
        match self {
            SubGraph::Generic(base) => base,
            SubGraph::Cpu(sub) => &mut sub.base,
            SubGraph::CpuFp16(sub) => &mut sub.base,
            SubGraph::Custom(sub) => &mut sub.base,
        }
    }

    pub fn kind(&self) -> SubGraphType {
        self.base().kind()
    }

    pub fn nodes(&self) -> &[Kernel] {
        self.base().nodes()
    }

    pub fn state(&self) -> SubGraphState {
        self.base().state()
    }
}

impl fmt::Display for SubGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.base(), f)
    }
}

impl Executable for SubGraph {
    fn name(&self) -> &str {
        self.base().name()
    }

    fn inputs(&self) -> &[TensorId] {
        self.base().inputs()
    }

    fn outputs(&self) -> &[TensorId] {
        self.base().outputs()
    }

    fn prepare(&mut self, tensors: &mut TensorArena) -> Result<()> {
        match self {
            SubGraph::Generic(base) => base.prepare_nodes(tensors),
            SubGraph::Cpu(sub) => sub.prepare(tensors),
            SubGraph::CpuFp16(sub) => sub.prepare(tensors),
            SubGraph::Custom(sub) => sub.prepare(tensors),
        }
    }

    fn resize(&mut self, tensors: &mut TensorArena) -> Result<()> {
        self.base_mut().resize_nodes(tensors)
    }

    fn execute(
        &mut self,
        tensors: &mut TensorArena,
        _allocator: &Arc<dyn Allocator>,
    ) -> Result<()> {
        let _span = tracing::debug_span!("subgraph", name = self.name()).entered();
        match self {
            SubGraph::Generic(base) => base.run_nodes(tensors),
            SubGraph::Cpu(sub) => sub.base.run_nodes(tensors),
            SubGraph::CpuFp16(sub) => sub.execute(tensors),
            SubGraph::Custom(sub) => sub.execute(tensors),
        }
    }
}
