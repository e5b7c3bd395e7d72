//! Binding nodes to kernel implementations.
//!
//! For every node the selector probes the [`KernelRegistry`] in a fixed
//! order: custom providers, GPU, NPU, CPU float16, CPU float32. The first
//! creator that succeeds wins. A creator that fails counts as a miss.

use crate::error::{Result, ScheduleError};
use strata_core::precision::{restore_f32, swap_to_f16};
use strata_core::{
    Context, DataType, DeviceType, KernelCreateCtx, KernelKey, KernelRegistry, Node, NodeId,
    OpKernel, OperatorRegistry, TensorArena, TensorId, TensorStorage,
};
use strata_runtime::{CAST_OP, Kernel};
use tracing::{debug, warn};

/// Element types that decide a node's natural type, in priority order.
const PREFERRED_TYPES: [DataType; 5] = [
    DataType::F32,
    DataType::F16,
    DataType::I8,
    DataType::I32,
    DataType::Bool,
];

/// The type kernels are looked up with: the first input of a preferred
/// type, else the first input's type, else float32.
pub fn natural_dtype(node: &Node, tensors: &TensorArena) -> DataType {
    let dtypes: Vec<DataType> = node
        .inputs
        .iter()
        .filter_map(|&id| tensors.get(id).ok())
        .map(|t| t.list.as_ref().map_or(t.dtype, |list| list.element_dtype))
        .collect();
    dtypes
        .iter()
        .copied()
        .find(|dtype| PREFERRED_TYPES.contains(dtype))
        .or_else(|| dtypes.first().copied())
        .unwrap_or(DataType::F32)
}

pub(crate) struct KernelSelector<'a> {
    operators: &'a OperatorRegistry,
    kernels: &'a KernelRegistry,
    context: &'a Context,
}

/// Node being bound, with everything the probes need.
struct Probe<'n> {
    id: NodeId,
    node: &'n Node,
    natural: DataType,
    thread_num: usize,
    last_key: Option<KernelKey>,
}

impl<'a> KernelSelector<'a> {
    pub fn new(
        operators: &'a OperatorRegistry,
        kernels: &'a KernelRegistry,
        context: &'a Context,
    ) -> Self {
        Self {
            operators,
            kernels,
            context,
        }
    }

    /// Bind node `id` to a kernel.
    ///
    /// `prefer` restricts CPU kernels to one precision: `Some(F32)` skips the
    /// float16 probe. `deferred` marks kernels that must infer their output
    /// shapes at run time.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError::KernelNotFound` with the last probed key when
    /// no registered creator accepts the node.
    pub fn select(
        &self,
        id: NodeId,
        node: &Node,
        tensors: &mut TensorArena,
        graph_outputs: &[TensorId],
        prefer: Option<DataType>,
        deferred: bool,
    ) -> Result<Kernel> {
        let mut probe = Probe {
            id,
            node,
            natural: natural_dtype(node, tensors),
            thread_num: node.thread_num.unwrap_or(self.context.thread_num),
            last_key: None,
        };

        let (key, imp) = match self.find(&mut probe, tensors, prefer)? {
            Some(found) => found,
            None => {
                let key = probe.last_key.unwrap_or_else(|| {
                    KernelKey::new(DeviceType::Cpu, probe.natural, node.op_type.as_str())
                });
                return Err(ScheduleError::KernelNotFound {
                    node: node.name.clone(),
                    arch: key.arch,
                    dtype: key.data_type,
                    op_type: key.op_type,
                });
            }
        };
        debug!(node = %node.name, key = %key, "selected kernel");

        propagate_types(&key, node, tensors)?;

        let model_output = node.outputs.iter().any(|t| graph_outputs.contains(t));
        let mut kernel = Kernel::new(
            node.name.as_str(),
            key,
            node.inputs.clone(),
            node.outputs.clone(),
            imp,
        )
        .with_thread_num(probe.thread_num)
        .with_infer_deferred(deferred)
        .with_model_output(model_output);
        if let Some(operator) = self.operators.get(&node.op_type) {
            kernel = kernel.with_operator(operator.clone(), node.attributes.clone());
        }
        Ok(kernel)
    }

    fn find(
        &self,
        probe: &mut Probe<'_>,
        tensors: &mut TensorArena,
        prefer: Option<DataType>,
    ) -> Result<Option<(KernelKey, Box<dyn OpKernel>)>> {
        let node = probe.node;
        let op_type = node.op_type.as_str();

        for provider in self.providers(node) {
            let arch = self
                .context
                .providers
                .iter()
                .find(|p| p.provider == provider)
                .map(|p| p.device)
                .or(node.device)
                .unwrap_or(DeviceType::Cpu);
            let key = KernelKey::new(arch, probe.natural, op_type).with_provider(provider);
            if let Some(found) = self.try_create(probe, key, tensors) {
                return Ok(Some(found));
            }
        }

        if self.context.is_gpu_enabled() && matches!(node.device, None | Some(DeviceType::Gpu)) {
            let dtype = if probe.natural == DataType::F32 && self.context.is_gpu_fp16_enabled() {
                DataType::F16
            } else {
                probe.natural
            };
            let key = KernelKey::new(DeviceType::Gpu, dtype, op_type);
            if let Some(found) = self.try_create(probe, key, tensors) {
                return Ok(Some(found));
            }
        }

        if self.context.is_npu_enabled() && matches!(node.device, None | Some(DeviceType::Npu)) {
            let dtype = match probe.natural {
                DataType::F16 => DataType::F32,
                other => other,
            };
            let key = KernelKey::new(DeviceType::Npu, dtype, op_type);
            if let Some(found) = self.try_create(probe, key, tensors) {
                return Ok(Some(found));
            }
        }

        let fp16_allowed = matches!(prefer, None | Some(DataType::F16));
        let wants_fp16 = self.context.is_cpu_fp16_enabled() || probe.natural == DataType::F16;
        if fp16_allowed && wants_fp16 && probe.natural.is_float() {
            if let Some(found) = self.try_create_fp16(probe, tensors)? {
                return Ok(Some(found));
            }
            warn!(node = %node.name, op = op_type, "no float16 kernel, falling back to float32");
        }

        let dtype = match probe.natural {
            DataType::F16 => DataType::F32,
            other => other,
        };
        let key = KernelKey::new(DeviceType::Cpu, dtype, op_type);
        Ok(self.try_create(probe, key, tensors))
    }

    /// Provider names to probe: the node's own, then the context's.
    fn providers(&self, node: &Node) -> Vec<String> {
        let mut names: Vec<String> = node.provider.iter().cloned().collect();
        for provider in &self.context.providers {
            if !names.contains(&provider.provider) {
                names.push(provider.provider.clone());
            }
        }
        names
    }

    fn try_create(
        &self,
        probe: &mut Probe<'_>,
        key: KernelKey,
        tensors: &TensorArena,
    ) -> Option<(KernelKey, Box<dyn OpKernel>)> {
        probe.last_key = Some(key.clone());
        let creator = self.kernels.get(&key)?;
        let ctx = KernelCreateCtx {
            node: probe.node,
            key: &key,
            tensors,
            thread_num: probe.thread_num,
        };
        match creator(&ctx) {
            Ok(imp) => Some((key, imp)),
            Err(e) => {
                debug!(node = %probe.node.name, key = %key, error = %e, "kernel creator declined");
                None
            }
        }
    }

    /// Probe the CPU float16 kernel with float32 constant inputs converted to
    /// float16. The conversion is undone if no kernel is created.
    fn try_create_fp16(
        &self,
        probe: &mut Probe<'_>,
        tensors: &mut TensorArena,
    ) -> Result<Option<(KernelKey, Box<dyn OpKernel>)>> {
        let key = KernelKey::new(DeviceType::Cpu, DataType::F16, probe.node.op_type.as_str());
        if !self.kernels.contains(&key) {
            probe.last_key = Some(key);
            return Ok(None);
        }

        let swapped = self.cast_const_inputs(probe.node, tensors)?;
        match self.try_create(probe, key, tensors) {
            Some(found) => {
                debug!(node = probe.id, casted = swapped.len(), "constant inputs stored as float16");
                for (_, original) in swapped {
                    original.release();
                }
                Ok(Some(found))
            }
            None => {
                for (id, original) in swapped {
                    restore_f32(tensors.get_mut(id)?, original);
                }
                Ok(None)
            }
        }
    }

    fn cast_const_inputs(
        &self,
        node: &Node,
        tensors: &mut TensorArena,
    ) -> Result<Vec<(TensorId, TensorStorage)>> {
        let allocator = self.context.allocator();
        let mut swapped: Vec<(TensorId, TensorStorage)> = Vec::new();
        for &id in &node.inputs {
            if swapped.iter().any(|(done, _)| *done == id) {
                continue;
            }
            let tensor = tensors.get_mut(id)?;
            if !tensor.is_const() || tensor.dtype != DataType::F32 {
                continue;
            }
            match swap_to_f16(tensor, allocator) {
                Ok(original) => swapped.push((id, original)),
                Err(e) => {
                    for (done, original) in swapped {
                        restore_f32(tensors.get_mut(done)?, original);
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(swapped)
    }
}

/// Make tensor types agree with the precision of a CPU kernel.
fn propagate_types(key: &KernelKey, node: &Node, tensors: &mut TensorArena) -> Result<()> {
    if key.arch != DeviceType::Cpu || key.provider.is_some() {
        return Ok(());
    }
    match key.data_type {
        DataType::F16 => {
            if node.op_type == CAST_OP {
                return Ok(());
            }
            for &id in &node.outputs {
                let tensor = tensors.get_mut(id)?;
                if tensor.dtype == DataType::F32 {
                    tensor.dtype = DataType::F16;
                }
            }
        }
        DataType::F32 => {
            for &id in &node.inputs {
                let tensor = tensors.get_mut(id)?;
                if !tensor.is_const() && tensor.dtype == DataType::F16 {
                    tensor.dtype = DataType::F32;
                }
            }
            for &id in &node.outputs {
                let tensor = tensors.get_mut(id)?;
                if tensor.dtype == DataType::F16 {
                    tensor.dtype = DataType::F32;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Tensor, TensorCategory};

    fn tensor(dtype: DataType) -> Tensor {
        Tensor::new("t", dtype, vec![1].into(), TensorCategory::Normal)
    }

    #[test]
    fn test_natural_dtype_prefers_float() {
        let mut arena = TensorArena::new();
        let ids = arena.push(tensor(DataType::I64));
        let f16 = arena.push(tensor(DataType::F16));
        let mut node = Node::new("Gather");
        node.inputs = vec![ids, f16];
        assert_eq!(natural_dtype(&node, &arena), DataType::F16);

        node.inputs = vec![ids];
        assert_eq!(natural_dtype(&node, &arena), DataType::I64);

        node.inputs.clear();
        assert_eq!(natural_dtype(&node, &arena), DataType::F32);
    }

    #[test]
    fn test_fp32_kernel_restores_f16_tensors() {
        let mut arena = TensorArena::new();
        let x = arena.push(tensor(DataType::F16));
        let y = arena.push(tensor(DataType::F16));
        let mut node = Node::new("Relu");
        node.inputs = vec![x];
        node.outputs = vec![y];

        let key = KernelKey::new(DeviceType::Cpu, DataType::F32, "Relu");
        propagate_types(&key, &node, &mut arena).unwrap();
        assert_eq!(arena.get(x).unwrap().dtype, DataType::F32);
        assert_eq!(arena.get(y).unwrap().dtype, DataType::F32);

        let gpu = KernelKey::new(DeviceType::Gpu, DataType::F16, "Relu");
        arena.get_mut(y).unwrap().dtype = DataType::F32;
        propagate_types(&gpu, &node, &mut arena).unwrap();
        assert_eq!(arena.get(y).unwrap().dtype, DataType::F32);
    }
}
