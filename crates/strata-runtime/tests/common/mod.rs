//! Common test utilities for runtime tests.
//!
//! Mock kernels record the order they run in and do trivial float math so
//! tests can check both scheduling order and data flow.

#![allow(dead_code)]

use half::f16;
use std::sync::{Arc, Mutex};
use strata_core::{
    Allocator, Buffer, DataType, DefaultAllocator, DeviceType, Error, KernelCtx, KernelKey,
    OpKernel, Result, Tensor, TensorArena, TensorCategory, TensorId, TensorShape,
};
use strata_runtime::Kernel;

/// Shared log of kernel names in execution order.
pub type Recorder = Arc<Mutex<Vec<String>>>;

pub fn recorder() -> Recorder {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorded(log: &Recorder) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn cpu_allocator() -> (Arc<DefaultAllocator>, Arc<dyn Allocator>) {
    let concrete = Arc::new(DefaultAllocator::new("cpu"));
    let shared: Arc<dyn Allocator> = concrete.clone();
    (concrete, shared)
}

/// Graph input holding `values`, not owned by the tensor.
pub fn input_f32(arena: &mut TensorArena, name: &str, values: &[f32]) -> TensorId {
    let mut tensor = Tensor::new(
        name,
        DataType::F32,
        TensorShape::Static(vec![values.len()]),
        TensorCategory::Input,
    );
    tensor.set_data(Buffer::from_bytes(bytemuck::cast_slice(values)), false);
    arena.push(tensor)
}

/// Activation tensor without data.
pub fn activation(arena: &mut TensorArena, name: &str, len: usize) -> TensorId {
    arena.push(Tensor::new(
        name,
        DataType::F32,
        TensorShape::Static(vec![len]),
        TensorCategory::Normal,
    ))
}

/// Activation tensor flagged as a graph output.
pub fn graph_output(arena: &mut TensorArena, name: &str, len: usize) -> TensorId {
    let id = activation(arena, name, len);
    arena.get_mut(id).unwrap().set_graph_output(true);
    id
}

pub fn cpu_kernel(
    name: &str,
    op_type: &str,
    dtype: DataType,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    imp: impl OpKernel + 'static,
) -> Kernel {
    Kernel::new(
        name,
        KernelKey::new(DeviceType::Cpu, dtype, op_type),
        inputs,
        outputs,
        Box::new(imp),
    )
}

/// Adds one to its only input.
pub struct AddOne {
    pub log: Recorder,
}

impl OpKernel for AddOne {
    fn run(&mut self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        self.log.lock().unwrap().push(ctx.name.to_string());
        let values: Vec<f32> = ctx
            .input(0)?
            .as_slice::<f32>()?
            .iter()
            .map(|v| v + 1.0)
            .collect();
        ctx.output_mut(0)?
            .as_slice_mut::<f32>()?
            .copy_from_slice(&values);
        Ok(())
    }
}

/// Element-wise sum of all inputs.
pub struct Sum {
    pub log: Recorder,
}

impl OpKernel for Sum {
    fn run(&mut self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        self.log.lock().unwrap().push(ctx.name.to_string());
        let mut acc = vec![0.0f32; ctx.output(0)?.shape.element_count().unwrap_or(0)];
        for index in 0..ctx.inputs.len() {
            for (a, v) in acc.iter_mut().zip(ctx.input(index)?.as_slice::<f32>()?) {
                *a += v;
            }
        }
        ctx.output_mut(0)?.as_slice_mut::<f32>()?.copy_from_slice(&acc);
        Ok(())
    }
}

/// Always fails.
pub struct Failing {
    pub log: Recorder,
}

impl OpKernel for Failing {
    fn run(&mut self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        self.log.lock().unwrap().push(ctx.name.to_string());
        Err(Error::Kernel("boom".to_string()))
    }
}

/// float16 kernel doubling its input; records the input dtype it saw.
pub struct DoubleF16 {
    pub seen: Arc<Mutex<Vec<DataType>>>,
}

impl OpKernel for DoubleF16 {
    fn run(&mut self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        let input = ctx.input(0)?;
        self.seen.lock().unwrap().push(input.dtype);
        let values: Vec<f16> = input
            .as_slice::<f16>()?
            .iter()
            .map(|v| f16::from_f32(v.to_f32() * 2.0))
            .collect();
        ctx.output_mut(0)?
            .as_slice_mut::<f16>()?
            .copy_from_slice(&values);
        Ok(())
    }
}

/// float16 kernel summing the first value of every element of a list input.
pub struct ListHeadSumF16 {
    pub seen: Arc<Mutex<Vec<DataType>>>,
}

impl OpKernel for ListHeadSumF16 {
    fn run(&mut self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        let list = ctx
            .input(0)?
            .list
            .clone()
            .ok_or_else(|| Error::Kernel("expected a list input".to_string()))?;
        let mut sum = 0.0f32;
        for element in list.elements {
            let tensor = ctx.tensors.get(element)?;
            self.seen.lock().unwrap().push(tensor.dtype);
            sum += tensor.as_slice::<f16>()?[0].to_f32();
        }
        ctx.output_mut(0)?.as_slice_mut::<f16>()?[0] = f16::from_f32(sum);
        Ok(())
    }
}
