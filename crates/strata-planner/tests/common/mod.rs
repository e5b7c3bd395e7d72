//! Common test utilities for planner tests.
//!
//! Graphs are built from a handful of mock ops:
//! - `Inc` adds one to every element;
//! - `Sum` adds its inputs element-wise;
//! - `Conv2D` broadcasts the first input element to an NHWC output whose
//!   channel count comes from the weight;
//! - `NonZero` keeps the non-zero elements, so its output shape is only
//!   known once its input holds data.

#![allow(dead_code)]

use half::f16;
use std::sync::{Arc, Mutex};
use strata_core::{
    DataType, DeviceType, Error, Graph, InferCtx, InferOutcome, KernelCtx, KernelKey,
    KernelRegistry, Node, NodeId, OpKernel, Operator, OperatorRegistry, Result, Tensor,
    TensorCategory, TensorId, TensorShape,
};

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

// ---------------------------------------------------------------------------
// Shape functions
// ---------------------------------------------------------------------------

/// Output shape equals the first input's shape.
pub struct SameShape(pub &'static str);

impl Operator for SameShape {
    fn name(&self) -> &str {
        self.0
    }

    fn infer_shapes(&self, ctx: &InferCtx<'_>) -> Result<InferOutcome> {
        match ctx.input_shape(0)? {
            Some(dims) => Ok(InferOutcome::Inferred(vec![TensorShape::Static(
                dims.to_vec(),
            )])),
            None => Ok(InferOutcome::Deferred),
        }
    }
}

/// NHWC convolution with stride one and same padding.
pub struct Conv2DShape;

impl Operator for Conv2DShape {
    fn name(&self) -> &str {
        "Conv2D"
    }

    fn infer_shapes(&self, ctx: &InferCtx<'_>) -> Result<InferOutcome> {
        let (Some(input), Some(weight)) = (ctx.input_shape(0)?, ctx.input_shape(1)?) else {
            return Ok(InferOutcome::Deferred);
        };
        let [n, h, w, _] = input else {
            return Err(Error::Shape(format!("'{}' expects an NHWC input", ctx.node_name)));
        };
        let out_channels = weight.first().copied().unwrap_or(0);
        Ok(InferOutcome::Inferred(vec![TensorShape::Static(vec![
            *n,
            *h,
            *w,
            out_channels,
        ])]))
    }
}

/// Shape depends on the number of non-zero input values.
pub struct NonZeroShape;

impl Operator for NonZeroShape {
    fn name(&self) -> &str {
        "NonZero"
    }

    fn infer_shapes(&self, ctx: &InferCtx<'_>) -> Result<InferOutcome> {
        let input = ctx.input(0)?;
        if !input.has_data() {
            return Ok(InferOutcome::Deferred);
        }
        let count = input.as_slice::<f32>()?.iter().filter(|v| **v != 0.0).count();
        Ok(InferOutcome::Inferred(vec![TensorShape::Static(vec![count])]))
    }
}

pub fn operators() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();
    registry
        .register("Inc", SameShape("Inc"))
        .register("Sum", SameShape("Sum"))
        .register("Conv2D", Conv2DShape)
        .register("NonZero", NonZeroShape);
    registry
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

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

/// float16 variant of [`AddOne`].
pub struct AddOneF16 {
    pub log: Recorder,
}

impl OpKernel for AddOneF16 {
    fn run(&mut self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        self.log.lock().unwrap().push(ctx.name.to_string());
        let values: Vec<f16> = ctx
            .input(0)?
            .as_slice::<f16>()?
            .iter()
            .map(|v| f16::from_f32(v.to_f32() + 1.0))
            .collect();
        ctx.output_mut(0)?
            .as_slice_mut::<f16>()?
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

/// Fills the output with the first element of the first input.
pub struct Broadcast {
    pub log: Recorder,
}

impl OpKernel for Broadcast {
    fn run(&mut self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        self.log.lock().unwrap().push(ctx.name.to_string());
        let first = ctx
            .input(0)?
            .as_slice::<f32>()?
            .first()
            .copied()
            .unwrap_or_default();
        ctx.output_mut(0)?.as_slice_mut::<f32>()?.fill(first);
        Ok(())
    }
}

/// Keeps the non-zero input values.
pub struct NonZero {
    pub log: Recorder,
}

impl OpKernel for NonZero {
    fn run(&mut self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        self.log.lock().unwrap().push(ctx.name.to_string());
        let values: Vec<f32> = ctx
            .input(0)?
            .as_slice::<f32>()?
            .iter()
            .copied()
            .filter(|v| *v != 0.0)
            .collect();
        ctx.output_mut(0)?
            .as_slice_mut::<f32>()?
            .copy_from_slice(&values);
        Ok(())
    }
}

/// Register the mock kernel matching `key`'s op type and data type.
pub fn register(registry: &mut KernelRegistry, key: KernelKey, log: &Recorder) {
    let log = log.clone();
    let op = key.op_type.clone();
    let dtype = key.data_type;
    registry.register(key, move |_ctx| -> Result<Box<dyn OpKernel>> {
        let log = log.clone();
        let kernel: Box<dyn OpKernel> = match (op.as_str(), dtype) {
            ("Inc", DataType::F16) => Box::new(AddOneF16 { log }),
            ("Inc", _) => Box::new(AddOne { log }),
            ("Sum", _) => Box::new(Sum { log }),
            ("Conv2D", _) => Box::new(Broadcast { log }),
            ("NonZero", _) => Box::new(NonZero { log }),
            (other, _) => return Err(Error::Unsupported(other.to_string())),
        };
        Ok(kernel)
    });
}

/// Every mock op as a CPU float32 kernel.
pub fn cpu_kernels(log: &Recorder) -> KernelRegistry {
    let mut registry = KernelRegistry::new();
    for op in ["Inc", "Sum", "Conv2D", "NonZero"] {
        register(
            &mut registry,
            KernelKey::new(DeviceType::Cpu, DataType::F32, op),
            log,
        );
    }
    registry
}

// ---------------------------------------------------------------------------
// Graph builders
// ---------------------------------------------------------------------------

pub fn activation(graph: &mut Graph, name: &str, dims: &[usize]) -> TensorId {
    graph.add_tensor(Tensor::new(
        name,
        DataType::F32,
        dims.into(),
        TensorCategory::Normal,
    ))
}

pub fn input(graph: &mut Graph, name: &str, dims: &[usize]) -> TensorId {
    let id = activation(graph, name, dims);
    graph.add_input(id).unwrap();
    id
}

pub fn output(graph: &mut Graph, name: &str, dims: &[usize]) -> TensorId {
    let id = activation(graph, name, dims);
    graph.add_output(id).unwrap();
    id
}

/// Constant float32 tensor filled with `value`.
pub fn weight(graph: &mut Graph, name: &str, dims: &[usize], value: f32) -> TensorId {
    let values = vec![value; dims.iter().product()];
    graph.add_tensor(Tensor::constant(name, DataType::F32, dims, &values))
}

pub fn node(
    graph: &mut Graph,
    name: &str,
    op: &str,
    inputs: &[TensorId],
    outputs: &[TensorId],
) -> NodeId {
    let mut node = Node::new(op);
    node.name = name.to_string();
    node.inputs = inputs.to_vec();
    node.outputs = outputs.to_vec();
    graph.add_node(node)
}

/// `x -> A -> B -> C -> D -> out`, every op `Inc` on two elements.
pub fn inc_chain() -> Graph {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2]);
    let t0 = activation(&mut graph, "t0", &[2]);
    let t1 = activation(&mut graph, "t1", &[2]);
    let t2 = activation(&mut graph, "t2", &[2]);
    let out = output(&mut graph, "out", &[2]);
    node(&mut graph, "A", "Inc", &[x], &[t0]);
    node(&mut graph, "B", "Inc", &[t0], &[t1]);
    node(&mut graph, "C", "Inc", &[t1], &[t2]);
    node(&mut graph, "D", "Inc", &[t2], &[out]);
    graph
}

/// Two convolution heads sharing a trunk:
///
/// ```text
/// x -> inc0 -> inc1 -+-> convA (10 channels) -> a
///                    +-> convB (90 channels) -> b
/// ```
pub fn two_heads(channels_a: usize, channels_b: usize) -> Graph {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[1, 1, 1, 1]);
    let r0 = activation(&mut graph, "r0", &[1, 1, 1, 1]);
    let r1 = activation(&mut graph, "r1", &[1, 1, 1, 1]);
    let wa = weight(&mut graph, "wa", &[channels_a, 1, 1, 1], 1.0);
    let wb = weight(&mut graph, "wb", &[channels_b, 1, 1, 1], 1.0);
    let a = output(&mut graph, "a", &[1, 1, 1, channels_a]);
    let b = output(&mut graph, "b", &[1, 1, 1, channels_b]);
    node(&mut graph, "inc0", "Inc", &[x], &[r0]);
    node(&mut graph, "inc1", "Inc", &[r0], &[r1]);
    node(&mut graph, "convA", "Conv2D", &[r1, wa], &[a]);
    node(&mut graph, "convB", "Conv2D", &[r1, wb], &[b]);
    graph
}

/// Two branches joined by a `Sum`:
///
/// ```text
/// x -> inc0 -+-> branchA -> incA -+-> sum -> out
///            +-> branchB -> incB -+
/// ```
///
/// Branch ops are `Conv2D` with ten output channels, or `Inc` when
/// `with_conv` is false.
pub fn diamond(with_conv: bool) -> Graph {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[1, 1, 1, 1]);
    let r = activation(&mut graph, "r", &[1, 1, 1, 1]);
    let width = if with_conv { 10 } else { 1 };
    let a = activation(&mut graph, "a", &[1, 1, 1, width]);
    let a2 = activation(&mut graph, "a2", &[1, 1, 1, width]);
    let b = activation(&mut graph, "b", &[1, 1, 1, width]);
    let b2 = activation(&mut graph, "b2", &[1, 1, 1, width]);
    let out = output(&mut graph, "out", &[1, 1, 1, width]);

    node(&mut graph, "inc0", "Inc", &[x], &[r]);
    if with_conv {
        let wa = weight(&mut graph, "wa", &[10, 1, 1, 1], 1.0);
        let wb = weight(&mut graph, "wb", &[10, 1, 1, 1], 1.0);
        node(&mut graph, "convA", "Conv2D", &[r, wa], &[a]);
        node(&mut graph, "incA", "Inc", &[a], &[a2]);
        node(&mut graph, "convB", "Conv2D", &[r, wb], &[b]);
        node(&mut graph, "incB", "Inc", &[b], &[b2]);
    } else {
        node(&mut graph, "branchA", "Inc", &[r], &[a]);
        node(&mut graph, "incA", "Inc", &[a], &[a2]);
        node(&mut graph, "branchB", "Inc", &[r], &[b]);
        node(&mut graph, "incB", "Inc", &[b], &[b2]);
    }
    node(&mut graph, "sum", "Sum", &[a2, b2], &[out]);
    graph
}

/// Names of the nodes of sub-graph `index`, in stored order.
pub fn subgraph_node_names(graph: &Graph, index: usize) -> Vec<String> {
    graph.subgraphs[index]
        .node_indices
        .iter()
        .map(|&id| graph.nodes[id].name.clone())
        .collect()
}

pub fn node_by_name<'g>(graph: &'g Graph, name: &str) -> &'g Node {
    graph
        .nodes
        .iter()
        .find(|n| n.name == name)
        .unwrap_or_else(|| panic!("no node named {name}"))
}
