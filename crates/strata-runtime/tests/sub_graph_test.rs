//! Subgraph lifecycle and float16 boundary tests.

mod common;

use common::*;
use std::sync::{Arc, Mutex};
use strata_core::{
    Allocator, DataType, DefaultAllocator, DeviceType, KernelKey, Tensor, TensorArena,
    TensorCategory,
};
use strata_runtime::{
    Executable, Kernel, RuntimeError, SubGraph, SubGraphKernel, SubGraphState, SubGraphType,
};

fn fp16_double(arena: &mut TensorArena, seen: &Arc<Mutex<Vec<DataType>>>) -> (SubGraph, usize, usize) {
    let (_, allocator) = cpu_allocator();
    let x = input_f32(arena, "x", &[1.0, 0.5, -2.0]);
    let y = graph_output(arena, "y", 3);
    let kernel = cpu_kernel(
        "double",
        "Double",
        DataType::F16,
        vec![x],
        vec![y],
        DoubleF16 { seen: seen.clone() },
    );
    let base = SubGraphKernel::new(
        "cpu_fp16",
        SubGraphType::CpuFp16,
        vec![kernel],
        vec![x],
        vec![y],
        allocator.clone(),
    );
    (SubGraph::build(base, allocator), x, y)
}

#[test]
fn test_fp16_subgraph_restores_inputs() {
    init_tracing();
    let (_, allocator) = cpu_allocator();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut arena = TensorArena::new();
    let (mut sub, x, y) = fp16_double(&mut arena, &seen);
    let ptr = arena.get(x).unwrap().data_ptr();

    sub.prepare(&mut arena).unwrap();
    assert_eq!(arena.get(y).unwrap().dtype, DataType::F16);

    sub.execute(&mut arena, &allocator).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![DataType::F16]);
    let input = arena.get(x).unwrap();
    assert_eq!(input.dtype, DataType::F32);
    assert_eq!(input.data_ptr(), ptr);
    assert!(!input.own_data());
    assert_eq!(input.to_vec::<f32>().unwrap(), vec![1.0, 0.5, -2.0]);

    let output = arena.get(y).unwrap();
    assert_eq!(output.dtype, DataType::F32);
    assert_eq!(output.to_vec::<f32>().unwrap(), vec![2.0, 1.0, -4.0]);

    match &sub {
        SubGraph::CpuFp16(fp16) => assert_eq!(fp16.swapped_inputs(), 0),
        other => panic!("expected a float16 subgraph, got {other}"),
    }
}

#[test]
fn test_fp16_subgraph_restores_inputs_on_failure() {
    let (_, allocator) = cpu_allocator();
    let log = recorder();
    let mut arena = TensorArena::new();
    let x = input_f32(&mut arena, "x", &[3.0]);
    let y = graph_output(&mut arena, "y", 1);
    let ptr = arena.get(x).unwrap().data_ptr();
    let kernel = cpu_kernel("bad", "Fail", DataType::F16, vec![x], vec![y], Failing { log });
    let base = SubGraphKernel::new(
        "cpu_fp16",
        SubGraphType::CpuFp16,
        vec![kernel],
        vec![x],
        vec![y],
        allocator.clone(),
    );
    let mut sub = SubGraph::build(base, allocator.clone());
    sub.prepare(&mut arena).unwrap();

    let err = sub.execute(&mut arena, &allocator).unwrap_err();
    assert_eq!(err.failing_kernel(), Some("bad"));

    let input = arena.get(x).unwrap();
    assert_eq!(input.dtype, DataType::F32);
    assert_eq!(input.data_ptr(), ptr);
    assert_eq!(sub.state(), SubGraphState::Prepared);
}

#[test]
fn test_fp16_subgraph_converts_list_elements() {
    let (_, allocator) = cpu_allocator();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut arena = TensorArena::new();
    let a = input_f32(&mut arena, "a", &[1.5]);
    let b = input_f32(&mut arena, "b", &[2.5]);
    let list = arena.push(Tensor::list(
        "pair",
        DataType::F32,
        vec![a, b],
        TensorCategory::Input,
    ));
    let out = graph_output(&mut arena, "sum", 1);
    let ptr_a = arena.get(a).unwrap().data_ptr();

    let kernel = cpu_kernel(
        "head_sum",
        "ListHeadSum",
        DataType::F16,
        vec![list],
        vec![out],
        ListHeadSumF16 { seen: seen.clone() },
    );
    let base = SubGraphKernel::new(
        "cpu_fp16",
        SubGraphType::CpuFp16,
        vec![kernel],
        vec![list],
        vec![out],
        allocator.clone(),
    );
    let mut sub = SubGraph::build(base, allocator.clone());
    sub.prepare(&mut arena).unwrap();
    sub.execute(&mut arena, &allocator).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![DataType::F16, DataType::F16]);
    assert_eq!(
        arena.get(list).unwrap().list.as_ref().unwrap().element_dtype,
        DataType::F32
    );
    assert_eq!(arena.get(a).unwrap().dtype, DataType::F32);
    assert_eq!(arena.get(a).unwrap().data_ptr(), ptr_a);
    assert_eq!(arena.get(out).unwrap().to_vec::<f32>().unwrap(), vec![4.0]);
}

#[test]
fn test_run_before_prepare_is_invalid() {
    let (_, allocator) = cpu_allocator();
    let log = recorder();
    let mut arena = TensorArena::new();
    let x = input_f32(&mut arena, "x", &[1.0]);
    let y = graph_output(&mut arena, "y", 1);
    let kernel = Kernel::new(
        "gpu_add",
        KernelKey::new(DeviceType::Gpu, DataType::F32, "AddOne"),
        vec![x],
        vec![y],
        Box::new(AddOne { log: log.clone() }),
    );
    let base = SubGraphKernel::new("gpu", SubGraphType::Gpu, vec![kernel], vec![x], vec![y], allocator.clone());
    let mut sub = SubGraph::build(base, allocator.clone());
    assert!(matches!(sub, SubGraph::Generic(_)));
    assert_eq!(sub.state(), SubGraphState::Constructed);

    let err = sub.execute(&mut arena, &allocator).unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidState(_)));
    assert!(recorded(&log).is_empty());

    sub.prepare(&mut arena).unwrap();
    sub.execute(&mut arena, &allocator).unwrap();
    assert_eq!(recorded(&log), vec!["gpu_add"]);
}

#[test]
fn test_cpu_subgraph_outputs_use_subgraph_allocator() {
    let (_, context) = cpu_allocator();
    let pool: Arc<dyn Allocator> = Arc::new(DefaultAllocator::new("pool"));
    let log = recorder();
    let mut arena = TensorArena::new();
    let x = input_f32(&mut arena, "x", &[1.0]);
    let t = activation(&mut arena, "t", 1);
    let y = graph_output(&mut arena, "y", 1);
    let kernels = vec![
        cpu_kernel("a", "AddOne", DataType::F32, vec![x], vec![t], AddOne { log: log.clone() }),
        cpu_kernel("b", "AddOne", DataType::F32, vec![t], vec![y], AddOne { log: log.clone() }),
    ];
    let base = SubGraphKernel::new("cpu", SubGraphType::CpuFp32, kernels, vec![x], vec![y], pool);
    let mut sub = SubGraph::build(base, context.clone());
    assert!(matches!(sub, SubGraph::Cpu(_)));

    sub.prepare(&mut arena).unwrap();
    assert_eq!(arena.get(y).unwrap().allocator().unwrap().name(), "pool");

    sub.execute(&mut arena, &context).unwrap();
    assert_eq!(arena.get(y).unwrap().to_vec::<f32>().unwrap(), vec![3.0]);
    assert_eq!(sub.to_string(), "cpu [CpuFp32]: a b");
}

#[test]
fn test_custom_subgraph_runs_in_order_with_provider_allocator() {
    let (_, context) = cpu_allocator();
    let provider: Arc<dyn Allocator> = Arc::new(DefaultAllocator::new("acme"));
    let log = recorder();
    let mut arena = TensorArena::new();
    let x = input_f32(&mut arena, "x", &[0.0]);
    let t = activation(&mut arena, "t", 1);
    let y = graph_output(&mut arena, "y", 1);
    let key = KernelKey::new(DeviceType::Cpu, DataType::F32, "AddOne").with_provider("acme");
    let kernels = vec![
        Kernel::new("first", key.clone(), vec![x], vec![t], Box::new(AddOne { log: log.clone() })),
        Kernel::new("second", key, vec![t], vec![y], Box::new(AddOne { log: log.clone() })),
    ];
    let base = SubGraphKernel::new("custom", SubGraphType::Custom, kernels, vec![x], vec![y], provider);
    let mut sub = SubGraph::build(base, context.clone());

    sub.prepare(&mut arena).unwrap();
    assert_eq!(arena.get(t).unwrap().allocator().unwrap().name(), "acme");
    assert_eq!(arena.get(y).unwrap().allocator().unwrap().name(), "cpu");

    sub.execute(&mut arena, &context).unwrap();
    assert_eq!(recorded(&log), vec!["first", "second"]);
    assert_eq!(arena.get(y).unwrap().to_vec::<f32>().unwrap(), vec![2.0]);

    let names: Vec<&str> = sub.nodes().iter().map(|k| k.name()).collect();
    assert_eq!(names, vec!["first", "second"]);
}

#[test]
fn test_in_and_out_nodes() {
    let (_, allocator) = cpu_allocator();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut arena = TensorArena::new();
    let (sub, _, _) = fp16_double(&mut arena, &seen);
    let base = sub.base();

    assert_eq!(base.in_nodes().map(|k| k.name()).collect::<Vec<_>>(), vec!["double"]);
    assert_eq!(base.out_nodes().map(|k| k.name()).collect::<Vec<_>>(), vec!["double"]);
    assert_eq!(base.allocator().name(), allocator.name());
}
