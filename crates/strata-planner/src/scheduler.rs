//! Scheduler turning an op graph into executable units.
//!
//! Scheduling runs in five steps:
//! 1. validate the graph and the context;
//! 2. infer shapes ([`crate::shape_inference`]);
//! 3. partition the graph when the context enables it ([`crate::partition`]);
//! 4. bind every node to a kernel ([`crate::kernel_select`]) and order the
//!    kernels topologically;
//! 5. group consecutive kernels of one execution type into subgraphs.

use crate::error::{Result, ScheduleError};
use crate::kernel_select::KernelSelector;
use crate::partition::SearchSubGraph;
use crate::shape_inference::{ShapePass, infer_graph};
use petgraph::Direction;
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use strata_core::{
    Allocator, Context, DataType, DeviceType, Graph, KernelKey, KernelRegistry, OperatorRegistry,
    TensorArena, TensorId,
};
use strata_runtime::{
    ExecUnit, Executable, Kernel, ScheduledModel, SubGraph, SubGraphKernel, SubGraphType,
};
use tracing::{debug, debug_span, info};

/// Schedules graphs against a fixed set of registries and a context.
pub struct Scheduler<'a> {
    operators: &'a OperatorRegistry,
    kernels: &'a KernelRegistry,
    context: &'a Context,
}

impl<'a> Scheduler<'a> {
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

    /// Schedule `graph` into an ordered list of execution units.
    ///
    /// The graph is modified in place: tensors receive inferred shapes and
    /// kernel-consistent types, and partitioning may move nodes into new
    /// sub-graphs.
    ///
    /// # Errors
    ///
    /// Configuration errors, shape function failures, missing kernels and
    /// dependency cycles are returned as [`ScheduleError`]s.
    #[tracing::instrument(skip_all, fields(nodes = graph.nodes.len(), tensors = graph.tensors.len()))]
    pub fn schedule(&self, graph: &mut Graph) -> Result<Vec<ExecUnit>> {
        self.context.validate()?;
        graph.validate()?;

        let output_nodes = graph.graph_output_nodes();

        let pass = {
            let _span = debug_span!("infer_shapes").entered();
            infer_graph(graph, self.operators)?
        };

        if self.context.enable_parallel {
            let _span = debug_span!("partition").entered();
            SearchSubGraph::new(graph, self.context, output_nodes).split()?;
        }

        let units = {
            let _span = debug_span!("select_kernels").entered();
            self.schedule_main(graph, &pass)?
        };
        let units = topological_order(units)?;

        let units = {
            let _span = debug_span!("construct_subgraphs").entered();
            self.construct_subgraphs(units, &graph.outputs, &graph.tensors)?
        };

        info!(
            units = units.len(),
            kernels = units.iter().map(|u| u.kernel_names().len()).sum::<usize>(),
            deferred = pass.deferred_count(),
            "scheduled graph"
        );
        Ok(units)
    }

    /// Schedule `graph` and package the result as a runnable model.
    pub fn build(&self, mut graph: Graph) -> Result<ScheduledModel> {
        let units = self.schedule(&mut graph)?;
        let Graph {
            tensors,
            inputs,
            outputs,
            ..
        } = graph;
        Ok(ScheduledModel::new(
            units,
            tensors,
            inputs,
            outputs,
            self.context.allocator().clone(),
        ))
    }

    fn selector(&self) -> KernelSelector<'_> {
        KernelSelector::new(self.operators, self.kernels, self.context)
    }

    /// One unit per main-graph node: a kernel, or a subgraph for `Partial`.
    fn schedule_main(&self, graph: &mut Graph, pass: &ShapePass) -> Result<Vec<ExecUnit>> {
        let selector = self.selector();
        let node_ids = graph.main()?.node_indices.clone();
        let mut units = Vec::with_capacity(node_ids.len());

        for id in node_ids {
            if let Some(index) = graph.node(id)?.partial_subgraph() {
                if let Some(subgraph) = self.schedule_partial(graph, index, pass)? {
                    units.push(ExecUnit::SubGraph(subgraph));
                }
                continue;
            }
            let Graph {
                nodes,
                tensors,
                outputs,
                ..
            } = &mut *graph;
            let kernel = selector.select(id, &nodes[id], tensors, outputs, None, pass.is_deferred(id))?;
            units.push(ExecUnit::Kernel(kernel));
        }
        Ok(units)
    }

    /// Schedule a `Partial` node's sub-graph as one subgraph unit. Its nodes
    /// are bound with float32 preference.
    fn schedule_partial(
        &self,
        graph: &mut Graph,
        index: usize,
        pass: &ShapePass,
    ) -> Result<Option<SubGraph>> {
        let def = graph
            .subgraphs
            .get(index)
            .cloned()
            .ok_or_else(|| ScheduleError::InvalidGraph(format!("sub-graph {index} does not exist")))?;

        let mut kernels = Vec::with_capacity(def.node_indices.len());
        self.collect_partial_kernels(graph, index, pass, &mut kernels)?;
        let kernels = topological_order(kernels)?;

        let Some(first) = kernels.first() else {
            debug!(subgraph = %def.name, "sub-graph has no nodes, skipped");
            return Ok(None);
        };
        let kind = first.subgraph_type();
        let allocator = self.subgraph_allocator(kind, first.key());

        let base = SubGraphKernel::new(
            format!("subgraph_{}", def.name),
            kind,
            kernels,
            def.input_indices,
            def.output_indices,
            allocator,
        );
        debug!(subgraph = %base, "scheduled partial sub-graph");
        Ok(Some(SubGraph::build(base, self.context.allocator().clone())))
    }

    /// Bind the nodes of sub-graph `index`, inlining nested `Partial` nodes.
    fn collect_partial_kernels(
        &self,
        graph: &mut Graph,
        index: usize,
        pass: &ShapePass,
        kernels: &mut Vec<Kernel>,
    ) -> Result<()> {
        let selector = self.selector();
        let node_ids = graph
            .subgraphs
            .get(index)
            .ok_or_else(|| ScheduleError::InvalidGraph(format!("sub-graph {index} does not exist")))?
            .node_indices
            .clone();

        for id in node_ids {
            if let Some(nested) = graph.node(id)?.partial_subgraph() {
                self.collect_partial_kernels(graph, nested, pass, kernels)?;
                continue;
            }
            let Graph {
                nodes,
                tensors,
                outputs,
                ..
            } = &mut *graph;
            kernels.push(selector.select(
                id,
                &nodes[id],
                tensors,
                outputs,
                Some(DataType::F32),
                pass.is_deferred(id),
            )?);
        }
        Ok(())
    }

    fn subgraph_allocator(&self, kind: SubGraphType, key: &KernelKey) -> Arc<dyn Allocator> {
        match kind {
            SubGraphType::CpuFp32 | SubGraphType::CpuFp16 => {
                self.context.allocator_for(DeviceType::Cpu)
            }
            SubGraphType::Gpu => self.context.allocator_for(DeviceType::Gpu),
            SubGraphType::Npu => self.context.allocator_for(DeviceType::Npu),
            SubGraphType::Custom => key
                .provider
                .as_deref()
                .and_then(|provider| self.context.provider_allocator(provider))
                .unwrap_or_else(|| self.context.allocator().clone()),
        }
    }

    /// Group consecutive kernels of one subgraph type (and provider) into
    /// subgraph units. Units that already are subgraphs pass through.
    fn construct_subgraphs(
        &self,
        units: Vec<ExecUnit>,
        graph_outputs: &[TensorId],
        tensors: &TensorArena,
    ) -> Result<Vec<ExecUnit>> {
        let mut consumers: HashMap<TensorId, Vec<usize>> = HashMap::new();
        for (position, unit) in units.iter().enumerate() {
            for &input in unit.inputs() {
                let list = consumers.entry(input).or_default();
                if list.last() != Some(&position) {
                    list.push(position);
                }
            }
        }

        let mut builder = GroupBuilder {
            scheduler: self,
            consumers,
            graph_outputs,
            tensors,
            counter: 0,
            result: Vec::with_capacity(units.len()),
        };
        let mut group: Vec<(usize, Kernel)> = Vec::new();

        for (position, unit) in units.into_iter().enumerate() {
            match unit {
                ExecUnit::Kernel(kernel) => {
                    let same = group
                        .first()
                        .is_none_or(|(_, open)| group_key(open) == group_key(&kernel));
                    if !same {
                        builder.close(std::mem::take(&mut group))?;
                    }
                    group.push((position, kernel));
                }
                ExecUnit::SubGraph(subgraph) => {
                    builder.close(std::mem::take(&mut group))?;
                    builder.result.push(ExecUnit::SubGraph(subgraph));
                }
            }
        }
        builder.close(group)?;
        Ok(builder.result)
    }
}

fn group_key(kernel: &Kernel) -> (SubGraphType, Option<&str>) {
    (kernel.subgraph_type(), kernel.key().provider.as_deref())
}

fn label(kind: SubGraphType) -> &'static str {
    match kind {
        SubGraphType::CpuFp32 => "cpu_fp32",
        SubGraphType::CpuFp16 => "cpu_fp16",
        SubGraphType::Gpu => "gpu",
        SubGraphType::Npu => "npu",
        SubGraphType::Custom => "custom",
    }
}

struct GroupBuilder<'s, 'a> {
    scheduler: &'s Scheduler<'a>,
    /// Consuming unit positions per tensor.
    consumers: HashMap<TensorId, Vec<usize>>,
    graph_outputs: &'s [TensorId],
    tensors: &'s TensorArena,
    counter: usize,
    result: Vec<ExecUnit>,
}

impl GroupBuilder<'_, '_> {
    fn close(&mut self, group: Vec<(usize, Kernel)>) -> Result<()> {
        let Some((_, first)) = group.first() else {
            return Ok(());
        };
        let kind = first.subgraph_type();
        let context = self.scheduler.context;

        if kind == SubGraphType::CpuFp32 && context.flatten_cpu_subgraphs {
            self.result
                .extend(group.into_iter().map(|(_, kernel)| ExecUnit::Kernel(kernel)));
            return Ok(());
        }

        let positions: HashSet<usize> = group.iter().map(|(position, _)| *position).collect();
        let mut produced: HashSet<TensorId> = HashSet::new();
        let mut inputs = Vec::new();
        for (_, kernel) in &group {
            for &input in kernel.inputs() {
                if produced.contains(&input) || inputs.contains(&input) {
                    continue;
                }
                if !self.tensors.get(input)?.is_const() {
                    inputs.push(input);
                }
            }
            produced.extend(kernel.outputs().iter().copied());
        }

        let mut outputs = Vec::new();
        for (_, kernel) in &group {
            for &output in kernel.outputs() {
                let read_outside = self
                    .consumers
                    .get(&output)
                    .is_some_and(|list| list.iter().any(|p| !positions.contains(p)));
                if (read_outside || self.graph_outputs.contains(&output)) && !outputs.contains(&output) {
                    outputs.push(output);
                }
            }
        }

        let name = format!("{}_subgraph_{}", label(kind), self.counter);
        self.counter += 1;
        let allocator = self.scheduler.subgraph_allocator(kind, first.key());
        let kernels = group.into_iter().map(|(_, kernel)| kernel).collect();

        let base = SubGraphKernel::new(name, kind, kernels, inputs, outputs, allocator);
        debug!(subgraph = %base, "constructed subgraph");
        self.result.push(ExecUnit::SubGraph(SubGraph::build(
            base,
            context.allocator().clone(),
        )));
        Ok(())
    }
}

/// Order units so every unit follows the producers of its inputs. Among
/// ready units the lowest original index goes first.
///
/// # Errors
///
/// Returns `ScheduleError::Cycle` naming the units on a dependency cycle.
pub fn topological_order<K: Executable>(units: Vec<K>) -> Result<Vec<K>> {
    let mut producer: HashMap<TensorId, usize> = HashMap::new();
    for (index, unit) in units.iter().enumerate() {
        for &output in unit.outputs() {
            producer.entry(output).or_insert(index);
        }
    }

    let mut dependencies: DiGraph<usize, ()> = DiGraph::with_capacity(units.len(), 0);
    let indices: Vec<NodeIndex> = (0..units.len()).map(|i| dependencies.add_node(i)).collect();
    for (consumer, unit) in units.iter().enumerate() {
        for input in unit.inputs() {
            if let Some(&source) = producer.get(input) {
                if source != consumer {
                    dependencies.update_edge(indices[source], indices[consumer], ());
                }
            }
        }
    }

    if is_cyclic_directed(&dependencies) {
        let names = tarjan_scc(&dependencies)
            .into_iter()
            .filter(|component| component.len() > 1)
            .flatten()
            .map(|index| units[dependencies[index]].name().to_string())
            .collect();
        return Err(ScheduleError::Cycle(names));
    }

    let mut in_degree: Vec<usize> = indices
        .iter()
        .map(|&index| {
            dependencies
                .neighbors_directed(index, Direction::Incoming)
                .count()
        })
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| Reverse(index))
        .collect();

    let mut order = Vec::with_capacity(units.len());
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for next in dependencies.neighbors_directed(indices[index], Direction::Outgoing) {
            let next = dependencies[next];
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    let mut slots: Vec<Option<K>> = units.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect())
}
