//! Schedule-time shape inference.
//!
//! Nodes are inferred in declaration order. A `Partial` node is inferred by
//! walking the sub-graph it references. When a shape function reports that
//! its outputs depend on run-time data, the pass switches to
//! [`InferState::Deferred`] for good: every later node gets unknown output
//! shapes and is re-inferred by its kernel right before it runs.

use crate::error::{Result, ScheduleError};
use std::collections::HashSet;
use strata_core::{Graph, InferStatus, NodeId, OperatorRegistry, TensorShape, run_shape_inference};
use tracing::{debug, info};

/// Whether shapes can still be inferred eagerly in the current pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InferState {
    #[default]
    Eager,
    /// Deferred since `since`, the first node that could not be inferred.
    Deferred { since: NodeId },
}

impl InferState {
    pub fn is_deferred(&self) -> bool {
        matches!(self, InferState::Deferred { .. })
    }

    /// Switch to deferred. Once deferred the state never changes back.
    fn defer(&mut self, node: NodeId) {
        if *self == InferState::Eager {
            *self = InferState::Deferred { since: node };
        }
    }
}

/// Outcome of one inference pass.
#[derive(Debug, Default)]
pub struct ShapePass {
    state: InferState,
    deferred: HashSet<NodeId>,
}

impl ShapePass {
    pub fn state(&self) -> InferState {
        self.state
    }

    /// Whether `node` must infer its shapes at run time.
    pub fn is_deferred(&self, node: NodeId) -> bool {
        self.deferred.contains(&node)
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    fn mark_deferred(&mut self, node: NodeId) {
        self.state.defer(node);
        self.deferred.insert(node);
    }
}

/// Infer output shapes of every node reachable from the main graph.
///
/// # Errors
///
/// Returns `ScheduleError::MissingShapeFunction` for an op type without a
/// registered shape function, `ScheduleError::InferShape` when a shape
/// function fails, and `ScheduleError::InvalidGraph` when `Partial` nodes
/// reference their own enclosing sub-graphs.
pub fn infer_graph(graph: &mut Graph, operators: &OperatorRegistry) -> Result<ShapePass> {
    let mut pass = ShapePass::default();
    let mut stack = Vec::new();
    infer_subgraph(graph, 0, operators, &mut pass, &mut stack)?;
    debug!(
        state = ?pass.state,
        deferred = pass.deferred.len(),
        "shape inference finished"
    );
    Ok(pass)
}

fn infer_subgraph(
    graph: &mut Graph,
    index: usize,
    operators: &OperatorRegistry,
    pass: &mut ShapePass,
    stack: &mut Vec<usize>,
) -> Result<()> {
    if stack.contains(&index) {
        return Err(ScheduleError::InvalidGraph(format!(
            "sub-graph {index} is referenced from inside itself"
        )));
    }
    let node_ids = graph
        .subgraphs
        .get(index)
        .ok_or_else(|| ScheduleError::InvalidGraph(format!("sub-graph {index} does not exist")))?
        .node_indices
        .clone();

    stack.push(index);
    for id in node_ids {
        let node = graph.node(id)?;
        if let Some(subgraph) = node.partial_subgraph() {
            infer_subgraph(graph, subgraph, operators, pass, stack)?;
            continue;
        }

        let operator = operators
            .get(&node.op_type)
            .cloned()
            .ok_or_else(|| ScheduleError::MissingShapeFunction(node.op_type.clone()))?;

        let Graph { nodes, tensors, .. } = &mut *graph;
        let node = &nodes[id];

        if pass.state.is_deferred() {
            for &output in &node.outputs {
                tensors.get_mut(output)?.shape = TensorShape::Unknown;
            }
            pass.mark_deferred(id);
            continue;
        }

        let status = run_shape_inference(
            operator.as_ref(),
            &node.name,
            &node.attributes,
            &node.inputs,
            &node.outputs,
            tensors,
        )
        .map_err(|e| ScheduleError::InferShape {
            node: node.name.clone(),
            reason: e.to_string(),
        })?;

        if status == InferStatus::Deferred {
            info!(node = %node.name, op = %node.op_type, "output shape depends on run-time data, deferring inference");
            pass.mark_deferred(id);
        }
    }
    stack.pop();
    Ok(())
}
