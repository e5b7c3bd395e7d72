//! Op-level dataflow graph consumed by the scheduler.
//!
//! A [`Graph`] owns a flat node list, a flat [`TensorArena`] and a list of
//! [`SubgraphDef`]s. `subgraphs[0]` is the main graph; the partitioner moves
//! nodes out of it into new sub-graphs and leaves a `Partial` node behind
//! that references the new sub-graph by index.

use crate::tensor::{Tensor, TensorArena, TensorId};
use crate::types::{AttributeValue, DeviceType, TensorCategory};
use crate::{Error, Result};
use std::collections::HashMap;

/// Index of a node in [`Graph::nodes`].
pub type NodeId = usize;

/// Op type of indirection nodes that stand in for a whole sub-graph.
pub const PARTIAL_OP: &str = "Partial";

/// Attribute of a `Partial` node naming the referenced sub-graph.
pub const SUBGRAPH_INDEX_ATTR: &str = "subgraph_index";

/// A node (operation) in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Node name.
    pub name: String,

    /// Operation type (e.g., "Conv2D", "Add").
    pub op_type: String,

    /// Input tensor ids.
    pub inputs: Vec<TensorId>,

    /// Output tensor ids.
    pub outputs: Vec<TensorId>,

    /// Node attributes.
    pub attributes: HashMap<String, AttributeValue>,

    /// Device tag. `None` until the partitioner (or the model) assigns one.
    pub device: Option<DeviceType>,

    /// Thread count assigned by the partitioner.
    pub thread_num: Option<usize>,

    /// Kernel provider for custom kernels.
    pub provider: Option<String>,
}

impl Node {
    /// Create a new node.
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: HashMap::new(),
            device: None,
            thread_num: None,
            provider: None,
        }
    }

    /// Create a `Partial` node that runs sub-graph `subgraph_index`.
    pub fn partial(
        name: impl Into<String>,
        subgraph_index: usize,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> Self {
        let mut node = Self::new(PARTIAL_OP);
        node.name = name.into();
        node.inputs = inputs;
        node.outputs = outputs;
        node.attributes.insert(
            SUBGRAPH_INDEX_ATTR.to_string(),
            AttributeValue::Int(subgraph_index as i64),
        );
        node
    }

    /// Sub-graph referenced by a `Partial` node.
    pub fn partial_subgraph(&self) -> Option<usize> {
        if self.op_type != PARTIAL_OP {
            return None;
        }
        self.attributes
            .get(SUBGRAPH_INDEX_ATTR)
            .and_then(AttributeValue::as_int)
            .and_then(|i| usize::try_from(i).ok())
    }

    pub fn is_partial(&self) -> bool {
        self.op_type == PARTIAL_OP
    }

    /// Get an attribute value.
    pub fn attr<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<AttributeValue>,
        T::Error: std::fmt::Display,
    {
        let value = self
            .attributes
            .get(name)
            .ok_or_else(|| Error::Attribute(format!("'{}' missing on '{}'", name, self.name)))?;

        T::try_from(value.clone())
            .map_err(|e| Error::Attribute(format!("'{}' on '{}': {}", name, self.name, e)))
    }

    /// Check if an attribute exists.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

impl TryFrom<AttributeValue> for i64 {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Int(v) => Ok(v),
            _ => Err("Not an int".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for f32 {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Float(v) => Ok(v),
            _ => Err("Not a float".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for Vec<i64> {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Ints(v) => Ok(v),
            _ => Err("Not an int array".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for String {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::String(v) => Ok(v),
            _ => Err("Not a string".to_string()),
        }
    }
}

/// A named list of nodes with declared boundary tensors.
#[derive(Debug, Clone, Default)]
pub struct SubgraphDef {
    pub name: String,
    pub node_indices: Vec<NodeId>,
    pub input_indices: Vec<TensorId>,
    pub output_indices: Vec<TensorId>,
}

/// Op graph: nodes, tensors and sub-graph membership.
#[derive(Debug)]
pub struct Graph {
    /// All nodes, addressed by [`NodeId`].
    pub nodes: Vec<Node>,

    /// All tensors, addressed by [`TensorId`].
    pub tensors: TensorArena,

    /// Sub-graphs. Index 0 is the main graph.
    pub subgraphs: Vec<SubgraphDef>,

    /// Graph input tensors, supplied before each run.
    pub inputs: Vec<TensorId>,

    /// Graph output tensors, retained after each run.
    pub outputs: Vec<TensorId>,
}

impl Graph {
    /// Create an empty graph with an empty main sub-graph.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            tensors: TensorArena::new(),
            subgraphs: vec![SubgraphDef {
                name: "main".to_string(),
                ..Default::default()
            }],
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add a tensor and return its id.
    pub fn add_tensor(&mut self, tensor: Tensor) -> TensorId {
        self.tensors.push(tensor)
    }

    /// Add a node to the main graph and return its id.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        if let Some(main) = self.subgraphs.first_mut() {
            main.node_indices.push(id);
        }
        id
    }

    /// Declare a tensor as a graph input.
    pub fn add_input(&mut self, id: TensorId) -> Result<()> {
        self.tensors.get_mut(id)?.category = TensorCategory::Input;
        self.inputs.push(id);
        if let Some(main) = self.subgraphs.first_mut() {
            main.input_indices.push(id);
        }
        Ok(())
    }

    /// Declare a tensor as a graph output.
    pub fn add_output(&mut self, id: TensorId) -> Result<()> {
        self.tensors.get_mut(id)?.set_graph_output(true);
        self.outputs.push(id);
        if let Some(main) = self.subgraphs.first_mut() {
            main.output_indices.push(id);
        }
        Ok(())
    }

    /// Get a node by id.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::InvalidGraph(format!("node id {id} out of range")))
    }

    /// Get the main graph.
    pub fn main(&self) -> Result<&SubgraphDef> {
        self.subgraphs
            .first()
            .ok_or_else(|| Error::InvalidGraph("graph has no main sub-graph".to_string()))
    }

    /// Nodes producing `tensor`, in node order.
    pub fn producers(&self, tensor: TensorId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.outputs.contains(&tensor))
            .map(|(id, _)| id)
            .collect()
    }

    /// Nodes consuming `tensor`, in node order.
    pub fn consumers(&self, tensor: TensorId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.inputs.contains(&tensor))
            .map(|(id, _)| id)
            .collect()
    }

    /// Nodes of the main graph that produce a declared graph output.
    pub fn graph_output_nodes(&self) -> Vec<NodeId> {
        let Some(main) = self.subgraphs.first() else {
            return Vec::new();
        };
        main.node_indices
            .iter()
            .copied()
            .filter(|&id| {
                self.nodes[id]
                    .outputs
                    .iter()
                    .any(|t| self.outputs.contains(t))
            })
            .collect()
    }

    /// Validate graph structure.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidGraph` if a tensor or node index is out of range,
    /// a `Partial` node references a missing sub-graph, or a tensor has more
    /// than one producer across all sub-graphs. `Partial` nodes forward the
    /// outputs of their sub-graph and do not count as producers.
    pub fn validate(&self) -> Result<()> {
        if self.subgraphs.is_empty() {
            return Err(Error::InvalidGraph(
                "graph has no main sub-graph".to_string(),
            ));
        }

        for &id in self.inputs.iter().chain(&self.outputs) {
            if !self.tensors.contains(id) {
                return Err(Error::InvalidGraph(format!(
                    "graph boundary tensor {id} does not exist"
                )));
            }
        }

        for node in &self.nodes {
            for &id in node.inputs.iter().chain(&node.outputs) {
                if !self.tensors.contains(id) {
                    return Err(Error::InvalidGraph(format!(
                        "node '{}' references missing tensor {}",
                        node.name, id
                    )));
                }
            }
            if node.is_partial() {
                match node.partial_subgraph() {
                    Some(index) if index < self.subgraphs.len() => {}
                    _ => {
                        return Err(Error::InvalidGraph(format!(
                            "partial node '{}' references a missing sub-graph",
                            node.name
                        )));
                    }
                }
            }
        }

        let mut producer: HashMap<TensorId, NodeId> = HashMap::new();
        for subgraph in &self.subgraphs {
            for &node_id in &subgraph.node_indices {
                let node = self.nodes.get(node_id).ok_or_else(|| {
                    Error::InvalidGraph(format!(
                        "sub-graph '{}' references missing node {}",
                        subgraph.name, node_id
                    ))
                })?;
                if node.is_partial() {
                    continue;
                }
                for &output in &node.outputs {
                    if let Some(&other) = producer.get(&output) {
                        return Err(Error::InvalidGraph(format!(
                            "tensor '{}' is produced by both '{}' and '{}'",
                            self.tensors.get(output)?.name,
                            self.nodes[other].name,
                            node.name
                        )));
                    }
                    producer.insert(output, node_id);
                }
            }
        }

        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
