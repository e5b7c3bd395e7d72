//! Cost-balanced graph partitioning.
//!
//! [`SearchSubGraph`] carves regions out of the main graph so that a major
//! and a minor device can run them side by side. Each region becomes a new
//! sub-graph and leaves a `Partial` node behind in the main graph.
//!
//! Three modes exist:
//! - **output mode** grows one candidate backwards from every graph output
//!   node;
//! - **middle mode** grows one candidate per input branch of every node with
//!   more than one non-const input;
//! - **offline parallel mode** is used instead of both when every Conv2D in
//!   the main graph already carries a device tag. Tagged convolutions are
//!   grouped per device without balancing.
//!
//! Candidates are costed with [`crate::cost`], split between the devices with
//! [`crate::balance::assign_major`] and fused down to two partitions before
//! the graph is rewritten.

use crate::balance::assign_major;
use crate::cost::{CONV2D_OP, CostModel, nodes_cost};
use crate::error::{Result, ScheduleError};
use std::collections::{BTreeMap, BTreeSet};
use strata_core::{Context, DeviceType, Graph, Node, NodeId, SubgraphDef, TensorId};
use tracing::{debug, debug_span};

/// Thread id of candidates assigned to the major device.
const MAJOR_TID: usize = 0;
/// Thread id of candidates assigned to the minor device.
const MINOR_TID: usize = 1;

/// Devices and thread budgets of the two partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAssignment {
    pub major_device: DeviceType,
    pub minor_device: DeviceType,
    pub major_thread: usize,
    pub minor_thread: usize,
}

impl DeviceAssignment {
    /// The major device is the NPU if enabled, else the GPU if enabled, else
    /// the CPU. The minor device is always the CPU.
    pub fn from_context(context: &Context) -> Self {
        let major_device = if context.is_npu_enabled() {
            DeviceType::Npu
        } else if context.is_gpu_enabled() {
            DeviceType::Gpu
        } else {
            DeviceType::Cpu
        };

        let threads = context.thread_num.max(1);
        let major_thread = match major_device {
            DeviceType::Cpu => threads.div_ceil(2),
            DeviceType::Gpu | DeviceType::Npu => 1,
        };
        let minor_thread = threads.saturating_sub(major_thread).max(1);

        Self {
            major_device,
            minor_device: DeviceType::Cpu,
            major_thread,
            minor_thread,
        }
    }

    /// Device and thread count for a thread id.
    fn for_tid(&self, tid: usize) -> (DeviceType, usize) {
        if tid == MAJOR_TID {
            (self.major_device, self.major_thread)
        } else {
            (self.minor_device, self.minor_thread)
        }
    }
}

/// A candidate partition collected by the search.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub nodes: Vec<NodeId>,
    /// Entry nodes whose producers lie outside the candidate.
    pub heads: Vec<NodeId>,
    /// Nodes whose outputs leave the candidate.
    pub ends: Vec<NodeId>,
    pub device: DeviceType,
    pub thread_num: usize,
    pub tid: usize,
    pub cost: CostModel,
    /// Set when the search hit a boundary that aborts this candidate.
    pub terminated: bool,
}

impl Candidate {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            heads: Vec::new(),
            ends: Vec::new(),
            device: DeviceType::Cpu,
            thread_num: 1,
            tid: MAJOR_TID,
            cost: CostModel::default(),
            terminated: false,
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.heads.clear();
        self.ends.clear();
    }

    /// Concatenate two candidates sharing a thread id.
    fn merge(mut self, other: Candidate) -> Candidate {
        self.nodes.extend(other.nodes);
        self.heads.extend(other.heads);
        self.ends.extend(other.ends);
        self.cost += other.cost;
        self
    }
}

impl Default for Candidate {
    fn default() -> Self {
        Self::new()
    }
}

/// Graph partitioner.
pub struct SearchSubGraph<'a> {
    graph: &'a mut Graph,
    assignment: DeviceAssignment,
    output_nodes: Vec<NodeId>,
    /// Producing nodes per tensor.
    producers: Vec<Vec<NodeId>>,
    /// Consuming nodes per tensor.
    consumers: Vec<Vec<NodeId>>,
    /// Nodes that may still be collected into a candidate.
    available: Vec<bool>,
    /// Input branches of multi-input nodes, keyed by the multi-input node.
    node_sub_map: BTreeMap<NodeId, Vec<Candidate>>,
}

impl<'a> SearchSubGraph<'a> {
    /// Create a partitioner over `graph`. `output_nodes` are the nodes
    /// producing declared graph outputs.
    pub fn new(graph: &'a mut Graph, context: &Context, output_nodes: Vec<NodeId>) -> Self {
        let tensor_count = graph.tensors.len();
        let mut producers = vec![Vec::new(); tensor_count];
        let mut consumers: Vec<Vec<NodeId>> = vec![Vec::new(); tensor_count];
        for (id, node) in graph.nodes.iter().enumerate() {
            for &input in &node.inputs {
                if let Some(list) = consumers.get_mut(input) {
                    if !list.contains(&id) {
                        list.push(id);
                    }
                }
            }
            for &output in &node.outputs {
                if let Some(list) = producers.get_mut(output) {
                    list.push(id);
                }
            }
        }

        let available = vec![false; graph.nodes.len()];
        Self {
            graph,
            assignment: DeviceAssignment::from_context(context),
            output_nodes,
            producers,
            consumers,
            available,
            node_sub_map: BTreeMap::new(),
        }
    }

    pub fn assignment(&self) -> DeviceAssignment {
        self.assignment
    }

    /// Partition the graph in place.
    #[tracing::instrument(skip_all, fields(nodes = self.graph.nodes.len()))]
    pub fn split(&mut self) -> Result<()> {
        if self.is_offline_parallel()? {
            self.split_by_offline_parallel()
        } else {
            self.split_by_output()?;
            self.split_by_middle()
        }
    }

    /// Whether every Conv2D in the main graph carries a device tag.
    pub fn is_offline_parallel(&self) -> Result<bool> {
        let mut convolutions = self
            .graph
            .main()?
            .node_indices
            .iter()
            .map(|&id| &self.graph.nodes[id])
            .filter(|node| node.op_type == CONV2D_OP)
            .peekable();
        if convolutions.peek().is_none() {
            return Ok(false);
        }
        Ok(convolutions.all(|node| node.device.is_some()))
    }

    fn split_by_output(&mut self) -> Result<()> {
        let _span = debug_span!("split_by_output").entered();
        self.reset_available()?;

        let mut subs = Vec::with_capacity(self.output_nodes.len());
        for output in self.output_nodes.clone() {
            let mut candidate = Candidate::new();
            self.insert_node(output, &mut candidate);
            subs.push(candidate);
        }

        self.calculate_cost(&mut subs);
        self.assign_runtime_info(&mut subs);
        fuse(&mut subs);

        if subs.len() != 2 {
            debug!(candidates = subs.len(), "output split needs two partitions");
            return Ok(());
        }
        if subs.iter().any(|sub| sub.cost.cost() == 0) {
            debug!("output split declined: one side has zero cost");
            return Ok(());
        }
        self.materialize(subs)
    }

    fn split_by_middle(&mut self) -> Result<()> {
        let _span = debug_span!("split_by_middle").entered();
        self.reset_available()?;
        self.node_sub_map.clear();

        for root in self.multi_input_nodes()? {
            let inputs = self.graph.nodes[root].inputs.clone();
            let mut subs = Vec::new();
            for input in inputs {
                if self.is_const(input) {
                    continue;
                }
                let Some(&producer) = self.producers_of(input).first() else {
                    continue;
                };
                let mut candidate = Candidate::new();
                candidate.ends.push(producer);
                self.insert_node_by_mid(producer, &mut candidate);
                subs.push(candidate);
            }
            self.node_sub_map.insert(root, subs);
        }

        while let Some((root, mut subs)) = self.node_sub_map.pop_first() {
            self.calculate_cost(&mut subs);
            self.assign_runtime_info(&mut subs);
            fuse(&mut subs);

            if subs.len() != 2 || subs.iter().any(|sub| sub.nodes.is_empty()) {
                continue;
            }

            self.optimize_after_fusion(&mut subs, root);

            self.calculate_cost(&mut subs);
            if subs.iter().any(|sub| sub.cost.cost() == 0) {
                debug!(root = %self.graph.nodes[root].name, "middle split declined: one side has zero cost");
                continue;
            }
            self.assign_runtime_info(&mut subs);

            self.stamp_main_graph(DeviceType::Cpu)?;
            self.materialize(subs)?;
        }
        Ok(())
    }

    fn split_by_offline_parallel(&mut self) -> Result<()> {
        let _span = debug_span!("split_by_offline_parallel").entered();
        self.reset_available()?;

        let mut subs = Vec::with_capacity(self.output_nodes.len());
        for output in self.output_nodes.clone() {
            let mut candidate = Candidate::new();
            self.insert_parallel_node(output, &mut candidate);
            subs.push(candidate);
        }

        for sub in &mut subs {
            sub.tid = if sub.device == self.assignment.major_device {
                MAJOR_TID
            } else {
                MINOR_TID
            };
            sub.thread_num = self.assignment.for_tid(sub.tid).1;
        }

        self.materialize(subs)?;
        self.stamp_main_graph(DeviceType::Cpu)
    }

    /// Mark every non-Partial node of the main graph as collectable.
    fn reset_available(&mut self) -> Result<()> {
        self.available = vec![false; self.graph.nodes.len()];
        let main = self
            .graph
            .subgraphs
            .first()
            .ok_or_else(|| ScheduleError::InvalidGraph("graph has no main sub-graph".to_string()))?;
        for &id in &main.node_indices {
            if !self.graph.nodes[id].is_partial() {
                self.available[id] = true;
            }
        }
        Ok(())
    }

    fn multi_input_nodes(&self) -> Result<Vec<NodeId>> {
        Ok(self
            .graph
            .main()?
            .node_indices
            .iter()
            .copied()
            .filter(|&id| !self.graph.nodes[id].is_partial() && self.non_const_inputs(id).len() > 1)
            .collect())
    }

    fn is_const(&self, tensor: TensorId) -> bool {
        self.graph
            .tensors
            .get(tensor)
            .is_ok_and(|t| t.is_const())
    }

    fn is_graph_input(&self, tensor: TensorId) -> bool {
        self.graph.inputs.contains(&tensor)
    }

    fn producers_of(&self, tensor: TensorId) -> &[NodeId] {
        self.producers.get(tensor).map(Vec::as_slice).unwrap_or_default()
    }

    fn consumers_of(&self, tensor: TensorId) -> &[NodeId] {
        self.consumers.get(tensor).map(Vec::as_slice).unwrap_or_default()
    }

    fn non_const_inputs(&self, node: NodeId) -> Vec<TensorId> {
        self.graph.nodes[node]
            .inputs
            .iter()
            .copied()
            .filter(|&t| !self.is_const(t))
            .collect()
    }

    fn output_consumers(&self, node: NodeId) -> Vec<NodeId> {
        self.graph.nodes[node]
            .outputs
            .iter()
            .flat_map(|&t| self.consumers_of(t).iter().copied())
            .collect()
    }

    /// A node is a head of `ready` if one of its consumers has not been
    /// collected. A node with one output read by one consumer never is.
    fn is_head(&self, node: NodeId, ready: &[NodeId]) -> bool {
        let consumers = self.output_consumers(node);
        if self.graph.nodes[node].outputs.len() == 1 && consumers.len() == 1 {
            return false;
        }
        consumers.iter().any(|c| !ready.contains(c))
    }

    /// Like [`Self::is_head`], ignoring the split root.
    fn is_head_with_root(&self, node: NodeId, ready: &[NodeId], root: NodeId) -> bool {
        self.output_consumers(node)
            .iter()
            .any(|&c| c != root && !ready.contains(&c))
    }

    /// The only producer of the only non-const input of `node`.
    fn single_input_producer(&self, node: NodeId) -> Option<NodeId> {
        let inputs = self.non_const_inputs(node);
        let [input] = inputs.as_slice() else {
            return None;
        };
        match self.producers_of(*input) {
            [producer] => Some(*producer),
            _ => None,
        }
    }

    fn take(&mut self, node: NodeId) {
        self.available[node] = false;
    }

    /// Output mode: grow `sub` backwards from `index`.
    fn insert_node(&mut self, index: NodeId, sub: &mut Candidate) {
        if sub.terminated || !self.available[index] {
            return;
        }

        let inputs = self.non_const_inputs(index);
        if !inputs.is_empty() && inputs.iter().all(|&t| self.is_graph_input(t)) {
            sub.clear();
            sub.terminated = true;
            return;
        }

        if self.is_head(index, &sub.nodes) {
            match sub.nodes.first() {
                Some(&front) => sub.heads.push(front),
                None => sub.terminated = true,
            }
            return;
        }

        if self.output_nodes.contains(&index) {
            sub.ends.push(index);
        }
        sub.nodes.insert(0, index);
        self.take(index);

        for input in inputs {
            for producer in self.producers_of(input).to_vec() {
                self.insert_node(producer, sub);
            }
        }
    }

    /// Middle mode: grow `sub` backwards from `index`, absorbing the
    /// branches of multi-input nodes met on the way.
    fn insert_node_by_mid(&mut self, index: NodeId, sub: &mut Candidate) {
        if !self.available[index] {
            return;
        }

        if self.node_sub_map.contains_key(&index) {
            if self.is_head(index, &sub.nodes) {
                if let Some(&front) = sub.nodes.first() {
                    sub.heads.push(front);
                }
                return;
            }
            let Some(branches) = self.node_sub_map.remove(&index) else {
                return;
            };

            sub.nodes.push(index);
            self.take(index);

            let mut branch_heads = BTreeSet::new();
            for branch in &branches {
                sub.nodes.extend_from_slice(&branch.nodes);
                branch_heads.extend(branch.heads.iter().copied());
            }

            let mut remaining = branch_heads.clone();
            for head in branch_heads {
                let Some(producer) = self.single_input_producer(head) else {
                    continue;
                };
                if !self.is_head(producer, &sub.nodes) {
                    self.insert_node_by_mid(producer, sub);
                    remaining.remove(&head);
                }
            }
            sub.heads.extend(remaining);
            return;
        }

        let inputs = self.non_const_inputs(index);
        if self.is_head(index, &sub.nodes) {
            if let Some(&front) = sub.nodes.first() {
                if !sub.heads.contains(&front) {
                    sub.heads.push(front);
                }
            }
            return;
        }

        sub.nodes.insert(0, index);
        self.take(index);

        for input in inputs {
            let producers = self.producers_of(input).to_vec();
            if producers.is_empty() {
                if let Some(&front) = sub.nodes.first() {
                    sub.heads.push(front);
                }
                continue;
            }
            for producer in producers {
                self.insert_node_by_mid(producer, sub);
            }
        }
    }

    /// Pull `node` into `sub` as its new head. Returns false if the node is
    /// already taken.
    fn insert_head_node(&mut self, node: NodeId, sub: &mut Candidate) -> bool {
        if !self.available[node] {
            return false;
        }
        let inputs = self.non_const_inputs(node);
        sub.nodes.push(node);
        self.take(node);

        let before = sub.nodes.len();
        for input in inputs {
            for producer in self.producers_of(input).to_vec() {
                self.insert_node_by_mid(producer, sub);
            }
        }
        if before == sub.nodes.len() {
            sub.heads.push(node);
        }
        true
    }

    /// Fold single-input predecessor chains of the heads into their side,
    /// then drop stale heads and ends.
    fn optimize_after_fusion(&mut self, subs: &mut [Candidate], root: NodeId) {
        for sub in subs.iter_mut() {
            if sub.nodes.is_empty() {
                return;
            }

            let mut used = Vec::new();
            let mut i = 0;
            while i < sub.heads.len() {
                let head = sub.heads[i];
                i += 1;
                if used.contains(&head) {
                    break;
                }
                let Some(producer) = self.single_input_producer(head) else {
                    continue;
                };
                if self.non_const_inputs(producer).len() != 1 {
                    continue;
                }
                if !self.is_head_with_root(producer, &sub.nodes, root)
                    && self.insert_head_node(producer, sub)
                {
                    used.push(head);
                }
            }
            sub.heads.retain(|head| !used.contains(head));

            let members = &sub.nodes;
            sub.heads.retain(|head| members.contains(head));
            sub.ends.retain(|end| members.contains(end));
            sub.nodes.sort_unstable();
        }
    }

    /// Offline parallel mode: collect the tagged convolution chain ending at
    /// `index`.
    fn insert_parallel_node(&mut self, index: NodeId, sub: &mut Candidate) {
        if sub.terminated || !self.available[index] {
            return;
        }

        let inputs = self.non_const_inputs(index);
        if inputs.iter().any(|&t| self.is_graph_input(t)) {
            sub.terminated = true;
            return;
        }

        let node = &self.graph.nodes[index];
        let tagged = if node.op_type == CONV2D_OP {
            node.device
        } else {
            None
        };

        match tagged {
            Some(device) => {
                if sub.nodes.is_empty() {
                    sub.device = device;
                } else if sub.device != device {
                    return;
                }
                if self.is_head(index, &sub.nodes) {
                    match sub.nodes.first() {
                        Some(&front) => sub.heads.push(front),
                        None => sub.terminated = true,
                    }
                    return;
                }
                if sub.ends.is_empty() {
                    sub.ends.push(index);
                }
                sub.nodes.insert(0, index);
                self.take(index);
            }
            None => {
                if !sub.nodes.is_empty() {
                    return;
                }
            }
        }

        for input in inputs {
            for producer in self.producers_of(input).to_vec() {
                self.insert_parallel_node(producer, sub);
            }
        }
    }

    fn calculate_cost(&self, subs: &mut [Candidate]) -> u64 {
        let mut total = 0;
        for sub in subs.iter_mut() {
            sub.cost = nodes_cost(&sub.nodes, &*self.graph);
            total += sub.cost.cost();
        }
        debug!(
            total,
            costs = ?subs.iter().map(|s| s.cost.cost()).collect::<Vec<_>>(),
            "costed candidates"
        );
        total
    }

    fn assign_runtime_info(&self, subs: &mut [Candidate]) {
        let costs: Vec<u64> = subs.iter().map(|s| s.cost.cost()).collect();
        let major = assign_major(&costs);
        for (sub, is_major) in subs.iter_mut().zip(major) {
            sub.tid = if is_major { MAJOR_TID } else { MINOR_TID };
            let (device, thread_num) = self.assignment.for_tid(sub.tid);
            sub.device = device;
            sub.thread_num = thread_num;
        }
    }

    fn stamp_main_graph(&mut self, device: DeviceType) -> Result<()> {
        let nodes = self.graph.main()?.node_indices.clone();
        for id in nodes {
            self.graph.nodes[id].device = Some(device);
        }
        Ok(())
    }

    /// Move each non-empty candidate into a new sub-graph and replace it in
    /// the main graph with a `Partial` node. Only a split into exactly two
    /// partitions is applied.
    fn materialize(&mut self, subs: Vec<Candidate>) -> Result<()> {
        if subs.len() != 2 {
            debug!(candidates = subs.len(), "not a two-way split, graph left unchanged");
            return Ok(());
        }

        for sub in subs {
            if sub.nodes.is_empty() {
                continue;
            }

            let index = self.graph.subgraphs.len();
            for &id in &sub.nodes {
                let node = &mut self.graph.nodes[id];
                node.device = Some(sub.device);
                node.thread_num = Some(sub.thread_num);
            }

            let inputs = self.boundary_inputs(&sub);
            let outputs = self.boundary_outputs(&sub);

            let main = self.graph.subgraphs.first_mut().ok_or_else(|| {
                ScheduleError::InvalidGraph("graph has no main sub-graph".to_string())
            })?;
            main.node_indices.retain(|id| !sub.nodes.contains(id));

            debug!(
                subgraph = index,
                device = %sub.device,
                threads = sub.thread_num,
                nodes = sub.nodes.len(),
                cost = sub.cost.cost(),
                "materialized partition"
            );

            self.graph.subgraphs.push(SubgraphDef {
                name: format!("Subgraph-split-{index}"),
                node_indices: sub.nodes,
                input_indices: inputs.clone(),
                output_indices: outputs.clone(),
            });
            self.graph.add_node(Node::partial(
                format!("Partial-subgraph-split-{index}"),
                index,
                inputs,
                outputs,
            ));
            self.available.push(false);
        }
        Ok(())
    }

    fn produced_by(&self, tensor: TensorId, members: &[NodeId]) -> bool {
        self.producers_of(tensor).iter().any(|p| members.contains(p))
    }

    /// Non-const head inputs first, then any other tensor read from outside.
    fn boundary_inputs(&self, sub: &Candidate) -> Vec<TensorId> {
        let mut inputs = Vec::new();
        let candidates = sub
            .heads
            .iter()
            .chain(&sub.nodes)
            .flat_map(|&node| self.non_const_inputs(node));
        for tensor in candidates {
            if !self.produced_by(tensor, &sub.nodes) && !inputs.contains(&tensor) {
                inputs.push(tensor);
            }
        }
        inputs
    }

    /// End outputs first, then any other tensor read outside or declared as a
    /// graph output.
    fn boundary_outputs(&self, sub: &Candidate) -> Vec<TensorId> {
        let mut outputs: Vec<TensorId> = Vec::new();
        for &end in &sub.ends {
            for &tensor in &self.graph.nodes[end].outputs {
                if !outputs.contains(&tensor) {
                    outputs.push(tensor);
                }
            }
        }
        for &node in &sub.nodes {
            for &tensor in &self.graph.nodes[node].outputs {
                let escapes = self.graph.outputs.contains(&tensor)
                    || self
                        .consumers_of(tensor)
                        .iter()
                        .any(|c| !sub.nodes.contains(c));
                if escapes && !outputs.contains(&tensor) {
                    outputs.push(tensor);
                }
            }
        }
        outputs
    }
}

/// Merge the first two candidates sharing a thread id until two remain.
fn fuse(subs: &mut Vec<Candidate>) {
    while subs.len() > 2 {
        let pair = (0..subs.len()).find_map(|i| {
            ((i + 1)..subs.len())
                .find(|&j| subs[i].tid == subs[j].tid)
                .map(|j| (i, j))
        });
        let Some((i, j)) = pair else {
            break;
        };
        let second = subs.remove(j);
        let first = subs.remove(i);
        subs.push(first.merge(second));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{GpuDeviceInfo, NpuDeviceInfo};

    #[test]
    fn test_cpu_threads_split_in_half() {
        let assignment = DeviceAssignment::from_context(&Context::new().with_thread_num(5));
        assert_eq!(assignment.major_device, DeviceType::Cpu);
        assert_eq!(assignment.major_thread, 3);
        assert_eq!(assignment.minor_thread, 2);
    }

    #[test]
    fn test_accelerator_gets_one_thread() {
        let gpu = Context::new()
            .with_thread_num(4)
            .with_gpu(GpuDeviceInfo::default());
        let assignment = DeviceAssignment::from_context(&gpu);
        assert_eq!(assignment.major_device, DeviceType::Gpu);
        assert_eq!(assignment.minor_device, DeviceType::Cpu);
        assert_eq!((assignment.major_thread, assignment.minor_thread), (1, 3));

        let npu = gpu.with_npu(NpuDeviceInfo::default()).with_thread_num(1);
        let assignment = DeviceAssignment::from_context(&npu);
        assert_eq!(assignment.major_device, DeviceType::Npu);
        assert_eq!((assignment.major_thread, assignment.minor_thread), (1, 1));
    }

    fn tagged(tid: usize, node: NodeId, cost: u64) -> Candidate {
        let mut candidate = Candidate::new();
        candidate.tid = tid;
        candidate.nodes.push(node);
        candidate.cost = CostModel::new(cost, 0);
        candidate
    }

    #[test]
    fn test_fuse_merges_same_tid_pairs() {
        let mut subs = vec![
            tagged(MAJOR_TID, 0, 5),
            tagged(MINOR_TID, 1, 1),
            tagged(MAJOR_TID, 2, 7),
            tagged(MINOR_TID, 3, 2),
        ];
        fuse(&mut subs);

        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].nodes, vec![0, 2]);
        assert_eq!(subs[0].cost.cost(), 12);
        assert_eq!(subs[1].nodes, vec![1, 3]);
        assert_eq!(subs[1].cost.cost(), 3);
    }

    #[test]
    fn test_fuse_keeps_two() {
        let mut subs = vec![tagged(MAJOR_TID, 0, 1), tagged(MAJOR_TID, 1, 1)];
        fuse(&mut subs);
        assert_eq!(subs.len(), 2);
    }
}
