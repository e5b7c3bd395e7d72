//! Per-operator compute cost estimates used to balance partitions.

use std::iter::Sum;
use std::ops::{Add, AddAssign};
use strata_core::{Graph, Node};

/// Op type whose multiply cost is modeled.
pub const CONV2D_OP: &str = "Conv2D";

/// Dimensionless multiply/IO cost estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostModel {
    pub mul_cost: u64,
    pub io_cost: u64,
}

impl CostModel {
    pub fn new(mul_cost: u64, io_cost: u64) -> Self {
        Self { mul_cost, io_cost }
    }

    /// Scalar used for balancing.
    pub fn cost(&self) -> u64 {
        self.mul_cost + self.io_cost
    }
}

impl Add for CostModel {
    type Output = CostModel;

    fn add(self, rhs: CostModel) -> CostModel {
        CostModel {
            mul_cost: self.mul_cost + rhs.mul_cost,
            io_cost: self.io_cost + rhs.io_cost,
        }
    }
}

impl AddAssign for CostModel {
    fn add_assign(&mut self, rhs: CostModel) {
        *self = *self + rhs;
    }
}

impl Sum for CostModel {
    fn sum<I: Iterator<Item = CostModel>>(iter: I) -> CostModel {
        iter.fold(CostModel::default(), Add::add)
    }
}

fn product(dims: &[usize]) -> u64 {
    dims.iter().map(|&d| d as u64).product()
}

/// Multiply cost of a convolution.
///
/// Weights are laid out `[out_c, kh, kw, in_c]` and activations NHWC. A plain
/// convolution costs `out_elements * kh * kw * in_c`, a depthwise one
/// `out_elements * kh * kw`. Grouped convolutions and anything with unknown
/// shapes are not modeled.
fn conv2d_cost(node: &Node, graph: &Graph) -> CostModel {
    let shape_of = |index: usize| {
        node.inputs
            .get(index)
            .and_then(|&id| graph.tensors.get(id).ok())
            .and_then(|t| t.shape.as_static().map(<[usize]>::to_vec))
    };
    let (Some(input), Some(weight)) = (shape_of(0), shape_of(1)) else {
        return CostModel::default();
    };
    let Some(output) = node
        .outputs
        .first()
        .and_then(|&id| graph.tensors.get(id).ok())
        .and_then(|t| t.shape.as_static().map(<[usize]>::to_vec))
    else {
        return CostModel::default();
    };
    if weight.len() != 4 || output.len() != 4 {
        return CostModel::default();
    }

    let group = node.attr::<i64>("group").unwrap_or(1);
    let in_channels = input.last().copied().unwrap_or(0) as i64;
    let out_channels = weight[0] as i64;

    let mul_cost = if group == 1 {
        product(&output) * product(&weight[1..4])
    } else if group == in_channels && group == out_channels {
        product(&output) * product(&weight[1..3])
    } else {
        0
    };
    CostModel::new(mul_cost, 0)
}

/// Cost of one node. Operators without a cost formula are free.
pub fn node_cost(node: &Node, graph: &Graph) -> CostModel {
    match node.op_type.as_str() {
        CONV2D_OP => conv2d_cost(node, graph),
        _ => CostModel::default(),
    }
}

/// Summed cost of a set of nodes.
pub fn nodes_cost(nodes: &[usize], graph: &Graph) -> CostModel {
    nodes
        .iter()
        .filter_map(|&id| graph.nodes.get(id))
        .map(|node| node_cost(node, graph))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{AttributeValue, DataType, Tensor, TensorCategory};

    fn conv_graph(input: &[usize], weight: &[usize], output: &[usize], group: i64) -> Graph {
        let mut graph = Graph::new();
        let x = graph.add_tensor(Tensor::new(
            "x",
            DataType::F32,
            input.into(),
            TensorCategory::Input,
        ));
        let count = weight.iter().product::<usize>();
        let w = graph.add_tensor(Tensor::constant(
            "w",
            DataType::F32,
            weight,
            &vec![0.0f32; count],
        ));
        let y = graph.add_tensor(Tensor::new(
            "y",
            DataType::F32,
            output.into(),
            TensorCategory::Normal,
        ));
        let mut node = Node::new(CONV2D_OP);
        node.name = "conv".to_string();
        node.inputs = vec![x, w];
        node.outputs = vec![y];
        node.attributes
            .insert("group".to_string(), AttributeValue::Int(group));
        graph.add_node(node);
        graph
    }

    #[test]
    fn test_plain_conv_cost() {
        let graph = conv_graph(&[1, 8, 8, 3], &[16, 3, 3, 3], &[1, 8, 8, 16], 1);
        let cost = node_cost(&graph.nodes[0], &graph);
        assert_eq!(cost.mul_cost, 8 * 8 * 16 * 3 * 3 * 3);
        assert_eq!(cost.io_cost, 0);
    }

    #[test]
    fn test_depthwise_conv_cost() {
        let graph = conv_graph(&[1, 8, 8, 4], &[4, 3, 3, 1], &[1, 8, 8, 4], 4);
        assert_eq!(node_cost(&graph.nodes[0], &graph).cost(), 8 * 8 * 4 * 3 * 3);
    }

    #[test]
    fn test_grouped_conv_not_modeled() {
        let graph = conv_graph(&[1, 8, 8, 4], &[8, 3, 3, 2], &[1, 8, 8, 8], 2);
        assert_eq!(node_cost(&graph.nodes[0], &graph).cost(), 0);
    }

    #[test]
    fn test_unmodeled_op_is_free() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("Relu"));
        assert_eq!(nodes_cost(&[0], &graph), CostModel::default());
    }

    #[test]
    fn test_cost_addition() {
        let total: CostModel = [CostModel::new(1, 2), CostModel::new(3, 4)]
            .into_iter()
            .sum();
        assert_eq!(total, CostModel::new(4, 6));
        assert_eq!(total.cost(), 10);

        let mut acc = CostModel::default();
        acc += CostModel::new(5, 0);
        assert_eq!(acc.cost(), 5);
    }
}
