//! Operator trait for per-op shape functions.

use crate::allocator::MAX_MALLOC_SIZE;
use crate::tensor::{Tensor, TensorArena, TensorId};
use crate::types::{AttributeValue, TensorShape};
use crate::{Error, Result};
use std::collections::HashMap;

/// Result of running a shape function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferOutcome {
    /// One shape per node output.
    Inferred(Vec<TensorShape>),

    /// Output shapes depend on input data; infer again at run time.
    Deferred,
}

/// Whether a node's outputs received shapes, after [`run_shape_inference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferStatus {
    Inferred,
    Deferred,
}

/// Read-only view of a node handed to [`Operator::infer_shapes`].
pub struct InferCtx<'a> {
    /// Name of the node being inferred.
    pub node_name: &'a str,

    /// Node attributes.
    pub attributes: &'a HashMap<String, AttributeValue>,

    /// Input tensors, in node input order.
    pub inputs: Vec<&'a Tensor>,

    /// Number of outputs the node declares.
    pub num_outputs: usize,
}

impl<'a> InferCtx<'a> {
    /// Get an input tensor.
    pub fn input(&self, index: usize) -> Result<&'a Tensor> {
        self.inputs.get(index).copied().ok_or_else(|| {
            Error::Shape(format!(
                "'{}' has no input {} (has {})",
                self.node_name,
                index,
                self.inputs.len()
            ))
        })
    }

    /// Static shape of an input, or `None` when it is not known yet.
    pub fn input_shape(&self, index: usize) -> Result<Option<&'a [usize]>> {
        Ok(self.input(index)?.shape.as_static())
    }

    /// Get an integer attribute, falling back to `default`.
    pub fn attr_int(&self, name: &str, default: i64) -> i64 {
        self.attributes
            .get(name)
            .and_then(AttributeValue::as_int)
            .unwrap_or(default)
    }
}

/// Shape function of one operator kind.
///
/// Shape functions run once at schedule time over the declared input shapes.
/// When an output shape depends on input *values* that are only known at run
/// time, they return [`InferOutcome::Deferred`] and are called again before
/// the kernel executes.
///
/// # Example
///
/// ```
/// use strata_core::{InferCtx, InferOutcome, Operator, Result, TensorShape};
///
/// struct Identity;
///
/// impl Operator for Identity {
///     fn name(&self) -> &str {
///         "Identity"
///     }
///
///     fn infer_shapes(&self, ctx: &InferCtx<'_>) -> Result<InferOutcome> {
///         match ctx.input_shape(0)? {
///             Some(dims) => Ok(InferOutcome::Inferred(vec![TensorShape::Static(dims.to_vec())])),
///             None => Ok(InferOutcome::Deferred),
///         }
///     }
/// }
/// ```
pub trait Operator: Send + Sync {
    /// Get the operator name (e.g., "Conv2D", "Add").
    fn name(&self) -> &str;

    /// Compute output shapes from input shapes and attributes.
    fn infer_shapes(&self, ctx: &InferCtx<'_>) -> Result<InferOutcome>;
}

/// Run `operator`'s shape function for one node and write the result into
/// the output tensors.
///
/// Deferred outputs are reset to [`TensorShape::Unknown`].
///
/// # Errors
///
/// Returns the shape function's error, or `Error::Shape` if it produced the
/// wrong number of shapes or an output exceeding the allocation limit.
pub fn run_shape_inference(
    operator: &dyn Operator,
    node_name: &str,
    attributes: &HashMap<String, AttributeValue>,
    inputs: &[TensorId],
    outputs: &[TensorId],
    tensors: &mut TensorArena,
) -> Result<InferStatus> {
    let outcome = {
        let input_tensors = inputs
            .iter()
            .map(|&id| tensors.get(id))
            .collect::<Result<Vec<_>>>()?;
        let ctx = InferCtx {
            node_name,
            attributes,
            inputs: input_tensors,
            num_outputs: outputs.len(),
        };
        operator.infer_shapes(&ctx)?
    };

    let shapes = match outcome {
        InferOutcome::Deferred => {
            for &id in outputs {
                tensors.get_mut(id)?.shape = TensorShape::Unknown;
            }
            return Ok(InferStatus::Deferred);
        }
        InferOutcome::Inferred(shapes) => shapes,
    };

    if shapes.len() != outputs.len() {
        return Err(Error::Shape(format!(
            "'{}' inferred {} shapes for {} outputs",
            node_name,
            shapes.len(),
            outputs.len()
        )));
    }

    for (&id, shape) in outputs.iter().zip(shapes) {
        let tensor = tensors.get_mut(id)?;
        if let Some(count) = shape.element_count() {
            let too_big = count
                .checked_mul(tensor.dtype.size().max(1))
                .is_none_or(|bytes| bytes > MAX_MALLOC_SIZE);
            if too_big {
                return Err(Error::Shape(format!(
                    "'{}' output '{}' with {} elements exceeds the allocation limit",
                    node_name, tensor.name, count
                )));
            }
        }
        tensor.shape = shape;
    }

    Ok(InferStatus::Inferred)
}
