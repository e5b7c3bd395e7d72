//! Kernel implementation trait.
//!
//! An [`OpKernel`] is the opaque numeric implementation of one operator on
//! one architecture and data type. The scheduler picks it through the
//! [`crate::KernelRegistry`]; the runtime drives its lifecycle.

use crate::graph::Node;
use crate::registry::KernelKey;
use crate::tensor::{Tensor, TensorArena, TensorId};
use crate::{Error, Result};

/// Everything a kernel needs while it runs.
pub struct KernelCtx<'a> {
    /// Name of the kernel, for error messages.
    pub name: &'a str,

    /// Tensor arena holding inputs and outputs.
    pub tensors: &'a mut TensorArena,

    /// Input tensor ids, in node order.
    pub inputs: &'a [TensorId],

    /// Output tensor ids, in node order. Output buffers are allocated before
    /// `run` is called.
    pub outputs: &'a [TensorId],

    /// Threads the kernel may use internally.
    pub thread_num: usize,
}

impl KernelCtx<'_> {
    /// Get input tensor `index`.
    pub fn input(&self, index: usize) -> Result<&Tensor> {
        let id = *self.inputs.get(index).ok_or_else(|| {
            Error::Kernel(format!("'{}' has no input {}", self.name, index))
        })?;
        self.tensors.get(id)
    }

    /// Get output tensor `index`.
    pub fn output(&self, index: usize) -> Result<&Tensor> {
        let id = *self.outputs.get(index).ok_or_else(|| {
            Error::Kernel(format!("'{}' has no output {}", self.name, index))
        })?;
        self.tensors.get(id)
    }

    /// Get output tensor `index` mutably.
    pub fn output_mut(&mut self, index: usize) -> Result<&mut Tensor> {
        let id = *self.outputs.get(index).ok_or_else(|| {
            Error::Kernel(format!("'{}' has no output {}", self.name, index))
        })?;
        self.tensors.get_mut(id)
    }
}

/// Arguments handed to a kernel creator.
pub struct KernelCreateCtx<'a> {
    /// Node being bound.
    pub node: &'a Node,

    /// Registry key the creator was found under.
    pub key: &'a KernelKey,

    /// Tensors with their schedule-time shapes and types.
    pub tensors: &'a TensorArena,

    /// Threads assigned to the node.
    pub thread_num: usize,
}

/// Numeric implementation of one operator.
///
/// Lifecycle: `prepare` once after scheduling, `resize` whenever input
/// shapes change, then `run` once per execution.
pub trait OpKernel: Send {
    /// One-time setup after scheduling.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// React to new input/output shapes.
    fn resize(
        &mut self,
        _tensors: &TensorArena,
        _inputs: &[TensorId],
        _outputs: &[TensorId],
    ) -> Result<()> {
        Ok(())
    }

    /// Compute outputs from inputs.
    fn run(&mut self, ctx: &mut KernelCtx<'_>) -> Result<()>;
}
