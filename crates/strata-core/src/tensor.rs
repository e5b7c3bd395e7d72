//! Tensors and the arena that owns them.
//!
//! Every tensor in a graph lives in one [`TensorArena`] and is addressed by
//! its [`TensorId`]. Nodes and kernels refer to tensors only by id, so the
//! producer/consumer relations between kernels are derived data rather than
//! ownership.

use crate::allocator::{Allocator, Buffer, MAX_MALLOC_SIZE};
use crate::types::{DataType, TensorCategory, TensorShape};
use crate::{Error, Result};
use std::sync::Arc;

/// Index of a tensor in its [`TensorArena`].
pub type TensorId = usize;

/// Element metadata of a list-of-tensor container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorList {
    /// Declared element type of every element.
    pub element_dtype: DataType,
    /// Element tensors, stored in the same arena as the list.
    pub elements: Vec<TensorId>,
}

/// Data, ownership flag and allocator of a tensor, detached from it.
///
/// Used to swap a tensor's storage out and restore it later without losing
/// track of who owns the buffer.
#[derive(Debug, Default)]
pub struct TensorStorage {
    pub data: Option<Buffer>,
    pub own_data: bool,
    pub allocator: Option<Arc<dyn Allocator>>,
}

impl TensorStorage {
    /// Give the buffer back to its allocator if the storage owns it.
    pub fn release(self) {
        if let Some(data) = self.data {
            if self.own_data {
                if let Some(allocator) = &self.allocator {
                    allocator.free(data);
                }
            }
        }
    }
}

/// A named, typed buffer in the graph.
#[derive(Debug)]
pub struct Tensor {
    pub name: String,
    pub dtype: DataType,
    pub shape: TensorShape,
    pub category: TensorCategory,
    /// Present for list-of-tensor containers.
    pub list: Option<TensorList>,
    data: Option<Buffer>,
    own_data: bool,
    allocator: Option<Arc<dyn Allocator>>,
    ref_count: usize,
    init_ref_count: usize,
    graph_output: bool,
}

impl Tensor {
    /// Create a tensor without data.
    pub fn new(
        name: impl Into<String>,
        dtype: DataType,
        shape: TensorShape,
        category: TensorCategory,
    ) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
            category,
            list: None,
            data: None,
            own_data: true,
            allocator: None,
            ref_count: 0,
            init_ref_count: 0,
            graph_output: false,
        }
    }

    /// Create a constant tensor holding `values`.
    pub fn constant<T: bytemuck::Pod>(
        name: impl Into<String>,
        dtype: DataType,
        shape: &[usize],
        values: &[T],
    ) -> Self {
        let mut tensor = Self::new(name, dtype, shape.into(), TensorCategory::Const);
        tensor.data = Some(Buffer::from_bytes(bytemuck::cast_slice(values)));
        tensor
    }

    /// Create a list-of-tensor container over existing element tensors.
    pub fn list(
        name: impl Into<String>,
        element_dtype: DataType,
        elements: Vec<TensorId>,
        category: TensorCategory,
    ) -> Self {
        let count = elements.len();
        let mut tensor = Self::new(
            name,
            DataType::TensorList,
            TensorShape::Static(vec![count]),
            category,
        );
        tensor.list = Some(TensorList {
            element_dtype,
            elements,
        });
        tensor
    }

    pub fn is_const(&self) -> bool {
        self.category == TensorCategory::Const
    }

    pub fn is_graph_input(&self) -> bool {
        self.category == TensorCategory::Input
    }

    pub fn is_graph_output(&self) -> bool {
        self.graph_output
    }

    pub fn set_graph_output(&mut self, graph_output: bool) {
        self.graph_output = graph_output;
    }

    pub fn data(&self) -> Option<&Buffer> {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> Option<&mut Buffer> {
        self.data.as_mut()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Address of the current buffer, used to check buffer identity.
    pub fn data_ptr(&self) -> Option<*const u8> {
        self.data.as_ref().map(Buffer::as_ptr)
    }

    pub fn own_data(&self) -> bool {
        self.own_data
    }

    pub fn allocator(&self) -> Option<&Arc<dyn Allocator>> {
        self.allocator.as_ref()
    }

    pub fn set_allocator(&mut self, allocator: Arc<dyn Allocator>) {
        self.allocator = Some(allocator);
    }

    /// Byte size implied by dtype and shape.
    ///
    /// # Errors
    ///
    /// Returns `Error::Shape` if the shape is unknown or the tensor exceeds
    /// the allocation limit.
    pub fn size_in_bytes(&self) -> Result<usize> {
        let count = self.shape.element_count().ok_or_else(|| {
            Error::Shape(format!("tensor '{}' has an unknown shape", self.name))
        })?;
        let size = count
            .checked_mul(self.dtype.size())
            .filter(|&size| size <= MAX_MALLOC_SIZE)
            .ok_or_else(|| {
                Error::Shape(format!(
                    "tensor '{}' with {} elements exceeds the allocation limit",
                    self.name, count
                ))
            })?;
        Ok(size)
    }

    /// Make sure the tensor holds a buffer of exactly its byte size.
    ///
    /// A buffer of the right size is kept. Otherwise the old one is freed and
    /// a new one is taken from the tensor's own allocator, or from
    /// `fallback` when it has none.
    pub fn malloc_data(&mut self, fallback: &Arc<dyn Allocator>) -> Result<()> {
        let size = self.size_in_bytes()?;
        if self.data.as_ref().is_some_and(|d| d.len() == size) {
            return Ok(());
        }
        self.free_data();

        let allocator = self.allocator.get_or_insert_with(|| fallback.clone());
        self.data = Some(allocator.malloc(size)?);
        self.own_data = true;
        Ok(())
    }

    /// Drop the buffer, returning it to the allocator if the tensor owns it.
    pub fn free_data(&mut self) {
        if let Some(data) = self.data.take() {
            if self.own_data {
                if let Some(allocator) = &self.allocator {
                    allocator.free(data);
                }
            }
        }
        self.own_data = true;
    }

    /// Attach a buffer. `own_data = false` marks data the tensor must not
    /// hand to its allocator.
    pub fn set_data(&mut self, data: Buffer, own_data: bool) {
        self.free_data();
        self.data = Some(data);
        self.own_data = own_data;
    }

    /// Detach data, ownership flag and allocator in one piece.
    pub fn take_storage(&mut self) -> TensorStorage {
        let storage = TensorStorage {
            data: self.data.take(),
            own_data: self.own_data,
            allocator: self.allocator.take(),
        };
        self.own_data = true;
        storage
    }

    /// Reattach storage previously detached with [`Tensor::take_storage`],
    /// freeing whatever the tensor currently holds.
    pub fn restore_storage(&mut self, storage: TensorStorage) {
        self.free_data();
        self.data = storage.data;
        self.own_data = storage.own_data;
        self.allocator = storage.allocator;
    }

    /// Typed read-only view of the data.
    pub fn as_slice<T: bytemuck::Pod>(&self) -> Result<&[T]> {
        self.data
            .as_ref()
            .ok_or_else(|| Error::TensorNotFound(format!("tensor '{}' has no data", self.name)))?
            .as_slice()
    }

    /// Typed mutable view of the data.
    pub fn as_slice_mut<T: bytemuck::Pod>(&mut self) -> Result<&mut [T]> {
        let name = &self.name;
        self.data
            .as_mut()
            .ok_or_else(|| Error::TensorNotFound(format!("tensor '{name}' has no data")))?
            .as_slice_mut()
    }

    /// Copy the data out as a vector of `T`.
    pub fn to_vec<T: bytemuck::Pod>(&self) -> Result<Vec<T>> {
        Ok(self.as_slice::<T>()?.to_vec())
    }

    /// Remaining consumers in the current run.
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn set_ref_count(&mut self, count: usize) {
        self.ref_count = count;
    }

    pub fn init_ref_count(&self) -> usize {
        self.init_ref_count
    }

    pub fn set_init_ref_count(&mut self, count: usize) {
        self.init_ref_count = count;
    }

    /// Restore the ref count to the number of consumers, done after the
    /// producer has written the tensor.
    pub fn reset_ref_count(&mut self) {
        self.ref_count = self.init_ref_count;
    }

    /// Record one finished consumer. Frees the buffer when none remain,
    /// except for constants, graph inputs and graph outputs.
    ///
    /// Returns `true` if the data was freed.
    pub fn dec_ref_count(&mut self) -> bool {
        if self.is_const() || self.is_graph_input() {
            return false;
        }
        self.ref_count = self.ref_count.saturating_sub(1);
        if self.ref_count == 0 && !self.graph_output && self.data.is_some() {
            self.free_data();
            return true;
        }
        false
    }
}

/// Flat owner of every tensor in a graph.
#[derive(Debug, Default)]
pub struct TensorArena {
    tensors: Vec<Tensor>,
}

impl TensorArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tensor and return its id.
    pub fn push(&mut self, tensor: Tensor) -> TensorId {
        self.tensors.push(tensor);
        self.tensors.len() - 1
    }

    /// Look up a tensor.
    ///
    /// # Errors
    ///
    /// Returns `Error::TensorNotFound` if `id` is out of range.
    pub fn get(&self, id: TensorId) -> Result<&Tensor> {
        self.tensors
            .get(id)
            .ok_or_else(|| Error::TensorNotFound(format!("tensor id {id} out of range")))
    }

    /// Look up a tensor mutably.
    pub fn get_mut(&mut self, id: TensorId) -> Result<&mut Tensor> {
        self.tensors
            .get_mut(id)
            .ok_or_else(|| Error::TensorNotFound(format!("tensor id {id} out of range")))
    }

    /// Find a tensor id by name.
    pub fn find(&self, name: &str) -> Option<TensorId> {
        self.tensors.iter().position(|t| t.name == name)
    }

    pub fn contains(&self, id: TensorId) -> bool {
        id < self.tensors.len()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Tensor> {
        self.tensors.iter_mut()
    }
}
