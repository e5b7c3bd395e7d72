//! float32 <-> float16 tensor conversion.

use crate::allocator::Allocator;
use crate::tensor::{Tensor, TensorStorage};
use crate::types::DataType;
use crate::{Error, Result};
use half::f16;
use std::sync::Arc;

fn allocator_of(tensor: &Tensor, fallback: &Arc<dyn Allocator>) -> Arc<dyn Allocator> {
    tensor.allocator().cloned().unwrap_or_else(|| fallback.clone())
}

/// Convert a float32 tensor to float16 in place, keeping the original
/// storage aside.
///
/// The tensor gets a fresh float16 buffer from its own allocator (or
/// `fallback`) and its dtype becomes `F16`. The returned storage holds the
/// original float32 buffer, ownership flag and allocator untouched so that
/// [`restore_f32`] can put them back. A tensor without data is only retyped.
///
/// # Errors
///
/// Returns `Error::TypeMismatch` if the tensor is not float32.
pub fn swap_to_f16(tensor: &mut Tensor, fallback: &Arc<dyn Allocator>) -> Result<TensorStorage> {
    if tensor.dtype != DataType::F32 {
        return Err(Error::TypeMismatch(format!(
            "'{}' is {}, expected float32",
            tensor.name, tensor.dtype
        )));
    }

    let allocator = allocator_of(tensor, fallback);
    let original = tensor.take_storage();
    tensor.dtype = DataType::F16;

    if let Some(data) = &original.data {
        let src = data.as_slice::<f32>()?;
        let mut converted = allocator.malloc(src.len() * 2)?;
        for (dst, &value) in converted.as_slice_mut::<f16>()?.iter_mut().zip(src) {
            *dst = f16::from_f32(value);
        }
        tensor.set_allocator(allocator);
        tensor.set_data(converted, true);
    }

    Ok(original)
}

/// Undo [`swap_to_f16`]: free the float16 buffer and reattach the original
/// float32 storage.
pub fn restore_f32(tensor: &mut Tensor, original: TensorStorage) {
    tensor.restore_storage(original);
    tensor.dtype = DataType::F32;
}

/// Convert a float16 tensor's data to float32 in place, releasing the
/// float16 buffer. A tensor without data is only retyped.
///
/// # Errors
///
/// Returns `Error::TypeMismatch` if the tensor is not float16.
pub fn convert_to_f32(tensor: &mut Tensor, fallback: &Arc<dyn Allocator>) -> Result<()> {
    if tensor.dtype != DataType::F16 {
        return Err(Error::TypeMismatch(format!(
            "'{}' is {}, expected float16",
            tensor.name, tensor.dtype
        )));
    }

    if let Some(data) = tensor.data() {
        let src = data.as_slice::<f16>()?;
        let allocator = allocator_of(tensor, fallback);
        let mut converted = allocator.malloc(src.len() * 4)?;
        for (dst, &value) in converted.as_slice_mut::<f32>()?.iter_mut().zip(src) {
            *dst = value.to_f32();
        }
        tensor.set_allocator(allocator);
        tensor.set_data(converted, true);
    }

    tensor.dtype = DataType::F32;
    Ok(())
}
