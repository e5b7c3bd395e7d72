//! Tensor buffers and the allocators that own them.
//!
//! A [`Buffer`] is word-aligned host storage, so typed views through
//! `bytemuck` never fail on alignment. Allocators hand buffers out and take
//! them back; [`DefaultAllocator`] keeps returned buffers on a free list and
//! reuses them for later requests of equal or smaller size.

use crate::{Error, Result};
use std::fmt;
use std::sync::Mutex;

/// Largest single allocation accepted by any allocator, in bytes.
pub const MAX_MALLOC_SIZE: usize = 2000 * 1024 * 1024;

/// Word-aligned byte storage backing one tensor.
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer {
    words: Vec<u64>,
    len: usize,
}

impl Buffer {
    /// Allocate a zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Copy `bytes` into a fresh buffer.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::zeroed(bytes.len());
        buffer.as_bytes_mut().copy_from_slice(bytes);
        buffer
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer holds zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes this buffer can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.words.len() * 8
    }

    /// Address of the first byte. Stable for the lifetime of the buffer.
    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }

    /// Reinterpret the buffer as a slice of `T`.
    ///
    /// # Errors
    ///
    /// Returns `Error::TypeMismatch` if the byte length is not a multiple of
    /// `size_of::<T>()`.
    pub fn as_slice<T: bytemuck::Pod>(&self) -> Result<&[T]> {
        bytemuck::try_cast_slice(self.as_bytes())
            .map_err(|e| Error::TypeMismatch(format!("cannot view {} bytes: {e}", self.len)))
    }

    /// Mutable counterpart of [`Buffer::as_slice`].
    pub fn as_slice_mut<T: bytemuck::Pod>(&mut self) -> Result<&mut [T]> {
        let len = self.len;
        bytemuck::try_cast_slice_mut(self.as_bytes_mut())
            .map_err(|e| Error::TypeMismatch(format!("cannot view {len} bytes: {e}")))
    }

    /// Shrink or grow the visible length within the existing capacity and
    /// zero the contents.
    fn reset(&mut self, len: usize) {
        debug_assert!(len <= self.capacity());
        self.words.iter_mut().for_each(|w| *w = 0);
        self.len = len;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len)
            .finish()
    }
}

/// Owner of tensor buffers.
///
/// A buffer returned by `malloc` belongs to the caller until it is handed
/// back through `free`.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Allocator name, used in logs.
    fn name(&self) -> &str;

    /// Allocate a zero-filled buffer of `size` bytes.
    fn malloc(&self, size: usize) -> Result<Buffer>;

    /// Return a buffer to the allocator.
    fn free(&self, buffer: Buffer);
}

/// Allocation counters kept by [`DefaultAllocator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Buffers created from scratch.
    pub allocations: usize,
    /// Requests served from the free list.
    pub reuses: usize,
    /// Buffers handed back.
    pub frees: usize,
}

#[derive(Debug, Default)]
struct Pool {
    free_list: Vec<Buffer>,
    stats: AllocatorStats,
}

/// Pooling host allocator.
#[derive(Debug)]
pub struct DefaultAllocator {
    name: String,
    pool: Mutex<Pool>,
}

impl DefaultAllocator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool: Mutex::new(Pool::default()),
        }
    }

    /// Snapshot of the allocation counters.
    pub fn stats(&self) -> AllocatorStats {
        self.pool
            .lock()
            .map(|pool| pool.stats)
            .unwrap_or_default()
    }

    /// Number of buffers waiting on the free list.
    pub fn pooled(&self) -> usize {
        self.pool.lock().map(|pool| pool.free_list.len()).unwrap_or(0)
    }
}

impl Allocator for DefaultAllocator {
    fn name(&self) -> &str {
        &self.name
    }

    fn malloc(&self, size: usize) -> Result<Buffer> {
        if size > MAX_MALLOC_SIZE {
            return Err(Error::Allocation(format!(
                "{} bytes requested from '{}' exceeds the {} byte limit",
                size, self.name, MAX_MALLOC_SIZE
            )));
        }

        let mut pool = self
            .pool
            .lock()
            .map_err(|_| Error::Allocation(format!("allocator '{}' is poisoned", self.name)))?;

        // First fit by capacity.
        if let Some(pos) = pool.free_list.iter().position(|b| b.capacity() >= size) {
            let mut buffer = pool.free_list.remove(pos);
            buffer.reset(size);
            pool.stats.reuses += 1;
            return Ok(buffer);
        }

        pool.stats.allocations += 1;
        Ok(Buffer::zeroed(size))
    }

    fn free(&self, buffer: Buffer) {
        match self.pool.lock() {
            Ok(mut pool) => {
                pool.stats.frees += 1;
                pool.free_list.push(buffer);
            }
            Err(_) => {
                tracing::warn!(allocator = %self.name, "dropping buffer, allocator is poisoned");
            }
        }
    }
}
