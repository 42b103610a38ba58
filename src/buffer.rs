//! Page-aligned transfer buffers
//!
//! The pool allocates every buffer once, up front. A [`PooledBuffer`] is a
//! move-only handle: at any moment it sits in the pool, in exactly one
//! in-flight chunk record, or in the engine's retired list waiting for a
//! bulk [`release_all`](BufferPool::release_all). The heap block behind a
//! buffer never moves, so its address can be handed to the ring.

use crate::error::{CopyError, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Buffer alignment (one page)
pub const PAGE_SIZE: usize = 4096;

/// Round `len` up to whole pages
#[must_use]
pub const fn page_round(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// A page-aligned heap block of fixed size
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl AlignedBuffer {
    /// Allocate a zeroed buffer of `len` bytes rounded up to whole pages
    ///
    /// # Errors
    ///
    /// Returns an error if `len` is zero, overflows, or the allocation fails.
    pub fn new(len: usize) -> Result<Self> {
        let len = page_round(len);
        let layout = Layout::from_size_align(len, PAGE_SIZE)
            .ok()
            .filter(|l| l.size() > 0)
            .ok_or_else(|| CopyError::InvalidConfig(format!("invalid buffer size {len}")))?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            CopyError::Io(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                format!("cannot allocate {len}-byte buffer"),
            ))
        })?;
        Ok(Self { ptr, len, layout })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialized (zeroed) bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// A buffer checked out of a [`BufferPool`]
#[derive(Debug)]
pub struct PooledBuffer {
    index: usize,
    buf: AlignedBuffer,
}

impl PooledBuffer {
    /// Position of this buffer in its pool
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.buf.as_mut_ptr()
    }
}

/// Fixed set of equally sized transfer buffers
#[derive(Debug)]
pub struct BufferPool {
    free: Vec<PooledBuffer>,
    capacity: usize,
    buffer_size: usize,
    peak_outstanding: usize,
}

impl BufferPool {
    /// Allocate `count` buffers of `size` bytes (rounded up to whole pages)
    ///
    /// # Errors
    ///
    /// Returns an error if any allocation fails.
    pub fn new(count: usize, size: usize) -> Result<Self> {
        let free = (0..count)
            .rev()
            .map(|index| {
                Ok(PooledBuffer {
                    index,
                    buf: AlignedBuffer::new(size)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            free,
            capacity: count,
            buffer_size: page_round(size),
            peak_outstanding: 0,
        })
    }

    /// Take a buffer, or `None` if all are checked out
    pub fn acquire(&mut self) -> Option<PooledBuffer> {
        let buffer = self.free.pop()?;
        self.peak_outstanding = self.peak_outstanding.max(self.outstanding());
        Some(buffer)
    }

    /// Return one buffer
    pub fn release(&mut self, buffer: PooledBuffer) {
        debug_assert!(self.free.len() < self.capacity, "pool overfilled");
        self.free.push(buffer);
    }

    /// Return every buffer in `retired`, leaving it empty
    pub fn release_all(&mut self, retired: &mut Vec<PooledBuffer>) {
        debug_assert!(
            self.free.len() + retired.len() <= self.capacity,
            "pool overfilled"
        );
        self.free.append(retired);
    }

    /// Buffers currently free
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Buffers currently checked out
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.capacity - self.free.len()
    }

    /// Highest number of buffers checked out at once
    #[must_use]
    pub fn peak_outstanding(&self) -> usize {
        self.peak_outstanding
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of every buffer in bytes
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
