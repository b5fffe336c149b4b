//! Memory pools and the buffer descriptors that address them.
//!
//! Buffers are never owned by a view. The scheduler assigns each tensor a
//! byte range in one of four pools; kernels borrow those ranges through
//! `MemoryPools::split`.

use serde::{Deserialize, Serialize};

use crate::datatype::DataType;
use crate::error::{Error, Result};
use crate::tensor::{self, Shape, Strides, TensorMut, TensorRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryLocation {
    /// Graph inputs, written by the caller before a run.
    Input,
    /// Graph outputs, read by the caller after a run.
    Output,
    /// Read-only constants (weights, tables).
    Rdata,
    /// Intermediate activations.
    Data,
}

impl MemoryLocation {
    pub const COUNT: usize = 4;
    pub const ALL: [MemoryLocation; Self::COUNT] = [
        MemoryLocation::Input,
        MemoryLocation::Output,
        MemoryLocation::Rdata,
        MemoryLocation::Data,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Byte range `[start, start + size)` within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferRef {
    pub location: MemoryLocation,
    pub start: usize,
    pub size: usize,
}

impl BufferRef {
    pub fn new(location: MemoryLocation, start: usize, size: usize) -> Self {
        Self {
            location,
            start,
            size,
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.size
    }

    /// Two ranges overlap when they share a pool and at least one byte.
    pub fn overlaps(&self, other: &BufferRef) -> bool {
        self.location == other.location
            && self.size > 0
            && other.size > 0
            && self.start < other.end()
            && other.start < self.end()
    }
}

/// Scheduled tensor: where it lives and how its elements are laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryView {
    pub buffer: BufferRef,
    pub datatype: DataType,
    pub shape: Shape,
    pub strides: Strides,
}

impl MemoryView {
    /// Dense row-major view of `shape` at `buffer`.
    pub fn contiguous(buffer: BufferRef, datatype: DataType, shape: Shape) -> Self {
        let strides = tensor::default_strides(&shape);
        Self {
            buffer,
            datatype,
            shape,
            strides,
        }
    }

    pub fn bind<'a>(&'a self, data: &'a [u8]) -> Result<TensorRef<'a>> {
        TensorRef::new(data, self.datatype, &self.shape, &self.strides)
    }

    pub fn bind_mut<'a>(&'a self, data: &'a mut [u8]) -> Result<TensorMut<'a>> {
        TensorMut::new(data, self.datatype, &self.shape, &self.strides)
    }
}

// ============================================================================
// Pools
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryPools {
    pools: [Vec<u8>; MemoryLocation::COUNT],
}

impl MemoryPools {
    /// Zero-filled pools, sized per location in `MemoryLocation::ALL` order.
    pub fn new(sizes: [usize; MemoryLocation::COUNT]) -> Self {
        Self {
            pools: sizes.map(|size| vec![0u8; size]),
        }
    }

    pub fn size(&self, location: MemoryLocation) -> usize {
        self.pools[location.index()].len()
    }

    pub fn pool(&self, location: MemoryLocation) -> &[u8] {
        &self.pools[location.index()]
    }

    pub fn pool_mut(&mut self, location: MemoryLocation) -> &mut [u8] {
        &mut self.pools[location.index()]
    }

    pub fn read(&self, buffer: &BufferRef) -> Result<&[u8]> {
        let pool = &self.pools[buffer.location.index()];
        check_range(buffer, pool.len())?;
        Ok(&pool[buffer.start..buffer.end()])
    }

    pub fn write(&mut self, buffer: &BufferRef) -> Result<&mut [u8]> {
        let pool = &mut self.pools[buffer.location.index()];
        check_range(buffer, pool.len())?;
        Ok(&mut pool[buffer.start..buffer.end()])
    }

    /// Borrow `output` mutably together with every buffer in `inputs`.
    ///
    /// Fails with `BufferOverlap` when an input shares a byte with the output;
    /// inputs may overlap each other freely.
    pub fn split(
        &mut self,
        inputs: &[BufferRef],
        output: &BufferRef,
    ) -> Result<(Vec<&[u8]>, &mut [u8])> {
        let out_index = output.location.index();
        check_range(output, self.pools[out_index].len())?;
        for input in inputs {
            check_range(input, self.pools[input.location.index()].len())?;
            if input.overlaps(output) {
                return Err(Error::BufferOverlap(*input));
            }
        }

        let (before, rest) = self.pools.split_at_mut(out_index);
        let (target, after) = rest
            .split_first_mut()
            .ok_or_else(|| Error::InvalidModule("missing output pool".into()))?;
        let (head, body) = target.split_at_mut(output.start);
        let (out, tail) = body.split_at_mut(output.size);
        let head: &[u8] = head;
        let tail: &[u8] = tail;
        let tail_base = output.end();

        let mut views = Vec::with_capacity(inputs.len());
        for input in inputs {
            let loc = input.location.index();
            let slice: &[u8] = if loc < out_index {
                &before[loc][input.start..input.end()]
            } else if loc > out_index {
                &after[loc - out_index - 1][input.start..input.end()]
            } else if input.size == 0 {
                &[]
            } else if input.end() <= output.start {
                &head[input.start..input.end()]
            } else if input.start >= tail_base {
                &tail[input.start - tail_base..input.end() - tail_base]
            } else {
                // Straddles an empty output range.
                return Err(Error::BufferOverlap(*input));
            };
            views.push(slice);
        }
        Ok((views, out))
    }
}

fn check_range(buffer: &BufferRef, pool_len: usize) -> Result<()> {
    if buffer.end() > pool_len {
        return Err(Error::BufferTooSmall {
            required: buffer.end(),
            available: pool_len,
        });
    }
    Ok(())
}
