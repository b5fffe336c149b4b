//! Shape and stride arithmetic plus strided element access over raw bytes.
//!
//! Strides are counted in elements, not bytes. A view is valid when its highest
//! reachable offset fits in the backing buffer; `check_buffer` enforces that
//! before any kernel touches memory.

use bytemuck::Pod;

use crate::datatype::DataType;
use crate::error::{Error, Result};

pub type Shape = Vec<usize>;
pub type Strides = Vec<usize>;

/// Row-major strides for a densely packed tensor of `shape`.
pub fn default_strides(shape: &[usize]) -> Strides {
    let mut strides = vec![0; shape.len()];
    let mut acc = 1;
    for d in (0..shape.len()).rev() {
        strides[d] = acc;
        acc *= shape[d];
    }
    strides
}

/// Linear element offset of `index`: `Σ index[d] * strides[d]`.
#[inline]
pub fn offset(strides: &[usize], index: &[usize]) -> usize {
    index.iter().zip(strides).map(|(i, s)| i * s).sum()
}

/// Total element count. The empty shape is a scalar of size 1.
pub fn compute_size(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// True when `strides` address `shape` densely in row-major order. Unit
/// dimensions are ignored since their stride is never multiplied by anything
/// but zero.
pub fn is_contiguous(shape: &[usize], strides: &[usize]) -> bool {
    shape.len() == strides.len()
        && shape
            .iter()
            .zip(strides)
            .zip(default_strides(shape))
            .all(|((&dim, &stride), expected)| dim <= 1 || stride == expected)
}

/// Number of elements a buffer must hold to back the view: one past the
/// highest reachable offset, or zero when the shape has an empty dimension.
/// `None` when the offset does not fit in `usize`.
pub fn required_elements(shape: &[usize], strides: &[usize]) -> Option<usize> {
    if shape.contains(&0) {
        return Some(0);
    }
    shape
        .iter()
        .zip(strides)
        .try_fold(1usize, |acc, (&dim, &stride)| {
            (dim - 1).checked_mul(stride)?.checked_add(acc)
        })
}

/// Verify that a `byte_len`-byte buffer can back the given view.
pub fn check_buffer(
    byte_len: usize,
    datatype: DataType,
    shape: &[usize],
    strides: &[usize],
) -> Result<()> {
    if shape.len() != strides.len() {
        return Err(Error::shape(format!(
            "shape {shape:?} has rank {} but strides {strides:?} have rank {}",
            shape.len(),
            strides.len()
        )));
    }
    let required = required_elements(shape, strides)
        .and_then(|n| n.checked_mul(datatype.size_in_bytes()))
        .unwrap_or(usize::MAX);
    if required > byte_len {
        return Err(Error::BufferTooSmall {
            required,
            available: byte_len,
        });
    }
    Ok(())
}

/// Visit every multi-index of `shape` in row-major order, stopping at the
/// first error.
pub fn apply<F>(shape: &[usize], mut f: F) -> Result<()>
where
    F: FnMut(&[usize]) -> Result<()>,
{
    if shape.contains(&0) {
        return Ok(());
    }
    let mut index = vec![0usize; shape.len()];
    loop {
        f(&index)?;
        let mut d = shape.len();
        loop {
            if d == 0 {
                return Ok(());
            }
            d -= 1;
            index[d] += 1;
            if index[d] < shape[d] {
                break;
            }
            index[d] = 0;
        }
    }
}

/// Numpy-style broadcast of two shapes, aligned from the trailing dimension.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Shape> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for d in 0..rank {
        let da = dim_from_end(a, rank - 1 - d);
        let db = dim_from_end(b, rank - 1 - d);
        out[d] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(Error::shape(format!(
                    "shapes {a:?} and {b:?} cannot be broadcast"
                )))
            }
        };
    }
    Ok(out)
}

fn dim_from_end(shape: &[usize], back: usize) -> usize {
    if back < shape.len() {
        shape[shape.len() - 1 - back]
    } else {
        1
    }
}

/// Map an index into a broadcast output back onto an operand of `in_shape`.
pub fn broadcast_index(out_index: &[usize], in_shape: &[usize], in_index: &mut Vec<usize>) {
    let skip = out_index.len() - in_shape.len();
    in_index.clear();
    in_index.extend(
        in_shape
            .iter()
            .zip(&out_index[skip..])
            .map(|(&dim, &i)| if dim == 1 { 0 } else { i }),
    );
}

#[inline]
pub fn load<T: Pod>(data: &[u8], element: usize) -> T {
    let size = std::mem::size_of::<T>();
    bytemuck::pod_read_unaligned(&data[element * size..(element + 1) * size])
}

#[inline]
pub fn store<T: Pod>(data: &mut [u8], element: usize, value: T) {
    let size = std::mem::size_of::<T>();
    data[element * size..(element + 1) * size].copy_from_slice(bytemuck::bytes_of(&value));
}

// ============================================================================
// Borrowed views
// ============================================================================

/// Read-only strided view over a byte buffer. Construction checks bounds, so
/// element access through `get` cannot leave the buffer.
#[derive(Debug, Clone, Copy)]
pub struct TensorRef<'a> {
    pub data: &'a [u8],
    pub datatype: DataType,
    pub shape: &'a [usize],
    pub strides: &'a [usize],
}

impl<'a> TensorRef<'a> {
    pub fn new(
        data: &'a [u8],
        datatype: DataType,
        shape: &'a [usize],
        strides: &'a [usize],
    ) -> Result<Self> {
        check_buffer(data.len(), datatype, shape, strides)?;
        Ok(Self {
            data,
            datatype,
            shape,
            strides,
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> usize {
        compute_size(self.shape)
    }

    pub fn is_contiguous(&self) -> bool {
        is_contiguous(self.shape, self.strides)
    }

    #[inline]
    pub fn get<T: Pod>(&self, index: &[usize]) -> T {
        load(self.data, offset(self.strides, index))
    }

    pub fn expect_datatype(&self, datatype: DataType) -> Result<()> {
        self.datatype.expect(datatype)
    }
}

/// Writable strided view over a byte buffer.
#[derive(Debug)]
pub struct TensorMut<'a> {
    pub data: &'a mut [u8],
    pub datatype: DataType,
    pub shape: &'a [usize],
    pub strides: &'a [usize],
}

impl<'a> TensorMut<'a> {
    pub fn new(
        data: &'a mut [u8],
        datatype: DataType,
        shape: &'a [usize],
        strides: &'a [usize],
    ) -> Result<Self> {
        check_buffer(data.len(), datatype, shape, strides)?;
        Ok(Self {
            data,
            datatype,
            shape,
            strides,
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> usize {
        compute_size(self.shape)
    }

    pub fn is_contiguous(&self) -> bool {
        is_contiguous(self.shape, self.strides)
    }

    #[inline]
    pub fn set<T: Pod>(&mut self, index: &[usize], value: T) {
        store(self.data, offset(self.strides, index), value)
    }

    pub fn expect_datatype(&self, datatype: DataType) -> Result<()> {
        self.datatype.expect(datatype)
    }
}

/// Fail with `ShapeMismatch` unless the two shapes are identical.
pub fn expect_same_shape(what: &str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(Error::shape(format!(
            "{what}: expected shape {expected:?}, got {actual:?}"
        )));
    }
    Ok(())
}

/// Fail with `ShapeMismatch` unless the tensor has exactly `rank` dimensions.
pub fn expect_rank(what: &str, shape: &[usize], rank: usize) -> Result<()> {
    if shape.len() != rank {
        return Err(Error::shape(format!(
            "{what}: expected rank {rank}, got shape {shape:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strides_are_row_major() {
        assert_eq!(default_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(default_strides(&[]), Vec::<usize>::new());
    }

    #[test]
    fn scalar_has_size_one() {
        assert_eq!(compute_size(&[]), 1);
        assert_eq!(required_elements(&[], &[]), Some(1));
    }

    #[test]
    fn required_elements_follows_strides() {
        // Transposed 2x3 view over a 3x2 buffer.
        assert_eq!(required_elements(&[2, 3], &[1, 2]), Some(6));
        // Broadcast view: stride 0 along the first axis.
        assert_eq!(required_elements(&[4, 3], &[0, 1]), Some(3));
        assert_eq!(required_elements(&[4, 0], &[1, 1]), Some(0));
    }

    #[test]
    fn huge_strides_are_buffer_too_small() {
        assert_eq!(required_elements(&[3, 2], &[usize::MAX, 1]), None);
        assert_eq!(required_elements(&[2, 2], &[usize::MAX, 1]), None);
        let err = check_buffer(64, DataType::Float32, &[2], &[usize::MAX / 2]).unwrap_err();
        assert!(
            matches!(err, Error::BufferTooSmall { available: 64, .. }),
            "got: {err}"
        );
    }

    #[test]
    fn check_buffer_rejects_short_buffer() {
        let err = check_buffer(8, DataType::Float32, &[3], &[1]).unwrap_err();
        assert!(
            matches!(err, Error::BufferTooSmall { required: 12, available: 8 }),
            "got: {err}"
        );
    }

    #[test]
    fn check_buffer_rejects_rank_mismatch() {
        let err = check_buffer(64, DataType::UInt8, &[2, 2], &[1]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)), "got: {err}");
    }

    #[test]
    fn apply_visits_row_major() {
        let mut seen = Vec::new();
        apply(&[2, 2], |idx| {
            seen.push(idx.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }

    #[test]
    fn apply_stops_at_first_error() {
        let mut calls = 0;
        let result = apply(&[10], |_| {
            calls += 1;
            if calls == 3 {
                Err(Error::shape("stop"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn contiguity_ignores_unit_dims() {
        assert!(is_contiguous(&[1, 4], &[0, 1]));
        assert!(!is_contiguous(&[2, 3], &[1, 2]));
    }

    #[test]
    fn broadcast_aligns_trailing_dims() {
        assert_eq!(broadcast_shape(&[2, 1, 3], &[4, 1]).unwrap(), vec![2, 4, 3]);
        assert!(broadcast_shape(&[2, 3], &[4]).is_err());

        let mut idx = Vec::new();
        broadcast_index(&[1, 3, 2], &[4, 1], &mut idx);
        assert_eq!(idx, vec![3, 0]);
    }

    #[test]
    fn unaligned_load_store() {
        let mut buf = [0u8; 9];
        store(&mut buf[1..], 1, 2.5f32);
        assert_eq!(load::<f32>(&buf[1..], 1), 2.5);
    }
}
