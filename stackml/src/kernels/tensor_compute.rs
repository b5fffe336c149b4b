//! Data-movement kernels. None of these look at element values (except
//! `convert`), so they dispatch on byte width and move `u8`/`u16`/`u32`.

use bytemuck::Pod;

use super::{PadMode, Padding};
use crate::datatype::{dispatch_by_width, with_element_type, DataType, Element};
use crate::error::{Error, Result};
use crate::tensor::{self, expect_rank, expect_same_shape, Shape, TensorMut, TensorRef};

/// Resolve a possibly negative index read from a tensor against `dim`.
fn resolve_index(raw: i64, dim: usize) -> Result<usize> {
    let resolved = if raw < 0 { raw + dim as i64 } else { raw };
    if resolved < 0 || resolved >= dim as i64 {
        return Err(Error::IndexOutOfRange { index: raw, dim });
    }
    Ok(resolved as usize)
}

// ============================================================================
// Gather
// ============================================================================

/// Gather slices of `input` along `axis`.
///
/// - `indices`: int32, any shape; negative values count from the end
/// - `output`: `input[..axis] ++ indices.shape ++ input[axis+1..]`
pub fn gather(
    input: TensorRef<'_>,
    indices: TensorRef<'_>,
    output: TensorMut<'_>,
    axis: usize,
) -> Result<()> {
    indices.expect_datatype(DataType::Int32)?;
    output.expect_datatype(input.datatype)?;
    if axis >= input.rank() {
        return Err(Error::shape(format!(
            "gather axis {axis} out of range for input {:?}",
            input.shape
        )));
    }
    let mut expected: Shape = input.shape[..axis].to_vec();
    expected.extend_from_slice(indices.shape);
    expected.extend_from_slice(&input.shape[axis + 1..]);
    expect_same_shape("gather output", &expected, output.shape)?;

    dispatch_by_width!(input.datatype, T => gather_impl::<T>(input, indices, output, axis))
}

fn gather_impl<T: Pod>(
    input: TensorRef<'_>,
    indices: TensorRef<'_>,
    mut output: TensorMut<'_>,
    axis: usize,
) -> Result<()> {
    let indices_rank = indices.rank();
    let dim = input.shape[axis];
    let mut in_index = vec![0usize; input.rank()];
    let out_shape = output.shape;
    tensor::apply(out_shape, |out_index| {
        in_index[..axis].copy_from_slice(&out_index[..axis]);
        let raw: i32 = indices.get(&out_index[axis..axis + indices_rank]);
        in_index[axis] = resolve_index(raw as i64, dim)?;
        in_index[axis + 1..].copy_from_slice(&out_index[axis + indices_rank..]);
        let value: T = input.get(&in_index);
        output.set(out_index, value);
        Ok(())
    })
}

/// Gather with multi-dimensional index tuples.
///
/// The last dimension of `indices` holds tuples of `k` coordinates. For each
/// output index: the first `batch_dims` components address both `input` and
/// `indices`, the components up to `rank(indices) - 1` address only
/// `indices`, the `k` coordinates read there come next in the input index,
/// and the remaining output components are copied as trailing input
/// components.
///
/// - `indices`: int32, rank >= 1, `indices[..batch_dims] == input[..batch_dims]`
/// - `output`: `indices[..rank-1] ++ input[batch_dims + k..]`
pub fn gather_nd(
    input: TensorRef<'_>,
    indices: TensorRef<'_>,
    output: TensorMut<'_>,
    batch_dims: usize,
) -> Result<()> {
    indices.expect_datatype(DataType::Int32)?;
    output.expect_datatype(input.datatype)?;
    let expected = gather_nd_shape(input.shape, indices.shape, batch_dims)?;
    expect_same_shape("gather_nd output", &expected, output.shape)?;

    dispatch_by_width!(input.datatype, T => gather_nd_impl::<T>(input, indices, output, batch_dims))
}

/// Output shape of `gather_nd`, validating the batch and tuple dimensions.
pub fn gather_nd_shape(
    in_shape: &[usize],
    indices_shape: &[usize],
    batch_dims: usize,
) -> Result<Shape> {
    let Some((&k, leading)) = indices_shape.split_last() else {
        return Err(Error::shape("gather_nd indices must have rank >= 1"));
    };
    if batch_dims > leading.len() || batch_dims + k > in_shape.len() {
        return Err(Error::shape(format!(
            "gather_nd: batch_dims {batch_dims} with indices {indices_shape:?} \
             does not fit input {in_shape:?}"
        )));
    }
    if in_shape[..batch_dims] != indices_shape[..batch_dims] {
        return Err(Error::shape(format!(
            "gather_nd: batch dimensions differ between input {in_shape:?} and indices {indices_shape:?}"
        )));
    }
    let mut shape = leading.to_vec();
    shape.extend_from_slice(&in_shape[batch_dims + k..]);
    Ok(shape)
}

fn gather_nd_impl<T: Pod>(
    input: TensorRef<'_>,
    indices: TensorRef<'_>,
    mut output: TensorMut<'_>,
    batch_dims: usize,
) -> Result<()> {
    let last = indices.rank() - 1;
    let k = indices.shape[last];
    let mut in_index = vec![0usize; input.rank()];
    let mut indices_index = vec![0usize; indices.rank()];
    let out_shape = output.shape;
    tensor::apply(out_shape, |out_index| {
        in_index[..batch_dims].copy_from_slice(&out_index[..batch_dims]);
        indices_index[..last].copy_from_slice(&out_index[..last]);
        for i in 0..k {
            indices_index[last] = i;
            let raw: i32 = indices.get(&indices_index);
            in_index[batch_dims + i] = resolve_index(raw as i64, input.shape[batch_dims + i])?;
        }
        in_index[batch_dims + k..].copy_from_slice(&out_index[last..]);
        let value: T = input.get(&in_index);
        output.set(out_index, value);
        Ok(())
    })
}

// ============================================================================
// Slice / transpose / concat
// ============================================================================

/// Python-style range over one axis: returns the first source index and the
/// element count. `stride` may be negative but not zero.
pub fn slice_range(dim: usize, begin: i64, end: i64, stride: i64) -> Result<(i64, usize)> {
    if stride == 0 {
        return Err(Error::shape("slice stride must be non-zero"));
    }
    let n = dim as i64;
    let normalize = |v: i64| if v < 0 { v + n } else { v };
    let (lo, hi) = if stride > 0 { (0, n) } else { (-1, n - 1) };
    let start = normalize(begin).clamp(lo, hi);
    let stop = normalize(end).clamp(lo, hi);
    let span = if stride > 0 { stop - start } else { start - stop };
    let step = stride.unsigned_abs();
    let len = if span <= 0 { 0 } else { (span as u64).div_ceil(step) };
    Ok((start, len as usize))
}

/// `output[i] = input[begin + i * stride]` per axis.
///
/// - `begin`, `end`, `strides`: one entry per input axis
pub fn slice(
    input: TensorRef<'_>,
    output: TensorMut<'_>,
    begin: &[i64],
    end: &[i64],
    strides: &[i64],
) -> Result<()> {
    output.expect_datatype(input.datatype)?;
    let rank = input.rank();
    if begin.len() != rank || end.len() != rank || strides.len() != rank {
        return Err(Error::shape(format!(
            "slice needs {rank} begin/end/stride entries, got {}/{}/{}",
            begin.len(),
            end.len(),
            strides.len()
        )));
    }
    let mut starts = Vec::with_capacity(rank);
    let mut expected = Vec::with_capacity(rank);
    for d in 0..rank {
        let (start, len) = slice_range(input.shape[d], begin[d], end[d], strides[d])?;
        starts.push(start);
        expected.push(len);
    }
    expect_same_shape("slice output", &expected, output.shape)?;

    dispatch_by_width!(input.datatype, T => slice_impl::<T>(input, output, &starts, strides))
}

fn slice_impl<T: Pod>(
    input: TensorRef<'_>,
    mut output: TensorMut<'_>,
    starts: &[i64],
    strides: &[i64],
) -> Result<()> {
    let mut in_index = vec![0usize; input.rank()];
    let out_shape = output.shape;
    tensor::apply(out_shape, |out_index| {
        for d in 0..in_index.len() {
            in_index[d] = (starts[d] + out_index[d] as i64 * strides[d]) as usize;
        }
        let value: T = input.get(&in_index);
        output.set(out_index, value);
        Ok(())
    })
}

/// `output[i_0, .., i_n] = input[j]` where `j[perm[d]] = i_d`.
pub fn transpose(input: TensorRef<'_>, output: TensorMut<'_>, perm: &[usize]) -> Result<()> {
    output.expect_datatype(input.datatype)?;
    let mut seen = vec![false; input.rank()];
    if perm.len() != input.rank() {
        return Err(Error::shape(format!(
            "transpose perm {perm:?} does not match input rank {}",
            input.rank()
        )));
    }
    for &p in perm {
        if p >= seen.len() || seen[p] {
            return Err(Error::shape(format!("{perm:?} is not a permutation")));
        }
        seen[p] = true;
    }
    let expected: Shape = perm.iter().map(|&p| input.shape[p]).collect();
    expect_same_shape("transpose output", &expected, output.shape)?;

    dispatch_by_width!(input.datatype, T => transpose_impl::<T>(input, output, perm))
}

fn transpose_impl<T: Pod>(input: TensorRef<'_>, mut output: TensorMut<'_>, perm: &[usize]) -> Result<()> {
    let mut in_index = vec![0usize; input.rank()];
    let out_shape = output.shape;
    tensor::apply(out_shape, |out_index| {
        for (d, &p) in perm.iter().enumerate() {
            in_index[p] = out_index[d];
        }
        let value: T = input.get(&in_index);
        output.set(out_index, value);
        Ok(())
    })
}

/// Concatenate `inputs` along `axis`.
///
/// - `concat_dims`: extent of each input along `axis`
pub fn concat(
    inputs: &[TensorRef<'_>],
    output: TensorMut<'_>,
    axis: usize,
    concat_dims: &[usize],
) -> Result<()> {
    if inputs.len() != concat_dims.len() {
        return Err(Error::shape(format!(
            "concat has {} inputs but {} extents",
            inputs.len(),
            concat_dims.len()
        )));
    }
    if axis >= output.rank() {
        return Err(Error::shape(format!(
            "concat axis {axis} out of range for output {:?}",
            output.shape
        )));
    }
    for (input, &extent) in inputs.iter().zip(concat_dims) {
        output.expect_datatype(input.datatype)?;
        let mut expected = output.shape.to_vec();
        expected[axis] = extent;
        expect_same_shape("concat input", &expected, input.shape)?;
    }
    let total: usize = concat_dims.iter().sum();
    if total != output.shape[axis] {
        return Err(Error::shape(format!(
            "concat extents {concat_dims:?} do not sum to output dim {}",
            output.shape[axis]
        )));
    }

    dispatch_by_width!(output.datatype, T => concat_impl::<T>(inputs, output, axis))
}

fn concat_impl<T: Pod>(inputs: &[TensorRef<'_>], mut output: TensorMut<'_>, axis: usize) -> Result<()> {
    let mut base = 0;
    let mut out_index = vec![0usize; output.rank()];
    for input in inputs {
        tensor::apply(input.shape, |in_index| {
            out_index.copy_from_slice(in_index);
            out_index[axis] += base;
            let value: T = input.get(in_index);
            output.set(&out_index, value);
            Ok(())
        })?;
        base += input.shape[axis];
    }
    Ok(())
}

// ============================================================================
// Pad / batch_to_space
// ============================================================================

/// Map an output coordinate back to a source coordinate, or `None` when it
/// falls into a constant-filled region.
fn pad_source(i: i64, n: i64, mode: PadMode) -> Option<usize> {
    if (0..n).contains(&i) {
        return Some(i as usize);
    }
    let mapped = match mode {
        PadMode::Constant => return None,
        // Fold into one period, then mirror the upper half back.
        PadMode::Reflect if n == 1 => 0,
        PadMode::Reflect => {
            let period = 2 * (n - 1);
            let j = i.rem_euclid(period);
            if j < n {
                j
            } else {
                period - j
            }
        }
        PadMode::Symmetric => {
            let period = 2 * n;
            let j = i.rem_euclid(period);
            if j < n {
                j
            } else {
                period - 1 - j
            }
        }
        PadMode::Edge => i,
    };
    Some(mapped.clamp(0, n - 1) as usize)
}

/// Pad (or, with negative paddings, crop) every axis.
///
/// - `paddings`: one entry per input axis
/// - `pad_value`: fill for `PadMode::Constant`, converted to the element type
pub fn pad(
    input: TensorRef<'_>,
    output: TensorMut<'_>,
    paddings: &[Padding],
    mode: PadMode,
    pad_value: f64,
) -> Result<()> {
    output.expect_datatype(input.datatype)?;
    let expected = pad_shape(input.shape, paddings)?;
    expect_same_shape("pad output", &expected, output.shape)?;
    if mode != PadMode::Constant && input.shape.contains(&0) && output.size() > 0 {
        return Err(Error::shape(format!(
            "{mode:?} padding needs a non-empty input, got {:?}",
            input.shape
        )));
    }
    let fill = input.datatype.scalar_bytes(pad_value)?;

    dispatch_by_width!(input.datatype, T => pad_impl::<T>(input, output, paddings, mode, &fill))
}

/// Output shape of `pad`.
pub fn pad_shape(in_shape: &[usize], paddings: &[Padding]) -> Result<Shape> {
    if paddings.len() != in_shape.len() {
        return Err(Error::shape(format!(
            "pad needs {} paddings, got {}",
            in_shape.len(),
            paddings.len()
        )));
    }
    in_shape
        .iter()
        .zip(paddings)
        .map(|(&dim, p)| {
            let padded = dim as i64 + p.before as i64 + p.after as i64;
            if padded < 0 {
                Err(Error::shape(format!("padding {p:?} crops past dimension {dim}")))
            } else {
                Ok(padded as usize)
            }
        })
        .collect()
}

fn pad_impl<T: Pod>(
    input: TensorRef<'_>,
    mut output: TensorMut<'_>,
    paddings: &[Padding],
    mode: PadMode,
    fill: &[u8],
) -> Result<()> {
    let fill: T = bytemuck::pod_read_unaligned(fill);
    let mut in_index = vec![0usize; input.rank()];
    let out_shape = output.shape;
    tensor::apply(out_shape, |out_index| {
        let mut inside = true;
        for d in 0..in_index.len() {
            let i = out_index[d] as i64 - paddings[d].before as i64;
            match pad_source(i, input.shape[d] as i64, mode) {
                Some(src) => in_index[d] = src,
                None => {
                    inside = false;
                    break;
                }
            }
        }
        let value: T = if inside { input.get(&in_index) } else { fill };
        output.set(out_index, value);
        Ok(())
    })
}

/// Rearrange blocks of the batch dimension back into height and width (NCHW).
///
/// - `input`: [N * block_h * block_w, C, H, W]
/// - `output`: [N, C, H * block_h - crop_h, W * block_w - crop_w]
pub fn batch_to_space(
    input: TensorRef<'_>,
    output: TensorMut<'_>,
    block_h: usize,
    block_w: usize,
    crop_h: Padding,
    crop_w: Padding,
) -> Result<()> {
    output.expect_datatype(input.datatype)?;
    let expected = batch_to_space_shape(input.shape, block_h, block_w, crop_h, crop_w)?;
    expect_same_shape("batch_to_space output", &expected, output.shape)?;

    dispatch_by_width!(input.datatype, T => batch_to_space_impl::<T>(input, output, block_h, block_w, crop_h, crop_w))
}

/// Output shape of `batch_to_space`.
pub fn batch_to_space_shape(
    in_shape: &[usize],
    block_h: usize,
    block_w: usize,
    crop_h: Padding,
    crop_w: Padding,
) -> Result<Shape> {
    expect_rank("batch_to_space input", in_shape, 4)?;
    let blocks = block_h * block_w;
    if blocks == 0 || in_shape[0] % blocks != 0 {
        return Err(Error::shape(format!(
            "batch {} is not divisible by block {block_h}x{block_w}",
            in_shape[0]
        )));
    }
    if crop_h.before < 0 || crop_h.after < 0 || crop_w.before < 0 || crop_w.after < 0 {
        return Err(Error::shape("batch_to_space crops must be non-negative"));
    }
    let full_h = (in_shape[2] * block_h) as i64;
    let full_w = (in_shape[3] * block_w) as i64;
    let out_h = full_h - crop_h.sum() as i64;
    let out_w = full_w - crop_w.sum() as i64;
    if out_h < 0 || out_w < 0 {
        return Err(Error::shape("batch_to_space crops exceed the spatial size"));
    }
    Ok(vec![in_shape[0] / blocks, in_shape[1], out_h as usize, out_w as usize])
}

fn batch_to_space_impl<T: Pod>(
    input: TensorRef<'_>,
    mut output: TensorMut<'_>,
    block_h: usize,
    block_w: usize,
    crop_h: Padding,
    crop_w: Padding,
) -> Result<()> {
    let out_batch = output.shape[0];
    let out_shape = output.shape;
    tensor::apply(out_shape, |out_index| {
        let [n, c, oh, ow] = [out_index[0], out_index[1], out_index[2], out_index[3]];
        let h = oh + crop_h.before as usize;
        let w = ow + crop_w.before as usize;
        let block = (h % block_h) * block_w + w % block_w;
        let in_index = [block * out_batch + n, c, h / block_h, w / block_w];
        let value: T = input.get(&in_index);
        output.set(out_index, value);
        Ok(())
    })
}

// ============================================================================
// Bitcast / convert
// ============================================================================

/// Reinterpret the bytes of a dense tensor under another datatype or shape.
pub fn bitcast(input: TensorRef<'_>, output: TensorMut<'_>) -> Result<()> {
    if !input.is_contiguous() || !output.is_contiguous() {
        return Err(Error::shape("bitcast needs contiguous views"));
    }
    let in_bytes = input.size() * input.datatype.size_in_bytes();
    let out_bytes = output.size() * output.datatype.size_in_bytes();
    if in_bytes != out_bytes {
        return Err(Error::shape(format!(
            "bitcast of {in_bytes} bytes into {out_bytes} bytes"
        )));
    }
    output.data[..out_bytes].copy_from_slice(&input.data[..in_bytes]);
    Ok(())
}

/// Convert every element to the output datatype through `f64`. Integer
/// targets truncate toward zero and saturate.
pub fn convert(input: TensorRef<'_>, output: TensorMut<'_>) -> Result<()> {
    expect_same_shape("convert output", input.shape, output.shape)?;
    let out_type = output.datatype;
    with_element_type!(input.datatype, I => {
        with_element_type!(out_type, O => convert_impl::<I, O>(input, output))
    })
}

fn convert_impl<I: Element, O: Element>(input: TensorRef<'_>, mut output: TensorMut<'_>) -> Result<()> {
    let shape = input.shape;
    tensor::apply(shape, |index| {
        let value: I = input.get(index);
        output.set(index, O::from_f64(value.to_f64()));
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::default_strides;

    fn view<'a>(data: &'a [u8], dt: DataType, shape: &'a [usize], strides: &'a [usize]) -> TensorRef<'a> {
        TensorRef::new(data, dt, shape, strides).unwrap()
    }

    #[test]
    fn gather_nd_picks_diagonal() {
        let input: Vec<u8> = bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]).to_vec();
        let indices: Vec<u8> = bytemuck::cast_slice(&[0i32, 0, 1, 1]).to_vec();
        let mut out = vec![0u8; 8];
        gather_nd(
            view(&input, DataType::Float32, &[2, 2], &[2, 1]),
            view(&indices, DataType::Int32, &[2, 2], &[2, 1]),
            TensorMut::new(&mut out, DataType::Float32, &[2], &[1]).unwrap(),
            0,
        )
        .unwrap();
        let values: Vec<f32> = out
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(values, vec![1.0, 4.0]);
    }

    #[test]
    fn gather_nd_with_batch_dims_and_trailing_block() {
        // input [2, 3, 2]; per batch pick one row of 2
        let input: Vec<u8> = (0u8..12).collect();
        let indices: Vec<u8> = bytemuck::cast_slice(&[2i32, 0]).to_vec();
        let mut out = vec![0u8; 4];
        gather_nd(
            view(&input, DataType::UInt8, &[2, 3, 2], &[6, 2, 1]),
            view(&indices, DataType::Int32, &[2, 1], &[1, 1]),
            TensorMut::new(&mut out, DataType::UInt8, &[2, 2], &[2, 1]).unwrap(),
            1,
        )
        .unwrap();
        assert_eq!(out, vec![4, 5, 6, 7]);
    }

    #[test]
    fn gather_rejects_out_of_range_index() {
        let input = [1u8, 2, 3];
        let indices: Vec<u8> = bytemuck::cast_slice(&[3i32]).to_vec();
        let mut out = [0u8; 1];
        let err = gather(
            view(&input, DataType::UInt8, &[3], &[1]),
            view(&indices, DataType::Int32, &[1], &[1]),
            TensorMut::new(&mut out, DataType::UInt8, &[1], &[1]).unwrap(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 3, dim: 3 }), "got: {err}");
    }

    #[test]
    fn slice_ranges_follow_python() {
        assert_eq!(slice_range(5, 0, 5, 2).unwrap(), (0, 3));
        assert_eq!(slice_range(5, -1, -6, -1).unwrap(), (4, 5));
        assert_eq!(slice_range(5, 4, 0, -2).unwrap(), (4, 2));
        assert_eq!(slice_range(5, 3, 1, 1).unwrap(), (3, 0));
        assert!(slice_range(5, 0, 1, 0).is_err());
    }

    #[test]
    fn slice_ranges_with_extreme_strides() {
        assert_eq!(slice_range(5, 0, 5, i64::MAX).unwrap(), (0, 1));
        assert_eq!(slice_range(5, 4, -6, i64::MIN).unwrap(), (4, 1));
        assert_eq!(slice_range(5, i64::MIN, i64::MAX, i64::MAX).unwrap(), (0, 1));
        assert_eq!(slice_range(5, i64::MAX, i64::MIN, i64::MIN).unwrap(), (4, 1));
    }

    #[test]
    fn slice_with_negative_stride_reverses() {
        let input = [1u8, 2, 3, 4, 5];
        let mut out = [0u8; 5];
        slice(
            view(&input, DataType::UInt8, &[5], &[1]),
            TensorMut::new(&mut out, DataType::UInt8, &[5], &[1]).unwrap(),
            &[-1],
            &[i64::MIN / 2],
            &[-1],
        )
        .unwrap();
        assert_eq!(out, [5, 4, 3, 2, 1]);
    }

    #[test]
    fn transpose_rejects_non_permutation() {
        let input = [0u8; 4];
        let mut out = [0u8; 4];
        let err = transpose(
            view(&input, DataType::UInt8, &[2, 2], &[2, 1]),
            TensorMut::new(&mut out, DataType::UInt8, &[2, 2], &[2, 1]).unwrap(),
            &[0, 0],
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a permutation"), "got: {err}");
    }

    #[test]
    fn concat_along_last_axis() {
        let a = [1u8, 2, 3, 4];
        let b = [9u8, 8];
        let mut out = [0u8; 6];
        concat(
            &[
                view(&a, DataType::UInt8, &[2, 2], &[2, 1]),
                view(&b, DataType::UInt8, &[2, 1], &[1, 1]),
            ],
            TensorMut::new(&mut out, DataType::UInt8, &[2, 3], &[3, 1]).unwrap(),
            1,
            &[2, 1],
        )
        .unwrap();
        assert_eq!(out, [1, 2, 9, 3, 4, 8]);
    }

    #[test]
    fn pad_modes() {
        let input = [1u8, 2, 3];
        let shape = [3];
        let strides = [1];
        let run = |mode: PadMode| {
            let mut out = [0u8; 7];
            pad(
                view(&input, DataType::UInt8, &shape, &strides),
                TensorMut::new(&mut out, DataType::UInt8, &[7], &[1]).unwrap(),
                &[Padding::new(2, 2)],
                mode,
                7.0,
            )
            .unwrap();
            out
        };
        assert_eq!(run(PadMode::Constant), [7, 7, 1, 2, 3, 7, 7]);
        assert_eq!(run(PadMode::Reflect), [3, 2, 1, 2, 3, 2, 1]);
        assert_eq!(run(PadMode::Symmetric), [2, 1, 1, 2, 3, 3, 2]);
        assert_eq!(run(PadMode::Edge), [1, 1, 1, 2, 3, 3, 3]);
    }

    #[test]
    fn mirrored_padding_wider_than_the_axis_keeps_folding() {
        let input = [1u8, 2];
        let run = |mode: PadMode| {
            let mut out = [0u8; 8];
            pad(
                view(&input, DataType::UInt8, &[2], &[1]),
                TensorMut::new(&mut out, DataType::UInt8, &[8], &[1]).unwrap(),
                &[Padding::new(3, 3)],
                mode,
                0.0,
            )
            .unwrap();
            out
        };
        assert_eq!(run(PadMode::Reflect), [2, 1, 2, 1, 2, 1, 2, 1]);
        assert_eq!(run(PadMode::Symmetric), [2, 2, 1, 1, 2, 2, 1, 1]);

        let single = [5u8];
        let mut out = [0u8; 5];
        pad(
            view(&single, DataType::UInt8, &[1], &[1]),
            TensorMut::new(&mut out, DataType::UInt8, &[5], &[1]).unwrap(),
            &[Padding::new(2, 2)],
            PadMode::Reflect,
            0.0,
        )
        .unwrap();
        assert_eq!(out, [5; 5]);
    }

    #[test]
    fn bitcast_reinterprets_bytes() {
        let input: Vec<u8> = bytemuck::cast_slice(&[1.0f32, -2.0]).to_vec();
        let mut out = vec![0u8; 8];
        bitcast(
            view(&input, DataType::Float32, &[2], &[1]),
            TensorMut::new(&mut out, DataType::UInt32, &[2], &[1]).unwrap(),
        )
        .unwrap();
        let bits: Vec<u32> = out
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(bits, vec![1.0f32.to_bits(), (-2.0f32).to_bits()]);

        let err = bitcast(
            view(&input, DataType::Float32, &[2], &[1]),
            TensorMut::new(&mut out[..4], DataType::UInt32, &[1], &[1]).unwrap(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("bitcast of 8 bytes"), "got: {err}");
    }

    #[test]
    fn negative_padding_crops() {
        let input = [1u8, 2, 3, 4];
        let mut out = [0u8; 2];
        pad(
            view(&input, DataType::UInt8, &[4], &[1]),
            TensorMut::new(&mut out, DataType::UInt8, &[2], &[1]).unwrap(),
            &[Padding::new(-1, -1)],
            PadMode::Constant,
            0.0,
        )
        .unwrap();
        assert_eq!(out, [2, 3]);
    }

    #[test]
    fn batch_to_space_interleaves_blocks() {
        // 4 batches of 1x1x1 -> one 2x2 image
        let input = [1u8, 2, 3, 4];
        let mut out = [0u8; 4];
        let in_shape = [4, 1, 1, 1];
        let in_strides = default_strides(&in_shape);
        batch_to_space(
            view(&input, DataType::UInt8, &in_shape, &in_strides),
            TensorMut::new(&mut out, DataType::UInt8, &[1, 1, 2, 2], &[4, 4, 2, 1]).unwrap(),
            2,
            2,
            Padding::default(),
            Padding::default(),
        )
        .unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn convert_saturates() {
        let input: Vec<u8> = bytemuck::cast_slice(&[-3.7f32, 1.9, 300.0]).to_vec();
        let mut out = [0u8; 3];
        convert(
            view(&input, DataType::Float32, &[3], &[1]),
            TensorMut::new(&mut out, DataType::UInt8, &[3], &[1]).unwrap(),
        )
        .unwrap();
        assert_eq!(out, [0, 1, 255]);
    }

    #[test]
    fn eight_byte_types_are_unsupported() {
        let input = [0u8; 16];
        let mut out = [0u8; 16];
        let err = transpose(
            view(&input, DataType::Float64, &[2], &[1]),
            TensorMut::new(&mut out, DataType::Float64, &[2], &[1]).unwrap(),
            &[0],
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedDataType(DataType::Float64)), "got: {err}");
    }
}
