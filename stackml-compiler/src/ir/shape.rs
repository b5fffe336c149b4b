//! Output-shape inference for graph builders.
//!
//! The kernels check the same rules at run time; these helpers let a graph be
//! typed before anything is allocated.

use stackml::kernels::{slice_range, Conv2dParams};
use stackml::tensor::Shape;

use crate::error::{Error, Result};

pub use stackml::kernels::nn::{conv_output_size as conv2d_output_size, reduce_shape};
pub use stackml::kernels::tensor_compute::{batch_to_space_shape, gather_nd_shape, pad_shape};
pub use stackml::tensor::broadcast_shape;

pub fn slice_shape(in_shape: &[usize], begin: &[i64], end: &[i64], strides: &[i64]) -> Result<Shape> {
    let rank = in_shape.len();
    if begin.len() != rank || end.len() != rank || strides.len() != rank {
        return Err(Error::graph(format!(
            "slice of rank {rank} needs {rank} begin/end/stride entries"
        )));
    }
    (0..rank)
        .map(|d| Ok(slice_range(in_shape[d], begin[d], end[d], strides[d])?.1))
        .collect()
}

pub fn transpose_shape(in_shape: &[usize], perm: &[usize]) -> Result<Shape> {
    let mut seen = vec![false; in_shape.len()];
    if perm.len() != in_shape.len() {
        return Err(Error::graph(format!("{perm:?} does not match rank {}", in_shape.len())));
    }
    for &p in perm {
        if p >= seen.len() || std::mem::replace(&mut seen[p], true) {
            return Err(Error::graph(format!("{perm:?} is not a permutation")));
        }
    }
    Ok(perm.iter().map(|&p| in_shape[p]).collect())
}

/// `in[..axis] ++ indices ++ in[axis + 1..]`
pub fn gather_shape(in_shape: &[usize], indices_shape: &[usize], axis: usize) -> Result<Shape> {
    if axis >= in_shape.len() {
        return Err(Error::graph(format!("gather axis {axis} out of range for {in_shape:?}")));
    }
    let mut shape = in_shape[..axis].to_vec();
    shape.extend_from_slice(indices_shape);
    shape.extend_from_slice(&in_shape[axis + 1..]);
    Ok(shape)
}

/// NCHW output of a convolution with weights `[OC, IC/groups, KH, KW]`.
pub fn conv2d_shape(in_shape: &[usize], weights_shape: &[usize], params: &Conv2dParams) -> Result<Shape> {
    let (&[n, _, h, w], &[oc, _, kh, kw]) = (in_shape, weights_shape) else {
        return Err(Error::graph(format!(
            "conv2d needs rank-4 input and weights, got {in_shape:?} and {weights_shape:?}"
        )));
    };
    Ok(vec![
        n,
        oc,
        conv2d_output_size(h, kh, params.stride_h, params.dilation_h, params.padding_h)?,
        conv2d_output_size(w, kw, params.stride_w, params.dilation_w, params.padding_w)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackml::kernels::Padding;

    #[test]
    fn slice_with_negative_stride() {
        assert_eq!(slice_shape(&[5, 4], &[-1, 0], &[-6, 4], &[-2, 1]).unwrap(), vec![3, 4]);
    }

    #[test]
    fn slice_with_extreme_strides() {
        assert_eq!(
            slice_shape(&[5, 3], &[0, 2], &[5, -4], &[i64::MAX, i64::MIN]).unwrap(),
            vec![1, 1]
        );
    }

    #[test]
    fn transpose_rejects_repeats() {
        assert_eq!(transpose_shape(&[2, 3, 4], &[2, 0, 1]).unwrap(), vec![4, 2, 3]);
        assert!(transpose_shape(&[2, 3], &[1, 1]).is_err());
    }

    #[test]
    fn gather_splices_indices() {
        assert_eq!(gather_shape(&[4, 5, 6], &[2, 3], 1).unwrap(), vec![4, 2, 3, 6]);
    }

    #[test]
    fn conv2d_padded_strided() {
        let params = Conv2dParams {
            padding_h: Padding::new(1, 1),
            padding_w: Padding::new(1, 1),
            stride_h: 2,
            stride_w: 2,
            ..Default::default()
        };
        assert_eq!(conv2d_shape(&[1, 3, 8, 8], &[16, 3, 3, 3], &params).unwrap(), vec![1, 16, 4, 4]);
    }
}
