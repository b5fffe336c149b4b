//! Neural-network kernels (NCHW, f32) and image resize.
//!
//! Convolutions compute each output element independently from the input,
//! so every routine here can be split across the output index space.

use bytemuck::Pod;

use super::{Conv2dParams, Padding, ReduceOp, ReduceWindow2dParams, ValueRange};
use crate::datatype::{dispatch_by_width, DataType};
use crate::error::{Error, Result};
use crate::tensor::{self, expect_rank, expect_same_shape, Shape, TensorMut, TensorRef};

/// Spatial output extent of a convolution or pooling window.
pub fn conv_output_size(
    input: usize,
    filter: usize,
    stride: usize,
    dilation: usize,
    padding: Padding,
) -> Result<usize> {
    if stride == 0 || dilation == 0 || filter == 0 {
        return Err(Error::shape("filter, stride and dilation must be positive"));
    }
    let padded = input as i64 + padding.sum() as i64;
    let window = (dilation * (filter - 1) + 1) as i64;
    if padded < window {
        return Err(Error::shape(format!(
            "window of {window} does not fit padded input of {padded}"
        )));
    }
    Ok(((padded - window) / stride as i64 + 1) as usize)
}

fn expect_f32(tensors: &[&TensorRef<'_>], output: &TensorMut<'_>) -> Result<()> {
    for t in tensors {
        t.expect_datatype(DataType::Float32)?;
    }
    output.expect_datatype(DataType::Float32)
}

/// Coordinate of output step `o` along an input axis, or `None` in padding.
#[inline]
fn tap(o: usize, stride: usize, k: usize, dilation: usize, pad_before: i32, size: usize) -> Option<usize> {
    let i = (o * stride + k * dilation) as i64 - pad_before as i64;
    if i >= 0 && (i as usize) < size {
        Some(i as usize)
    } else {
        None
    }
}

// ============================================================================
// Convolution
// ============================================================================

/// 2D convolution, NCHW.
///
/// - `input`:   [N, IC, H, W]
/// - `weights`: [OC, IC / groups, KH, KW]
/// - `bias`:    [OC]
/// - `output`:  [N, OC, OH, OW]
pub fn conv2d(
    input: TensorRef<'_>,
    weights: TensorRef<'_>,
    bias: TensorRef<'_>,
    mut output: TensorMut<'_>,
    params: &Conv2dParams,
) -> Result<()> {
    expect_f32(&[&input, &weights, &bias], &output)?;
    expect_rank("conv2d input", input.shape, 4)?;
    expect_rank("conv2d weights", weights.shape, 4)?;
    let [n, ic, h, w] = [input.shape[0], input.shape[1], input.shape[2], input.shape[3]];
    let [oc, icg, kh, kw] = [weights.shape[0], weights.shape[1], weights.shape[2], weights.shape[3]];
    let groups = params.groups;
    if groups == 0 || ic % groups != 0 || oc % groups != 0 || icg != ic / groups {
        return Err(Error::shape(format!(
            "conv2d: {ic} input channels, weights {:?} and {groups} groups disagree",
            weights.shape
        )));
    }
    expect_same_shape("conv2d bias", &[oc], bias.shape)?;
    let oh = conv_output_size(h, kh, params.stride_h, params.dilation_h, params.padding_h)?;
    let ow = conv_output_size(w, kw, params.stride_w, params.dilation_w, params.padding_w)?;
    expect_same_shape("conv2d output", &[n, oc, oh, ow], output.shape)?;

    let ocg = oc / groups;
    let out_shape = output.shape;
    tensor::apply(out_shape, |o| {
        let [b, oc_i, oy, ox] = [o[0], o[1], o[2], o[3]];
        let g = oc_i / ocg;
        let mut sum: f32 = bias.get(&[oc_i]);
        for ic_local in 0..icg {
            let ic_i = g * icg + ic_local;
            for ky in 0..kh {
                let Some(iy) = tap(oy, params.stride_h, ky, params.dilation_h, params.padding_h.before, h) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(ix) = tap(ox, params.stride_w, kx, params.dilation_w, params.padding_w.before, w) else {
                        continue;
                    };
                    let x: f32 = input.get(&[b, ic_i, iy, ix]);
                    let wv: f32 = weights.get(&[oc_i, ic_local, ky, kx]);
                    sum += x * wv;
                }
            }
        }
        output.set(o, params.fused_activation.apply(sum));
        Ok(())
    })
}

/// Transposed 2D convolution, NCHW, computed per output element.
///
/// - `input`:   [N, IC, H, W]
/// - `weights`: [OC, IC / groups, KH, KW]
/// - `bias`:    [OC]
/// - `output`:  [N, OC, OH, OW], shape given by the caller
///
/// Output pixel `y` receives input pixel `i` through tap `k` when
/// `i * stride + k * dilation - padding_before == y`.
pub fn conv2d_transpose(
    input: TensorRef<'_>,
    weights: TensorRef<'_>,
    bias: TensorRef<'_>,
    mut output: TensorMut<'_>,
    params: &Conv2dParams,
) -> Result<()> {
    expect_f32(&[&input, &weights, &bias], &output)?;
    expect_rank("conv2d_transpose input", input.shape, 4)?;
    expect_rank("conv2d_transpose weights", weights.shape, 4)?;
    expect_rank("conv2d_transpose output", output.shape, 4)?;
    let [n, ic, h, w] = [input.shape[0], input.shape[1], input.shape[2], input.shape[3]];
    let [oc, icg, kh, kw] = [weights.shape[0], weights.shape[1], weights.shape[2], weights.shape[3]];
    let groups = params.groups;
    if groups == 0 || ic % groups != 0 || oc % groups != 0 || icg != ic / groups {
        return Err(Error::shape(format!(
            "conv2d_transpose: {ic} input channels, weights {:?} and {groups} groups disagree",
            weights.shape
        )));
    }
    if params.stride_h == 0 || params.stride_w == 0 {
        return Err(Error::shape("conv2d_transpose stride must be positive"));
    }
    expect_same_shape("conv2d_transpose bias", &[oc], bias.shape)?;
    if output.shape[0] != n || output.shape[1] != oc {
        return Err(Error::shape(format!(
            "conv2d_transpose output {:?} does not match batch {n} and {oc} channels",
            output.shape
        )));
    }

    let ocg = oc / groups;
    let source = |o: usize, k: usize, stride: usize, dilation: usize, pad: i32, size: usize| {
        let shifted = o as i64 + pad as i64 - (k * dilation) as i64;
        if shifted < 0 || shifted % stride as i64 != 0 {
            return None;
        }
        let i = (shifted / stride as i64) as usize;
        (i < size).then_some(i)
    };
    let out_shape = output.shape;
    tensor::apply(out_shape, |o| {
        let [b, oc_i, oy, ox] = [o[0], o[1], o[2], o[3]];
        let g = oc_i / ocg;
        let mut sum: f32 = bias.get(&[oc_i]);
        for ic_local in 0..icg {
            let ic_i = g * icg + ic_local;
            for ky in 0..kh {
                let Some(iy) = source(oy, ky, params.stride_h, params.dilation_h, params.padding_h.before, h) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(ix) = source(ox, kx, params.stride_w, params.dilation_w, params.padding_w.before, w) else {
                        continue;
                    };
                    let x: f32 = input.get(&[b, ic_i, iy, ix]);
                    let wv: f32 = weights.get(&[oc_i, ic_local, ky, kx]);
                    sum += x * wv;
                }
            }
        }
        output.set(o, params.fused_activation.apply(sum));
        Ok(())
    })
}

/// `output = clamp(a @ b + bias)`
///
/// - `a`: [M, K], `b`: [K, N], `bias`: [N], `output`: [M, N]
pub fn matmul(
    a: TensorRef<'_>,
    b: TensorRef<'_>,
    bias: TensorRef<'_>,
    mut output: TensorMut<'_>,
    fused_activation: ValueRange,
) -> Result<()> {
    expect_f32(&[&a, &b, &bias], &output)?;
    expect_rank("matmul lhs", a.shape, 2)?;
    expect_rank("matmul rhs", b.shape, 2)?;
    let (m, k, n) = (a.shape[0], a.shape[1], b.shape[1]);
    if b.shape[0] != k {
        return Err(Error::shape(format!(
            "matmul inner dimensions differ: {:?} x {:?}",
            a.shape, b.shape
        )));
    }
    expect_same_shape("matmul bias", &[n], bias.shape)?;
    expect_same_shape("matmul output", &[m, n], output.shape)?;

    for i in 0..m {
        for j in 0..n {
            let mut sum: f32 = bias.get(&[j]);
            for p in 0..k {
                let x: f32 = a.get(&[i, p]);
                let y: f32 = b.get(&[p, j]);
                sum += x * y;
            }
            output.set(&[i, j], fused_activation.apply(sum));
        }
    }
    Ok(())
}

// ============================================================================
// Reductions
// ============================================================================

#[inline]
fn reduce_fold(op: ReduceOp, acc: f32, value: f32) -> f32 {
    match op {
        ReduceOp::Mean | ReduceOp::Sum => acc + value,
        ReduceOp::Min => acc.min(value),
        ReduceOp::Max => acc.max(value),
        ReduceOp::Prod => acc * value,
    }
}

/// Output shape of `reduce`. `axes` must be distinct and in range.
pub fn reduce_shape(in_shape: &[usize], axes: &[usize], keep_dims: bool) -> Result<Shape> {
    let mut reduced = vec![false; in_shape.len()];
    for &axis in axes {
        if axis >= in_shape.len() || reduced[axis] {
            return Err(Error::shape(format!(
                "invalid reduce axes {axes:?} for input {in_shape:?}"
            )));
        }
        reduced[axis] = true;
    }
    Ok(in_shape
        .iter()
        .zip(&reduced)
        .filter_map(|(&dim, &r)| match (r, keep_dims) {
            (false, _) => Some(dim),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect())
}

/// Fold `input` over `axes` starting from `init_value`. `Mean` divides the
/// folded sum by the number of reduced elements.
pub fn reduce(
    op: ReduceOp,
    input: TensorRef<'_>,
    mut output: TensorMut<'_>,
    axes: &[usize],
    init_value: f32,
    keep_dims: bool,
) -> Result<()> {
    expect_f32(&[&input], &output)?;
    let out_shape = reduce_shape(input.shape, axes, keep_dims)?;
    expect_same_shape("reduce output", &out_shape, output.shape)?;

    let out_strides = tensor::default_strides(&out_shape);
    let mut acc = vec![init_value; tensor::compute_size(&out_shape)];
    let mut out_index = Vec::with_capacity(out_shape.len());
    tensor::apply(input.shape, |index| {
        out_index.clear();
        for (d, &i) in index.iter().enumerate() {
            match (axes.contains(&d), keep_dims) {
                (false, _) => out_index.push(i),
                (true, true) => out_index.push(0),
                (true, false) => {}
            }
        }
        let slot = tensor::offset(&out_strides, &out_index);
        let value: f32 = input.get(index);
        acc[slot] = reduce_fold(op, acc[slot], value);
        Ok(())
    })?;

    let count: usize = axes.iter().map(|&a| input.shape[a]).product();
    tensor::apply(&out_shape, |index| {
        let mut value = acc[tensor::offset(&out_strides, index)];
        if op == ReduceOp::Mean && count > 0 {
            value /= count as f32;
        }
        output.set(index, value);
        Ok(())
    })
}

/// Pooling over 2D windows, NCHW. `Mean` divides by the number of in-bounds
/// taps, so padding never contributes.
///
/// - `input`:  [N, C, H, W]
/// - `output`: [N, C, OH, OW]
pub fn reduce_window2d(
    input: TensorRef<'_>,
    mut output: TensorMut<'_>,
    params: &ReduceWindow2dParams,
) -> Result<()> {
    expect_f32(&[&input], &output)?;
    expect_rank("reduce_window2d input", input.shape, 4)?;
    let [n, c, h, w] = [input.shape[0], input.shape[1], input.shape[2], input.shape[3]];
    let oh = conv_output_size(h, params.filter_h, params.stride_h, params.dilation_h, params.padding_h)?;
    let ow = conv_output_size(w, params.filter_w, params.stride_w, params.dilation_w, params.padding_w)?;
    expect_same_shape("reduce_window2d output", &[n, c, oh, ow], output.shape)?;

    let out_shape = output.shape;
    tensor::apply(out_shape, |o| {
        let [b, ch, oy, ox] = [o[0], o[1], o[2], o[3]];
        let mut acc = params.init_value;
        let mut taps = 0usize;
        for ky in 0..params.filter_h {
            let Some(iy) = tap(oy, params.stride_h, ky, params.dilation_h, params.padding_h.before, h) else {
                continue;
            };
            for kx in 0..params.filter_w {
                let Some(ix) = tap(ox, params.stride_w, kx, params.dilation_w, params.padding_w.before, w) else {
                    continue;
                };
                let value: f32 = input.get(&[b, ch, iy, ix]);
                acc = reduce_fold(params.op, acc, value);
                taps += 1;
            }
        }
        if params.op == ReduceOp::Mean && taps > 0 {
            acc /= taps as f32;
        }
        output.set(o, params.fused_activation.apply(acc));
        Ok(())
    })
}

// ============================================================================
// Resize
// ============================================================================

fn resize_scale(in_size: usize, out_size: usize, align_corners: bool) -> f32 {
    if align_corners && out_size > 1 {
        (in_size as f32 - 1.0) / (out_size as f32 - 1.0)
    } else {
        in_size as f32 / out_size as f32
    }
}

fn expect_resize_shapes(input: &[usize], output: &[usize]) -> Result<()> {
    expect_rank("resize input", input, 4)?;
    expect_rank("resize output", output, 4)?;
    if input[0] != output[0] || input[1] != output[1] {
        return Err(Error::shape(format!(
            "resize keeps batch and channels: {input:?} -> {output:?}"
        )));
    }
    if input[2] == 0 || input[3] == 0 {
        return Err(Error::shape(format!("resize of empty image {input:?}")));
    }
    Ok(())
}

/// Source sample position and interpolation weights along one axis.
fn bilinear_axis(o: usize, scale: f32, half_pixel_centers: bool, in_size: usize) -> (usize, usize, f32) {
    let src = if half_pixel_centers {
        (o as f32 + 0.5) * scale - 0.5
    } else {
        o as f32 * scale
    };
    let floor = src.floor();
    let lower = floor.max(0.0) as usize;
    let upper = (src.ceil().max(0.0) as usize).min(in_size - 1);
    (lower.min(in_size - 1), upper, src - floor)
}

/// Bilinear resize, NCHW f32. The target size is the output's H and W.
pub fn resize_bilinear(
    input: TensorRef<'_>,
    mut output: TensorMut<'_>,
    align_corners: bool,
    half_pixel_centers: bool,
) -> Result<()> {
    expect_f32(&[&input], &output)?;
    expect_resize_shapes(input.shape, output.shape)?;
    let (in_h, in_w) = (input.shape[2], input.shape[3]);
    let scale_h = resize_scale(in_h, output.shape[2], align_corners);
    let scale_w = resize_scale(in_w, output.shape[3], align_corners);

    let out_shape = output.shape;
    tensor::apply(out_shape, |o| {
        let [b, c] = [o[0], o[1]];
        let (y0, y1, ly) = bilinear_axis(o[2], scale_h, half_pixel_centers, in_h);
        let (x0, x1, lx) = bilinear_axis(o[3], scale_w, half_pixel_centers, in_w);
        let tl: f32 = input.get(&[b, c, y0, x0]);
        let tr: f32 = input.get(&[b, c, y0, x1]);
        let bl: f32 = input.get(&[b, c, y1, x0]);
        let br: f32 = input.get(&[b, c, y1, x1]);
        let top = tl + (tr - tl) * lx;
        let bottom = bl + (br - bl) * lx;
        output.set(o, top + (bottom - top) * ly);
        Ok(())
    })
}

fn nearest_axis(o: usize, scale: f32, align_corners: bool, half_pixel_centers: bool, in_size: usize) -> usize {
    let src = if align_corners {
        (o as f32 * scale).round()
    } else if half_pixel_centers {
        ((o as f32 + 0.5) * scale).floor()
    } else {
        (o as f32 * scale).floor()
    };
    (src.max(0.0) as usize).min(in_size - 1)
}

/// Nearest-neighbour resize, NCHW, any 1/2/4-byte datatype.
pub fn resize_nearest_neighbor(
    input: TensorRef<'_>,
    output: TensorMut<'_>,
    align_corners: bool,
    half_pixel_centers: bool,
) -> Result<()> {
    output.expect_datatype(input.datatype)?;
    expect_resize_shapes(input.shape, output.shape)?;

    dispatch_by_width!(input.datatype, T => {
        resize_nearest_impl::<T>(input, output, align_corners, half_pixel_centers)
    })
}

fn resize_nearest_impl<T: Pod>(
    input: TensorRef<'_>,
    mut output: TensorMut<'_>,
    align_corners: bool,
    half_pixel_centers: bool,
) -> Result<()> {
    let (in_h, in_w) = (input.shape[2], input.shape[3]);
    let scale_h = resize_scale(in_h, output.shape[2], align_corners);
    let scale_w = resize_scale(in_w, output.shape[3], align_corners);
    let out_shape = output.shape;
    tensor::apply(out_shape, |o| {
        let iy = nearest_axis(o[2], scale_h, align_corners, half_pixel_centers, in_h);
        let ix = nearest_axis(o[3], scale_w, align_corners, half_pixel_centers, in_w);
        let value: T = input.get(&[o[0], o[1], iy, ix]);
        output.set(o, value);
        Ok(())
    })
}
