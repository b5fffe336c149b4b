//! Reference evaluators: one routine per operator kind, each a thin binding
//! from the node's attributes to a `stackml::kernels` call.

use stackml::kernels::{self, ImageResizeMode};
use stackml::tensor::TensorRef;

use super::{EvaluatorRegistry, ModuleEvaluateContext};
use crate::error::{Error, Result};
use crate::fusion;
use crate::ir::{Node, Op, OpKind};

pub fn register_neutral_evaluators(registry: &mut EvaluatorRegistry) {
    for kind in [OpKind::Input, OpKind::Output, OpKind::Ignore, OpKind::Constant] {
        registry.register(kind, nop);
    }
    registry.register(OpKind::BatchToSpace, batch_to_space);
    registry.register(OpKind::Binary, binary);
    registry.register(OpKind::Clamp, clamp);
    registry.register(OpKind::Concat, concat);
    registry.register(OpKind::Conv2d, conv2d);
    registry.register(OpKind::Conv2dTranspose, conv2d_transpose);
    registry.register(OpKind::Convert, convert);
    registry.register(OpKind::Dequantize, dequantize);
    registry.register(OpKind::FusedUnary, fused_unary);
    registry.register(OpKind::Gather, gather);
    registry.register(OpKind::GatherNd, gather_nd);
    registry.register(OpKind::Matmul, matmul);
    registry.register(OpKind::Pad, pad);
    registry.register(OpKind::Quantize, quantize);
    registry.register(OpKind::Reduce, reduce);
    registry.register(OpKind::ReduceWindow2d, reduce_window2d);
    registry.register(OpKind::Bitcast, bitcast);
    registry.register(OpKind::ResizeImage, resize_image);
    registry.register(OpKind::Slice, slice);
    registry.register(OpKind::TableLookup1d, table_lookup1d);
    registry.register(OpKind::Transpose, transpose);
    registry.register(OpKind::Unary, unary);
}

fn wrong_op(node: &Node) -> Error {
    Error::graph(format!(
        "node {:?} ({}) reached the wrong evaluator",
        node.name,
        node.op.kind()
    ))
}

fn operands<'a, const N: usize>(inputs: &[TensorRef<'a>]) -> stackml::Result<[TensorRef<'a>; N]> {
    <[TensorRef<'a>; N]>::try_from(inputs).map_err(|_| {
        stackml::Error::shape(format!("expected {N} inputs, got {}", inputs.len()))
    })
}

// Values are already in place: inputs by the caller, constants by the context.
fn nop(_: &Node, _: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    Ok(())
}

fn batch_to_space(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::BatchToSpace {
        block_size_h,
        block_size_w,
        crop_h,
        crop_w,
    } = node.op
    else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::batch_to_space(input, output, block_size_h, block_size_w, crop_h, crop_w)
    })
}

fn binary(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Binary {
        op,
        fused_activation,
    } = node.op
    else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [lhs, rhs] = operands(inputs)?;
        kernels::binary(op, lhs, rhs, output, fused_activation)
    })
}

fn clamp(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    ctx.run_kernel(node, |inputs, output| {
        let [input, low, high] = operands(inputs)?;
        kernels::clamp(input, low, high, output)
    })
}

fn concat(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Concat { axis, concat_dims } = &node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        kernels::concat(inputs, output, *axis, concat_dims)
    })
}

fn conv2d(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Conv2d(params) = &node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input, weights, bias] = operands(inputs)?;
        kernels::conv2d(input, weights, bias, output, params)
    })
}

fn conv2d_transpose(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Conv2dTranspose(params) = &node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input, weights, bias] = operands(inputs)?;
        kernels::conv2d_transpose(input, weights, bias, output, params)
    })
}

fn convert(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::convert(input, output)
    })
}

fn dequantize(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Dequantize { quant_param } = node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::dequantize(input, output, quant_param)
    })
}

fn fused_unary(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::FusedUnary { subgraph } = &node.op else {
        return Err(wrong_op(node));
    };
    let body = fusion::compile_to_bytes(subgraph)?;
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::nnil_unary_method(input, output, &body)
    })
}

fn gather(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Gather { axis } = node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input, indices] = operands(inputs)?;
        kernels::gather(input, indices, output, axis)
    })
}

fn gather_nd(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::GatherNd { batch_dims } = node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input, indices] = operands(inputs)?;
        kernels::gather_nd(input, indices, output, batch_dims)
    })
}

fn matmul(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Matmul { fused_activation } = node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [lhs, rhs, bias] = operands(inputs)?;
        kernels::matmul(lhs, rhs, bias, output, fused_activation)
    })
}

fn pad(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Pad {
        paddings,
        mode,
        pad_value,
    } = &node.op
    else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::pad(input, output, paddings, *mode, *pad_value)
    })
}

fn quantize(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Quantize { quant_param } = node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::quantize(input, output, quant_param)
    })
}

fn reduce(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Reduce {
        op,
        axes,
        init_value,
        keep_dims,
    } = &node.op
    else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::reduce(*op, input, output, axes, *init_value, *keep_dims)
    })
}

fn reduce_window2d(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::ReduceWindow2d(params) = &node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::reduce_window2d(input, output, params)
    })
}

fn bitcast(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::bitcast(input, output)
    })
}

fn resize_image(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::ResizeImage(params) = node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        match params.mode {
            ImageResizeMode::Bilinear => kernels::resize_bilinear(
                input,
                output,
                params.align_corners,
                params.half_pixel_centers,
            ),
            ImageResizeMode::NearestNeighbor => kernels::resize_nearest_neighbor(
                input,
                output,
                params.align_corners,
                params.half_pixel_centers,
            ),
        }
    })
}

fn slice(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Slice {
        begin,
        end,
        strides,
    } = &node.op
    else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::slice(input, output, begin, end, strides)
    })
}

fn table_lookup1d(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    ctx.run_kernel(node, |inputs, output| {
        let [input, table] = operands(inputs)?;
        kernels::table_lookup1d(input, table, output)
    })
}

fn transpose(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Transpose { perm } = &node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::transpose(input, output, perm)
    })
}

fn unary(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    let Op::Unary { op } = node.op else {
        return Err(wrong_op(node));
    };
    ctx.run_kernel(node, |inputs, output| {
        let [input] = operands(inputs)?;
        kernels::unary(op, input, output)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_every_kind() {
        let registry = EvaluatorRegistry::neutral();
        for kind in OpKind::ALL {
            assert!(registry.get(kind).is_some(), "{kind} has no evaluator");
        }
    }
}
