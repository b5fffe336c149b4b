//! Stack-VM emitters: one routine per operator kind. Each translates the
//! node's attributes into a `TensorFunction`; `EmitContext::tensor` supplies
//! the operand addresses, shapes and strides.

use stackml::stackvm::TensorFunction;

use super::writer::EmitContext;
use super::EmitterRegistry;
use crate::error::{Error, Result};
use crate::fusion;
use crate::ir::{Node, Op, OpKind};

pub fn register_stackvm_emitters(registry: &mut EmitterRegistry) {
    for kind in [OpKind::Input, OpKind::Output, OpKind::Ignore, OpKind::Constant] {
        registry.register(kind, nothing);
    }
    for kind in OpKind::ALL.into_iter().filter(|k| !k.is_passive()) {
        registry.register(kind, tensor_call);
    }
    registry.register(OpKind::FusedUnary, fused_unary);
}

// Inputs and constants are placed in memory by the loader.
fn nothing(_: &Node, _: &mut EmitContext<'_>) -> Result<()> {
    Ok(())
}

fn tensor_call(node: &Node, ctx: &mut EmitContext<'_>) -> Result<()> {
    let function = tensor_function(&node.op).ok_or_else(|| {
        Error::graph(format!(
            "{} node {:?} has no single-call lowering",
            node.op.kind(),
            node.name
        ))
    })?;
    ctx.tensor(node, function)
}

fn fused_unary(node: &Node, ctx: &mut EmitContext<'_>) -> Result<()> {
    let Op::FusedUnary { subgraph } = &node.op else {
        return Err(Error::graph(format!("node {:?} is not fused", node.name)));
    };
    let body = fusion::compile_to_bytes(subgraph)?;
    ctx.tensor(node, TensorFunction::NnilUnaryMethod { body })
}

/// The `tensor` payload for ops that lower to exactly one kernel call.
pub fn tensor_function(op: &Op) -> Option<TensorFunction> {
    let function = match op {
        Op::Input | Op::Output | Op::Ignore | Op::Constant { .. } | Op::FusedUnary { .. } => {
            return None
        }
        Op::BatchToSpace {
            block_size_h,
            block_size_w,
            crop_h,
            crop_w,
        } => TensorFunction::BatchToSpace {
            block_h: *block_size_h,
            block_w: *block_size_w,
            crop_h: *crop_h,
            crop_w: *crop_w,
        },
        Op::Binary {
            op,
            fused_activation,
        } => TensorFunction::Binary {
            op: *op,
            fused_activation: *fused_activation,
        },
        Op::Clamp => TensorFunction::Clamp,
        Op::Concat { axis, concat_dims } => TensorFunction::Concat {
            axis: *axis,
            concat_dims: concat_dims.clone(),
        },
        Op::Conv2d(params) => TensorFunction::Conv2d(*params),
        Op::Conv2dTranspose(params) => TensorFunction::Conv2dTranspose(*params),
        Op::Convert => TensorFunction::Convert,
        Op::Dequantize { quant_param } => TensorFunction::Dequantize(*quant_param),
        Op::Gather { axis } => TensorFunction::Gather { axis: *axis },
        Op::GatherNd { batch_dims } => TensorFunction::GatherNd {
            batch_dims: *batch_dims,
        },
        Op::Matmul { fused_activation } => TensorFunction::Matmul {
            fused_activation: *fused_activation,
        },
        Op::Pad {
            paddings,
            mode,
            pad_value,
        } => TensorFunction::Pad {
            paddings: paddings.clone(),
            mode: *mode,
            pad_value: *pad_value,
        },
        Op::Quantize { quant_param } => TensorFunction::Quantize(*quant_param),
        Op::Reduce {
            op,
            axes,
            init_value,
            keep_dims,
        } => TensorFunction::Reduce {
            op: *op,
            axes: axes.clone(),
            init_value: *init_value,
            keep_dims: *keep_dims,
        },
        Op::ReduceWindow2d(params) => TensorFunction::ReduceWindow2d(*params),
        Op::Bitcast => TensorFunction::Bitcast,
        Op::ResizeImage(params) => TensorFunction::ResizeImage(*params),
        Op::Slice {
            begin,
            end,
            strides,
        } => TensorFunction::Slice {
            begin: begin.clone(),
            end: end.clone(),
            strides: strides.clone(),
        },
        Op::TableLookup1d => TensorFunction::TableLookup1d,
        Op::Transpose { perm } => TensorFunction::Transpose { perm: perm.clone() },
        Op::Unary { op } => TensorFunction::Unary { op: *op },
    };
    Some(function)
}
