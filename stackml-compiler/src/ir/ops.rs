//! The closed operator set.

use std::fmt;

use stackml::kernels::{
    BinaryOp, Conv2dParams, PadMode, Padding, QuantParam, ReduceOp, ReduceWindow2dParams,
    ResizeParams, UnaryOp, ValueRange,
};

/// One operator instance's kind plus its attributes.
///
/// Input order per kind:
/// - `Binary`: lhs, rhs
/// - `Clamp`: input, low, high
/// - `Conv2d` / `Conv2dTranspose`: input, weights, bias
/// - `Matmul`: lhs, rhs, bias
/// - `Gather` / `GatherNd`: input, indices
/// - `TableLookup1d`: input, table
/// - `Concat`: one input per entry of `concat_dims`
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Graph input; one output, no inputs.
    Input,
    /// Graph output; one input, no outputs.
    Output,
    /// Sink for a value nobody reads.
    Ignore,
    /// Constant tensor, contiguous bytes in the node's output datatype.
    Constant {
        data: Vec<u8>,
    },
    BatchToSpace {
        block_size_h: usize,
        block_size_w: usize,
        crop_h: Padding,
        crop_w: Padding,
    },
    Binary {
        op: BinaryOp,
        fused_activation: ValueRange,
    },
    Clamp,
    Concat {
        axis: usize,
        concat_dims: Vec<usize>,
    },
    Conv2d(Conv2dParams),
    Conv2dTranspose(Conv2dParams),
    Convert,
    Dequantize {
        quant_param: QuantParam,
    },
    FusedUnary {
        subgraph: FusedUnarySubgraph,
    },
    Gather {
        axis: usize,
    },
    GatherNd {
        batch_dims: usize,
    },
    Matmul {
        fused_activation: ValueRange,
    },
    Pad {
        paddings: Vec<Padding>,
        mode: PadMode,
        pad_value: f64,
    },
    Quantize {
        quant_param: QuantParam,
    },
    Reduce {
        op: ReduceOp,
        axes: Vec<usize>,
        init_value: f32,
        keep_dims: bool,
    },
    ReduceWindow2d(ReduceWindow2dParams),
    Bitcast,
    ResizeImage(ResizeParams),
    Slice {
        begin: Vec<i64>,
        end: Vec<i64>,
        strides: Vec<i64>,
    },
    TableLookup1d,
    Transpose {
        perm: Vec<usize>,
    },
    Unary {
        op: UnaryOp,
    },
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Input => OpKind::Input,
            Op::Output => OpKind::Output,
            Op::Ignore => OpKind::Ignore,
            Op::Constant { .. } => OpKind::Constant,
            Op::BatchToSpace { .. } => OpKind::BatchToSpace,
            Op::Binary { .. } => OpKind::Binary,
            Op::Clamp => OpKind::Clamp,
            Op::Concat { .. } => OpKind::Concat,
            Op::Conv2d(_) => OpKind::Conv2d,
            Op::Conv2dTranspose(_) => OpKind::Conv2dTranspose,
            Op::Convert => OpKind::Convert,
            Op::Dequantize { .. } => OpKind::Dequantize,
            Op::FusedUnary { .. } => OpKind::FusedUnary,
            Op::Gather { .. } => OpKind::Gather,
            Op::GatherNd { .. } => OpKind::GatherNd,
            Op::Matmul { .. } => OpKind::Matmul,
            Op::Pad { .. } => OpKind::Pad,
            Op::Quantize { .. } => OpKind::Quantize,
            Op::Reduce { .. } => OpKind::Reduce,
            Op::ReduceWindow2d(_) => OpKind::ReduceWindow2d,
            Op::Bitcast => OpKind::Bitcast,
            Op::ResizeImage(_) => OpKind::ResizeImage,
            Op::Slice { .. } => OpKind::Slice,
            Op::TableLookup1d => OpKind::TableLookup1d,
            Op::Transpose { .. } => OpKind::Transpose,
            Op::Unary { .. } => OpKind::Unary,
        }
    }

    pub fn input_count(&self) -> usize {
        match self {
            Op::Input | Op::Constant { .. } => 0,
            Op::Clamp | Op::Conv2d(_) | Op::Conv2dTranspose(_) | Op::Matmul { .. } => 3,
            Op::Binary { .. } | Op::Gather { .. } | Op::GatherNd { .. } | Op::TableLookup1d => 2,
            Op::Concat { concat_dims, .. } => concat_dims.len(),
            _ => 1,
        }
    }

    pub fn output_count(&self) -> usize {
        match self {
            Op::Output | Op::Ignore => 0,
            _ => 1,
        }
    }
}

/// Fieldless mirror of `Op`, used to index dispatch tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Input,
    Output,
    Ignore,
    Constant,
    BatchToSpace,
    Binary,
    Clamp,
    Concat,
    Conv2d,
    Conv2dTranspose,
    Convert,
    Dequantize,
    FusedUnary,
    Gather,
    GatherNd,
    Matmul,
    Pad,
    Quantize,
    Reduce,
    ReduceWindow2d,
    Bitcast,
    ResizeImage,
    Slice,
    TableLookup1d,
    Transpose,
    Unary,
}

impl OpKind {
    pub const COUNT: usize = 26;

    pub const ALL: [OpKind; Self::COUNT] = [
        OpKind::Input,
        OpKind::Output,
        OpKind::Ignore,
        OpKind::Constant,
        OpKind::BatchToSpace,
        OpKind::Binary,
        OpKind::Clamp,
        OpKind::Concat,
        OpKind::Conv2d,
        OpKind::Conv2dTranspose,
        OpKind::Convert,
        OpKind::Dequantize,
        OpKind::FusedUnary,
        OpKind::Gather,
        OpKind::GatherNd,
        OpKind::Matmul,
        OpKind::Pad,
        OpKind::Quantize,
        OpKind::Reduce,
        OpKind::ReduceWindow2d,
        OpKind::Bitcast,
        OpKind::ResizeImage,
        OpKind::Slice,
        OpKind::TableLookup1d,
        OpKind::Transpose,
        OpKind::Unary,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Input => "input",
            OpKind::Output => "output",
            OpKind::Ignore => "ignore",
            OpKind::Constant => "constant",
            OpKind::BatchToSpace => "batch_to_space",
            OpKind::Binary => "binary",
            OpKind::Clamp => "clamp",
            OpKind::Concat => "concat",
            OpKind::Conv2d => "conv2d",
            OpKind::Conv2dTranspose => "conv2d_transpose",
            OpKind::Convert => "convert",
            OpKind::Dequantize => "dequantize",
            OpKind::FusedUnary => "fused_unary",
            OpKind::Gather => "gather",
            OpKind::GatherNd => "gather_nd",
            OpKind::Matmul => "matmul",
            OpKind::Pad => "pad",
            OpKind::Quantize => "quantize",
            OpKind::Reduce => "reduce",
            OpKind::ReduceWindow2d => "reduce_window2d",
            OpKind::Bitcast => "bitcast",
            OpKind::ResizeImage => "resize_image",
            OpKind::Slice => "slice",
            OpKind::TableLookup1d => "table_lookup1d",
            OpKind::Transpose => "transpose",
            OpKind::Unary => "unary",
        }
    }

    /// Graph plumbing that neither computes nor emits anything.
    pub fn is_passive(self) -> bool {
        matches!(
            self,
            OpKind::Input | OpKind::Output | OpKind::Ignore | OpKind::Constant
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Fused unary subgraphs
// ============================================================================

/// One entry of a fused elementwise chain. Operands refer to earlier entries
/// by index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusedUnaryOp {
    /// The element being transformed.
    Ldx,
    Constant(f32),
    Unary {
        op: UnaryOp,
        input: usize,
    },
    Binary {
        op: BinaryOp,
        lhs: usize,
        rhs: usize,
    },
    Clamp {
        input: usize,
        low: usize,
        high: usize,
    },
}

impl FusedUnaryOp {
    pub fn operands(&self) -> Vec<usize> {
        match *self {
            FusedUnaryOp::Ldx | FusedUnaryOp::Constant(_) => Vec::new(),
            FusedUnaryOp::Unary { input, .. } => vec![input],
            FusedUnaryOp::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            FusedUnaryOp::Clamp { input, low, high } => vec![input, low, high],
        }
    }
}

/// A scalar function of one element; the last entry is the result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FusedUnarySubgraph {
    pub ops: Vec<FusedUnaryOp>,
}

impl FusedUnarySubgraph {
    pub fn new(ops: Vec<FusedUnaryOp>) -> Self {
        Self { ops }
    }

    /// `[ldx, op0(ldx), op1(op0), ...]`
    pub fn chain(unary_ops: &[UnaryOp]) -> Self {
        let mut ops = vec![FusedUnaryOp::Ldx];
        for (i, &op) in unary_ops.iter().enumerate() {
            ops.push(FusedUnaryOp::Unary { op, input: i });
        }
        Self { ops }
    }

    /// Sequential reference evaluation.
    pub fn eval(&self, x: f32) -> Option<f32> {
        use stackml::kernels::{binary_scalar, unary_scalar};
        let mut values: Vec<f32> = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            let value = match *op {
                FusedUnaryOp::Ldx => x,
                FusedUnaryOp::Constant(c) => c,
                FusedUnaryOp::Unary { op, input } => unary_scalar(op, *values.get(input)?),
                FusedUnaryOp::Binary { op, lhs, rhs } => {
                    binary_scalar(op, *values.get(lhs)?, *values.get(rhs)?)
                }
                FusedUnaryOp::Clamp { input, low, high } => {
                    values.get(input)?.max(*values.get(low)?).min(*values.get(high)?)
                }
            };
            values.push(value);
        }
        values.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_line_up_with_their_table_index() {
        for (i, kind) in OpKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i, "{kind}");
        }
    }

    #[test]
    fn arity() {
        assert_eq!(Op::Conv2d(Conv2dParams::default()).input_count(), 3);
        let concat = Op::Concat {
            axis: 0,
            concat_dims: vec![1, 2, 3, 4],
        };
        assert_eq!(concat.input_count(), 4);
        assert_eq!(Op::Output.output_count(), 0);
        assert_eq!(Op::Input.input_count(), 0);
    }

    #[test]
    fn chain_evaluates_in_order() {
        let subgraph = FusedUnarySubgraph::chain(&[UnaryOp::Neg, UnaryOp::Exp]);
        assert_eq!(subgraph.eval(0.0), Some(1.0));
        assert_eq!(subgraph.eval(1.0), Some((-1.0f32).exp()));
    }
}
