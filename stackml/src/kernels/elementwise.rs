//! Elementwise f32 kernels and the scalar math they share with the NNIL
//! interpreter.

use super::{BinaryOp, UnaryOp, ValueRange};
use crate::datatype::DataType;
use crate::error::{Error, Result};
use crate::tensor::{self, expect_same_shape, TensorMut, TensorRef};

/// Banker's rounding: ties go to the even neighbour.
#[inline]
pub fn round_half_even(a: f32) -> f32 {
    let floor = a.floor();
    let diff = a - floor;
    if diff < 0.5 || (diff == 0.5 && floor % 2.0 == 0.0) {
        floor
    } else {
        floor + 1.0
    }
}

#[inline]
pub fn unary_scalar(op: UnaryOp, x: f32) -> f32 {
    match op {
        UnaryOp::Abs => x.abs(),
        UnaryOp::Ceil => x.ceil(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Floor => x.floor(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Neg => -x,
        UnaryOp::Round => round_half_even(x),
        UnaryOp::Rsqrt => 1.0 / x.sqrt(),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Square => x * x,
        UnaryOp::Tanh => x.tanh(),
    }
}

#[inline]
pub fn binary_scalar(op: BinaryOp, a: f32, b: f32) -> f32 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
        BinaryOp::Pow => a.powf(b),
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::FloorMod => a - (a / b).floor() * b,
    }
}

/// `output[i] = op(input[i])`
///
/// - `input`, `output`: f32, same shape, any strides
pub fn unary(op: UnaryOp, input: TensorRef<'_>, mut output: TensorMut<'_>) -> Result<()> {
    input.expect_datatype(DataType::Float32)?;
    output.expect_datatype(DataType::Float32)?;
    expect_same_shape("unary output", input.shape, output.shape)?;

    tensor::apply(input.shape, |index| {
        let value: f32 = input.get(index);
        output.set(index, unary_scalar(op, value));
        Ok(())
    })
}

/// `output = clamp(op(lhs, rhs), fused_activation)` with numpy broadcasting.
///
/// - `lhs`, `rhs`: f32, shapes broadcastable against each other
/// - `output`: f32, the broadcast shape
pub fn binary(
    op: BinaryOp,
    lhs: TensorRef<'_>,
    rhs: TensorRef<'_>,
    mut output: TensorMut<'_>,
    fused_activation: ValueRange,
) -> Result<()> {
    lhs.expect_datatype(DataType::Float32)?;
    rhs.expect_datatype(DataType::Float32)?;
    output.expect_datatype(DataType::Float32)?;
    let out_shape = tensor::broadcast_shape(lhs.shape, rhs.shape)?;
    expect_same_shape("binary output", &out_shape, output.shape)?;

    let mut lhs_index = Vec::with_capacity(lhs.rank());
    let mut rhs_index = Vec::with_capacity(rhs.rank());
    tensor::apply(&out_shape, |index| {
        tensor::broadcast_index(index, lhs.shape, &mut lhs_index);
        tensor::broadcast_index(index, rhs.shape, &mut rhs_index);
        let a: f32 = lhs.get(&lhs_index);
        let b: f32 = rhs.get(&rhs_index);
        output.set(index, fused_activation.apply(binary_scalar(op, a, b)));
        Ok(())
    })
}

/// `output[i] = clamp(input[i], low, high)`
///
/// - `low`, `high`: single-element f32 tensors
pub fn clamp(
    input: TensorRef<'_>,
    low: TensorRef<'_>,
    high: TensorRef<'_>,
    mut output: TensorMut<'_>,
) -> Result<()> {
    for t in [&input, &low, &high] {
        t.expect_datatype(DataType::Float32)?;
    }
    output.expect_datatype(DataType::Float32)?;
    expect_same_shape("clamp output", input.shape, output.shape)?;
    if low.size() != 1 || high.size() != 1 {
        return Err(Error::shape(format!(
            "clamp bounds must be scalars, got {:?} and {:?}",
            low.shape, high.shape
        )));
    }
    let low: f32 = low.get(&vec![0; low.rank()]);
    let high: f32 = high.get(&vec![0; high.rank()]);
    let range = ValueRange::new(low, high);

    tensor::apply(input.shape, |index| {
        let value: f32 = input.get(index);
        output.set(index, range.apply(value));
        Ok(())
    })
}
