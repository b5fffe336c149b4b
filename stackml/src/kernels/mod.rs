//! Operator kernels
//!
//! Reference implementations over strided views. Every kernel validates
//! datatypes, ranks and shapes before its first write and reports a typed
//! error instead of reading outside the declared views.
//!
//! - `elementwise`: unary / binary / clamp and the shared scalar math
//! - `tensor_compute`: data movement (gather, slice, transpose, pad, ...),
//!   dispatched by element byte width
//! - `nn`: convolution, matmul, reductions, pooling and resize
//! - `quant`: affine quantization and lookup tables
//! - `nnil`: fused-unary bytecode builder and interpreter

pub mod elementwise;
pub mod nn;
pub mod nnil;
pub mod quant;
pub mod tensor_compute;

use serde::{Deserialize, Serialize};

pub use elementwise::{
    binary, binary_scalar, clamp, round_half_even, unary, unary_scalar,
};
pub use nn::{
    conv2d, conv2d_transpose, matmul, reduce, reduce_window2d, resize_bilinear,
    resize_nearest_neighbor,
};
pub use nnil::nnil_unary_method;
pub use quant::{build_lookup_table, dequantize, quantize, table_lookup1d};
pub use tensor_compute::{
    batch_to_space, bitcast, concat, convert, gather, gather_nd, pad, slice, slice_range, transpose,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Abs,
    Ceil,
    Cos,
    Exp,
    Floor,
    Log,
    Neg,
    /// Round half to even.
    Round,
    Rsqrt,
    Sin,
    Sqrt,
    Square,
    Tanh,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 13] = [
        UnaryOp::Abs,
        UnaryOp::Ceil,
        UnaryOp::Cos,
        UnaryOp::Exp,
        UnaryOp::Floor,
        UnaryOp::Log,
        UnaryOp::Neg,
        UnaryOp::Round,
        UnaryOp::Rsqrt,
        UnaryOp::Sin,
        UnaryOp::Sqrt,
        UnaryOp::Square,
        UnaryOp::Tanh,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Pow,
    FloorDiv,
    FloorMod,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 9] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Min,
        BinaryOp::Max,
        BinaryOp::Pow,
        BinaryOp::FloorDiv,
        BinaryOp::FloorMod,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Mean,
    Min,
    Max,
    Sum,
    Prod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PadMode {
    /// Fill with `pad_value`.
    Constant,
    /// Mirror without repeating the edge element.
    Reflect,
    /// Mirror including the edge element.
    Symmetric,
    /// Repeat the edge element.
    Edge,
}

/// Elements added before and after one axis. Negative values crop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Padding {
    pub before: i32,
    pub after: i32,
}

impl Padding {
    pub fn new(before: i32, after: i32) -> Self {
        Self { before, after }
    }

    pub fn sum(&self) -> i32 {
        self.before + self.after
    }
}

/// Inclusive clamp range; fused activations are expressed as one of these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl ValueRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// No clamping.
    pub fn full() -> Self {
        Self {
            min: f32::NEG_INFINITY,
            max: f32::INFINITY,
        }
    }

    pub fn relu() -> Self {
        Self::new(0.0, f32::INFINITY)
    }

    pub fn relu6() -> Self {
        Self::new(0.0, 6.0)
    }

    #[inline]
    pub fn apply(&self, value: f32) -> f32 {
        value.max(self.min).min(self.max)
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        Self::full()
    }
}

/// Affine quantization: `real = (q - zero_point) * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParam {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParam {
    pub fn new(scale: f32, zero_point: i32) -> Self {
        Self { scale, zero_point }
    }

    #[inline]
    pub fn dequantize(&self, q: i32) -> f32 {
        (q as i64 - self.zero_point as i64) as f32 * self.scale
    }

    /// Nearest quantized step (ties to even), before clamping to the target type.
    #[inline]
    pub fn quantize_unclamped(&self, real: f32) -> f32 {
        round_half_even(real / self.scale) + self.zero_point as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conv2dParams {
    pub padding_h: Padding,
    pub padding_w: Padding,
    pub groups: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub fused_activation: ValueRange,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            padding_h: Padding::default(),
            padding_w: Padding::default(),
            groups: 1,
            stride_h: 1,
            stride_w: 1,
            dilation_h: 1,
            dilation_w: 1,
            fused_activation: ValueRange::full(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReduceWindow2dParams {
    pub op: ReduceOp,
    pub init_value: f32,
    pub filter_h: usize,
    pub filter_w: usize,
    pub padding_h: Padding,
    pub padding_w: Padding,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub fused_activation: ValueRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageResizeMode {
    Bilinear,
    NearestNeighbor,
}

/// Resize attributes. The target height and width come from the output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResizeParams {
    pub mode: ImageResizeMode,
    pub align_corners: bool,
    pub half_pixel_centers: bool,
}
