//! Affine quantization kernels and 8-bit lookup tables.

use super::{unary_scalar, QuantParam, UnaryOp};
use crate::datatype::{DataType, Element};
use crate::error::{Error, Result};
use crate::tensor::{self, expect_same_shape, TensorMut, TensorRef};

/// `q = clamp(round_half_even(real / scale) + zero_point)`
///
/// - `input`: f32
/// - `output`: u8 or i8, same shape; out-of-range values saturate
pub fn quantize(input: TensorRef<'_>, output: TensorMut<'_>, param: QuantParam) -> Result<()> {
    input.expect_datatype(DataType::Float32)?;
    expect_same_shape("quantize output", input.shape, output.shape)?;
    match output.datatype {
        DataType::UInt8 => quantize_impl::<u8>(input, output, param),
        DataType::Int8 => quantize_impl::<i8>(input, output, param),
        other => Err(Error::UnsupportedDataType(other)),
    }
}

fn quantize_impl<Q: Element>(input: TensorRef<'_>, mut output: TensorMut<'_>, param: QuantParam) -> Result<()> {
    let shape = input.shape;
    tensor::apply(shape, |index| {
        let real: f32 = input.get(index);
        output.set(index, Q::from_f64(param.quantize_unclamped(real) as f64));
        Ok(())
    })
}

/// `real = (q - zero_point) * scale`
///
/// - `input`: u8, i8 or i32
/// - `output`: f32, same shape
pub fn dequantize(input: TensorRef<'_>, output: TensorMut<'_>, param: QuantParam) -> Result<()> {
    output.expect_datatype(DataType::Float32)?;
    expect_same_shape("dequantize output", input.shape, output.shape)?;
    match input.datatype {
        DataType::UInt8 => dequantize_impl::<u8>(input, output, param),
        DataType::Int8 => dequantize_impl::<i8>(input, output, param),
        DataType::Int32 => dequantize_impl::<i32>(input, output, param),
        other => Err(Error::UnsupportedDataType(other)),
    }
}

fn dequantize_impl<Q: Element>(input: TensorRef<'_>, mut output: TensorMut<'_>, param: QuantParam) -> Result<()> {
    let shape = input.shape;
    tensor::apply(shape, |index| {
        let q: Q = input.get(index);
        output.set(index, param.dequantize(q.to_f64() as i32));
        Ok(())
    })
}

/// `output[i] = table[input[i]]`
///
/// - `input`, `output`: u8, same shape
/// - `table`: u8, 256 entries
pub fn table_lookup1d(input: TensorRef<'_>, table: TensorRef<'_>, mut output: TensorMut<'_>) -> Result<()> {
    input.expect_datatype(DataType::UInt8)?;
    table.expect_datatype(DataType::UInt8)?;
    output.expect_datatype(DataType::UInt8)?;
    expect_same_shape("table_lookup1d table", &[256], table.shape)?;
    expect_same_shape("table_lookup1d output", input.shape, output.shape)?;

    let shape = input.shape;
    tensor::apply(shape, |index| {
        let q: u8 = input.get(index);
        let value: u8 = table.get(&[q as usize]);
        output.set(index, value);
        Ok(())
    })
}

/// Tabulate `op` over the u8 domain: dequantize with `input`, apply, requantize
/// with `output`.
pub fn build_lookup_table(op: UnaryOp, input: QuantParam, output: QuantParam) -> Vec<u8> {
    (0..=255u8)
        .map(|q| {
            let real = unary_scalar(op, input.dequantize(q as i32));
            u8::from_f64(output.quantize_unclamped(real) as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_rounds_half_to_even_and_saturates() {
        let input: Vec<u8> = bytemuck::cast_slice(&[0.25f32, 0.75, -10.0, 100.0]).to_vec();
        let mut out = [0u8; 4];
        quantize(
            TensorRef::new(&input, DataType::Float32, &[4], &[1]).unwrap(),
            TensorMut::new(&mut out, DataType::UInt8, &[4], &[1]).unwrap(),
            QuantParam::new(0.5, 10),
        )
        .unwrap();
        // 0.25 / 0.5 = 0.5 -> 0, 0.75 / 0.5 = 1.5 -> 2
        assert_eq!(out, [10, 12, 0, 210]);
    }

    #[test]
    fn dequantize_int8() {
        let input = [(-3i8) as u8, 5];
        let mut out = [0u8; 8];
        dequantize(
            TensorRef::new(&input, DataType::Int8, &[2], &[1]).unwrap(),
            TensorMut::new(&mut out, DataType::Float32, &[2], &[1]).unwrap(),
            QuantParam::new(0.5, -1),
        )
        .unwrap();
        assert_eq!(f32::from_ne_bytes([out[0], out[1], out[2], out[3]]), -1.0);
        assert_eq!(f32::from_ne_bytes([out[4], out[5], out[6], out[7]]), 3.0);
    }

    #[test]
    fn dequantize_int32_extremes() {
        let input: Vec<u8> = bytemuck::cast_slice(&[i32::MAX, i32::MIN]).to_vec();
        let mut out = [0u8; 8];
        dequantize(
            TensorRef::new(&input, DataType::Int32, &[2], &[1]).unwrap(),
            TensorMut::new(&mut out, DataType::Float32, &[2], &[1]).unwrap(),
            QuantParam::new(1.0, -1),
        )
        .unwrap();
        assert_eq!(f32::from_ne_bytes([out[0], out[1], out[2], out[3]]), 2_147_483_648.0);
        assert_eq!(f32::from_ne_bytes([out[4], out[5], out[6], out[7]]), -2_147_483_648.0);
        assert_eq!(QuantParam::new(1.0, i32::MIN).dequantize(i32::MAX), 4_294_967_296.0);
    }

    #[test]
    fn quantize_rejects_float_output() {
        let input = [0u8; 4];
        let mut out = [0u8; 4];
        let err = quantize(
            TensorRef::new(&input, DataType::Float32, &[1], &[1]).unwrap(),
            TensorMut::new(&mut out, DataType::Float32, &[1], &[1]).unwrap(),
            QuantParam::new(1.0, 0),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedDataType(DataType::Float32)), "got: {err}");
    }

    #[test]
    fn lookup_table_negation() {
        let param = QuantParam::new(1.0, 128);
        let table = build_lookup_table(UnaryOp::Neg, param, param);
        assert_eq!(table.len(), 256);
        assert_eq!(table[128], 128);
        assert_eq!(table[130], 126);
        assert_eq!(table[0], 255);

        let input = [128u8, 130, 0];
        let mut out = [0u8; 3];
        table_lookup1d(
            TensorRef::new(&input, DataType::UInt8, &[3], &[1]).unwrap(),
            TensorRef::new(&table, DataType::UInt8, &[256], &[1]).unwrap(),
            TensorMut::new(&mut out, DataType::UInt8, &[3], &[1]).unwrap(),
        )
        .unwrap();
        assert_eq!(out, [128, 126, 255]);
    }
}
