//! Kernels against naive per-element oracles over strided layouts.

use stackml::kernels::{self, nnil::NnilBuilder, nnil::NnilInstruction, Padding, PadMode, UnaryOp};
use stackml::tensor::{default_strides, TensorMut, TensorRef};
use stackml::{DataType, Error};

/// Every multi-index of `shape` in row-major order.
fn all_indices(shape: &[usize]) -> Vec<Vec<usize>> {
    let mut out = vec![Vec::new()];
    for &dim in shape {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..dim).map(move |i| {
                    let mut next = prefix.clone();
                    next.push(i);
                    next
                })
            })
            .collect();
    }
    out
}

fn offset(strides: &[usize], index: &[usize]) -> usize {
    strides.iter().zip(index).map(|(s, i)| s * i).sum()
}

/// Deterministic filler bytes.
fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

fn f32s(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn read_f32(bytes: &[u8], element: usize) -> f32 {
    let b = &bytes[element * 4..element * 4 + 4];
    f32::from_ne_bytes([b[0], b[1], b[2], b[3]])
}

#[test]
fn transpose_matches_oracle_for_every_width() {
    for datatype in [DataType::UInt8, DataType::Int16, DataType::Float32] {
        let width = datatype.size_in_bytes();
        // A [4, 3, 2] view over a [3, 4, 2] buffer with axes 0 and 1 swapped.
        let in_shape = [4usize, 3, 2];
        let in_strides = [2usize, 8, 1];
        let input = noise(24 * width, width as u32);
        let perm = [2usize, 0, 1];
        let out_shape = [2usize, 4, 3];
        let out_strides = default_strides(&out_shape);
        let mut out = vec![0u8; 24 * width];

        kernels::transpose(
            TensorRef::new(&input, datatype, &in_shape, &in_strides).unwrap(),
            TensorMut::new(&mut out, datatype, &out_shape, &out_strides).unwrap(),
            &perm,
        )
        .unwrap();

        for out_index in all_indices(&out_shape) {
            let mut in_index = [0usize; 3];
            for (d, &p) in perm.iter().enumerate() {
                in_index[p] = out_index[d];
            }
            let src = offset(&in_strides, &in_index) * width;
            let dst = offset(&out_strides, &out_index) * width;
            assert_eq!(
                out[dst..dst + width],
                input[src..src + width],
                "{datatype} at {out_index:?}"
            );
        }
    }
}

#[test]
fn slice_with_negative_strides_matches_oracle() {
    let datatype = DataType::UInt16;
    let in_shape = [5usize, 6];
    let in_strides = default_strides(&in_shape);
    let input = noise(60, 7);
    // rows 4, 2, 0; columns 1, 3, 5
    let (begin, end, strides) = ([-1i64, 1], [-6i64, 6], [-2i64, 2]);
    let out_shape = [3usize, 3];
    let out_strides = default_strides(&out_shape);
    let mut out = vec![0u8; 18];

    kernels::slice(
        TensorRef::new(&input, datatype, &in_shape, &in_strides).unwrap(),
        TensorMut::new(&mut out, datatype, &out_shape, &out_strides).unwrap(),
        &begin,
        &end,
        &strides,
    )
    .unwrap();

    for out_index in all_indices(&out_shape) {
        let in_index = [4 - 2 * out_index[0], 1 + 2 * out_index[1]];
        let src = offset(&in_strides, &in_index) * 2;
        let dst = offset(&out_strides, &out_index) * 2;
        assert_eq!(out[dst..dst + 2], input[src..src + 2], "at {out_index:?}");
    }
}

#[test]
fn unary_over_strided_input_matches_scalar_oracle() {
    let values: Vec<f32> = (0..12).map(|i| i as f32 * 0.75 - 4.0).collect();
    let input = f32s(&values);
    // Transposed view of a [3, 4] buffer.
    let in_shape = [4usize, 3];
    let in_strides = [1usize, 4];
    let out_shape = [4usize, 3];
    let out_strides = default_strides(&out_shape);

    for op in UnaryOp::ALL {
        let mut out = vec![0u8; 48];
        kernels::unary(
            op,
            TensorRef::new(&input, DataType::Float32, &in_shape, &in_strides).unwrap(),
            TensorMut::new(&mut out, DataType::Float32, &out_shape, &out_strides).unwrap(),
        )
        .unwrap();
        for index in all_indices(&out_shape) {
            let x = values[offset(&in_strides, &index)];
            let expected = kernels::unary_scalar(op, x);
            let actual = read_f32(&out, offset(&out_strides, &index));
            assert_eq!(actual.to_bits(), expected.to_bits(), "{op:?}({x})");
        }
    }
}

#[test]
fn round_is_half_to_even() {
    let input = f32s(&[2.5, 3.5, 2.4, -2.5, 0.5, 1.5]);
    let mut out = vec![0u8; 24];
    kernels::unary(
        UnaryOp::Round,
        TensorRef::new(&input, DataType::Float32, &[6], &[1]).unwrap(),
        TensorMut::new(&mut out, DataType::Float32, &[6], &[1]).unwrap(),
    )
    .unwrap();
    let rounded: Vec<f32> = (0..6).map(|i| read_f32(&out, i)).collect();
    assert_eq!(rounded, vec![2.0, 4.0, 2.0, -2.0, 0.0, 2.0]);
}

#[test]
fn gather_nd_picks_diagonal() {
    let input = f32s(&[1.0, 2.0, 3.0, 4.0]);
    let indices: Vec<u8> = bytemuck::cast_slice(&[0i32, 0, 1, 1]).to_vec();
    let mut out = vec![0u8; 8];
    kernels::gather_nd(
        TensorRef::new(&input, DataType::Float32, &[2, 2], &[2, 1]).unwrap(),
        TensorRef::new(&indices, DataType::Int32, &[2, 2], &[2, 1]).unwrap(),
        TensorMut::new(&mut out, DataType::Float32, &[2], &[1]).unwrap(),
        0,
    )
    .unwrap();
    assert_eq!([read_f32(&out, 0), read_f32(&out, 1)], [1.0, 4.0]);
}

#[test]
fn constant_pad_writes_every_padded_element() {
    let input = noise(6, 3);
    let in_shape = [2usize, 3];
    let paddings = [Padding::new(1, 0), Padding::new(2, 1)];
    let out_shape = [3usize, 6];
    let mut out = vec![0xAAu8; 18];
    kernels::pad(
        TensorRef::new(&input, DataType::UInt8, &in_shape, &default_strides(&in_shape)).unwrap(),
        TensorMut::new(&mut out, DataType::UInt8, &out_shape, &default_strides(&out_shape)).unwrap(),
        &paddings,
        PadMode::Constant,
        7.0,
    )
    .unwrap();
    for index in all_indices(&out_shape) {
        let (r, c) = (index[0] as i64 - 1, index[1] as i64 - 2);
        let expected = if (0..2).contains(&r) && (0..3).contains(&c) {
            input[(r * 3 + c) as usize]
        } else {
            7
        };
        assert_eq!(out[index[0] * 6 + index[1]], expected, "at {index:?}");
    }
}

#[test]
fn eight_byte_types_are_rejected() {
    let input = vec![0u8; 32];
    let mut out = vec![0u8; 32];
    let err = kernels::transpose(
        TensorRef::new(&input, DataType::Int64, &[2, 2], &[2, 1]).unwrap(),
        TensorMut::new(&mut out, DataType::Int64, &[2, 2], &[2, 1]).unwrap(),
        &[1, 0],
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnsupportedDataType(DataType::Int64)), "got: {err}");
}

#[test]
fn nnil_method_agrees_on_strided_and_contiguous_views() {
    let mut builder = NnilBuilder::new();
    for instruction in [
        NnilInstruction::Lda0,
        NnilInstruction::Unary(UnaryOp::Neg),
        NnilInstruction::Unary(UnaryOp::Exp),
        NnilInstruction::Ret,
    ] {
        builder.emit(instruction);
    }
    let body = builder.finish();

    let values: Vec<f32> = (0..10_000).map(|i| (i % 97) as f32 * 0.125 - 6.0).collect();
    let input = f32s(&values);
    let shape = [100usize, 100];

    let mut contiguous = vec![0u8; input.len()];
    kernels::nnil_unary_method(
        TensorRef::new(&input, DataType::Float32, &shape, &[100, 1]).unwrap(),
        TensorMut::new(&mut contiguous, DataType::Float32, &shape, &[100, 1]).unwrap(),
        &body,
    )
    .unwrap();

    let mut strided = vec![0u8; input.len()];
    kernels::nnil_unary_method(
        TensorRef::new(&input, DataType::Float32, &shape, &[1, 100]).unwrap(),
        TensorMut::new(&mut strided, DataType::Float32, &shape, &[1, 100]).unwrap(),
        &body,
    )
    .unwrap();

    for (i, &x) in values.iter().enumerate() {
        let expected = (-x).exp();
        assert_eq!(read_f32(&contiguous, i).to_bits(), expected.to_bits(), "x = {x}");
        assert_eq!(read_f32(&strided, i).to_bits(), expected.to_bits(), "x = {x}");
    }
}
