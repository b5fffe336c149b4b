//! Stack-VM instruction set and its byte encoding.
//!
//! | opcode | instruction | operands |
//! |---|---|---|
//! | `0x00` | `nop` | |
//! | `0x01` | `ldc.i4` | `i32` |
//! | `0x02` | `ldc.r4` | `f32` |
//! | `0x03` | `lea.buffer` | location `u8`, start `u32`, size `u32` |
//! | `0x04` | `st.shape` | register `u8`, rank `u8` |
//! | `0x10` | `tensor` | `u32` length + bincode `TensorCall` |
//! | `0xFF` | `ret` | |
//!
//! A `tensor` call with `n` operands pops `n` buffer addresses (the output was
//! pushed last) and reads operand `i`'s shape from register `2i` and its
//! strides from register `2i + 1`.

use serde::{Deserialize, Serialize};

use super::binary::{self, BinaryReader};
use crate::datatype::DataType;
use crate::error::{Error, Result};
use crate::kernels::{
    BinaryOp, Conv2dParams, PadMode, Padding, QuantParam, ReduceOp, ReduceWindow2dParams,
    ResizeParams, UnaryOp, ValueRange,
};
use crate::memory::MemoryLocation;

pub mod opcode {
    pub const NOP: u8 = 0x00;
    pub const LDC_I4: u8 = 0x01;
    pub const LDC_R4: u8 = 0x02;
    pub const LEA_BUFFER: u8 = 0x03;
    pub const ST_SHAPE: u8 = 0x04;
    pub const TENSOR: u8 = 0x10;
    pub const RET: u8 = 0xFF;
}

/// Kernel selector plus the attributes that are fixed at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorFunction {
    BatchToSpace {
        block_h: usize,
        block_w: usize,
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
    Dequantize(QuantParam),
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
    Quantize(QuantParam),
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
    /// Fused unary chain as an NNIL program.
    NnilUnaryMethod {
        body: Vec<u8>,
    },
}

/// Payload of the `tensor` instruction. The last datatype is the output's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorCall {
    pub function: TensorFunction,
    pub datatypes: Vec<DataType>,
}

impl TensorCall {
    pub fn operand_count(&self) -> usize {
        self.datatypes.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Nop,
    LdcI4(i32),
    LdcR4(f32),
    /// Push the address of a scheduled buffer.
    LeaBuffer {
        location: MemoryLocation,
        start: u32,
        size: u32,
    },
    /// Pop `rank` integers (pushed outermost dimension first) into a shape register.
    StShape {
        reg: u8,
        rank: u8,
    },
    Tensor(TensorCall),
    Ret,
}

impl Instruction {
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Instruction::Nop => binary::write_u8(buf, opcode::NOP),
            Instruction::LdcI4(v) => {
                binary::write_u8(buf, opcode::LDC_I4);
                binary::write_i32_le(buf, *v);
            }
            Instruction::LdcR4(v) => {
                binary::write_u8(buf, opcode::LDC_R4);
                binary::write_f32_le(buf, *v);
            }
            Instruction::LeaBuffer {
                location,
                start,
                size,
            } => {
                binary::write_u8(buf, opcode::LEA_BUFFER);
                binary::write_u8(buf, location.index() as u8);
                binary::write_u32_le(buf, *start);
                binary::write_u32_le(buf, *size);
            }
            Instruction::StShape { reg, rank } => {
                binary::write_u8(buf, opcode::ST_SHAPE);
                binary::write_u8(buf, *reg);
                binary::write_u8(buf, *rank);
            }
            Instruction::Tensor(call) => {
                let payload = bincode::serialize(call)
                    .map_err(|e| Error::program(format!("cannot encode tensor call: {e}")))?;
                binary::write_u8(buf, opcode::TENSOR);
                binary::write_blob(buf, &payload)?;
            }
            Instruction::Ret => binary::write_u8(buf, opcode::RET),
        }
        Ok(())
    }

    pub fn decode(reader: &mut BinaryReader<'_>) -> Result<Self> {
        let at = reader.position();
        let instruction = match reader.read_u8()? {
            opcode::NOP => Instruction::Nop,
            opcode::LDC_I4 => Instruction::LdcI4(reader.read_i32_le()?),
            opcode::LDC_R4 => Instruction::LdcR4(reader.read_f32_le()?),
            opcode::LEA_BUFFER => {
                let raw = reader.read_u8()?;
                let location = MemoryLocation::from_index(raw as usize).ok_or_else(|| {
                    Error::program(format!("unknown memory location {raw} at offset {at}"))
                })?;
                Instruction::LeaBuffer {
                    location,
                    start: reader.read_u32_le()?,
                    size: reader.read_u32_le()?,
                }
            }
            opcode::ST_SHAPE => Instruction::StShape {
                reg: reader.read_u8()?,
                rank: reader.read_u8()?,
            },
            opcode::TENSOR => {
                let payload = reader.read_blob()?;
                let call = bincode::deserialize(payload).map_err(|e| {
                    Error::program(format!("bad tensor payload at offset {at}: {e}"))
                })?;
                Instruction::Tensor(call)
            }
            opcode::RET => Instruction::Ret,
            other => {
                return Err(Error::program(format!(
                    "unknown opcode {other:#04x} at offset {at}"
                )))
            }
        };
        Ok(instruction)
    }
}

pub fn encode_all(instructions: &[Instruction]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for instruction in instructions {
        instruction.encode(&mut buf)?;
    }
    Ok(buf)
}

pub fn decode_all(text: &[u8]) -> Result<Vec<Instruction>> {
    let mut reader = BinaryReader::new(text);
    let mut instructions = Vec::new();
    while !reader.is_empty() {
        instructions.push(Instruction::decode(&mut reader)?);
    }
    Ok(instructions)
}
