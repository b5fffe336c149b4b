//! NNIL: the bytecode that fused unary chains are compiled to.
//!
//! A program is a straight-line sequence of stack instructions run once per
//! element. `lda.0` pushes the element being transformed; `ret` returns the
//! single value left on the stack. Programs are verified once by
//! `NnilProgram::decode` and then evaluated many times.
//!
//! Encoding: one opcode byte, followed by a little-endian `f32` for `ldc.r4`
//! or a `u8` slot for `ldloc`/`stloc`.

use rayon::prelude::*;

use super::{binary_scalar, unary_scalar, BinaryOp, UnaryOp};
use crate::datatype::DataType;
use crate::error::{Error, Result};
use crate::tensor::{self, expect_same_shape, TensorMut, TensorRef};

pub mod opcode {
    pub const NOP: u8 = 0x00;
    pub const DUP: u8 = 0x01;
    pub const POP: u8 = 0x02;
    pub const LDA_0: u8 = 0x03;
    pub const LDC_R4_0: u8 = 0x04;
    pub const LDC_R4_1: u8 = 0x05;
    pub const LDC_R4: u8 = 0x06;
    pub const LDLOC: u8 = 0x07;
    pub const STLOC: u8 = 0x08;
    /// `UNARY_BASE + UnaryOp as u8`
    pub const UNARY_BASE: u8 = 0x20;
    /// `BINARY_BASE + BinaryOp as u8`
    pub const BINARY_BASE: u8 = 0x40;
    pub const CLAMP: u8 = 0x60;
    pub const RET: u8 = 0x70;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NnilInstruction {
    Nop,
    Dup,
    Pop,
    Lda0,
    LdcR4(f32),
    Ldloc(u8),
    Stloc(u8),
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Pops `high`, `low`, `x`; pushes `x` clamped to `[low, high]`.
    Clamp,
    Ret,
}

// ============================================================================
// Builder
// ============================================================================

/// Appends NNIL instructions to a byte stream.
#[derive(Debug, Default)]
pub struct NnilBuilder {
    bytes: Vec<u8>,
}

impl NnilBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_opcode(&mut self, opcode: u8) {
        self.bytes.push(opcode);
    }

    pub fn append_operand(&mut self, operand: &[u8]) {
        self.bytes.extend_from_slice(operand);
    }

    pub fn emit(&mut self, instruction: NnilInstruction) {
        match instruction {
            NnilInstruction::Nop => self.append_opcode(opcode::NOP),
            NnilInstruction::Dup => self.append_opcode(opcode::DUP),
            NnilInstruction::Pop => self.append_opcode(opcode::POP),
            NnilInstruction::Lda0 => self.append_opcode(opcode::LDA_0),
            NnilInstruction::LdcR4(value) if value.to_bits() == 0.0f32.to_bits() => {
                self.append_opcode(opcode::LDC_R4_0)
            }
            NnilInstruction::LdcR4(value) if value == 1.0 => self.append_opcode(opcode::LDC_R4_1),
            NnilInstruction::LdcR4(value) => {
                self.append_opcode(opcode::LDC_R4);
                self.append_operand(&value.to_le_bytes());
            }
            NnilInstruction::Ldloc(slot) => {
                self.append_opcode(opcode::LDLOC);
                self.append_operand(&[slot]);
            }
            NnilInstruction::Stloc(slot) => {
                self.append_opcode(opcode::STLOC);
                self.append_operand(&[slot]);
            }
            NnilInstruction::Unary(op) => self.append_opcode(opcode::UNARY_BASE + op as u8),
            NnilInstruction::Binary(op) => self.append_opcode(opcode::BINARY_BASE + op as u8),
            NnilInstruction::Clamp => self.append_opcode(opcode::CLAMP),
            NnilInstruction::Ret => self.append_opcode(opcode::RET),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

// ============================================================================
// Verified program
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NnilProgram {
    instructions: Vec<NnilInstruction>,
    max_stack: usize,
    locals: usize,
}

/// Per-thread evaluation state.
#[derive(Debug, Clone)]
pub struct NnilScratch {
    stack: Vec<f32>,
    locals: Vec<f32>,
}

impl NnilProgram {
    /// Decode and verify `body`: every opcode known, operands complete, no
    /// stack underflow, locals written before they are read, and exactly one
    /// value left at the final `ret`.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut instructions = Vec::new();
        let mut pos = 0;
        while pos < body.len() {
            let op = body[pos];
            pos += 1;
            let instruction = match op {
                opcode::NOP => NnilInstruction::Nop,
                opcode::DUP => NnilInstruction::Dup,
                opcode::POP => NnilInstruction::Pop,
                opcode::LDA_0 => NnilInstruction::Lda0,
                opcode::LDC_R4_0 => NnilInstruction::LdcR4(0.0),
                opcode::LDC_R4_1 => NnilInstruction::LdcR4(1.0),
                opcode::LDC_R4 => {
                    let bytes = body
                        .get(pos..pos + 4)
                        .ok_or_else(|| Error::program("nnil: truncated ldc.r4 operand"))?;
                    pos += 4;
                    NnilInstruction::LdcR4(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                }
                opcode::LDLOC | opcode::STLOC => {
                    let slot = *body
                        .get(pos)
                        .ok_or_else(|| Error::program("nnil: truncated local slot"))?;
                    pos += 1;
                    if op == opcode::LDLOC {
                        NnilInstruction::Ldloc(slot)
                    } else {
                        NnilInstruction::Stloc(slot)
                    }
                }
                opcode::CLAMP => NnilInstruction::Clamp,
                opcode::RET => NnilInstruction::Ret,
                op if (opcode::UNARY_BASE..opcode::UNARY_BASE + UnaryOp::ALL.len() as u8).contains(&op) => {
                    NnilInstruction::Unary(UnaryOp::ALL[(op - opcode::UNARY_BASE) as usize])
                }
                op if (opcode::BINARY_BASE..opcode::BINARY_BASE + BinaryOp::ALL.len() as u8).contains(&op) => {
                    NnilInstruction::Binary(BinaryOp::ALL[(op - opcode::BINARY_BASE) as usize])
                }
                other => {
                    return Err(Error::program(format!(
                        "nnil: unknown opcode {other:#04x} at byte {}",
                        pos - 1
                    )))
                }
            };
            instructions.push(instruction);
        }

        let (max_stack, locals) = verify(&instructions)?;
        Ok(Self {
            instructions,
            max_stack,
            locals,
        })
    }

    pub fn instructions(&self) -> &[NnilInstruction] {
        &self.instructions
    }

    pub fn scratch(&self) -> NnilScratch {
        NnilScratch {
            stack: Vec::with_capacity(self.max_stack),
            locals: vec![0.0; self.locals],
        }
    }

    pub fn eval(&self, x: f32) -> Result<f32> {
        self.eval_with(x, &mut self.scratch())
    }

    pub fn eval_with(&self, x: f32, scratch: &mut NnilScratch) -> Result<f32> {
        let stack = &mut scratch.stack;
        stack.clear();
        for instruction in &self.instructions {
            match *instruction {
                NnilInstruction::Nop => {}
                NnilInstruction::Dup => {
                    let top = pop(stack)?;
                    stack.push(top);
                    stack.push(top);
                }
                NnilInstruction::Pop => {
                    pop(stack)?;
                }
                NnilInstruction::Lda0 => stack.push(x),
                NnilInstruction::LdcR4(value) => stack.push(value),
                NnilInstruction::Ldloc(slot) => {
                    let value = *scratch
                        .locals
                        .get(slot as usize)
                        .ok_or_else(|| Error::program(format!("nnil: local {slot} out of range")))?;
                    stack.push(value);
                }
                NnilInstruction::Stloc(slot) => {
                    let value = pop(stack)?;
                    let local = scratch
                        .locals
                        .get_mut(slot as usize)
                        .ok_or_else(|| Error::program(format!("nnil: local {slot} out of range")))?;
                    *local = value;
                }
                NnilInstruction::Unary(op) => {
                    let a = pop(stack)?;
                    stack.push(unary_scalar(op, a));
                }
                NnilInstruction::Binary(op) => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(binary_scalar(op, a, b));
                }
                NnilInstruction::Clamp => {
                    let high = pop(stack)?;
                    let low = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(a.max(low).min(high));
                }
                NnilInstruction::Ret => return pop(stack),
            }
        }
        Err(Error::program("nnil: program ended without ret"))
    }
}

#[inline]
fn pop(stack: &mut Vec<f32>) -> Result<f32> {
    stack
        .pop()
        .ok_or_else(|| Error::program("nnil: stack underflow"))
}

/// Returns `(max stack depth, local slot count)`.
fn verify(instructions: &[NnilInstruction]) -> Result<(usize, usize)> {
    let mut depth: usize = 0;
    let mut max_depth = 0;
    let mut written = [false; 256];
    let mut locals = 0;
    let Some((last, body)) = instructions.split_last() else {
        return Err(Error::program("nnil: empty program"));
    };
    if *last != NnilInstruction::Ret {
        return Err(Error::program("nnil: program must end with ret"));
    }
    for (i, instruction) in body.iter().chain(std::iter::once(last)).enumerate() {
        let (pops, pushes) = match instruction {
            NnilInstruction::Nop => (0, 0),
            NnilInstruction::Dup => (1, 2),
            NnilInstruction::Pop => (1, 0),
            NnilInstruction::Lda0 | NnilInstruction::LdcR4(_) => (0, 1),
            NnilInstruction::Ldloc(slot) => {
                if !written[*slot as usize] {
                    return Err(Error::program(format!(
                        "nnil: instruction {i} reads local {slot} before it is stored"
                    )));
                }
                (0, 1)
            }
            NnilInstruction::Stloc(slot) => {
                written[*slot as usize] = true;
                locals = locals.max(*slot as usize + 1);
                (1, 0)
            }
            NnilInstruction::Unary(_) => (1, 1),
            NnilInstruction::Binary(_) => (2, 1),
            NnilInstruction::Clamp => (3, 1),
            NnilInstruction::Ret => {
                if i != body.len() {
                    return Err(Error::program(format!("nnil: ret before the end at {i}")));
                }
                if depth != 1 {
                    return Err(Error::program(format!(
                        "nnil: ret with {depth} values on the stack"
                    )));
                }
                (1, 0)
            }
        };
        if depth < pops {
            return Err(Error::program(format!(
                "nnil: stack underflow at instruction {i}"
            )));
        }
        depth = depth - pops + pushes;
        max_depth = max_depth.max(depth);
    }
    Ok((max_depth, locals))
}

// ============================================================================
// Kernel
// ============================================================================

/// Elements per parallel work item.
const CHUNK_ELEMENTS: usize = 4096;

/// Run the NNIL program `body` once per element: `output[i] = body(input[i])`.
///
/// - `input`, `output`: f32, same shape
///
/// Dense views are processed in parallel chunks; other layouts fall back to
/// a strided walk.
pub fn nnil_unary_method(input: TensorRef<'_>, mut output: TensorMut<'_>, body: &[u8]) -> Result<()> {
    input.expect_datatype(DataType::Float32)?;
    output.expect_datatype(DataType::Float32)?;
    expect_same_shape("nnil_unary_method output", input.shape, output.shape)?;
    let program = NnilProgram::decode(body)?;

    if input.is_contiguous() && output.is_contiguous() {
        let bytes = input.size() * 4;
        let src = &input.data[..bytes];
        let dst = &mut output.data[..bytes];
        return dst
            .par_chunks_mut(CHUNK_ELEMENTS * 4)
            .zip(src.par_chunks(CHUNK_ELEMENTS * 4))
            .try_for_each_init(
                || program.scratch(),
                |scratch, (dst, src)| {
                    for (out, inp) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                        let x: f32 = bytemuck::pod_read_unaligned(inp);
                        let y = program.eval_with(x, scratch)?;
                        out.copy_from_slice(bytemuck::bytes_of(&y));
                    }
                    Ok(())
                },
            );
    }

    let mut scratch = program.scratch();
    let shape = input.shape;
    tensor::apply(shape, |index| {
        let x: f32 = input.get(index);
        output.set(index, program.eval_with(x, &mut scratch)?);
        Ok(())
    })
}
