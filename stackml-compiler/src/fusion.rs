//! Compiles a fused unary subgraph to NNIL.
//!
//! Entries are visited in index order. A value whose only use is as the first
//! operand of the very next entry stays on the stack; every other value that
//! is used later is spilled to its own local slot. `ldx` and constants are
//! re-loaded at each use instead of being spilled.

use log::trace;
use stackml::kernels::nnil::{NnilBuilder, NnilInstruction};

use crate::error::{Error, Result};
use crate::ir::{FusedUnaryOp, FusedUnarySubgraph};

pub fn compile_graph(subgraph: &FusedUnarySubgraph, builder: &mut NnilBuilder) -> Result<()> {
    let ops = &subgraph.ops;
    if ops.is_empty() {
        return Err(Error::graph("fused subgraph is empty"));
    }

    let mut uses = vec![0usize; ops.len()];
    for (i, op) in ops.iter().enumerate() {
        for operand in op.operands() {
            if operand >= i {
                return Err(Error::graph(format!(
                    "fused entry {i} refers to entry {operand}, which is not earlier"
                )));
            }
            uses[operand] += 1;
        }
    }

    let last = ops.len() - 1;
    let mut slots: Vec<Option<u8>> = vec![None; ops.len()];
    let mut next_slot: usize = 0;
    // Index of the value left on top of the stack by the previous entry.
    let mut on_stack: Option<usize> = None;

    for (i, op) in ops.iter().enumerate() {
        let instruction = match *op {
            FusedUnaryOp::Ldx | FusedUnaryOp::Constant(_) => {
                if i == last {
                    load(ops, &slots, i, builder)?;
                }
                continue;
            }
            FusedUnaryOp::Unary { op, .. } => NnilInstruction::Unary(op),
            FusedUnaryOp::Binary { op, .. } => NnilInstruction::Binary(op),
            FusedUnaryOp::Clamp { .. } => NnilInstruction::Clamp,
        };

        for (n, operand) in op.operands().into_iter().enumerate() {
            if n == 0 && on_stack == Some(operand) {
                continue;
            }
            load(ops, &slots, operand, builder)?;
        }
        builder.emit(instruction);
        on_stack = None;

        if i == last {
            break;
        }
        let next_takes_it = ops[i + 1].operands().first() == Some(&i);
        if uses[i] == 1 && next_takes_it {
            on_stack = Some(i);
        } else if uses[i] == 0 {
            builder.emit(NnilInstruction::Pop);
        } else {
            let slot = u8::try_from(next_slot)
                .map_err(|_| Error::graph("fused subgraph needs more than 256 locals"))?;
            next_slot += 1;
            slots[i] = Some(slot);
            builder.emit(NnilInstruction::Stloc(slot));
        }
    }

    builder.emit(NnilInstruction::Ret);
    trace!(
        "fusion: {} entries -> {} bytes, {} locals",
        ops.len(),
        builder.len(),
        next_slot
    );
    Ok(())
}

fn load(
    ops: &[FusedUnaryOp],
    slots: &[Option<u8>],
    index: usize,
    builder: &mut NnilBuilder,
) -> Result<()> {
    let instruction = match ops[index] {
        FusedUnaryOp::Ldx => NnilInstruction::Lda0,
        FusedUnaryOp::Constant(value) => NnilInstruction::LdcR4(value),
        _ => NnilInstruction::Ldloc(
            slots[index].ok_or_else(|| Error::graph(format!("fused entry {index} was not spilled")))?,
        ),
    };
    builder.emit(instruction);
    Ok(())
}

/// Compile into a fresh byte vector.
pub fn compile_to_bytes(subgraph: &FusedUnarySubgraph) -> Result<Vec<u8>> {
    let mut builder = NnilBuilder::new();
    compile_graph(subgraph, &mut builder)?;
    Ok(builder.finish())
}
