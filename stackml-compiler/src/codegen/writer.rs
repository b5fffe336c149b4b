//! Instruction emission helpers shared by every emitter.

use stackml::stackvm::binary::to_u32;
use stackml::stackvm::{Instruction, TensorCall, TensorFunction};
use stackml::MemoryView;

use crate::error::{Error, Result};
use crate::ir::{Graph, Node, OutputId};
use crate::schedule::ScheduleResult;

/// Accumulates the `.text` of one module.
pub struct EmitContext<'a> {
    graph: &'a Graph,
    schedule: &'a ScheduleResult,
    instructions: Vec<Instruction>,
}

impl<'a> EmitContext<'a> {
    pub fn new(graph: &'a Graph, schedule: &'a ScheduleResult) -> Self {
        Self {
            graph,
            schedule,
            instructions: Vec::new(),
        }
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn memory_at_output(&self, id: OutputId) -> Result<&'a MemoryView> {
        self.schedule.allocation(id)
    }

    /// `lea.buffer` for a scheduled view.
    pub fn lea_buffer(&mut self, view: &MemoryView) -> Result<()> {
        let buffer = view.buffer;
        self.emit(Instruction::LeaBuffer {
            location: buffer.location,
            start: to_u32(buffer.start, "buffer start")?,
            size: to_u32(buffer.size, "buffer size")?,
        });
        Ok(())
    }

    /// `ldc.i4` per dimension, outermost first, then `st.shape`.
    pub fn store_shape(&mut self, reg: usize, dims: &[usize]) -> Result<()> {
        let reg = u8::try_from(reg).map_err(|_| Error::graph(format!("shape register {reg} out of range")))?;
        let rank = u8::try_from(dims.len())
            .map_err(|_| Error::graph(format!("rank {} is too large", dims.len())))?;
        for &dim in dims {
            let dim = i32::try_from(dim)
                .map_err(|_| Error::graph(format!("dimension {dim} does not fit in i32")))?;
            self.emit(Instruction::LdcI4(dim));
        }
        self.emit(Instruction::StShape { reg, rank });
        Ok(())
    }

    /// Push every operand of `node` (inputs, then its first output), load
    /// their shapes and strides and emit the `tensor` call.
    pub fn tensor(&mut self, node: &Node, function: TensorFunction) -> Result<()> {
        let mut views = Vec::with_capacity(node.inputs.len() + 1);
        for input in &node.inputs {
            let source = input
                .connection
                .ok_or_else(|| Error::graph(format!("input of {:?} is not connected", node.name)))?;
            views.push(self.memory_at_output(source)?);
        }
        views.push(self.memory_at_output(node.output_id(0))?);

        for view in &views {
            self.lea_buffer(view)?;
        }
        for (i, view) in views.iter().enumerate() {
            self.store_shape(2 * i, &view.shape)?;
            self.store_shape(2 * i + 1, &view.strides)?;
        }
        self.emit(Instruction::Tensor(TensorCall {
            function,
            datatypes: views.iter().map(|v| v.datatype).collect(),
        }));
        Ok(())
    }
}
