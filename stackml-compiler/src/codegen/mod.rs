//! Lowering of a scheduled graph to a stack-VM module.
//!
//! Each node becomes one instruction group: `lea.buffer` per operand, the
//! operands' shapes and strides stored into shape registers, then a single
//! `tensor` call. The module ends with `ret`.

mod emitters;
mod writer;

use log::{debug, trace};
use stackml::stackvm::module::{RDATA_SECTION, TEXT_SECTION};
use stackml::stackvm::{encode_all, Instruction, Module, STACKVM_MODULE_TYPE};

use crate::error::{Error, Result};
use crate::ir::{Graph, Node, OpKind};
use crate::schedule::ScheduleResult;

pub use emitters::{register_stackvm_emitters, tensor_function};
pub use writer::EmitContext;

pub type EmitterFn = fn(&Node, &mut EmitContext<'_>) -> Result<()>;

#[derive(Clone)]
pub struct EmitterRegistry {
    emitters: [Option<EmitterFn>; OpKind::COUNT],
}

impl EmitterRegistry {
    pub fn empty() -> Self {
        Self {
            emitters: [None; OpKind::COUNT],
        }
    }

    pub fn stackvm() -> Self {
        let mut registry = Self::empty();
        register_stackvm_emitters(&mut registry);
        registry
    }

    pub fn register(&mut self, kind: OpKind, emitter: EmitterFn) {
        self.emitters[kind.index()] = Some(emitter);
    }

    pub fn unregister(&mut self, kind: OpKind) {
        self.emitters[kind.index()] = None;
    }

    pub fn get(&self, kind: OpKind) -> Option<EmitterFn> {
        self.emitters[kind.index()]
    }
}

impl Default for EmitterRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

pub struct StackVmModuleBuilder<'a> {
    graph: &'a Graph,
    schedule: &'a ScheduleResult,
    emitters: &'a EmitterRegistry,
}

impl<'a> StackVmModuleBuilder<'a> {
    pub fn new(graph: &'a Graph, schedule: &'a ScheduleResult, emitters: &'a EmitterRegistry) -> Self {
        Self {
            graph,
            schedule,
            emitters,
        }
    }

    /// Emit the whole compute sequence. Every node kind is checked for an
    /// emitter before the first instruction is written.
    pub fn build(&self) -> Result<Module> {
        let mut plan = Vec::with_capacity(self.schedule.compute_sequence.len());
        for &id in &self.schedule.compute_sequence {
            let node = self.graph.node(id)?;
            let emitter = self
                .emitters
                .get(node.op.kind())
                .ok_or(Error::UnsupportedOperator(node.op.kind()))?;
            plan.push((node, emitter));
        }

        let mut ctx = EmitContext::new(self.graph, self.schedule);
        for (node, emitter) in plan {
            let before = ctx.instructions().len();
            emitter(node, &mut ctx).map_err(|err| match err {
                Error::Runtime(source) => Error::NodeFailed {
                    kind: node.op.kind(),
                    name: node.name.clone(),
                    source,
                },
                other => other,
            })?;
            trace!(
                "codegen: {} {:?}: {} instructions",
                node.op.kind(),
                node.name,
                ctx.instructions().len() - before
            );
        }
        ctx.emit(Instruction::Ret);

        let text = encode_all(&ctx.into_instructions())?;
        let rdata = self.schedule.rdata_image(self.graph)?;
        debug!(
            "codegen: {} nodes, .text {} bytes, .rdata {} bytes",
            self.schedule.compute_sequence.len(),
            text.len(),
            rdata.len()
        );

        let mut module = Module::new(
            STACKVM_MODULE_TYPE,
            self.schedule.pool_sizes,
            self.schedule.input_views(self.graph)?,
            self.schedule.output_views(self.graph)?,
        );
        module.set_section(TEXT_SECTION, text);
        module.set_section(RDATA_SECTION, rdata);
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stackvm_registry_covers_every_kind() {
        let registry = EmitterRegistry::stackvm();
        for kind in OpKind::ALL {
            assert!(registry.get(kind).is_some(), "{kind} has no emitter");
        }
    }

    #[test]
    fn every_computing_op_has_a_lowering() {
        use crate::ir::Op;
        use stackml::kernels::{Conv2dParams, UnaryOp};
        for op in [
            Op::Unary { op: UnaryOp::Abs },
            Op::Conv2d(Conv2dParams::default()),
            Op::Clamp,
            Op::Bitcast,
        ] {
            assert!(tensor_function(&op).is_some(), "{:?}", op.kind());
        }
        assert!(tensor_function(&Op::Input).is_none());
    }
}
