//! stackml compiler: graph IR, graph passes, the neutral evaluator and the
//! stack-VM code generator.
//!
//! A graph arrives already scheduled (`ScheduleResult`). The evaluator runs
//! it immediately against live memory pools; the code generator lowers the
//! same graph to a `stackml::stackvm::Module`. Both dispatch through
//! registries indexed by `OpKind` and share the kernels in `stackml`.

pub mod codegen;
pub mod error;
pub mod evaluator;
pub mod fusion;
pub mod ir;
pub mod schedule;
pub mod transforms;

pub use codegen::{register_stackvm_emitters, EmitterRegistry, StackVmModuleBuilder};
pub use error::{Error, Result};
pub use evaluator::{register_neutral_evaluators, EvaluatorRegistry, ModuleEvaluateContext};
pub use ir::{Graph, Node, NodeId, Op, OpKind, OutputId, InputId, TensorType};
pub use schedule::ScheduleResult;
