//! Stack-VM target: instruction set, module container and interpreter.

pub mod binary;
pub mod instruction;
pub mod interpreter;
pub mod module;

pub use instruction::{decode_all, encode_all, Instruction, TensorCall, TensorFunction};
pub use interpreter::{execute_tensor_function, StackValue, StackVmInterpreter};
pub use module::{Module, ModuleType, Section, STACKVM_MODULE_TYPE};
