//! stackml runtime: tensor kernels, fused-unary bytecode and the stack-VM.
//!
//! - `tensor` / `datatype` / `memory`: strided addressing over raw byte pools
//! - `kernels`: reference operator implementations shared by the compiler's
//!   evaluator and the stack-VM
//! - `stackvm`: instruction encoding, module container and interpreter

pub mod datatype;
pub mod error;
pub mod kernels;
pub mod memory;
pub mod stackvm;
pub mod tensor;

pub use datatype::{DataType, Element};
pub use error::{Error, Result};
pub use memory::{BufferRef, MemoryLocation, MemoryPools, MemoryView};
pub use tensor::{Shape, Strides};
