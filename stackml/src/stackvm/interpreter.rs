//! Stack-VM interpreter.
//!
//! Executes a decoded `.text` stream against a value stack and a file of
//! shape registers. Buffer addresses come from `lea.buffer`; shapes and
//! strides are built from `ldc.i4` runs stored with `st.shape`; each
//! `tensor` instruction pops its operands and runs the matching kernel.

use log::{debug, trace};

use super::instruction::{decode_all, Instruction, TensorCall, TensorFunction};
use super::module::{Module, STACKVM_MODULE_TYPE};
use crate::error::{Error, Result};
use crate::kernels::{self, ImageResizeMode};
use crate::memory::{BufferRef, MemoryLocation, MemoryPools, MemoryView};
use crate::tensor::{TensorMut, TensorRef};

/// Number of shape registers addressable by `st.shape`.
pub const REGISTER_COUNT: usize = 256;

/// Maximum depth of the evaluation stack.
const MAX_STACK_DEPTH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StackValue {
    I4(i32),
    R4(f32),
    Ptr(BufferRef),
}

pub struct StackVmInterpreter {
    instructions: Vec<Instruction>,
    pools: MemoryPools,
    inputs: Vec<MemoryView>,
    outputs: Vec<MemoryView>,
}

impl StackVmInterpreter {
    /// Decode `module`, allocate its pools and load `.rdata`.
    pub fn new(module: &Module) -> Result<Self> {
        if module.module_type != STACKVM_MODULE_TYPE {
            return Err(Error::InvalidModule(format!(
                "module type {:?} is not a stack-VM module",
                String::from_utf8_lossy(&module.module_type)
            )));
        }
        module.validate()?;
        let instructions = decode_all(module.text())?;
        let mut pools = MemoryPools::new(module.pool_sizes);
        let rdata = module.rdata();
        pools.pool_mut(MemoryLocation::Rdata)[..rdata.len()].copy_from_slice(rdata);

        debug!(
            "stackvm: loaded {} instructions, pools {:?}",
            instructions.len(),
            module.pool_sizes
        );
        Ok(Self {
            instructions,
            pools,
            inputs: module.inputs.clone(),
            outputs: module.outputs.clone(),
        })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn inputs(&self) -> &[MemoryView] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[MemoryView] {
        &self.outputs
    }

    pub fn pools(&self) -> &MemoryPools {
        &self.pools
    }

    /// Bytes of graph input `index`, for the caller to fill before `run`.
    pub fn input_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        let buffer = self
            .inputs
            .get(index)
            .ok_or_else(|| Error::InvalidModule(format!("module has no input {index}")))?
            .buffer;
        self.pools.write(&buffer)
    }

    pub fn output(&self, index: usize) -> Result<&[u8]> {
        let view = self
            .outputs
            .get(index)
            .ok_or_else(|| Error::InvalidModule(format!("module has no output {index}")))?;
        self.pools.read(&view.buffer)
    }

    /// Execute the module until `ret`.
    pub fn run(&mut self) -> Result<()> {
        let mut stack: Vec<StackValue> = Vec::new();
        let mut registers: Vec<Option<Vec<usize>>> = vec![None; REGISTER_COUNT];

        for (pc, instruction) in self.instructions.iter().enumerate() {
            match instruction {
                Instruction::Nop => {}
                Instruction::LdcI4(v) => push(&mut stack, StackValue::I4(*v))?,
                Instruction::LdcR4(v) => push(&mut stack, StackValue::R4(*v))?,
                Instruction::LeaBuffer {
                    location,
                    start,
                    size,
                } => push(
                    &mut stack,
                    StackValue::Ptr(BufferRef::new(*location, *start as usize, *size as usize)),
                )?,
                Instruction::StShape { reg, rank } => {
                    let mut dims = vec![0usize; *rank as usize];
                    for d in (0..dims.len()).rev() {
                        dims[d] = match stack.pop() {
                            Some(StackValue::I4(v)) if v >= 0 => v as usize,
                            other => {
                                return Err(Error::program(format!(
                                    "st.shape at {pc}: expected a non-negative i4, got {other:?}"
                                )))
                            }
                        };
                    }
                    registers[*reg as usize] = Some(dims);
                }
                Instruction::Tensor(call) => {
                    trace!("stackvm: {pc}: {:?}", call.function);
                    call_tensor(&mut self.pools, &mut stack, &registers, call)?;
                    registers.iter_mut().for_each(|r| *r = None);
                }
                Instruction::Ret => return Ok(()),
            }
        }
        Err(Error::program("program ended without ret"))
    }
}

fn push(stack: &mut Vec<StackValue>, value: StackValue) -> Result<()> {
    if stack.len() >= MAX_STACK_DEPTH {
        return Err(Error::program("stack overflow"));
    }
    stack.push(value);
    Ok(())
}

fn register(registers: &[Option<Vec<usize>>], reg: usize) -> Result<&[usize]> {
    registers
        .get(reg)
        .and_then(|r| r.as_deref())
        .ok_or_else(|| Error::program(format!("shape register {reg} is not set")))
}

fn call_tensor(
    pools: &mut MemoryPools,
    stack: &mut Vec<StackValue>,
    registers: &[Option<Vec<usize>>],
    call: &TensorCall,
) -> Result<()> {
    let n = call.operand_count();
    if n == 0 || 2 * n > registers.len() {
        return Err(Error::program(format!("tensor call with {n} operands")));
    }
    let mut buffers = Vec::with_capacity(n);
    for _ in 0..n {
        match stack.pop() {
            Some(StackValue::Ptr(buffer)) => buffers.push(buffer),
            other => {
                return Err(Error::program(format!(
                    "tensor operand must be a buffer address, got {other:?}"
                )))
            }
        }
    }
    buffers.reverse();
    let Some((output_buffer, input_buffers)) = buffers.split_last() else {
        return Err(Error::program("tensor call without an output"));
    };

    let (input_slices, output_slice) = pools.split(input_buffers, output_buffer)?;
    let mut inputs = Vec::with_capacity(n - 1);
    for (i, data) in input_slices.into_iter().enumerate() {
        inputs.push(TensorRef::new(
            data,
            call.datatypes[i],
            register(registers, 2 * i)?,
            register(registers, 2 * i + 1)?,
        )?);
    }
    let output = TensorMut::new(
        output_slice,
        call.datatypes[n - 1],
        register(registers, 2 * (n - 1))?,
        register(registers, 2 * (n - 1) + 1)?,
    )?;
    execute_tensor_function(&call.function, &inputs, output)
}

fn operands<'a, const N: usize>(inputs: &[TensorRef<'a>]) -> Result<[TensorRef<'a>; N]> {
    <[TensorRef<'a>; N]>::try_from(inputs)
        .map_err(|_| Error::program(format!("expected {N} inputs, got {}", inputs.len())))
}

/// Run one kernel with operands that are already bound to memory.
pub fn execute_tensor_function(
    function: &TensorFunction,
    inputs: &[TensorRef<'_>],
    output: TensorMut<'_>,
) -> Result<()> {
    match function {
        TensorFunction::BatchToSpace {
            block_h,
            block_w,
            crop_h,
            crop_w,
        } => {
            let [input] = operands(inputs)?;
            kernels::batch_to_space(input, output, *block_h, *block_w, *crop_h, *crop_w)
        }
        TensorFunction::Binary {
            op,
            fused_activation,
        } => {
            let [a, b] = operands(inputs)?;
            kernels::binary(*op, a, b, output, *fused_activation)
        }
        TensorFunction::Clamp => {
            let [input, low, high] = operands(inputs)?;
            kernels::clamp(input, low, high, output)
        }
        TensorFunction::Concat { axis, concat_dims } => {
            kernels::concat(inputs, output, *axis, concat_dims)
        }
        TensorFunction::Conv2d(params) => {
            let [input, weights, bias] = operands(inputs)?;
            kernels::conv2d(input, weights, bias, output, params)
        }
        TensorFunction::Conv2dTranspose(params) => {
            let [input, weights, bias] = operands(inputs)?;
            kernels::conv2d_transpose(input, weights, bias, output, params)
        }
        TensorFunction::Convert => {
            let [input] = operands(inputs)?;
            kernels::convert(input, output)
        }
        TensorFunction::Dequantize(param) => {
            let [input] = operands(inputs)?;
            kernels::dequantize(input, output, *param)
        }
        TensorFunction::Gather { axis } => {
            let [input, indices] = operands(inputs)?;
            kernels::gather(input, indices, output, *axis)
        }
        TensorFunction::GatherNd { batch_dims } => {
            let [input, indices] = operands(inputs)?;
            kernels::gather_nd(input, indices, output, *batch_dims)
        }
        TensorFunction::Matmul { fused_activation } => {
            let [a, b, bias] = operands(inputs)?;
            kernels::matmul(a, b, bias, output, *fused_activation)
        }
        TensorFunction::Pad {
            paddings,
            mode,
            pad_value,
        } => {
            let [input] = operands(inputs)?;
            kernels::pad(input, output, paddings, *mode, *pad_value)
        }
        TensorFunction::Quantize(param) => {
            let [input] = operands(inputs)?;
            kernels::quantize(input, output, *param)
        }
        TensorFunction::Reduce {
            op,
            axes,
            init_value,
            keep_dims,
        } => {
            let [input] = operands(inputs)?;
            kernels::reduce(*op, input, output, axes, *init_value, *keep_dims)
        }
        TensorFunction::ReduceWindow2d(params) => {
            let [input] = operands(inputs)?;
            kernels::reduce_window2d(input, output, params)
        }
        TensorFunction::Bitcast => {
            let [input] = operands(inputs)?;
            kernels::bitcast(input, output)
        }
        TensorFunction::ResizeImage(params) => {
            let [input] = operands(inputs)?;
            match params.mode {
                ImageResizeMode::Bilinear => kernels::resize_bilinear(
                    input,
                    output,
                    params.align_corners,
                    params.half_pixel_centers,
                ),
                ImageResizeMode::NearestNeighbor => kernels::resize_nearest_neighbor(
                    input,
                    output,
                    params.align_corners,
                    params.half_pixel_centers,
                ),
            }
        }
        TensorFunction::Slice {
            begin,
            end,
            strides,
        } => {
            let [input] = operands(inputs)?;
            kernels::slice(input, output, begin, end, strides)
        }
        TensorFunction::TableLookup1d => {
            let [input, table] = operands(inputs)?;
            kernels::table_lookup1d(input, table, output)
        }
        TensorFunction::Transpose { perm } => {
            let [input] = operands(inputs)?;
            kernels::transpose(input, output, perm)
        }
        TensorFunction::Unary { op } => {
            let [input] = operands(inputs)?;
            kernels::unary(*op, input, output)
        }
        TensorFunction::NnilUnaryMethod { body } => {
            let [input] = operands(inputs)?;
            kernels::nnil_unary_method(input, output, body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;
    use crate::kernels::UnaryOp;
    use crate::stackvm::instruction::encode_all;
    use crate::stackvm::module::TEXT_SECTION;

    fn lea(location: MemoryLocation, start: u32, size: u32) -> Instruction {
        Instruction::LeaBuffer {
            location,
            start,
            size,
        }
    }

    fn shape(reg: u8, dims: &[i32]) -> Vec<Instruction> {
        let mut out: Vec<Instruction> = dims.iter().map(|&d| Instruction::LdcI4(d)).collect();
        out.push(Instruction::StShape {
            reg,
            rank: dims.len() as u8,
        });
        out
    }

    fn neg_module(program: Vec<Instruction>) -> Module {
        let input = MemoryView::contiguous(
            BufferRef::new(MemoryLocation::Input, 0, 8),
            DataType::Float32,
            vec![2],
        );
        let output = MemoryView::contiguous(
            BufferRef::new(MemoryLocation::Output, 0, 8),
            DataType::Float32,
            vec![2],
        );
        let mut module = Module::new(STACKVM_MODULE_TYPE, [8, 8, 0, 0], vec![input], vec![output]);
        module.set_section(TEXT_SECTION, encode_all(&program).unwrap());
        module
    }

    fn neg_program() -> Vec<Instruction> {
        let mut program = vec![
            lea(MemoryLocation::Input, 0, 8),
            lea(MemoryLocation::Output, 0, 8),
        ];
        for reg in 0..2u8 {
            program.extend(shape(2 * reg, &[2]));
            program.extend(shape(2 * reg + 1, &[1]));
        }
        program.push(Instruction::Tensor(TensorCall {
            function: TensorFunction::Unary { op: UnaryOp::Neg },
            datatypes: vec![DataType::Float32, DataType::Float32],
        }));
        program.push(Instruction::Ret);
        program
    }

    #[test]
    fn runs_a_unary_call() {
        let mut vm = StackVmInterpreter::new(&neg_module(neg_program())).unwrap();
        vm.input_mut(0)
            .unwrap()
            .copy_from_slice(bytemuck::cast_slice(&[1.5f32, -2.0]));
        vm.run().unwrap();
        let out = vm.output(0).unwrap();
        assert_eq!(&out[..4], &(-1.5f32).to_ne_bytes());
        assert_eq!(&out[4..], &2.0f32.to_ne_bytes());
    }

    #[test]
    fn missing_ret_is_an_error() {
        let mut program = neg_program();
        program.pop();
        let mut vm = StackVmInterpreter::new(&neg_module(program)).unwrap();
        let err = vm.run().unwrap_err();
        assert!(err.to_string().contains("without ret"), "got: {err}");
    }

    #[test]
    fn unset_register_is_an_error() {
        let program = vec![
            lea(MemoryLocation::Input, 0, 8),
            lea(MemoryLocation::Output, 0, 8),
            Instruction::Tensor(TensorCall {
                function: TensorFunction::Unary { op: UnaryOp::Neg },
                datatypes: vec![DataType::Float32, DataType::Float32],
            }),
            Instruction::Ret,
        ];
        let mut vm = StackVmInterpreter::new(&neg_module(program)).unwrap();
        let err = vm.run().unwrap_err();
        assert!(err.to_string().contains("register 0 is not set"), "got: {err}");
    }

    #[test]
    fn wrong_operand_kind_is_an_error() {
        let mut program = vec![Instruction::LdcR4(1.0), lea(MemoryLocation::Output, 0, 8)];
        program.extend(shape(0, &[2]));
        program.push(Instruction::Tensor(TensorCall {
            function: TensorFunction::Unary { op: UnaryOp::Neg },
            datatypes: vec![DataType::Float32, DataType::Float32],
        }));
        program.push(Instruction::Ret);
        let mut vm = StackVmInterpreter::new(&neg_module(program)).unwrap();
        let err = vm.run().unwrap_err();
        assert!(err.to_string().contains("buffer address"), "got: {err}");
    }

    #[test]
    fn rejects_foreign_module_type() {
        let mut module = neg_module(neg_program());
        module.module_type = *b"k210\0\0\0\0";
        let err = StackVmInterpreter::new(&module).err().unwrap();
        assert!(matches!(err, Error::InvalidModule(_)), "got: {err}");
    }

    #[test]
    fn rejects_oversized_pool_before_allocating() {
        let mut module = neg_module(neg_program());
        module.pool_sizes[MemoryLocation::Data.index()] = usize::MAX;
        let err = StackVmInterpreter::new(&module).err().unwrap();
        assert!(matches!(err, Error::InvalidModule(_)), "got: {err}");
    }
}
