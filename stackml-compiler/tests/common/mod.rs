//! Test-only scheduler and runners.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use stackml::stackvm::{Module, StackVmInterpreter};
use stackml::{BufferRef, MemoryLocation, MemoryView};
use stackml_compiler::ir::{Graph, Op, OutputId};
use stackml_compiler::{
    EmitterRegistry, EvaluatorRegistry, ModuleEvaluateContext, ScheduleResult,
    StackVmModuleBuilder,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn align(offset: usize) -> usize {
    (offset + 7) & !7
}

/// Topological order, one buffer per output connector, nothing reused.
/// Inputs go to the input pool, constants to rdata, values read by output
/// nodes to the output pool and everything else to data.
pub fn schedule(graph: &Graph) -> ScheduleResult {
    let order = graph.topological_order().unwrap();
    let feeds_output: HashSet<OutputId> = graph
        .outputs()
        .into_iter()
        .filter_map(|id| graph.node(id).unwrap().inputs[0].connection)
        .collect();

    let mut pool_sizes = [0usize; MemoryLocation::COUNT];
    let mut allocations = HashMap::new();
    for &id in &order {
        let node = graph.node(id).unwrap();
        for (index, output) in node.outputs.iter().enumerate() {
            let output_id = OutputId::new(id, index);
            let location = match node.op {
                Op::Input => MemoryLocation::Input,
                Op::Constant { .. } => MemoryLocation::Rdata,
                _ if feeds_output.contains(&output_id) => MemoryLocation::Output,
                _ => MemoryLocation::Data,
            };
            let size = output.ty.size_in_bytes();
            let start = align(pool_sizes[location.index()]);
            pool_sizes[location.index()] = start + size;
            allocations.insert(
                output_id,
                MemoryView::contiguous(
                    BufferRef::new(location, start, size),
                    output.ty.datatype,
                    output.ty.shape.clone(),
                ),
            );
        }
    }
    ScheduleResult {
        compute_sequence: order,
        allocations,
        pool_sizes,
    }
}

/// Evaluate immediately with the neutral registry.
pub fn evaluate(graph: &Graph, inputs: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let schedule = schedule(graph);
    let registry = EvaluatorRegistry::neutral();
    let mut ctx = ModuleEvaluateContext::new(graph, &schedule, &registry).unwrap();
    for (i, input) in inputs.iter().enumerate() {
        ctx.input_mut(i).unwrap().copy_from_slice(input);
    }
    ctx.evaluate().unwrap();
    (0..graph.outputs().len())
        .map(|i| ctx.output(i).unwrap().to_vec())
        .collect()
}

/// Lower, serialize, reload and interpret.
pub fn compile_and_run(graph: &Graph, inputs: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let schedule = schedule(graph);
    let emitters = EmitterRegistry::stackvm();
    let module = StackVmModuleBuilder::new(graph, &schedule, &emitters)
        .build()
        .unwrap();
    let bytes = module.to_bytes().unwrap();
    let module = Module::from_bytes(&bytes).unwrap();

    let mut vm = StackVmInterpreter::new(&module).unwrap();
    for (i, input) in inputs.iter().enumerate() {
        vm.input_mut(i).unwrap().copy_from_slice(input);
    }
    vm.run().unwrap();
    (0..module.outputs.len())
        .map(|i| vm.output(i).unwrap().to_vec())
        .collect()
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

pub fn i32_bytes(values: &[i32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

pub fn to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// `n` values spread over `[lo, hi)`.
pub fn ramp(n: usize, lo: f32, hi: f32) -> Vec<f32> {
    (0..n).map(|i| lo + (hi - lo) * i as f32 / n as f32).collect()
}
