//! Immediate evaluation of a scheduled graph.
//!
//! `EvaluatorRegistry` maps each `OpKind` to a routine that binds the node's
//! connectors to memory and calls the matching kernel. The registry is built
//! once and only read afterwards.

mod neutral;

use log::{debug, trace, warn};
use stackml::tensor::{TensorMut, TensorRef};
use stackml::{MemoryLocation, MemoryPools, MemoryView};

use crate::error::{Error, Result};
use crate::ir::{Graph, InputConnector, Node, OpKind, OutputId};
use crate::schedule::ScheduleResult;

pub use neutral::register_neutral_evaluators;

pub type EvaluatorFn = fn(&Node, &mut ModuleEvaluateContext<'_>) -> Result<()>;

#[derive(Clone)]
pub struct EvaluatorRegistry {
    routines: [Option<EvaluatorFn>; OpKind::COUNT],
}

impl EvaluatorRegistry {
    pub fn empty() -> Self {
        Self {
            routines: [None; OpKind::COUNT],
        }
    }

    /// Every operator kind, backed by the reference kernels.
    pub fn neutral() -> Self {
        let mut registry = Self::empty();
        register_neutral_evaluators(&mut registry);
        registry
    }

    pub fn register(&mut self, kind: OpKind, routine: EvaluatorFn) {
        self.routines[kind.index()] = Some(routine);
    }

    pub fn unregister(&mut self, kind: OpKind) {
        self.routines[kind.index()] = None;
    }

    pub fn get(&self, kind: OpKind) -> Option<EvaluatorFn> {
        self.routines[kind.index()]
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

/// Live memory for one scheduled graph.
pub struct ModuleEvaluateContext<'a> {
    graph: &'a Graph,
    schedule: &'a ScheduleResult,
    registry: &'a EvaluatorRegistry,
    pools: MemoryPools,
}

impl<'a> ModuleEvaluateContext<'a> {
    /// Allocate the scheduled pools and copy constants into rdata.
    pub fn new(
        graph: &'a Graph,
        schedule: &'a ScheduleResult,
        registry: &'a EvaluatorRegistry,
    ) -> Result<Self> {
        let mut pools = MemoryPools::new(schedule.pool_sizes);
        let rdata = schedule.rdata_image(graph)?;
        pools.pool_mut(MemoryLocation::Rdata).copy_from_slice(&rdata);
        Ok(Self {
            graph,
            schedule,
            registry,
            pools,
        })
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn pools(&self) -> &MemoryPools {
        &self.pools
    }

    /// Bytes of the `index`-th graph input.
    pub fn input_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        let id = *self
            .graph
            .inputs()
            .get(index)
            .ok_or_else(|| Error::graph(format!("graph has no input {index}")))?;
        let buffer = self.schedule.allocation(OutputId::new(id, 0))?.buffer;
        Ok(self.pools.write(&buffer)?)
    }

    /// Bytes feeding the `index`-th graph output.
    pub fn output(&self, index: usize) -> Result<&[u8]> {
        let id = *self
            .graph
            .outputs()
            .get(index)
            .ok_or_else(|| Error::graph(format!("graph has no output {index}")))?;
        let view = self.memory_at(&self.graph.node(id)?.inputs[0])?;
        Ok(self.pools.read(&view.buffer)?)
    }

    /// The buffer an input connector reads: its producer's allocation.
    pub fn memory_at(&self, connector: &InputConnector) -> Result<&'a MemoryView> {
        let source = connector
            .connection
            .ok_or_else(|| Error::graph("input connector is not connected"))?;
        self.memory_at_output(source)
    }

    pub fn memory_at_output(&self, id: OutputId) -> Result<&'a MemoryView> {
        self.schedule.allocation(id)
    }

    /// Bind `node`'s inputs and its first output, then hand them to `kernel`.
    pub fn run_kernel<F>(&mut self, node: &Node, kernel: F) -> Result<()>
    where
        F: FnOnce(&[TensorRef<'_>], TensorMut<'_>) -> stackml::Result<()>,
    {
        let input_views = node
            .inputs
            .iter()
            .map(|c| self.memory_at(c))
            .collect::<Result<Vec<_>>>()?;
        let output_view = self.memory_at_output(node.output_id(0))?;

        let buffers: Vec<_> = input_views.iter().map(|v| v.buffer).collect();
        let (slices, out) = self.pools.split(&buffers, &output_view.buffer)?;
        let inputs = input_views
            .iter()
            .zip(slices)
            .map(|(view, data)| view.bind(data))
            .collect::<stackml::Result<Vec<_>>>()?;
        let output = output_view.bind_mut(out)?;
        kernel(&inputs, output)?;
        Ok(())
    }

    /// Run every node of the compute sequence. Fails before touching memory
    /// if any node has no routine; on a kernel failure the output pool is
    /// restored to its contents before the pass.
    pub fn evaluate(&mut self) -> Result<()> {
        let graph = self.graph;
        let schedule = self.schedule;
        let sequence = &schedule.compute_sequence;
        let mut routines = Vec::with_capacity(sequence.len());
        for &id in sequence {
            let node = graph.node(id)?;
            let routine = self
                .registry
                .get(node.op.kind())
                .ok_or(Error::UnsupportedOperator(node.op.kind()))?;
            routines.push((node, routine));
        }

        debug!("evaluate: {} nodes", routines.len());
        let saved = self.pools.pool(MemoryLocation::Output).to_vec();
        for (node, routine) in routines {
            trace!("evaluate: {} {:?}", node.op.kind(), node.name);
            if let Err(err) = routine(node, self) {
                self.pools
                    .pool_mut(MemoryLocation::Output)
                    .copy_from_slice(&saved);
                warn!("evaluate: {} {:?} failed: {err}", node.op.kind(), node.name);
                return Err(match err {
                    Error::Runtime(source) => Error::NodeFailed {
                        kind: node.op.kind(),
                        name: node.name.clone(),
                        source,
                    },
                    other => other,
                });
            }
        }
        Ok(())
    }
}
