//! The contract with the external scheduler.
//!
//! The scheduler picks the evaluation order and a buffer for every output
//! connector. The evaluator and the code generator only read this; they never
//! reorder nodes or move buffers.

use std::collections::HashMap;

use stackml::{MemoryLocation, MemoryView};

use crate::error::{Error, Result};
use crate::ir::{Graph, NodeId, Op, OutputId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleResult {
    /// Nodes in evaluation order.
    pub compute_sequence: Vec<NodeId>,
    pub allocations: HashMap<OutputId, MemoryView>,
    pub pool_sizes: [usize; MemoryLocation::COUNT],
}

impl ScheduleResult {
    pub fn allocation(&self, id: OutputId) -> Result<&MemoryView> {
        self.allocations.get(&id).ok_or(Error::MissingAllocation(id))
    }

    /// Buffers of the graph inputs, in `Graph::inputs` order.
    pub fn input_views(&self, graph: &Graph) -> Result<Vec<MemoryView>> {
        graph
            .inputs()
            .into_iter()
            .map(|id| self.allocation(OutputId::new(id, 0)).cloned())
            .collect()
    }

    /// Buffers feeding the graph outputs, in `Graph::outputs` order.
    pub fn output_views(&self, graph: &Graph) -> Result<Vec<MemoryView>> {
        graph
            .outputs()
            .into_iter()
            .map(|id| {
                let node = graph.node(id)?;
                let source = node.inputs[0]
                    .connection
                    .ok_or_else(|| Error::graph(format!("output {:?} is not connected", node.name)))?;
                self.allocation(source).cloned()
            })
            .collect()
    }

    /// Initial contents of the rdata pool: every constant copied to its buffer.
    pub fn rdata_image(&self, graph: &Graph) -> Result<Vec<u8>> {
        let mut image = vec![0u8; self.pool_sizes[MemoryLocation::Rdata.index()]];
        for node in graph.nodes() {
            let Op::Constant { data } = &node.op else {
                continue;
            };
            let view = self.allocation(node.output_id(0))?;
            let buffer = view.buffer;
            if buffer.location != MemoryLocation::Rdata {
                return Err(Error::graph(format!(
                    "constant {:?} is allocated in {:?}, not rdata",
                    node.name, buffer.location
                )));
            }
            if data.len() > buffer.size || buffer.start + data.len() > image.len() {
                return Err(Error::graph(format!(
                    "constant {:?} ({} bytes) does not fit its buffer {:?}",
                    node.name,
                    data.len(),
                    buffer
                )));
            }
            image[buffer.start..buffer.start + data.len()].copy_from_slice(data);
        }
        Ok(image)
    }
}
