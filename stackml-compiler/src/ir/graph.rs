//! Node arena with index-based connectors.
//!
//! Nodes own their connectors. An input connector names at most one producer
//! `OutputId`; an output connector lists its consumers as `InputId`s. The
//! consumer lists are back references for traversal and are kept in sync by
//! `connect` / `disconnect`.

use std::collections::VecDeque;

use stackml::tensor::{compute_size, Shape};
use stackml::DataType;

use super::ops::Op;
use crate::error::{Error, Result};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId {
    pub node: NodeId,
    pub index: usize,
}

impl OutputId {
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputId {
    pub node: NodeId,
    pub index: usize,
}

impl InputId {
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorType {
    pub datatype: DataType,
    pub shape: Shape,
}

impl TensorType {
    pub fn new(datatype: DataType, shape: impl Into<Shape>) -> Self {
        Self {
            datatype,
            shape: shape.into(),
        }
    }

    pub fn f32(shape: impl Into<Shape>) -> Self {
        Self::new(DataType::Float32, shape)
    }

    pub fn size_in_bytes(&self) -> usize {
        compute_size(&self.shape) * self.datatype.size_in_bytes()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputConnector {
    pub ty: TensorType,
    pub connection: Option<OutputId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputConnector {
    pub ty: TensorType,
    pub consumers: Vec<InputId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op: Op,
    pub inputs: Vec<InputConnector>,
    pub outputs: Vec<OutputConnector>,
}

impl Node {
    pub fn output_id(&self, index: usize) -> OutputId {
        OutputId::new(self.id, index)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::graph(format!("no node {id}")))
    }

    pub fn output_type(&self, id: OutputId) -> Result<&TensorType> {
        self.node(id.node)?
            .outputs
            .get(id.index)
            .map(|o| &o.ty)
            .ok_or_else(|| Error::graph(format!("node {} has no output {}", id.node, id.index)))
    }

    /// Input nodes in node order; this order is the module's input order.
    pub fn inputs(&self) -> Vec<NodeId> {
        self.nodes_of(|op| matches!(op, Op::Input))
    }

    /// Output nodes in node order.
    pub fn outputs(&self) -> Vec<NodeId> {
        self.nodes_of(|op| matches!(op, Op::Output))
    }

    fn nodes_of(&self, pred: impl Fn(&Op) -> bool) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| pred(&n.op))
            .map(|n| n.id)
            .collect()
    }

    /// Add an unconnected node. Connector counts must match the op's arity.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op: Op,
        input_types: Vec<TensorType>,
        output_types: Vec<TensorType>,
    ) -> Result<NodeId> {
        let name = name.into();
        if input_types.len() != op.input_count() || output_types.len() != op.output_count() {
            return Err(Error::graph(format!(
                "{} node {name:?} takes {} inputs and {} outputs, got {} and {}",
                op.kind(),
                op.input_count(),
                op.output_count(),
                input_types.len(),
                output_types.len()
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            name,
            op,
            inputs: input_types
                .into_iter()
                .map(|ty| InputConnector {
                    ty,
                    connection: None,
                })
                .collect(),
            outputs: output_types
                .into_iter()
                .map(|ty| OutputConnector {
                    ty,
                    consumers: Vec::new(),
                })
                .collect(),
        });
        Ok(id)
    }

    /// Add a node whose inputs are typed after and wired to `sources`.
    pub fn add_op(
        &mut self,
        name: impl Into<String>,
        op: Op,
        sources: &[OutputId],
        output_type: TensorType,
    ) -> Result<OutputId> {
        let input_types = sources
            .iter()
            .map(|&s| self.output_type(s).cloned())
            .collect::<Result<Vec<_>>>()?;
        let id = self.add_node(name, op, input_types, vec![output_type])?;
        for (i, &source) in sources.iter().enumerate() {
            self.connect(source, InputId::new(id, i))?;
        }
        Ok(OutputId::new(id, 0))
    }

    pub fn add_input(&mut self, name: impl Into<String>, ty: TensorType) -> OutputId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            name: name.into(),
            op: Op::Input,
            inputs: Vec::new(),
            outputs: vec![OutputConnector {
                ty,
                consumers: Vec::new(),
            }],
        });
        OutputId::new(id, 0)
    }

    pub fn add_output(&mut self, name: impl Into<String>, source: OutputId) -> Result<NodeId> {
        let ty = self.output_type(source)?.clone();
        let id = self.add_node(name, Op::Output, vec![ty], Vec::new())?;
        self.connect(source, InputId::new(id, 0))?;
        Ok(id)
    }

    /// Add a constant; `data` must hold exactly the contiguous bytes of `ty`.
    pub fn add_constant(
        &mut self,
        name: impl Into<String>,
        ty: TensorType,
        data: Vec<u8>,
    ) -> Result<OutputId> {
        let name = name.into();
        if data.len() != ty.size_in_bytes() {
            return Err(Error::graph(format!(
                "constant {name:?} has {} bytes, its type needs {}",
                data.len(),
                ty.size_in_bytes()
            )));
        }
        let id = self.add_node(name, Op::Constant { data }, Vec::new(), vec![ty])?;
        Ok(OutputId::new(id, 0))
    }

    /// Wire `from` into `to`. Rejects type mismatches, a second producer and
    /// any edge that would close a cycle.
    pub fn connect(&mut self, from: OutputId, to: InputId) -> Result<()> {
        let from_ty = self.output_type(from)?;
        let input = self
            .node(to.node)?
            .inputs
            .get(to.index)
            .ok_or_else(|| Error::graph(format!("node {} has no input {}", to.node, to.index)))?;
        if &input.ty != from_ty {
            return Err(Error::graph(format!(
                "cannot connect {:?} {:?} to input {} of node {} expecting {:?} {:?}",
                from_ty.datatype, from_ty.shape, to.index, to.node, input.ty.datatype, input.ty.shape
            )));
        }
        if let Some(existing) = input.connection {
            return Err(Error::graph(format!(
                "input {} of node {} is already fed by node {}",
                to.index, to.node, existing.node
            )));
        }
        if self.reaches(to.node, from.node) {
            return Err(Error::graph(format!(
                "connecting node {} to node {} would create a cycle",
                from.node, to.node
            )));
        }

        self.nodes[to.node].inputs[to.index].connection = Some(from);
        self.nodes[from.node].outputs[from.index].consumers.push(to);
        Ok(())
    }

    pub fn disconnect(&mut self, to: InputId) -> Result<Option<OutputId>> {
        let input = self
            .nodes
            .get_mut(to.node)
            .and_then(|n| n.inputs.get_mut(to.index))
            .ok_or_else(|| Error::graph(format!("node {} has no input {}", to.node, to.index)))?;
        let Some(from) = input.connection.take() else {
            return Ok(None);
        };
        self.nodes[from.node].outputs[from.index]
            .consumers
            .retain(|c| *c != to);
        Ok(Some(from))
    }

    /// Whether `target` is reachable from `start` along producer → consumer edges.
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if std::mem::replace(&mut seen[id], true) {
                continue;
            }
            for output in &self.nodes[id].outputs {
                stack.extend(output.consumers.iter().map(|c| c.node));
            }
        }
        false
    }

    /// Kahn's algorithm; ties broken by node id.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut pending: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| n.inputs.iter().filter(|i| i.connection.is_some()).count())
            .collect();
        let mut ready: VecDeque<NodeId> = pending
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p == 0)
            .map(|(id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for output in &self.nodes[id].outputs {
                for consumer in &output.consumers {
                    pending[consumer.node] -= 1;
                    if pending[consumer.node] == 0 {
                        ready.push_back(consumer.node);
                    }
                }
            }
        }
        if order.len() != self.nodes.len() {
            return Err(Error::graph("graph has a cycle"));
        }
        Ok(order)
    }

    /// Drop every node that no output node depends on. Input nodes are always
    /// kept. Surviving nodes are renumbered in their original order. Returns
    /// the number of nodes removed.
    pub fn remove_unreachable(&mut self) -> usize {
        let mut live = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = self.outputs();
        stack.extend(self.inputs());
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut live[id], true) {
                continue;
            }
            stack.extend(
                self.nodes[id]
                    .inputs
                    .iter()
                    .filter_map(|i| i.connection.map(|c| c.node)),
            );
        }

        let removed = live.iter().filter(|&&l| !l).count();
        if removed == 0 {
            return 0;
        }

        let mut remap = vec![None; self.nodes.len()];
        let mut next = 0;
        for (old, &is_live) in live.iter().enumerate() {
            if is_live {
                remap[old] = Some(next);
                next += 1;
            }
        }

        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = nodes
            .into_iter()
            .filter(|n| live[n.id])
            .map(|mut node| {
                node.id = next_id(&remap, node.id);
                for input in &mut node.inputs {
                    if let Some(c) = &mut input.connection {
                        c.node = next_id(&remap, c.node);
                    }
                }
                for output in &mut node.outputs {
                    output.consumers.retain(|c| live[c.node]);
                    for c in &mut output.consumers {
                        c.node = next_id(&remap, c.node);
                    }
                }
                node
            })
            .collect();
        removed
    }
}

// Only called for ids marked live, which all have a slot.
fn next_id(remap: &[Option<NodeId>], id: NodeId) -> NodeId {
    remap[id].unwrap_or(id)
}
