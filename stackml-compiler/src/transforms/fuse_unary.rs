use log::debug;
use stackml::kernels::UnaryOp;
use stackml::DataType;

use super::GraphPass;
use crate::error::{Error, Result};
use crate::ir::{FusedUnarySubgraph, Graph, Node, NodeId, Op};

/// Collapses chains of two or more f32 unary nodes into one `FusedUnary`
/// node. Every link except the last must have exactly one consumer. The
/// replaced nodes are removed by a trailing dead-code sweep.
pub struct FuseUnary;

impl GraphPass for FuseUnary {
    fn name(&self) -> &'static str {
        "fuse_unary"
    }

    fn run(&self, graph: &mut Graph) -> Result<bool> {
        let chains = find_chains(graph)?;
        if chains.is_empty() {
            return Ok(false);
        }
        for chain in &chains {
            fuse(graph, chain)?;
        }
        graph.remove_unreachable();
        Ok(true)
    }
}

fn fusible(node: &Node) -> Option<UnaryOp> {
    match node.op {
        Op::Unary { op } if node.outputs[0].ty.datatype == DataType::Float32 => Some(op),
        _ => None,
    }
}

fn sole_consumer(node: &Node) -> Option<NodeId> {
    match node.outputs.first()?.consumers.as_slice() {
        [only] => Some(only.node),
        _ => None,
    }
}

fn find_chains(graph: &Graph) -> Result<Vec<Vec<NodeId>>> {
    let mut claimed = vec![false; graph.len()];
    let mut chains = Vec::new();
    for id in graph.topological_order()? {
        let node = graph.node(id)?;
        if claimed[id] || fusible(node).is_none() || node.inputs[0].connection.is_none() {
            continue;
        }
        let mut chain = vec![id];
        let mut current = node;
        while let Some(next) = sole_consumer(current) {
            let next_node = graph.node(next)?;
            if fusible(next_node).is_none() {
                break;
            }
            chain.push(next);
            current = next_node;
        }
        for &link in &chain {
            claimed[link] = true;
        }
        if chain.len() >= 2 {
            chains.push(chain);
        }
    }
    Ok(chains)
}

fn fuse(graph: &mut Graph, chain: &[NodeId]) -> Result<()> {
    let head = graph.node(chain[0])?;
    let source = head.inputs[0]
        .connection
        .ok_or_else(|| Error::graph(format!("unary node {:?} has no input", head.name)))?;
    let ops = chain
        .iter()
        .map(|&id| {
            let node = graph.node(id)?;
            fusible(node).ok_or_else(|| Error::graph(format!("{:?} is not fusible", node.name)))
        })
        .collect::<Result<Vec<_>>>()?;

    let tail = graph.node(chain[chain.len() - 1])?;
    let name = format!("{}.fused", tail.name);
    let ty = tail.outputs[0].ty.clone();
    let consumers = tail.outputs[0].consumers.clone();

    let fused = graph.add_op(
        name,
        Op::FusedUnary {
            subgraph: FusedUnarySubgraph::chain(&ops),
        },
        &[source],
        ty,
    )?;
    for consumer in consumers {
        graph.disconnect(consumer)?;
        graph.connect(fused, consumer)?;
    }
    debug!("fuse_unary: {ops:?} -> node {}", fused.node);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FusedUnaryOp, TensorType};

    fn unary(g: &mut Graph, name: &str, op: UnaryOp, src: crate::ir::OutputId) -> crate::ir::OutputId {
        g.add_op(name, Op::Unary { op }, &[src], TensorType::f32([4])).unwrap()
    }

    #[test]
    fn fuses_a_linear_chain() {
        let mut g = Graph::new();
        let x = g.add_input("x", TensorType::f32([4]));
        let a = unary(&mut g, "a", UnaryOp::Neg, x);
        let b = unary(&mut g, "b", UnaryOp::Exp, a);
        let c = unary(&mut g, "c", UnaryOp::Sqrt, b);
        g.add_output("y", c).unwrap();

        assert!(FuseUnary.run(&mut g).unwrap());
        let kinds: Vec<_> = g.nodes().iter().map(|n| n.op.kind()).collect();
        assert_eq!(
            kinds,
            [crate::ir::OpKind::Input, crate::ir::OpKind::Output, crate::ir::OpKind::FusedUnary]
        );
        let Op::FusedUnary { subgraph } = &g.node(2).unwrap().op else {
            panic!("expected a fused node");
        };
        assert_eq!(subgraph.ops.len(), 4);
        assert_eq!(
            subgraph.ops[3],
            FusedUnaryOp::Unary {
                op: UnaryOp::Sqrt,
                input: 2
            }
        );
        assert_eq!(g.node(1).unwrap().inputs[0].connection.map(|c| c.node), Some(2));
        assert!(!FuseUnary.run(&mut g).unwrap());
    }

    #[test]
    fn stops_at_fan_out() {
        let mut g = Graph::new();
        let x = g.add_input("x", TensorType::f32([4]));
        let a = unary(&mut g, "a", UnaryOp::Neg, x);
        let b = unary(&mut g, "b", UnaryOp::Exp, a);
        let c = unary(&mut g, "c", UnaryOp::Abs, a);
        g.add_output("y0", b).unwrap();
        g.add_output("y1", c).unwrap();

        assert!(!FuseUnary.run(&mut g).unwrap());
        assert_eq!(g.len(), 6);
    }

    #[test]
    fn leaves_non_float_unary_alone() {
        let mut g = Graph::new();
        let x = g.add_input("x", TensorType::new(DataType::Int32, [4]));
        let a = g
            .add_op("a", Op::Unary { op: UnaryOp::Neg }, &[x], TensorType::new(DataType::Int32, [4]))
            .unwrap();
        let b = g
            .add_op("b", Op::Unary { op: UnaryOp::Abs }, &[a], TensorType::new(DataType::Int32, [4]))
            .unwrap();
        g.add_output("y", b).unwrap();
        assert!(!FuseUnary.run(&mut g).unwrap());
    }
}
