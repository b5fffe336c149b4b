pub mod graph;
pub mod ops;
pub mod shape;

pub use graph::{Graph, InputConnector, InputId, Node, NodeId, OutputConnector, OutputId, TensorType};
pub use ops::{FusedUnaryOp, FusedUnarySubgraph, Op, OpKind};
