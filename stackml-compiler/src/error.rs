use crate::ir::{OpKind, OutputId};

/// Failures reported while transforming, evaluating or lowering a graph.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No evaluator or emitter is registered for this operator kind.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(OpKind),

    /// A kernel (or its operand binding) failed for one node; the pass was aborted.
    #[error("{kind} node {name:?} failed: {source}")]
    NodeFailed {
        kind: OpKind,
        name: String,
        #[source]
        source: stackml::Error,
    },

    /// The graph violates a structural invariant (arity, types, cycles, dangling ids).
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// The schedule has no buffer for this output connector.
    #[error("no allocation for output {} of node {}", .0.index, .0.node)]
    MissingAllocation(OutputId),

    #[error(transparent)]
    Runtime(#[from] stackml::Error),
}

impl Error {
    pub fn graph(msg: impl Into<String>) -> Self {
        Error::InvalidGraph(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
