use crate::datatype::DataType;
use crate::memory::BufferRef;

/// Failures reported by kernels, memory pools and the stack-VM.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The kernel has no path for this element type (or byte width).
    #[error("unsupported datatype: {0}")]
    UnsupportedDataType(DataType),

    /// Operand shapes, ranks or attributes are inconsistent with the operator.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An index read from a tensor (gather indices, slice bounds) is outside its dimension.
    #[error("index {index} out of range for dimension of size {dim}")]
    IndexOutOfRange { index: i64, dim: usize },

    /// A view addresses more bytes than its buffer holds.
    #[error("buffer too small: {required} bytes required, {available} available")]
    BufferTooSmall { required: usize, available: usize },

    /// An input buffer intersects the output buffer of the same kernel call.
    #[error("buffer {0:?} overlaps the output buffer")]
    BufferOverlap(BufferRef),

    /// Malformed NNIL or stack-VM bytecode.
    #[error("invalid program: {0}")]
    InvalidProgram(String),

    /// Malformed module container.
    #[error("invalid module: {0}")]
    InvalidModule(String),
}

impl Error {
    pub fn shape(msg: impl Into<String>) -> Self {
        Error::ShapeMismatch(msg.into())
    }

    pub fn program(msg: impl Into<String>) -> Self {
        Error::InvalidProgram(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
