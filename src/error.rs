use thiserror::Error;

/// Crate-wide error type.
///
/// The variants fall into four families: shape errors (raised while a node
/// is being constructed, recoverable by the caller), configuration errors
/// (raised before a network allocates anything), format errors (fatal to a
/// load operation), and lookup errors (the requested node does not exist).
#[derive(Error, Debug)]
pub enum GradixError {
    #[error("axis {axis} is out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },

    #[error("{op}: incompatible operand shapes {lhs:?} and {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    #[error("slice [{start}, {start}+{size}) is out of bounds for extent {extent}")]
    InvalidSlice {
        start: usize,
        size: usize,
        extent: usize,
    },

    #[error("{op}: {message}")]
    InvalidOperand { op: &'static str, message: String },

    #[error("shape {shape:?} has a zero extent")]
    ZeroExtent { shape: Vec<usize> },

    #[error("expected {expected} values for shape {shape:?}, got {got}")]
    ValueCountMismatch {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },

    #[error("cost node must be a scalar, got shape {shape:?}")]
    NonScalarCost { shape: Vec<usize> },

    #[error("network has {count} {kind} placeholders, expected exactly one")]
    AmbiguousPlaceholder { kind: &'static str, count: usize },

    #[error("fed {got} values to a {kind} placeholder of {expected} elements")]
    PlaceholderSizeMismatch {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("no node is marked as output")]
    NoOutputNode,

    #[error("node {0} does not exist in this graph")]
    UnknownNode(usize),

    #[error("bad magic tag: not a gradix network file")]
    BadMagic,

    #[error("unknown operator identifier '{0}'")]
    UnknownOpName(String),

    #[error("malformed network file: {0}")]
    MalformedFile(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GradixError>;
