//! Net-graph error types.

use rt_core::{DataType, ElemId, PortId};
use thiserror::Error;

/// Result type for net-graph operations.
pub type NetResult<T> = Result<T, NetError>;

/// Net construction and validation errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetError {
    /// Element id not present in the graph.
    #[error("Element {0} does not exist")]
    UnknownElement(ElemId),

    /// Port id not present in the graph.
    #[error("Port {0} does not exist")]
    UnknownPort(PortId),

    /// Named port missing on an element.
    #[error("Element {element} has no port '{name}'")]
    NoSuchPort { element: ElemId, name: String },

    /// Operation needs a fragment but got a primitive.
    #[error("Element {0} is not a fragment")]
    NotAFragment(ElemId),

    /// Element already belongs to a different fragment.
    #[error("Element {element} belongs to {parent:?}, not fragment {expected}")]
    ForeignElement {
        element: ElemId,
        parent: Option<ElemId>,
        expected: ElemId,
    },

    /// Source port is not visible inside the connecting fragment.
    #[error("Port {port} cannot act as a source inside fragment {scope}")]
    IllegalSource { port: PortId, scope: ElemId },

    /// Sink port is not visible inside the connecting fragment.
    #[error("Port {port} cannot act as a sink inside fragment {scope}")]
    IllegalSink { port: PortId, scope: ElemId },

    /// Connected ports disagree on type.
    #[error("Cannot connect {from} ({from_ty}) to {to} ({to_ty})")]
    TypeMismatch {
        from: PortId,
        to: PortId,
        from_ty: DataType,
        to_ty: DataType,
    },

    /// Sink already has a different source.
    #[error("Port {port} is already fed by port {existing}")]
    AlreadyConnected { port: PortId, existing: PortId },

    /// Port's owner is not nested inside the fragment.
    #[error("Port {port} is not reachable from fragment {scope}")]
    NotReachable { port: PortId, scope: ElemId },

    /// Graph was frozen for loading.
    #[error("Net graph is frozen")]
    Frozen,

    /// Primitives form a loop with no delaying element.
    #[error("Combinational cycle through primitive '{primitive}'")]
    CombinationalCycle { primitive: String },

    /// Net description could not be rendered.
    #[error("Net description serialization failed: {message}")]
    Serialization { message: String },
}
