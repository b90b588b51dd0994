//! rt-net: fragment/port graph model for rtnet.
//!
//! Provides:
//! - Net graph data structures (fragments, primitives, typed ports, wiring)
//! - Fragment builder used by value and consumer factories
//! - Core primitive catalogue (`Core::<Type><Op>` type ids)
//! - Validation (combinational cycles) and the flat net description protocol
//!
//! # Example
//!
//! ```
//! use rt_core::{NameAllocator, Value};
//! use rt_net::{CorePrimitive, FragmentBuilder, NetGraph};
//! use rt_expr::UnaryOp;
//!
//! let mut graph = NetGraph::new();
//! let mut names = NameAllocator::new();
//! let mut b = FragmentBuilder::new(&mut graph, &mut names, "net").unwrap();
//! let k = b.value(&Value::Double(2.0)).unwrap();
//! let neg = b.primitive(CorePrimitive::Unary(UnaryOp::Negate)).unwrap();
//! b.connect(k.output(), neg.input(0)).unwrap();
//! let root = b.finish();
//!
//! let desc = graph.freeze(root).unwrap();
//! assert_eq!(desc.primitives.len(), 2);
//! assert_eq!(desc.connections.len(), 1);
//! ```

pub mod builder;
pub mod catalogue;
pub mod description;
pub mod error;
pub mod graph;
pub mod validate;

// Re-exports for ergonomics
pub use builder::{FragmentBuilder, PrimitiveRef, ValueFragment};
pub use catalogue::CorePrimitive;
pub use description::{
    ConnectionDescription, NetDescription, PortDescription, PrimitiveDescription,
};
pub use error::{NetError, NetResult};
pub use graph::{
    Connection, Dependency, Element, ElementKind, Fragment, NetGraph, Port, PortDependency,
    PortDirection, Primitive,
};
