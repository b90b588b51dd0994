//! Fragment builder.
//!
//! Wraps a [`NetGraph`] and the session's [`NameAllocator`] so factories can
//! create one fragment at a time: add catalogue primitives (named uniquely),
//! expose boundary ports, declare value and port dependencies, then finish
//! with the fragment's value output.

use rt_core::{DataType, ElemId, NameAllocator, PortId, Value};
use rt_expr::Expr;

use crate::catalogue::{CorePrimitive, params, ports};
use crate::error::{NetError, NetResult};
use crate::graph::{Dependency, NetGraph, PortDependency, PortDirection};

/// A fragment that computes one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueFragment {
    pub fragment: ElemId,
    /// Out boundary port carrying the value.
    pub value: PortId,
    /// Out boundary port carrying the value's sample time, if known.
    pub time: Option<PortId>,
    pub ty: DataType,
}

/// Ports of a primitive created through the builder, in catalogue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveRef {
    pub id: ElemId,
    pub name: String,
    pub inputs: Vec<PortId>,
    pub outputs: Vec<PortId>,
}

impl PrimitiveRef {
    /// Input port by position. Panics on an out-of-range index, which is a
    /// bug in the factory.
    pub fn input(&self, index: usize) -> PortId {
        self.inputs[index]
    }

    /// The primary output.
    pub fn output(&self) -> PortId {
        self.outputs[0]
    }
}

/// Builds one fragment inside a [`NetGraph`].
pub struct FragmentBuilder<'a> {
    graph: &'a mut NetGraph,
    names: &'a mut NameAllocator,
    fragment: ElemId,
}

impl<'a> FragmentBuilder<'a> {
    /// Start a new detached fragment.
    pub fn new(
        graph: &'a mut NetGraph,
        names: &'a mut NameAllocator,
        label: impl Into<String>,
    ) -> NetResult<Self> {
        let fragment = graph.add_fragment(label)?;
        Ok(Self {
            graph,
            names,
            fragment,
        })
    }

    /// Continue building an existing fragment.
    pub fn resume(
        graph: &'a mut NetGraph,
        names: &'a mut NameAllocator,
        fragment: ElemId,
    ) -> NetResult<Self> {
        graph.fragment(fragment)?;
        Ok(Self {
            graph,
            names,
            fragment,
        })
    }

    pub fn id(&self) -> ElemId {
        self.fragment
    }

    pub fn graph(&self) -> &NetGraph {
        self.graph
    }

    /// Add a catalogue primitive with all its declared ports.
    pub fn primitive(&mut self, prim: CorePrimitive) -> NetResult<PrimitiveRef> {
        self.custom_primitive(&prim.type_id(), &prim.inputs(), &prim.outputs())
    }

    /// Add a primitive outside the core catalogue.
    pub fn custom_primitive(
        &mut self,
        type_id: &str,
        inputs: &[(&str, DataType)],
        outputs: &[(&str, DataType)],
    ) -> NetResult<PrimitiveRef> {
        let name = self.names.allocate(type_id);
        let id = self.graph.add_primitive(self.fragment, type_id, name.clone())?;
        let inputs = inputs
            .iter()
            .map(|(n, ty)| self.graph.add_port(id, *n, PortDirection::In, *ty))
            .collect::<NetResult<Vec<_>>>()?;
        let outputs = outputs
            .iter()
            .map(|(n, ty)| self.graph.add_port(id, *n, PortDirection::Out, *ty))
            .collect::<NetResult<Vec<_>>>()?;
        Ok(PrimitiveRef {
            id,
            name,
            inputs,
            outputs,
        })
    }

    /// Constant primitive carrying `value`.
    pub fn value(&mut self, value: &Value) -> NetResult<PrimitiveRef> {
        let prim = self.primitive(CorePrimitive::Value(value.data_type()))?;
        self.graph.set_param(prim.id, params::VALUE, value.to_param())?;
        Ok(prim)
    }

    pub fn set_param(&mut self, prim: ElemId, key: &str, value: impl Into<String>) -> NetResult<()> {
        self.graph.set_param(prim, key, value)
    }

    /// Wire two ports inside this fragment.
    pub fn connect(&mut self, from: PortId, to: PortId) -> NetResult<()> {
        self.graph.connect(self.fragment, from, to)
    }

    /// Add a boundary in port feeding `inner`.
    pub fn input(&mut self, name: &str, inner: PortId) -> NetResult<PortId> {
        let ty = self.graph.port(inner)?.ty;
        let port = self
            .graph
            .add_port(self.fragment, name, PortDirection::In, ty)?;
        self.graph.connect(self.fragment, port, inner)?;
        Ok(port)
    }

    /// Add a boundary out port fed by `inner`.
    pub fn output(&mut self, name: &str, inner: PortId) -> NetResult<PortId> {
        let ty = self.graph.port(inner)?.ty;
        let port = self
            .graph
            .add_port(self.fragment, name, PortDirection::Out, ty)?;
        self.graph.connect(self.fragment, inner, port)?;
        Ok(port)
    }

    /// Feed the inner port `input` from the fragment `source` compiles to.
    pub fn depend(&mut self, source: Expr, input: PortId) -> NetResult<()> {
        let input = self.input(&format!("dep{}", source.id()), input)?;
        self.graph.declare_dependency(
            self.fragment,
            Dependency {
                source,
                input,
                time_input: None,
            },
        )
    }

    /// Like [`depend`](Self::depend), also feeding `time_input` with the
    /// sample time of `source`.
    pub fn depend_synced(
        &mut self,
        source: Expr,
        input: PortId,
        time_input: PortId,
    ) -> NetResult<()> {
        let input = self.input(&format!("dep{}", source.id()), input)?;
        let time_input = self.input(&format!("time{}", source.id()), time_input)?;
        self.graph.declare_dependency(
            self.fragment,
            Dependency {
                source,
                input,
                time_input: Some(time_input),
            },
        )
    }

    /// Feed the inner port `input` from an arbitrary out port of the net.
    pub fn depend_port(&mut self, source: PortId, input: PortId) -> NetResult<()> {
        if self.graph.port(source)?.direction != PortDirection::Out {
            return Err(NetError::IllegalSource {
                port: source,
                scope: self.fragment,
            });
        }
        self.graph
            .declare_port_dependency(self.fragment, PortDependency { source, input })
    }

    /// Nest an already-built fragment inside this one.
    pub fn attach(&mut self, child: ElemId) -> NetResult<bool> {
        self.graph.attach(self.fragment, child)
    }

    /// Finish as a value fragment whose value comes from `inner`.
    pub fn finish_value(self, inner: PortId) -> NetResult<ValueFragment> {
        self.finish_value_with_time(inner, None)
    }

    /// Finish as a value fragment with an explicit sample-time output.
    pub fn finish_value_with_time(
        mut self,
        inner: PortId,
        time: Option<PortId>,
    ) -> NetResult<ValueFragment> {
        let ty = self.graph.port(inner)?.ty;
        let value = self.output(ports::VALUE_OUT, inner)?;
        let time = match time {
            Some(t) => Some(self.output(ports::TIME_OUT, t)?),
            None => None,
        };
        Ok(ValueFragment {
            fragment: self.fragment,
            value,
            time,
            ty,
        })
    }

    /// Finish without a value output (consumer and side-effect fragments).
    pub fn finish(self) -> ElemId {
        self.fragment
    }
}
