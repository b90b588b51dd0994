//! Core net-graph data structures.
//!
//! A net is a tree of fragments. Every element (primitive or fragment) has at
//! most one parent fragment, and wiring happens inside a fragment:
//!
//! - a **source** visible inside fragment `F` is an out port of a child of `F`,
//!   or one of `F`'s own in ports (boundary proxy seen from inside)
//! - a **sink** visible inside `F` is an in port of a child of `F`, or one of
//!   `F`'s own out ports (boundary proxy seen from inside)
//!
//! Every sink has at most one source. Inner outputs are made visible to
//! sibling fragments by [`NetGraph::expose`], which threads boundary proxies
//! through every nesting level.

use std::collections::{BTreeMap, HashMap};

use rt_core::{DataType, ElemId, PortId};
use rt_expr::Expr;

use crate::error::{NetError, NetResult};

/// Direction of a port, seen from outside its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    In,
    Out,
}

/// A typed, named port owned by a primitive or a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub id: PortId,
    pub owner: ElemId,
    pub name: String,
    pub direction: PortDirection,
    pub ty: DataType,
}

/// An atomic dataflow node.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub type_id: String,
    /// Unique within the net.
    pub name: String,
    /// Parameters in net-description string form.
    pub params: BTreeMap<String, String>,
}

/// A value dependency: feed `input` from the fragment `source` resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub source: Expr,
    pub input: PortId,
    /// Optional second input fed with the sample time of `source`.
    pub time_input: Option<PortId>,
}

/// A raw wiring request from an arbitrary (possibly nested) out port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDependency {
    pub source: PortId,
    pub input: PortId,
}

/// A composition unit: children plus declared dependencies.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    pub label: String,
    pub children: Vec<ElemId>,
    pub dependencies: Vec<Dependency>,
    pub port_dependencies: Vec<PortDependency>,
}

#[derive(Debug, Clone)]
pub enum ElementKind {
    Primitive(Primitive),
    Fragment(Fragment),
}

/// A primitive or fragment stored in the graph.
#[derive(Debug, Clone)]
pub struct Element {
    pub id: ElemId,
    pub parent: Option<ElemId>,
    pub kind: ElementKind,
    pub ports: Vec<PortId>,
}

impl Element {
    pub fn as_primitive(&self) -> Option<&Primitive> {
        match &self.kind {
            ElementKind::Primitive(p) => Some(p),
            ElementKind::Fragment(_) => None,
        }
    }

    pub fn as_fragment(&self) -> Option<&Fragment> {
        match &self.kind {
            ElementKind::Fragment(f) => Some(f),
            ElementKind::Primitive(_) => None,
        }
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self.kind, ElementKind::Fragment(_))
    }
}

/// A wire made inside `scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub scope: ElemId,
    pub from: PortId,
    pub to: PortId,
}

/// Arena of fragments, primitives, ports and connections for one net.
#[derive(Debug, Clone, Default)]
pub struct NetGraph {
    pub(crate) elements: Vec<Element>,
    pub(crate) ports: Vec<Port>,
    pub(crate) connections: Vec<Connection>,
    /// sink -> source
    pub(crate) source_of: HashMap<PortId, PortId>,
    /// (fragment, inner port) -> boundary proxy on that fragment
    out_proxies: HashMap<(ElemId, PortId), PortId>,
    in_proxies: HashMap<(ElemId, PortId), PortId>,
    frozen: bool,
}

impl NetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached fragment.
    pub fn add_fragment(&mut self, label: impl Into<String>) -> NetResult<ElemId> {
        self.ensure_mutable()?;
        Ok(self.push_element(
            None,
            ElementKind::Fragment(Fragment {
                label: label.into(),
                ..Fragment::default()
            }),
        ))
    }

    /// Create a primitive inside `fragment`.
    pub fn add_primitive(
        &mut self,
        fragment: ElemId,
        type_id: impl Into<String>,
        name: impl Into<String>,
    ) -> NetResult<ElemId> {
        self.ensure_mutable()?;
        self.fragment(fragment)?;
        let id = self.push_element(
            Some(fragment),
            ElementKind::Primitive(Primitive {
                type_id: type_id.into(),
                name: name.into(),
                params: BTreeMap::new(),
            }),
        );
        self.fragment_mut(fragment)?.children.push(id);
        Ok(id)
    }

    /// Set a primitive parameter.
    pub fn set_param(
        &mut self,
        primitive: ElemId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> NetResult<()> {
        self.ensure_mutable()?;
        match &mut self.element_mut(primitive)?.kind {
            ElementKind::Primitive(p) => {
                p.params.insert(key.into(), value.into());
                Ok(())
            }
            ElementKind::Fragment(_) => Err(NetError::UnknownElement(primitive)),
        }
    }

    /// Add a port to a primitive, or a boundary port to a fragment.
    pub fn add_port(
        &mut self,
        owner: ElemId,
        name: impl Into<String>,
        direction: PortDirection,
        ty: DataType,
    ) -> NetResult<PortId> {
        self.ensure_mutable()?;
        self.element(owner)?;
        let id = PortId::from_index(self.ports.len() as u32);
        self.ports.push(Port {
            id,
            owner,
            name: name.into(),
            direction,
            ty,
        });
        self.element_mut(owner)?.ports.push(id);
        Ok(id)
    }

    /// Find a port by name and direction.
    pub fn find_port(
        &self,
        owner: ElemId,
        name: &str,
        direction: PortDirection,
    ) -> NetResult<PortId> {
        self.element(owner)?
            .ports
            .iter()
            .copied()
            .find(|&p| {
                let port = &self.ports[p.slot()];
                port.name == name && port.direction == direction
            })
            .ok_or_else(|| NetError::NoSuchPort {
                element: owner,
                name: name.to_string(),
            })
    }

    /// Make `child` a child of `parent`.
    ///
    /// Returns `Ok(false)` if it already sits anywhere below `parent`;
    /// adding the same fragment twice is a no-op.
    pub fn attach(&mut self, parent: ElemId, child: ElemId) -> NetResult<bool> {
        self.ensure_mutable()?;
        self.fragment(parent)?;
        let current = self.element(child)?.parent;
        match current {
            Some(p) if p == parent || self.is_ancestor(parent, child) => Ok(false),
            Some(_) => Err(NetError::ForeignElement {
                element: child,
                parent: current,
                expected: parent,
            }),
            None if child == parent || self.is_ancestor(child, parent) => {
                Err(NetError::ForeignElement {
                    element: child,
                    parent: None,
                    expected: parent,
                })
            }
            None => {
                self.element_mut(child)?.parent = Some(parent);
                self.fragment_mut(parent)?.children.push(child);
                Ok(true)
            }
        }
    }

    /// Wire `from` to `to` inside fragment `scope`.
    ///
    /// Reconnecting a sink to its current source is a no-op.
    pub fn connect(&mut self, scope: ElemId, from: PortId, to: PortId) -> NetResult<()> {
        self.ensure_mutable()?;
        self.fragment(scope)?;
        let src = self.port(from)?;
        let dst = self.port(to)?;

        if !self.visible_as_source(scope, src)? {
            return Err(NetError::IllegalSource { port: from, scope });
        }
        if !self.visible_as_sink(scope, dst)? {
            return Err(NetError::IllegalSink { port: to, scope });
        }
        if src.ty != dst.ty {
            return Err(NetError::TypeMismatch {
                from,
                to,
                from_ty: src.ty,
                to_ty: dst.ty,
            });
        }
        match self.source_of.get(&to) {
            Some(&existing) if existing == from => return Ok(()),
            Some(&existing) => return Err(NetError::AlreadyConnected { port: to, existing }),
            None => {}
        }
        self.source_of.insert(to, from);
        self.connections.push(Connection { scope, from, to });
        Ok(())
    }

    /// Make an out port nested anywhere below `scope` usable as a source in
    /// `scope`.
    ///
    /// Creates (or reuses) a boundary out port on every fragment crossed
    /// between the port's owner and `scope`. Returns the port to connect from
    /// inside `scope`.
    pub fn expose(&mut self, scope: ElemId, port: PortId) -> NetResult<PortId> {
        let (owner, direction) = {
            let p = self.port(port)?;
            (p.owner, p.direction)
        };
        if direction != PortDirection::Out {
            return Err(NetError::IllegalSource { port, scope });
        }
        let crossing = self.path_between(scope, owner, port)?;

        let mut current = port;
        for frag in crossing {
            current = match self.out_proxies.get(&(frag, current)) {
                Some(&proxy) => proxy,
                None => {
                    let proxy = self.proxy_port(frag, current, PortDirection::Out)?;
                    self.connect(frag, current, proxy)?;
                    self.out_proxies.insert((frag, current), proxy);
                    proxy
                }
            };
        }
        Ok(current)
    }

    /// Make an in port nested anywhere below `scope` usable as a sink in
    /// `scope`, creating (or reusing) boundary in ports on the way down.
    pub fn import(&mut self, scope: ElemId, port: PortId) -> NetResult<PortId> {
        let (owner, direction) = {
            let p = self.port(port)?;
            (p.owner, p.direction)
        };
        if direction != PortDirection::In {
            return Err(NetError::IllegalSink { port, scope });
        }
        let crossing = self.path_between(scope, owner, port)?;

        let mut current = port;
        for frag in crossing {
            current = match self.in_proxies.get(&(frag, current)) {
                Some(&proxy) => proxy,
                None => {
                    let proxy = self.proxy_port(frag, current, PortDirection::In)?;
                    self.connect(frag, proxy, current)?;
                    self.in_proxies.insert((frag, current), proxy);
                    proxy
                }
            };
        }
        Ok(current)
    }

    pub fn declare_dependency(&mut self, fragment: ElemId, dep: Dependency) -> NetResult<()> {
        self.ensure_mutable()?;
        self.fragment_mut(fragment)?.dependencies.push(dep);
        Ok(())
    }

    pub fn declare_port_dependency(
        &mut self,
        fragment: ElemId,
        dep: PortDependency,
    ) -> NetResult<()> {
        self.ensure_mutable()?;
        self.fragment_mut(fragment)?.port_dependencies.push(dep);
        Ok(())
    }

    /// Remove and return the declared dependencies of a fragment.
    pub fn take_dependencies(
        &mut self,
        fragment: ElemId,
    ) -> NetResult<(Vec<Dependency>, Vec<PortDependency>)> {
        let frag = self.fragment_mut(fragment)?;
        Ok((
            std::mem::take(&mut frag.dependencies),
            std::mem::take(&mut frag.port_dependencies),
        ))
    }

    pub fn element(&self, id: ElemId) -> NetResult<&Element> {
        self.elements
            .get(id.slot())
            .ok_or(NetError::UnknownElement(id))
    }

    pub fn port(&self, id: PortId) -> NetResult<&Port> {
        self.ports.get(id.slot()).ok_or(NetError::UnknownPort(id))
    }

    pub fn fragment(&self, id: ElemId) -> NetResult<&Fragment> {
        self.element(id)?
            .as_fragment()
            .ok_or(NetError::NotAFragment(id))
    }

    /// Source currently feeding a sink, if any.
    pub fn source_of(&self, sink: PortId) -> Option<PortId> {
        self.source_of.get(&sink).copied()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// All primitives nested below `root`, in depth-first order.
    pub fn primitives_under(&self, root: ElemId) -> NetResult<Vec<ElemId>> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            match &self.element(id)?.kind {
                ElementKind::Primitive(_) => out.push(id),
                ElementKind::Fragment(f) => stack.extend(f.children.iter().rev().copied()),
            }
        }
        Ok(out)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn set_frozen(&mut self) {
        self.frozen = true;
    }

    fn ensure_mutable(&self) -> NetResult<()> {
        if self.frozen {
            Err(NetError::Frozen)
        } else {
            Ok(())
        }
    }

    fn push_element(&mut self, parent: Option<ElemId>, kind: ElementKind) -> ElemId {
        let id = ElemId::from_index(self.elements.len() as u32);
        self.elements.push(Element {
            id,
            parent,
            kind,
            ports: Vec::new(),
        });
        id
    }

    fn element_mut(&mut self, id: ElemId) -> NetResult<&mut Element> {
        self.elements
            .get_mut(id.slot())
            .ok_or(NetError::UnknownElement(id))
    }

    fn fragment_mut(&mut self, id: ElemId) -> NetResult<&mut Fragment> {
        match &mut self.element_mut(id)?.kind {
            ElementKind::Fragment(f) => Ok(f),
            ElementKind::Primitive(_) => Err(NetError::NotAFragment(id)),
        }
    }

    /// Fragments strictly between `scope` and `owner`, innermost first.
    fn path_between(&self, scope: ElemId, owner: ElemId, port: PortId) -> NetResult<Vec<ElemId>> {
        let mut crossing = Vec::new();
        let mut cursor = self.element(owner)?.parent;
        loop {
            match cursor {
                Some(p) if p == scope => return Ok(crossing),
                Some(p) => {
                    crossing.push(p);
                    cursor = self.element(p)?.parent;
                }
                None => return Err(NetError::NotReachable { port, scope }),
            }
        }
    }

    fn proxy_port(
        &mut self,
        frag: ElemId,
        inner: PortId,
        direction: PortDirection,
    ) -> NetResult<PortId> {
        let (name, ty) = {
            let p = self.port(inner)?;
            (format!("{}@{}", p.name, p.owner), p.ty)
        };
        self.add_port(frag, name, direction, ty)
    }

    /// Whether `ancestor` contains `id` (transitively).
    fn is_ancestor(&self, ancestor: ElemId, id: ElemId) -> bool {
        let mut cursor = self.elements.get(id.slot()).and_then(|e| e.parent);
        while let Some(p) = cursor {
            if p == ancestor {
                return true;
            }
            cursor = self.elements.get(p.slot()).and_then(|e| e.parent);
        }
        false
    }

    fn visible_as_source(&self, scope: ElemId, port: &Port) -> NetResult<bool> {
        Ok(match port.direction {
            PortDirection::Out => self.element(port.owner)?.parent == Some(scope),
            PortDirection::In => port.owner == scope,
        })
    }

    fn visible_as_sink(&self, scope: ElemId, port: &Port) -> NetResult<bool> {
        Ok(match port.direction {
            PortDirection::In => self.element(port.owner)?.parent == Some(scope),
            PortDirection::Out => port.owner == scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prim_with_ports(g: &mut NetGraph, frag: ElemId, name: &str) -> (ElemId, PortId, PortId) {
        let p = g.add_primitive(frag, "Core::DoubleNegate", name).unwrap();
        let i = g
            .add_port(p, "inValue", PortDirection::In, DataType::Double)
            .unwrap();
        let o = g
            .add_port(p, "outValue", PortDirection::Out, DataType::Double)
            .unwrap();
        (p, i, o)
    }

    #[test]
    fn connect_siblings_inside_fragment() {
        let mut g = NetGraph::new();
        let f = g.add_fragment("f").unwrap();
        let (_, _, a_out) = prim_with_ports(&mut g, f, "a");
        let (_, b_in, _) = prim_with_ports(&mut g, f, "b");
        g.connect(f, a_out, b_in).unwrap();
        assert_eq!(g.source_of(b_in), Some(a_out));
        // idempotent
        g.connect(f, a_out, b_in).unwrap();
        assert_eq!(g.connections().len(), 1);
    }

    #[test]
    fn sink_takes_a_single_source() {
        let mut g = NetGraph::new();
        let f = g.add_fragment("f").unwrap();
        let (_, _, a_out) = prim_with_ports(&mut g, f, "a");
        let (_, _, c_out) = prim_with_ports(&mut g, f, "c");
        let (_, b_in, _) = prim_with_ports(&mut g, f, "b");
        g.connect(f, a_out, b_in).unwrap();
        let err = g.connect(f, c_out, b_in).unwrap_err();
        assert!(matches!(err, NetError::AlreadyConnected { .. }));
    }

    #[test]
    fn connecting_outside_scope_is_rejected() {
        let mut g = NetGraph::new();
        let f = g.add_fragment("f").unwrap();
        let other = g.add_fragment("other").unwrap();
        let (_, _, a_out) = prim_with_ports(&mut g, f, "a");
        let (_, b_in, _) = prim_with_ports(&mut g, other, "b");
        let err = g.connect(f, a_out, b_in).unwrap_err();
        assert!(matches!(err, NetError::IllegalSink { .. }));
    }

    #[test]
    fn attach_is_idempotent_and_exclusive() {
        let mut g = NetGraph::new();
        let root = g.add_fragment("root").unwrap();
        let other = g.add_fragment("other").unwrap();
        let child = g.add_fragment("child").unwrap();
        assert!(g.attach(root, child).unwrap());
        assert!(!g.attach(root, child).unwrap());
        assert_eq!(g.fragment(root).unwrap().children, vec![child]);
        assert!(matches!(
            g.attach(other, child),
            Err(NetError::ForeignElement { .. })
        ));
    }

    #[test]
    fn attach_accepts_fragments_already_nested_below() {
        let mut g = NetGraph::new();
        let root = g.add_fragment("root").unwrap();
        let outer = g.add_fragment("outer").unwrap();
        let inner = g.add_fragment("inner").unwrap();
        g.attach(outer, inner).unwrap();
        g.attach(root, outer).unwrap();

        assert!(!g.attach(root, inner).unwrap());
        assert_eq!(g.fragment(root).unwrap().children, vec![outer]);
        assert_eq!(g.fragment(outer).unwrap().children, vec![inner]);
        assert!(matches!(
            g.attach(inner, outer),
            Err(NetError::ForeignElement { .. })
        ));
    }

    #[test]
    fn attach_rejects_cycles() {
        let mut g = NetGraph::new();
        let outer = g.add_fragment("outer").unwrap();
        let inner = g.add_fragment("inner").unwrap();
        g.attach(outer, inner).unwrap();
        assert!(g.attach(inner, outer).is_err());
    }

    #[test]
    fn expose_threads_proxies_through_nesting() {
        let mut g = NetGraph::new();
        let root = g.add_fragment("root").unwrap();
        let outer = g.add_fragment("outer").unwrap();
        let inner = g.add_fragment("inner").unwrap();
        g.attach(root, outer).unwrap();
        g.attach(outer, inner).unwrap();
        let (_, _, deep_out) = prim_with_ports(&mut g, inner, "deep");

        let exposed = g.expose(root, deep_out).unwrap();
        let exposed_port = g.port(exposed).unwrap();
        assert_eq!(exposed_port.owner, outer);
        assert_eq!(exposed_port.direction, PortDirection::Out);

        // proxies are reused
        assert_eq!(g.expose(root, deep_out).unwrap(), exposed);

        // the exposed port can feed a sibling at root level
        let sibling = g.add_fragment("sibling").unwrap();
        g.attach(root, sibling).unwrap();
        let sib_in = g
            .add_port(sibling, "in", PortDirection::In, DataType::Double)
            .unwrap();
        g.connect(root, exposed, sib_in).unwrap();
    }

    #[test]
    fn import_threads_in_proxies_down() {
        let mut g = NetGraph::new();
        let root = g.add_fragment("root").unwrap();
        let outer = g.add_fragment("outer").unwrap();
        let inner = g.add_fragment("inner").unwrap();
        g.attach(root, outer).unwrap();
        g.attach(outer, inner).unwrap();
        let (_, deep_in, _) = prim_with_ports(&mut g, inner, "deep");
        let (_, _, src) = prim_with_ports(&mut g, root, "src");

        let entry = g.import(root, deep_in).unwrap();
        assert_eq!(g.port(entry).unwrap().owner, outer);
        assert_eq!(g.import(root, deep_in).unwrap(), entry);
        g.connect(root, src, entry).unwrap();
        assert!(g.source_of(deep_in).is_some());
    }

    #[test]
    fn expose_fails_for_unrelated_port() {
        let mut g = NetGraph::new();
        let root = g.add_fragment("root").unwrap();
        let stray = g.add_fragment("stray").unwrap();
        let (_, _, out) = prim_with_ports(&mut g, stray, "x");
        assert!(matches!(
            g.expose(root, out),
            Err(NetError::NotReachable { .. })
        ));
    }

    #[test]
    fn type_mismatch_rejected() {
        let mut g = NetGraph::new();
        let f = g.add_fragment("f").unwrap();
        let (_, _, a_out) = prim_with_ports(&mut g, f, "a");
        let p = g.add_primitive(f, "Core::BooleanNot", "n").unwrap();
        let b_in = g
            .add_port(p, "inValue", PortDirection::In, DataType::Bool)
            .unwrap();
        assert!(matches!(
            g.connect(f, a_out, b_in),
            Err(NetError::TypeMismatch { .. })
        ));
    }
}
