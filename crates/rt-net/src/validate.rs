//! Net validation and flattening.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use rt_core::{ElemId, PortId};

use crate::error::{NetError, NetResult};
use crate::graph::{ElementKind, NetGraph};

/// A primitive-to-primitive wire with boundary proxies resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatConnection {
    pub from: PortId,
    pub to: PortId,
}

/// Follow the source chain of a primitive input back to the primitive output
/// that drives it. Returns `None` for an unconnected input.
pub fn driving_output(graph: &NetGraph, input: PortId) -> NetResult<Option<PortId>> {
    let mut current = input;
    // Every hop crosses one boundary, so the chain is bounded by the port count.
    for _ in 0..=graph.ports.len() {
        let Some(src) = graph.source_of(current) else {
            return Ok(None);
        };
        let port = graph.port(src)?;
        if matches!(graph.element(port.owner)?.kind, ElementKind::Primitive(_)) {
            return Ok(Some(src));
        }
        current = src;
    }
    Err(NetError::NotReachable {
        port: input,
        scope: graph.port(input)?.owner,
    })
}

/// All flattened connections feeding primitives under `root`.
pub fn flatten(graph: &NetGraph, root: ElemId) -> NetResult<Vec<FlatConnection>> {
    let mut out = Vec::new();
    for prim in graph.primitives_under(root)? {
        for &port in &graph.element(prim)?.ports {
            if graph.port(port)?.direction != crate::graph::PortDirection::In {
                continue;
            }
            if let Some(from) = driving_output(graph, port)? {
                out.push(FlatConnection { from, to: port });
            }
        }
    }
    Ok(out)
}

/// Primitives under `root` in dependency order.
///
/// Fails with [`NetError::CombinationalCycle`] if primitives feed each other
/// in a loop.
pub fn evaluation_order(graph: &NetGraph, root: ElemId) -> NetResult<Vec<ElemId>> {
    let prims = graph.primitives_under(root)?;
    let mut dag: DiGraph<ElemId, ()> = DiGraph::with_capacity(prims.len(), prims.len());
    let index: HashMap<ElemId, NodeIndex> =
        prims.iter().map(|&p| (p, dag.add_node(p))).collect();

    for conn in flatten(graph, root)? {
        let from = graph.port(conn.from)?.owner;
        let to = graph.port(conn.to)?.owner;
        if let (Some(&a), Some(&b)) = (index.get(&from), index.get(&to)) {
            dag.add_edge(a, b, ());
        }
    }

    match toposort(&dag, None) {
        Ok(order) => Ok(order.into_iter().map(|n| dag[n]).collect()),
        Err(cycle) => {
            let prim = dag[cycle.node_id()];
            let name = graph
                .element(prim)?
                .as_primitive()
                .map(|p| p.name.clone())
                .unwrap_or_default();
            Err(NetError::CombinationalCycle { primitive: name })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PortDirection;
    use rt_core::DataType;

    fn negate(g: &mut NetGraph, frag: ElemId, name: &str) -> (ElemId, PortId, PortId) {
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
    fn flatten_resolves_boundary_proxies() {
        let mut g = NetGraph::new();
        let root = g.add_fragment("root").unwrap();
        let a_frag = g.add_fragment("a").unwrap();
        let b_frag = g.add_fragment("b").unwrap();
        g.attach(root, a_frag).unwrap();
        g.attach(root, b_frag).unwrap();
        let (_, _, a_out) = negate(&mut g, a_frag, "a");
        let (_, b_in, _) = negate(&mut g, b_frag, "b");

        let src = g.expose(root, a_out).unwrap();
        let dst = g.import(root, b_in).unwrap();
        g.connect(root, src, dst).unwrap();

        let flat = flatten(&g, root).unwrap();
        assert_eq!(flat, vec![FlatConnection { from: a_out, to: b_in }]);
    }

    #[test]
    fn order_follows_wiring() {
        let mut g = NetGraph::new();
        let root = g.add_fragment("root").unwrap();
        let (b, b_in, _) = negate(&mut g, root, "b");
        let (a, _, a_out) = negate(&mut g, root, "a");
        g.connect(root, a_out, b_in).unwrap();
        assert_eq!(evaluation_order(&g, root).unwrap(), vec![a, b]);
    }

    #[test]
    fn loops_are_combinational_cycles() {
        let mut g = NetGraph::new();
        let root = g.add_fragment("root").unwrap();
        let (_, a_in, a_out) = negate(&mut g, root, "a");
        let (_, b_in, b_out) = negate(&mut g, root, "b");
        g.connect(root, a_out, b_in).unwrap();
        g.connect(root, b_out, a_in).unwrap();
        assert!(matches!(
            evaluation_order(&g, root),
            Err(NetError::CombinationalCycle { .. })
        ));
    }
}
