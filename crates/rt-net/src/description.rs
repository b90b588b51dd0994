//! Net description protocol.
//!
//! A frozen net is exported as a flat list of named primitives and
//! primitive-to-primitive connections. Fragments and boundary proxies do not
//! appear in the description. The JSON form is hashed with SHA-256 to give
//! the net a stable content identifier for logs.

use std::collections::BTreeMap;

use rt_core::{DataType, ElemId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{NetError, NetResult};
use crate::graph::{NetGraph, PortDirection};
use crate::validate;

/// A typed port of a described primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescription {
    pub name: String,
    pub ty: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveDescription {
    pub name: String,
    pub type_id: String,
    pub params: BTreeMap<String, String>,
    pub inputs: Vec<PortDescription>,
    pub outputs: Vec<PortDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescription {
    pub from: String,
    pub from_port: String,
    pub to: String,
    pub to_port: String,
}

/// Flat, engine-facing form of a net.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetDescription {
    pub primitives: Vec<PrimitiveDescription>,
    pub connections: Vec<ConnectionDescription>,
}

impl NetDescription {
    pub fn primitive(&self, name: &str) -> Option<&PrimitiveDescription> {
        self.primitives.iter().find(|p| p.name == name)
    }

    /// Primitives with the given type id.
    pub fn of_type<'a>(&'a self, type_id: &'a str) -> impl Iterator<Item = &'a PrimitiveDescription> {
        self.primitives.iter().filter(move |p| p.type_id == type_id)
    }

    /// Connection feeding `to.to_port`, if any.
    pub fn source_of(&self, to: &str, to_port: &str) -> Option<&ConnectionDescription> {
        self.connections
            .iter()
            .find(|c| c.to == to && c.to_port == to_port)
    }

    pub fn to_json(&self) -> NetResult<String> {
        serde_json::to_string(self).map_err(|e| NetError::Serialization {
            message: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> NetResult<Self> {
        serde_json::from_str(json).map_err(|e| NetError::Serialization {
            message: e.to_string(),
        })
    }

    /// Hex SHA-256 of the JSON form.
    pub fn digest(&self) -> NetResult<String> {
        let json = self.to_json()?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl NetGraph {
    /// Validate the net rooted at `root`, freeze the graph and export it.
    ///
    /// Primitives appear in evaluation order. Fails if primitives form a
    /// combinational cycle; the graph stays mutable in that case.
    pub fn freeze(&mut self, root: ElemId) -> NetResult<NetDescription> {
        let order = validate::evaluation_order(self, root)?;
        let mut primitives = Vec::with_capacity(order.len());
        for id in &order {
            let elem = self.element(*id)?;
            let Some(prim) = elem.as_primitive() else {
                continue;
            };
            let mut inputs = Vec::new();
            let mut outputs = Vec::new();
            for &port in &elem.ports {
                let p = self.port(port)?;
                let desc = PortDescription {
                    name: p.name.clone(),
                    ty: p.ty,
                };
                match p.direction {
                    PortDirection::In => inputs.push(desc),
                    PortDirection::Out => outputs.push(desc),
                }
            }
            primitives.push(PrimitiveDescription {
                name: prim.name.clone(),
                type_id: prim.type_id.clone(),
                params: prim.params.clone(),
                inputs,
                outputs,
            });
        }

        let mut connections = Vec::new();
        for conn in validate::flatten(self, root)? {
            let from = self.port(conn.from)?;
            let to = self.port(conn.to)?;
            connections.push(ConnectionDescription {
                from: self.primitive_name(from.owner)?,
                from_port: from.name.clone(),
                to: self.primitive_name(to.owner)?,
                to_port: to.name.clone(),
            });
        }

        self.set_frozen();
        Ok(NetDescription {
            primitives,
            connections,
        })
    }

    fn primitive_name(&self, id: ElemId) -> NetResult<String> {
        self.element(id)?
            .as_primitive()
            .map(|p| p.name.clone())
            .ok_or(NetError::UnknownElement(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FragmentBuilder;
    use crate::catalogue::{CorePrimitive, ports};
    use rt_core::{NameAllocator, Value};
    use rt_expr::UnaryOp;

    fn small_net() -> (NetGraph, ElemId) {
        let mut graph = NetGraph::new();
        let mut names = NameAllocator::new();
        let mut b = FragmentBuilder::new(&mut graph, &mut names, "net").unwrap();
        let k = b.value(&Value::Double(1.5)).unwrap();
        let neg = b.primitive(CorePrimitive::Unary(UnaryOp::Negate)).unwrap();
        b.connect(k.output(), neg.input(0)).unwrap();
        let root = b.finish();
        (graph, root)
    }

    #[test]
    fn freeze_exports_primitives_in_order() {
        let (mut graph, root) = small_net();
        let desc = graph.freeze(root).unwrap();
        assert!(graph.is_frozen());
        assert_eq!(desc.primitives.len(), 2);
        assert_eq!(desc.primitives[0].type_id, "Core::DoubleValue");
        assert_eq!(desc.primitives[0].params["Value"], "1.5");
        let neg = &desc.primitives[1];
        let conn = desc.source_of(&neg.name, ports::VALUE_IN).unwrap();
        assert_eq!(conn.from, desc.primitives[0].name);
    }

    #[test]
    fn frozen_graph_rejects_edits() {
        let (mut graph, root) = small_net();
        graph.freeze(root).unwrap();
        assert_eq!(graph.add_fragment("late"), Err(NetError::Frozen));
    }

    #[test]
    fn digest_is_stable_and_json_round_trips() {
        let (mut graph, root) = small_net();
        let desc = graph.freeze(root).unwrap();
        let json = desc.to_json().unwrap();
        let back = NetDescription::from_json(&json).unwrap();
        assert_eq!(back, desc);
        assert_eq!(back.digest().unwrap(), desc.digest().unwrap());
        assert_eq!(desc.digest().unwrap().len(), 64);
    }
}
