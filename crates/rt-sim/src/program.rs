//! Executable form of a net description.
//!
//! Primitives are evaluated once per cycle in topological order. A null
//! (`None`) input yields a null output for every core primitive except the
//! ones that only observe their input (terminate, netcomm out, monitor).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use rt_core::{DataType, Value};
use rt_expr::{BinaryOp, ExprKind, UnaryOp};
use rt_net::catalogue::params;
use rt_net::{CorePrimitive, NetDescription, PrimitiveDescription};

use crate::device::DevicePrimitive;
use crate::error::{SimError, SimResult};

enum Op {
    NetTime,
    Cancel,
    Constant(Value),
    Unary(UnaryOp),
    Binary(BinaryOp),
    IntToDouble,
    RisingEdge,
    Terminate,
    Conditional,
    ChangeDetect,
    Timestamp,
    NetcommIn { key: String, ty: DataType },
    NetcommOut { key: String },
    Monitor { key: String },
    Device(Arc<dyn DevicePrimitive>),
}

struct Node {
    name: String,
    op: Op,
    params: BTreeMap<String, String>,
    /// Source `(node, output)` of each input.
    inputs: Vec<Option<(usize, usize)>>,
    outputs: usize,
    /// Previous input (edge and change detection).
    memory: Option<Value>,
    /// Last `(active, value)` reported by a monitor.
    reported: Option<(bool, Option<Value>)>,
}

/// What a net sees of the world in one cycle.
pub(crate) struct CycleInput<'a> {
    pub time: f64,
    pub cancel: bool,
    pub netcomm: &'a HashMap<String, Value>,
}

/// What a net did in one cycle.
#[derive(Debug, Default)]
pub(crate) struct CycleOutput {
    /// `(key, active, value)` of monitors whose report changed.
    pub reports: Vec<(String, bool, Option<Value>)>,
    pub writes: Vec<(String, Value)>,
    pub terminate: bool,
}

pub(crate) struct Program {
    nodes: Vec<Node>,
    order: Vec<usize>,
}

impl Program {
    pub(crate) fn load(
        description: &NetDescription,
        devices: &HashMap<String, Arc<dyn DevicePrimitive>>,
    ) -> SimResult<Self> {
        let mut index = HashMap::new();
        let mut nodes = Vec::with_capacity(description.primitives.len());
        for (i, prim) in description.primitives.iter().enumerate() {
            if index.insert(prim.name.as_str(), i).is_some() {
                return Err(SimError::DuplicatePrimitive {
                    name: prim.name.clone(),
                });
            }
            nodes.push(Node {
                name: prim.name.clone(),
                op: op_for(prim, devices)?,
                params: prim.params.clone(),
                inputs: vec![None; prim.inputs.len()],
                outputs: prim.outputs.len(),
                memory: None,
                reported: None,
            });
        }

        let mut graph = DiGraph::<usize, ()>::new();
        let handles: Vec<NodeIndex> = (0..nodes.len()).map(|i| graph.add_node(i)).collect();
        for conn in &description.connections {
            let from = lookup(&index, &conn.from)?;
            let to = lookup(&index, &conn.to)?;
            let out = port_index(&description.primitives[from], &conn.from_port, false)?;
            let input = port_index(&description.primitives[to], &conn.to_port, true)?;
            let slot = &mut nodes[to].inputs[input];
            if slot.is_some() {
                return Err(SimError::DoubleConnection {
                    primitive: conn.to.clone(),
                    port: conn.to_port.clone(),
                });
            }
            *slot = Some((from, out));
            graph.add_edge(handles[from], handles[to], ());
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| SimError::Cycle {
                primitive: nodes[graph[cycle.node_id()]].name.clone(),
            })?
            .into_iter()
            .map(|n| graph[n])
            .collect();
        Ok(Self { nodes, order })
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Evaluate one cycle.
    pub(crate) fn cycle(&mut self, input: &CycleInput<'_>) -> SimResult<CycleOutput> {
        let mut out = CycleOutput::default();
        let mut values: Vec<Vec<Option<Value>>> =
            self.nodes.iter().map(|n| vec![None; n.outputs]).collect();

        for &i in &self.order {
            let args: Vec<Option<Value>> = self.nodes[i]
                .inputs
                .iter()
                .map(|src| src.and_then(|(n, p)| values[n].get(p).cloned().flatten()))
                .collect();
            let node = &mut self.nodes[i];
            let result = match &node.op {
                Op::NetTime => Some(Value::Double(input.time)),
                Op::Cancel => Some(Value::Bool(input.cancel)),
                Op::Constant(v) => Some(v.clone()),
                Op::Unary(op) => args[0]
                    .as_ref()
                    .and_then(|a| ExprKind::Unary { op: *op }.fold(std::slice::from_ref(a))),
                Op::Binary(op) => match (&args[0], &args[1]) {
                    (Some(a), Some(b)) => {
                        ExprKind::Binary { op: *op }.fold(&[a.clone(), b.clone()])
                    }
                    _ => None,
                },
                Op::IntToDouble => args[0]
                    .as_ref()
                    .and_then(|a| a.as_f64().ok())
                    .map(Value::Double),
                Op::RisingEdge => match args[0] {
                    Some(Value::Bool(now)) => {
                        let before = node.memory == Some(Value::Bool(true));
                        node.memory = Some(Value::Bool(now));
                        Some(Value::Bool(now && !before))
                    }
                    _ => None,
                },
                Op::Terminate => {
                    if args[0] == Some(Value::Bool(true)) {
                        out.terminate = true;
                    }
                    None
                }
                Op::Conditional => match args[0] {
                    Some(Value::Bool(true)) => args[1].clone(),
                    Some(Value::Bool(false)) => args[2].clone(),
                    _ => None,
                },
                Op::ChangeDetect => match &args[0] {
                    Some(v) => {
                        let changed = node.memory.as_ref() != Some(v);
                        node.memory = Some(v.clone());
                        Some(Value::Bool(changed))
                    }
                    None => None,
                },
                Op::Timestamp => match (&args[0], &args[1]) {
                    (Some(_), Some(t)) => Some(t.clone()),
                    _ => None,
                },
                Op::NetcommIn { key, ty } => input
                    .netcomm
                    .get(key)
                    .filter(|v| v.data_type() == *ty)
                    .cloned(),
                Op::NetcommOut { key } => {
                    if let Some(v) = &args[0] {
                        out.writes.push((key.clone(), v.clone()));
                    }
                    None
                }
                Op::Monitor { key } => {
                    let active = args[0] == Some(Value::Bool(true));
                    let current = (active, args[1].clone());
                    if node.reported.as_ref() != Some(&current)
                        && (active || node.reported.is_some())
                    {
                        out.reports.push((key.clone(), current.0, current.1.clone()));
                        node.reported = Some(current);
                    }
                    None
                }
                Op::Device(device) => {
                    let outputs = device
                        .evaluate(&node.name, &node.params, input.time, &args)
                        .map_err(|message| SimError::Device {
                            primitive: node.name.clone(),
                            message,
                        })?;
                    for (slot, v) in values[i].iter_mut().zip(outputs) {
                        *slot = v;
                    }
                    continue;
                }
            };
            if let Some(slot) = values[i].first_mut() {
                *slot = result;
            }
        }
        Ok(out)
    }
}

fn op_for(
    prim: &PrimitiveDescription,
    devices: &HashMap<String, Arc<dyn DevicePrimitive>>,
) -> SimResult<Op> {
    if let Some(device) = devices.get(&prim.type_id) {
        return Ok(Op::Device(Arc::clone(device)));
    }
    let core = CorePrimitive::parse(&prim.type_id).ok_or_else(|| SimError::UnknownPrimitive {
        type_id: prim.type_id.clone(),
    })?;
    Ok(match core {
        CorePrimitive::NetTime => Op::NetTime,
        CorePrimitive::Cancel => Op::Cancel,
        CorePrimitive::Value(ty) => Op::Constant(Value::parse_param(ty, param(prim, params::VALUE)?)?),
        CorePrimitive::Unary(op) => Op::Unary(op),
        CorePrimitive::Binary(op) => Op::Binary(op),
        CorePrimitive::IntToDouble => Op::IntToDouble,
        CorePrimitive::RisingEdge => Op::RisingEdge,
        CorePrimitive::Terminate => Op::Terminate,
        CorePrimitive::Conditional(_) => Op::Conditional,
        CorePrimitive::ChangeDetect(_) => Op::ChangeDetect,
        CorePrimitive::Timestamp(_) => Op::Timestamp,
        CorePrimitive::NetcommIn(ty) => Op::NetcommIn {
            key: param(prim, params::KEY)?.to_string(),
            ty,
        },
        CorePrimitive::NetcommOut(_) => Op::NetcommOut {
            key: param(prim, params::KEY)?.to_string(),
        },
        CorePrimitive::Monitor(_) => Op::Monitor {
            key: param(prim, params::KEY)?.to_string(),
        },
    })
}

fn param<'a>(prim: &'a PrimitiveDescription, key: &str) -> SimResult<&'a str> {
    prim.params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| SimError::MissingParam {
            primitive: prim.name.clone(),
            key: key.to_string(),
        })
}

fn lookup(index: &HashMap<&str, usize>, name: &str) -> SimResult<usize> {
    index
        .get(name)
        .copied()
        .ok_or_else(|| SimError::UnknownPort {
            primitive: name.to_string(),
            port: String::new(),
        })
}

fn port_index(prim: &PrimitiveDescription, port: &str, input: bool) -> SimResult<usize> {
    let ports = if input { &prim.inputs } else { &prim.outputs };
    ports
        .iter()
        .position(|p| p.name == port)
        .ok_or_else(|| SimError::UnknownPort {
            primitive: prim.name.clone(),
            port: port.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_core::NameAllocator;
    use rt_net::catalogue::ports;
    use rt_net::{FragmentBuilder, NetGraph};

    fn run(program: &mut Program, time: f64, netcomm: &HashMap<String, Value>) -> CycleOutput {
        program
            .cycle(&CycleInput {
                time,
                cancel: false,
                netcomm,
            })
            .unwrap()
    }

    /// `Monitor(key, active = RisingEdge(time > 0.25), value = time)`.
    fn edge_net() -> NetDescription {
        let mut graph = NetGraph::new();
        let mut names = NameAllocator::new();
        let mut b = FragmentBuilder::new(&mut graph, &mut names, "edge").unwrap();
        let now = b.primitive(CorePrimitive::NetTime).unwrap();
        let limit = b.value(&Value::Double(0.25)).unwrap();
        let gt = b.primitive(CorePrimitive::Binary(BinaryOp::Greater)).unwrap();
        let edge = b.primitive(CorePrimitive::RisingEdge).unwrap();
        let mon = b.primitive(CorePrimitive::Monitor(DataType::Double)).unwrap();
        b.set_param(mon.id, params::KEY, "edge").unwrap();
        b.connect(now.output(), gt.input(0)).unwrap();
        b.connect(limit.output(), gt.input(1)).unwrap();
        b.connect(gt.output(), edge.input(0)).unwrap();
        b.connect(edge.output(), mon.input(0)).unwrap();
        b.connect(now.output(), mon.input(1)).unwrap();
        let root = b.finish();
        graph.freeze(root).unwrap()
    }

    #[test]
    fn rising_edge_reports_once_then_clears() {
        let mut program = Program::load(&edge_net(), &HashMap::new()).unwrap();
        let store = HashMap::new();
        assert!(run(&mut program, 0.0, &store).reports.is_empty());
        let fired = run(&mut program, 0.5, &store);
        assert_eq!(
            fired.reports,
            vec![("edge".to_string(), true, Some(Value::Double(0.5)))]
        );
        let cleared = run(&mut program, 0.75, &store);
        assert_eq!(
            cleared.reports,
            vec![("edge".to_string(), false, Some(Value::Double(0.75)))]
        );
        assert_eq!(
            run(&mut program, 1.0, &store).reports,
            vec![("edge".to_string(), false, Some(Value::Double(1.0)))]
        );
    }

    #[test]
    fn null_inputs_propagate() {
        let mut graph = NetGraph::new();
        let mut names = NameAllocator::new();
        let mut b = FragmentBuilder::new(&mut graph, &mut names, "null").unwrap();
        let read = b.primitive(CorePrimitive::NetcommIn(DataType::Double)).unwrap();
        b.set_param(read.id, params::KEY, "speed").unwrap();
        let neg = b.primitive(CorePrimitive::Unary(UnaryOp::Negate)).unwrap();
        let out = b.primitive(CorePrimitive::NetcommOut(DataType::Double)).unwrap();
        b.set_param(out.id, params::KEY, "reverse").unwrap();
        b.connect(read.output(), neg.input(0)).unwrap();
        b.connect(neg.output(), out.input(0)).unwrap();
        let root = b.finish();
        let mut program = Program::load(&graph.freeze(root).unwrap(), &HashMap::new()).unwrap();

        let empty = HashMap::new();
        assert!(run(&mut program, 0.0, &empty).writes.is_empty());

        let store = HashMap::from([("speed".to_string(), Value::Double(2.0))]);
        assert_eq!(
            run(&mut program, 0.1, &store).writes,
            vec![("reverse".to_string(), Value::Double(-2.0))]
        );
    }

    #[test]
    fn division_by_zero_is_null() {
        let mut graph = NetGraph::new();
        let mut names = NameAllocator::new();
        let mut b = FragmentBuilder::new(&mut graph, &mut names, "div").unwrap();
        let one = b.value(&Value::Double(1.0)).unwrap();
        let zero = b.value(&Value::Double(0.0)).unwrap();
        let div = b.primitive(CorePrimitive::Binary(BinaryOp::Divide)).unwrap();
        let out = b.primitive(CorePrimitive::NetcommOut(DataType::Double)).unwrap();
        b.set_param(out.id, params::KEY, "q").unwrap();
        b.connect(one.output(), div.input(0)).unwrap();
        b.connect(zero.output(), div.input(1)).unwrap();
        b.connect(div.output(), out.input(0)).unwrap();
        let root = b.finish();
        let mut program = Program::load(&graph.freeze(root).unwrap(), &HashMap::new()).unwrap();
        assert!(run(&mut program, 0.0, &HashMap::new()).writes.is_empty());
    }

    #[test]
    fn unknown_types_fail_to_load() {
        let mut desc = edge_net();
        desc.primitives[0].type_id = "Gripper::Close".to_string();
        let err = Program::load(&desc, &HashMap::new()).err().unwrap();
        assert_eq!(
            err,
            SimError::UnknownPrimitive {
                type_id: "Gripper::Close".to_string()
            }
        );
    }

    #[test]
    fn missing_key_fails_to_load() {
        let mut desc = edge_net();
        let mon = desc
            .primitives
            .iter_mut()
            .find(|p| p.type_id == "Core::DoubleMonitor")
            .unwrap();
        mon.params.clear();
        let err = Program::load(&desc, &HashMap::new()).err().unwrap();
        assert!(matches!(err, SimError::MissingParam { .. }));
    }

    #[test]
    fn double_connections_are_rejected() {
        let mut desc = edge_net();
        let dup = desc
            .connections
            .iter()
            .find(|c| c.to_port == ports::ACTIVE_IN)
            .cloned()
            .unwrap();
        desc.connections.push(dup);
        let err = Program::load(&desc, &HashMap::new()).err().unwrap();
        assert!(matches!(err, SimError::DoubleConnection { .. }));
    }
}
