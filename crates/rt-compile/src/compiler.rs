//! Expression-to-net compiler.
//!
//! [`CommandFragment`] owns the net being built for one command. Values are
//! resolved with an explicit work stack:
//! 1. a resolved value returns its cached fragment; an in-progress one is a
//!    cycle
//! 2. alias factories (command-local first, then global) may replace the
//!    value; the replacement is resolved in its place
//! 3. otherwise the first fragment factory that applies builds the fragment;
//!    its dependencies are resolved and wired before the value counts as
//!    resolved
//!
//! Structurally equal values are the same arena node, so each compiles to
//! exactly one shared fragment.

use std::collections::HashMap;
use std::sync::Arc;

use rt_core::{DataType, ElemId, ExprId, NameAllocator, PortId, ScopeId};
use rt_expr::{Expr, ExprArena};
use rt_mapping::{
    ActionResult, AliasFactory, FragmentContext, FragmentFactory, MapperRegistry, MappingContext,
    MappingError, MappingResult,
};
use rt_net::catalogue::params;
use rt_net::{
    CorePrimitive, Dependency, FragmentBuilder, NetDescription, NetGraph, PortDependency,
    ValueFragment,
};
use tracing::{debug, info, trace};

use crate::builtin;
use crate::command::{CANCELLED, COMPLETED, Command, ResultDecl};
use crate::compiled::{
    AssignmentChannel, CompiledNet, HandlerChannel, ObserverChannel, ResultChannel,
};
use crate::options::CompileOptions;

/// Session state a compilation borrows.
pub struct CompileContext<'a> {
    pub arena: &'a mut ExprArena,
    pub registry: &'a MapperRegistry,
    pub names: &'a mut NameAllocator,
    pub options: &'a CompileOptions,
}

#[derive(Debug, Clone, Copy)]
enum Memo {
    InProgress,
    Resolved(ValueFragment),
}

enum Task {
    Resolve(Expr),
    FinishAlias {
        expr: Expr,
        replacement: Expr,
    },
    Wire {
        owner: Option<(Expr, ValueFragment)>,
        deps: Vec<Dependency>,
        port_deps: Vec<PortDependency>,
    },
}

/// How a monitored channel derives its activation from its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    /// Active while the input is true.
    Level,
    /// Active on cycles where the input changed.
    Change,
}

/// The net under construction for one command.
pub struct CommandFragment<'a> {
    arena: &'a mut ExprArena,
    registry: &'a MapperRegistry,
    names: &'a mut NameAllocator,
    options: &'a CompileOptions,
    label: String,
    scope: ScopeId,
    graph: NetGraph,
    root: ElemId,
    memo: HashMap<ExprId, Memo>,
    bound: HashMap<ExprId, Expr>,
    local_aliases: Vec<Arc<dyn AliasFactory>>,
    local_fragments: Vec<Arc<dyn FragmentFactory>>,
    steps: usize,
}

impl<'a> CommandFragment<'a> {
    /// Start a net with a fresh command scope and its ambient signals.
    pub fn new(cx: CompileContext<'a>, label: impl Into<String>) -> MappingResult<Self> {
        let CompileContext {
            arena,
            registry,
            names,
            options,
        } = cx;
        let label = label.into();
        let scope = arena.new_scope();
        let mut graph = NetGraph::new();
        let root = graph.add_fragment(label.clone())?;

        let mut memo = HashMap::new();
        let cancel = arena.cancel_of(scope);
        let now = arena.net_time();
        for (expr, prim) in [(cancel, CorePrimitive::Cancel), (now, CorePrimitive::NetTime)] {
            let vf = builtin::ambient(&mut graph, names, prim)?;
            graph.attach(root, vf.fragment)?;
            memo.insert(expr.id(), Memo::Resolved(vf));
        }

        Ok(Self {
            arena,
            registry,
            names,
            options,
            label,
            scope,
            graph,
            root,
            memo,
            bound: HashMap::new(),
            local_aliases: Vec::new(),
            local_fragments: Vec::new(),
            steps: 0,
        })
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn root(&self) -> ElemId {
        self.root
    }

    pub fn graph(&self) -> &NetGraph {
        &self.graph
    }

    pub fn arena(&self) -> &ExprArena {
        self.arena
    }

    /// Context for action and driver mappers.
    pub fn mapping_context(&mut self) -> MappingContext<'_> {
        MappingContext {
            arena: self.arena,
            graph: &mut self.graph,
            names: self.names,
            scope: self.scope,
        }
    }

    /// Use the factories of an action result ahead of the global ones.
    pub fn use_action_result(&mut self, result: &ActionResult) {
        self.local_aliases = result.alias_factories().cloned().collect();
        self.local_fragments = result.fragment_factories().cloned().collect();
    }

    /// Resolve a value to its (shared) fragment in this net.
    pub fn resolve(&mut self, expr: Expr) -> MappingResult<ValueFragment> {
        let expr = self.bind(expr)?;
        self.run(Task::Resolve(expr))?;
        self.resolved(expr)
    }

    /// Add a fragment to the net and wire its declared dependencies.
    ///
    /// Adding a fragment that is already part of the net is a no-op.
    pub fn add_fragment(&mut self, fragment: ElemId) -> MappingResult<()> {
        if !self.graph.attach(self.root, fragment)? {
            return Ok(());
        }
        let (deps, port_deps) = self.collect_dependencies(fragment)?;
        let deps = self.bind_dependencies(deps)?;
        let mut tasks = vec![Task::Wire {
            owner: None,
            deps: deps.clone(),
            port_deps,
        }];
        tasks.extend(deps.iter().rev().map(|d| Task::Resolve(d.source)));
        self.run_all(tasks)
    }

    /// Validate, freeze and export the net.
    pub fn freeze(&mut self) -> MappingResult<NetDescription> {
        let description = self.graph.freeze(self.root)?;
        if self.options.trace_descriptions {
            trace!(net = %self.label, json = %description.to_json()?, "net description");
        }
        Ok(description)
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    fn run(&mut self, task: Task) -> MappingResult<()> {
        self.run_all(vec![task])
    }

    fn run_all(&mut self, mut stack: Vec<Task>) -> MappingResult<()> {
        while let Some(task) = stack.pop() {
            self.steps += 1;
            if self.steps > self.options.max_steps {
                return Err(MappingError::StepLimit {
                    limit: self.options.max_steps,
                });
            }
            match task {
                Task::Resolve(expr) => self.resolve_step(expr, &mut stack)?,
                Task::FinishAlias { expr, replacement } => {
                    let vf = self.resolved(replacement)?;
                    self.memo.insert(expr.id(), Memo::Resolved(vf));
                }
                Task::Wire {
                    owner,
                    deps,
                    port_deps,
                } => {
                    for dep in deps {
                        self.wire_dependency(dep)?;
                    }
                    for dep in port_deps {
                        self.connect_ports(dep.source, dep.input)?;
                    }
                    if let Some((expr, vf)) = owner {
                        self.memo.insert(expr.id(), Memo::Resolved(vf));
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_step(&mut self, expr: Expr, stack: &mut Vec<Task>) -> MappingResult<()> {
        match self.memo.get(&expr.id()) {
            Some(Memo::Resolved(_)) => return Ok(()),
            Some(Memo::InProgress) => {
                return Err(MappingError::Cycle {
                    expr: self.arena.describe(expr, 3),
                });
            }
            None => {}
        }

        if let Some(replacement) = self.try_alias(expr)? {
            let replacement = self.bind(replacement)?;
            if self.arena.contains(replacement, expr) {
                return Err(MappingError::SelfReferentialAlias {
                    expr: self.arena.describe(expr, 3),
                });
            }
            debug!(
                value = %self.arena.describe(expr, 2),
                alias = %self.arena.describe(replacement, 2),
                "aliased value"
            );
            self.memo.insert(expr.id(), Memo::InProgress);
            stack.push(Task::FinishAlias { expr, replacement });
            stack.push(Task::Resolve(replacement));
            return Ok(());
        }

        let vf = self.try_fragment(expr)?;
        let expected = self.arena.node(expr)?.ty;
        if vf.ty != expected {
            return Err(MappingError::FragmentType {
                expr: self.arena.describe(expr, 3),
                expected,
                found: vf.ty,
            });
        }
        self.graph.attach(self.root, vf.fragment)?;
        let (deps, port_deps) = self.collect_dependencies(vf.fragment)?;
        let deps = self.bind_dependencies(deps)?;
        debug!(
            value = %self.arena.describe(expr, 2),
            fragment = %vf.fragment,
            dependencies = deps.len(),
            "built fragment"
        );

        self.memo.insert(expr.id(), Memo::InProgress);
        let sources: Vec<Expr> = deps.iter().map(|d| d.source).collect();
        stack.push(Task::Wire {
            owner: Some((expr, vf)),
            deps,
            port_deps,
        });
        stack.extend(sources.into_iter().rev().map(Task::Resolve));
        Ok(())
    }

    fn try_alias(&mut self, expr: Expr) -> MappingResult<Option<Expr>> {
        for factory in self
            .local_aliases
            .iter()
            .chain(self.registry.alias_factories())
        {
            if let Some(replacement) = factory.alias(self.arena, expr)? {
                return Ok(Some(replacement));
            }
        }
        Ok(None)
    }

    fn try_fragment(&mut self, expr: Expr) -> MappingResult<ValueFragment> {
        let mut cx = FragmentContext {
            arena: self.arena,
            graph: &mut self.graph,
            names: self.names,
        };
        for factory in self
            .local_fragments
            .iter()
            .chain(self.registry.fragment_factories())
        {
            if let Some(vf) = factory.fragment(&mut cx, expr)? {
                return Ok(vf);
            }
        }
        let node = self.arena.node(expr)?;
        Err(MappingError::UnmappedValue {
            variant: node.kind.variant_name(),
            expr: self.arena.describe(expr, 3),
        })
    }

    fn resolved(&self, expr: Expr) -> MappingResult<ValueFragment> {
        match self.memo.get(&expr.id()) {
            Some(Memo::Resolved(vf)) => Ok(*vf),
            _ => Err(MappingError::Cycle {
                expr: self.arena.describe(expr, 3),
            }),
        }
    }

    /// Rebind scope-sensitive leaves below `expr` to this command.
    ///
    /// Rejects nodes of another runtime or another command's scope.
    fn bind(&mut self, expr: Expr) -> MappingResult<Expr> {
        self.arena.check(expr)?;
        let mut stack = vec![(expr, false)];
        while let Some((e, expanded)) = stack.pop() {
            if self.bound.contains_key(&e.id()) {
                continue;
            }
            let node = self.arena.node(e)?;
            if let Some(scope) = node.scope {
                if scope != self.scope {
                    return Err(MappingError::ForeignScope {
                        expr: e.id(),
                        expected: self.scope,
                        found: scope,
                    });
                }
            }
            if !expanded {
                stack.push((e, true));
                stack.extend(node.operands.iter().map(|&op| (op, false)));
                continue;
            }

            let operands: Vec<Expr> = node
                .operands
                .iter()
                .map(|op| self.bound.get(&op.id()).copied().unwrap_or(*op))
                .collect();
            let rebind = node.scope.is_none() && node.kind.is_scope_sensitive();
            let rebound = if rebind || operands != node.operands {
                let kind = node.kind.clone();
                let scope = if rebind { Some(self.scope) } else { node.scope };
                self.arena.insert(kind, &operands, scope)?
            } else {
                e
            };
            self.bound.insert(e.id(), rebound);
            self.bound.insert(rebound.id(), rebound);
        }
        Ok(self.bound.get(&expr.id()).copied().unwrap_or(expr))
    }

    fn bind_dependencies(&mut self, deps: Vec<Dependency>) -> MappingResult<Vec<Dependency>> {
        deps.into_iter()
            .map(|dep| {
                Ok(Dependency {
                    source: self.bind(dep.source)?,
                    ..dep
                })
            })
            .collect()
    }

    /// Take the declared dependencies of a fragment and every fragment
    /// nested in it.
    fn collect_dependencies(
        &mut self,
        fragment: ElemId,
    ) -> MappingResult<(Vec<Dependency>, Vec<PortDependency>)> {
        let mut deps = Vec::new();
        let mut port_deps = Vec::new();
        let mut stack = vec![fragment];
        while let Some(frag) = stack.pop() {
            let (d, p) = self.graph.take_dependencies(frag)?;
            deps.extend(d);
            port_deps.extend(p);
            for &child in &self.graph.fragment(frag)?.children {
                if self.graph.element(child)?.is_fragment() {
                    stack.push(child);
                }
            }
        }
        Ok((deps, port_deps))
    }

    fn wire_dependency(&mut self, dep: Dependency) -> MappingResult<()> {
        let source = self.resolved(dep.source)?;
        self.connect_ports(source.value, dep.input)?;
        if let Some(time_input) = dep.time_input {
            let time = match source.time {
                Some(time) => time,
                None => {
                    let probe =
                        builtin::ambient(&mut self.graph, self.names, CorePrimitive::NetTime)?;
                    self.graph.attach(self.root, probe.fragment)?;
                    probe.value
                }
            };
            self.connect_ports(time, time_input)?;
        }
        Ok(())
    }

    /// Connect an out port and an in port nested anywhere in the net.
    fn connect_ports(&mut self, from: PortId, to: PortId) -> MappingResult<()> {
        let from = self.graph.expose(self.root, from)?;
        let to = self.graph.import(self.root, to)?;
        self.graph.connect(self.root, from, to)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Net assembly helpers
    // ------------------------------------------------------------------

    /// Publish `value` on a monitored channel, active according to
    /// `activation` applied to `active`.
    fn monitor(
        &mut self,
        key: &str,
        active: Expr,
        activation: Activation,
        value: Expr,
    ) -> MappingResult<()> {
        let active = self.bind(active)?;
        let value = self.bind(value)?;
        let active_ty = self.arena.node(active)?.ty;
        let ty = self.arena.node(value)?.ty;
        let frag = {
            let mut b = FragmentBuilder::new(&mut self.graph, self.names, format!("monitor {key}"))?;
            let monitor = b.primitive(CorePrimitive::Monitor(ty))?;
            b.set_param(monitor.id, params::KEY, key)?;
            match activation {
                Activation::Level => b.depend(active, monitor.input(0))?,
                Activation::Change => {
                    let change = b.primitive(CorePrimitive::ChangeDetect(active_ty))?;
                    b.depend(active, change.input(0))?;
                    b.connect(change.output(), monitor.input(0))?;
                }
            }
            b.depend(value, monitor.input(1))?;
            b.finish()
        };
        self.add_fragment(frag)
    }

    /// Write `value` to the inter-net channel `key`.
    fn publish(&mut self, key: &str, value: Expr) -> MappingResult<DataType> {
        let value = self.bind(value)?;
        let ty = self.arena.node(value)?.ty;
        let frag = {
            let mut b = FragmentBuilder::new(&mut self.graph, self.names, format!("assign {key}"))?;
            let out = b.primitive(CorePrimitive::NetcommOut(ty))?;
            b.set_param(out.id, params::KEY, key)?;
            b.depend(value, out.input(0))?;
            b.finish()
        };
        self.add_fragment(frag)?;
        Ok(ty)
    }

    /// End the net when `condition` is true.
    fn terminate_when(&mut self, condition: Expr) -> MappingResult<()> {
        let condition = self.bind(condition)?;
        let frag = {
            let mut b = FragmentBuilder::new(&mut self.graph, self.names, "terminate")?;
            let term = b.primitive(CorePrimitive::Terminate)?;
            b.depend(condition, term.input(0))?;
            b.finish()
        };
        self.add_fragment(frag)
    }
}

/// Compile a command into a frozen net.
///
/// Mapping and wiring failures are reported here, before anything reaches
/// the engine.
pub fn compile(cx: CompileContext<'_>, command: &Command) -> MappingResult<CompiledNet> {
    let registry = cx.registry;
    let mut net = CommandFragment::new(cx, command.label())?;
    let scope = net.scope;

    let result = registry.map_action(command.action(), &mut net.mapping_context())?;
    net.use_action_result(&result);
    let consumer = registry.map_driver(command.driver(), &result, &mut net.mapping_context())?;
    net.add_fragment(consumer.fragment)?;

    let mut observers = Vec::new();
    for obs in command.observers() {
        let value = net.bind(obs.value)?;
        let ty = net.arena.node(value)?.ty;
        let key = net.names.allocate("observer");
        if ty == DataType::Bool {
            let edge = net.arena.rising_edge(value)?;
            net.monitor(&key, edge, Activation::Level, value)?;
        } else {
            net.monitor(&key, value, Activation::Change, value)?;
        }
        observers.push(ObserverChannel {
            key,
            ty,
            delivery: obs.delivery,
            listener: obs.listener.clone(),
        });
    }

    let mut assignments = Vec::new();
    for assignment in command.assignments() {
        let key = net.names.channel_key(&assignment.hint);
        let ty = net.publish(&key, assignment.value)?;
        assignments.push(AssignmentChannel {
            hint: assignment.hint.clone(),
            key,
            ty,
        });
    }

    let mut handlers = Vec::new();
    for handler in command.handlers() {
        let key = net.names.allocate("event");
        let edge = net.arena.rising_edge(handler.condition)?;
        net.monitor(&key, edge, Activation::Level, handler.condition)?;
        handlers.push(HandlerChannel {
            key,
            delivery: handler.delivery,
            callback: handler.callback.clone(),
        });
    }

    let mut completions = result.completions();
    completions.extend(consumer.completion);
    let mut decls = Vec::new();
    if !completions.is_empty() {
        decls.push(ResultDecl {
            name: COMPLETED.to_string(),
            conditions: vec![net.arena.all_of(&completions)?],
            exception: None,
            terminating: true,
        });
    }
    decls.push(ResultDecl {
        name: CANCELLED.to_string(),
        conditions: vec![net.arena.cancel_of(scope)],
        exception: None,
        terminating: false,
    });
    for decl in command.results() {
        match decls.iter_mut().find(|d| d.name == decl.name) {
            Some(existing) => {
                existing.conditions.extend(decl.conditions.iter().copied());
                existing.terminating |= decl.terminating;
                if decl.exception.is_some() {
                    existing.exception = decl.exception.clone();
                }
            }
            None => decls.push(decl.clone()),
        }
    }

    let mut results = Vec::new();
    let mut termination = Vec::new();
    for decl in decls {
        let condition = net.arena.any_of(&decl.conditions)?;
        let key = net.names.allocate(&format!("result:{}", decl.name));
        net.monitor(&key, condition, Activation::Level, condition)?;
        if decl.terminating {
            termination.push(condition);
        }
        results.push(ResultChannel {
            name: decl.name,
            key,
            exception: decl.exception,
            terminating: decl.terminating,
        });
    }
    if !result.handles_cancel() {
        termination.push(net.arena.cancel_of(scope));
    }
    let terminated = net.arena.any_of(&termination)?;
    net.terminate_when(terminated)?;
    let terminated_key = net.names.allocate("terminated");
    net.monitor(&terminated_key, terminated, Activation::Level, terminated)?;

    let description = net.freeze()?;
    let digest = description.digest()?;
    info!(
        net = %net.label,
        digest = %&digest[..12],
        primitives = description.primitives.len(),
        "compiled command"
    );

    Ok(CompiledNet {
        label: net.label.clone(),
        scope,
        description,
        digest,
        results,
        terminated: terminated_key,
        observers,
        handlers,
        assignments,
    })
}
