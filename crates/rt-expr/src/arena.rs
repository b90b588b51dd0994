//! Expression arena.
//!
//! The arena owns every expression node of one runtime. Nodes are
//! hash-consed on insertion: a node with the same kind, operands and scope as
//! an existing node is never stored twice, so structural equality reduces to
//! id equality and the structural hash is computed once per node.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use rt_core::{DataType, ExprId, RuntimeId, ScopeId, Value};

use crate::error::{ExprError, ExprResult};
use crate::expr::Expr;
use crate::kind::{BinaryOp, ExprKind, UnaryOp};
use crate::sensor::SensorRef;

/// A stored expression node.
#[derive(Debug, Clone)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub operands: Vec<Expr>,
    /// Owning command scope, if bound.
    pub scope: Option<ScopeId>,
    /// Static result type.
    pub ty: DataType,
    /// Statically known value, if any.
    pub cheap: Option<Value>,
    structural_hash: u64,
}

impl ExprNode {
    /// Hash over kind, scope and operand structure. Equal structures hash equal.
    pub fn structural_hash(&self) -> u64 {
        self.structural_hash
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    kind: ExprKind,
    operands: Vec<ExprId>,
    scope: Option<ScopeId>,
}

/// Arena of hash-consed expression nodes for one runtime.
#[derive(Debug)]
pub struct ExprArena {
    runtime: RuntimeId,
    nodes: Vec<ExprNode>,
    interned: HashMap<NodeKey, ExprId>,
    next_scope: u32,
}

impl ExprArena {
    /// Create an empty arena for a fresh runtime.
    pub fn new() -> Self {
        Self::for_runtime(RuntimeId::new())
    }

    /// Create an empty arena for an existing runtime id.
    pub fn for_runtime(runtime: RuntimeId) -> Self {
        Self {
            runtime,
            nodes: Vec::new(),
            interned: HashMap::new(),
            next_scope: 0,
        }
    }

    pub fn runtime(&self) -> RuntimeId {
        self.runtime
    }

    /// Number of distinct nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocate a new command scope.
    pub fn new_scope(&mut self) -> ScopeId {
        let id = ScopeId::from_index(self.next_scope);
        self.next_scope += 1;
        id
    }

    /// Check that a handle belongs to this arena.
    pub fn check(&self, expr: Expr) -> ExprResult<()> {
        if expr.runtime() != self.runtime {
            return Err(ExprError::ForeignRuntime {
                expr: expr.id(),
                expected: self.runtime,
                found: expr.runtime(),
            });
        }
        if expr.id().slot() >= self.nodes.len() {
            return Err(ExprError::Unknown(expr.id()));
        }
        Ok(())
    }

    /// Look up a node.
    pub fn node(&self, expr: Expr) -> ExprResult<&ExprNode> {
        self.check(expr)?;
        Ok(&self.nodes[expr.id().slot()])
    }

    /// Insert a node, returning the existing handle if an equal node exists.
    pub fn insert(
        &mut self,
        kind: ExprKind,
        operands: &[Expr],
        scope: Option<ScopeId>,
    ) -> ExprResult<Expr> {
        for &op in operands {
            self.check(op)?;
        }
        let key = NodeKey {
            kind,
            operands: operands.iter().map(|e| e.id()).collect(),
            scope,
        };
        if let Some(&id) = self.interned.get(&key) {
            return Ok(Expr::new(self.runtime, id));
        }

        let operand_nodes: Vec<&ExprNode> =
            operands.iter().map(|e| &self.nodes[e.id().slot()]).collect();
        let operand_types: Vec<DataType> = operand_nodes.iter().map(|n| n.ty).collect();
        let ty = key.kind.result_type(&operand_types)?;

        let cheap = match &key.kind {
            ExprKind::Constant { value } => Some(value.clone()),
            kind => operand_nodes
                .iter()
                .map(|n| n.cheap.clone())
                .collect::<Option<Vec<Value>>>()
                .filter(|_| !operands.is_empty())
                .and_then(|values| kind.fold(&values)),
        };

        let mut hasher = DefaultHasher::new();
        key.kind.hash(&mut hasher);
        key.scope.hash(&mut hasher);
        for n in &operand_nodes {
            n.structural_hash.hash(&mut hasher);
        }
        let structural_hash = hasher.finish();

        let id = ExprId::from_index(self.nodes.len() as u32);
        self.nodes.push(ExprNode {
            kind: key.kind.clone(),
            operands: operands.to_vec(),
            scope: key.scope,
            ty,
            cheap,
            structural_hash,
        });
        self.interned.insert(key, id);
        Ok(Expr::new(self.runtime, id))
    }

    /// Rebind a scope-sensitive unscoped node to `scope`.
    ///
    /// Nodes that are already scoped, or whose meaning does not depend on a
    /// command, are returned unchanged.
    pub fn rebind(&mut self, expr: Expr, scope: ScopeId) -> ExprResult<Expr> {
        let node = self.node(expr)?;
        if node.scope.is_some() || !node.kind.is_scope_sensitive() {
            return Ok(expr);
        }
        let kind = node.kind.clone();
        let operands = node.operands.clone();
        self.insert(kind, &operands, Some(scope))
    }

    /// Whether `needle` occurs anywhere in the tree rooted at `haystack`.
    pub fn contains(&self, haystack: Expr, needle: Expr) -> bool {
        let mut stack = vec![haystack];
        let mut seen = std::collections::HashSet::new();
        while let Some(e) = stack.pop() {
            if e == needle {
                return true;
            }
            if !seen.insert(e) {
                continue;
            }
            if let Ok(node) = self.node(e) {
                stack.extend(node.operands.iter().copied());
            }
        }
        false
    }

    /// Short human-readable rendering, truncated below `depth` levels.
    pub fn describe(&self, expr: Expr, depth: usize) -> String {
        let Ok(node) = self.node(expr) else {
            return format!("<foreign {}>", expr.id());
        };
        let head = match &node.kind {
            ExprKind::Constant { value } => return value.to_param(),
            ExprKind::Sensor { sensor } => return format!("Sensor({})", sensor.qualified_name()),
            ExprKind::Netcomm { key, .. } => return format!("Netcomm({key})"),
            ExprKind::CommandState { state } => return format!("CommandState({state})"),
            kind => kind.variant_name(),
        };
        if node.operands.is_empty() {
            return head.to_string();
        }
        if depth == 0 {
            return format!("{head}(..)");
        }
        let args: Vec<String> = node
            .operands
            .iter()
            .map(|&op| self.describe(op, depth - 1))
            .collect();
        format!("{head}({})", args.join(", "))
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub fn constant(&mut self, value: impl Into<Value>) -> Expr {
        self.leaf(ExprKind::Constant {
            value: value.into(),
        })
    }

    pub fn bool(&mut self, value: bool) -> Expr {
        self.constant(value)
    }

    pub fn double(&mut self, value: f64) -> Expr {
        self.constant(value)
    }

    /// Ambient net time (seconds since the net started).
    pub fn net_time(&mut self) -> Expr {
        self.leaf(ExprKind::NetTime)
    }

    /// Unscoped cancel signal; bound to a command when compiled.
    pub fn cancel(&mut self) -> Expr {
        self.leaf(ExprKind::Cancel)
    }

    /// Cancel signal of a specific command.
    pub fn cancel_of(&mut self, scope: ScopeId) -> Expr {
        self.scoped_leaf(ExprKind::Cancel, scope)
    }

    pub fn sensor(&mut self, sensor: SensorRef) -> Expr {
        self.leaf(ExprKind::Sensor { sensor })
    }

    /// Read a named inter-net channel.
    pub fn netcomm(&mut self, key: impl Into<String>, ty: DataType) -> Expr {
        self.leaf(ExprKind::Netcomm {
            key: key.into(),
            ty,
        })
    }

    /// State of the command that compiles the expression.
    pub fn command_state(&mut self, state: impl Into<String>) -> Expr {
        self.leaf(ExprKind::CommandState {
            state: state.into(),
        })
    }

    /// State of a specific command.
    pub fn command_state_of(&mut self, scope: ScopeId, state: impl Into<String>) -> Expr {
        self.scoped_leaf(
            ExprKind::CommandState {
                state: state.into(),
            },
            scope,
        )
    }

    pub fn unary(&mut self, op: UnaryOp, a: Expr) -> ExprResult<Expr> {
        self.insert(ExprKind::Unary { op }, &[a], None)
    }

    pub fn binary(&mut self, op: BinaryOp, a: Expr, b: Expr) -> ExprResult<Expr> {
        self.insert(ExprKind::Binary { op }, &[a, b], None)
    }

    pub fn not(&mut self, a: Expr) -> ExprResult<Expr> {
        self.unary(UnaryOp::Not, a)
    }

    pub fn and(&mut self, a: Expr, b: Expr) -> ExprResult<Expr> {
        self.binary(BinaryOp::And, a, b)
    }

    pub fn or(&mut self, a: Expr, b: Expr) -> ExprResult<Expr> {
        self.binary(BinaryOp::Or, a, b)
    }

    pub fn add(&mut self, a: Expr, b: Expr) -> ExprResult<Expr> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn subtract(&mut self, a: Expr, b: Expr) -> ExprResult<Expr> {
        self.binary(BinaryOp::Subtract, a, b)
    }

    pub fn multiply(&mut self, a: Expr, b: Expr) -> ExprResult<Expr> {
        self.binary(BinaryOp::Multiply, a, b)
    }

    pub fn less(&mut self, a: Expr, b: Expr) -> ExprResult<Expr> {
        self.binary(BinaryOp::Less, a, b)
    }

    pub fn greater(&mut self, a: Expr, b: Expr) -> ExprResult<Expr> {
        self.binary(BinaryOp::Greater, a, b)
    }

    pub fn conditional(&mut self, cond: Expr, then: Expr, otherwise: Expr) -> ExprResult<Expr> {
        self.insert(ExprKind::Conditional, &[cond, then, otherwise], None)
    }

    pub fn rising_edge(&mut self, a: Expr) -> ExprResult<Expr> {
        self.insert(ExprKind::RisingEdge, &[a], None)
    }

    pub fn timestamp(&mut self, a: Expr) -> ExprResult<Expr> {
        self.insert(ExprKind::Timestamp, &[a], None)
    }

    pub fn age(&mut self, a: Expr) -> ExprResult<Expr> {
        self.insert(ExprKind::Age, &[a], None)
    }

    /// OR over all conditions; `false` when empty.
    pub fn any_of(&mut self, conditions: &[Expr]) -> ExprResult<Expr> {
        self.fold_logic(BinaryOp::Or, conditions, false)
    }

    /// AND over all conditions; `true` when empty.
    pub fn all_of(&mut self, conditions: &[Expr]) -> ExprResult<Expr> {
        self.fold_logic(BinaryOp::And, conditions, true)
    }

    fn fold_logic(&mut self, op: BinaryOp, conditions: &[Expr], empty: bool) -> ExprResult<Expr> {
        let Some((&first, rest)) = conditions.split_first() else {
            return Ok(self.bool(empty));
        };
        let mut acc = first;
        for &c in rest {
            acc = self.binary(op, acc, c)?;
        }
        Ok(acc)
    }

    fn leaf(&mut self, kind: ExprKind) -> Expr {
        self.insert_leaf(kind, None)
    }

    fn scoped_leaf(&mut self, kind: ExprKind, scope: ScopeId) -> Expr {
        self.insert_leaf(kind, Some(scope))
    }

    fn insert_leaf(&mut self, kind: ExprKind, scope: Option<ScopeId>) -> Expr {
        let key = NodeKey {
            kind,
            operands: Vec::new(),
            scope,
        };
        if let Some(&id) = self.interned.get(&key) {
            return Expr::new(self.runtime, id);
        }
        let ty = match &key.kind {
            ExprKind::Constant { value } => value.data_type(),
            ExprKind::NetTime => DataType::Double,
            ExprKind::Sensor { sensor } => sensor.ty,
            ExprKind::Netcomm { ty, .. } => *ty,
            _ => DataType::Bool,
        };
        let cheap = match &key.kind {
            ExprKind::Constant { value } => Some(value.clone()),
            _ => None,
        };
        let mut hasher = DefaultHasher::new();
        key.kind.hash(&mut hasher);
        key.scope.hash(&mut hasher);
        let id = ExprId::from_index(self.nodes.len() as u32);
        self.nodes.push(ExprNode {
            kind: key.kind.clone(),
            operands: Vec::new(),
            scope,
            ty,
            cheap,
            structural_hash: hasher.finish(),
        });
        self.interned.insert(key, id);
        Expr::new(self.runtime, id)
    }
}

impl Default for ExprArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_structures_share_a_node() {
        let mut arena = ExprArena::new();
        let t1 = arena.net_time();
        let two = arena.double(2.0);
        let a = arena.greater(t1, two).unwrap();

        let t2 = arena.net_time();
        let two_again = arena.double(2.0);
        let b = arena.greater(t2, two_again).unwrap();

        assert_eq!(a, b);
        assert_eq!(
            arena.node(a).unwrap().structural_hash(),
            arena.node(b).unwrap().structural_hash()
        );
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn cheap_values_fold_through_operators() {
        let mut arena = ExprArena::new();
        let a = arena.double(1.0);
        let b = arena.double(2.5);
        let sum = arena.add(a, b).unwrap();
        assert_eq!(arena.node(sum).unwrap().cheap, Some(Value::Double(3.5)));

        let t = arena.net_time();
        let late = arena.add(t, b).unwrap();
        assert_eq!(arena.node(late).unwrap().cheap, None);
    }

    #[test]
    fn foreign_runtime_operand_rejected() {
        let mut a = ExprArena::new();
        let mut b = ExprArena::new();
        let x = b.net_time();
        let y = a.net_time();
        let err = a.add(x, y).unwrap_err();
        assert!(matches!(err, ExprError::ForeignRuntime { .. }));
    }

    #[test]
    fn type_errors_surface_on_build() {
        let mut arena = ExprArena::new();
        let t = arena.net_time();
        let yes = arena.bool(true);
        assert!(arena.and(t, yes).is_err());
    }

    #[test]
    fn rebind_scopes_only_sensitive_kinds() {
        let mut arena = ExprArena::new();
        let scope = arena.new_scope();
        let cancel = arena.cancel();
        let bound = arena.rebind(cancel, scope).unwrap();
        assert_ne!(cancel, bound);
        assert_eq!(bound, arena.cancel_of(scope));

        let t = arena.net_time();
        assert_eq!(arena.rebind(t, scope).unwrap(), t);
    }

    #[test]
    fn contains_walks_operands() {
        let mut arena = ExprArena::new();
        let t = arena.net_time();
        let one = arena.double(1.0);
        let sum = arena.add(t, one).unwrap();
        let cmp = arena.greater(sum, one).unwrap();
        assert!(arena.contains(cmp, t));
        assert!(!arena.contains(t, cmp));
    }

    #[test]
    fn any_of_empty_is_false() {
        let mut arena = ExprArena::new();
        let e = arena.any_of(&[]).unwrap();
        assert_eq!(arena.node(e).unwrap().cheap, Some(Value::Bool(false)));
    }

    #[test]
    fn describe_renders_tree() {
        let mut arena = ExprArena::new();
        let t = arena.net_time();
        let two = arena.double(2.0);
        let cmp = arena.greater(t, two).unwrap();
        assert_eq!(arena.describe(cmp, 4), "Greater(NetTime, 2.0)");
        assert_eq!(arena.describe(cmp, 0), "Greater(..)");
    }
}
