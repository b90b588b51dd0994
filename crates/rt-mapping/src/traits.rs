//! Extension points for actions, drivers and value factories.

use std::any::Any;

use rt_core::{NameAllocator, ScopeId};
use rt_expr::{Expr, ExprArena, ExprNode};
use rt_net::{FragmentBuilder, NetGraph, NetResult, ValueFragment};

use crate::error::MappingResult;
use crate::result::{ActionResult, ConsumerFragment};
use crate::variant::Variant;

/// A high-level unit of work (a motion, a tool operation).
///
/// Actions are plain data; what they compile to is decided by the
/// registered [`ActionMapper`]s.
pub trait Action: Send + Sync {
    fn variant(&self) -> &'static Variant;

    fn as_any(&self) -> &dyn Any;
}

/// A device-side consumer of action results.
pub trait ActuatorDriver: Send + Sync {
    fn variant(&self) -> &'static Variant;

    /// Device name used in primitive parameters and diagnostics.
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// Everything a mapper may touch while mapping one command.
pub struct MappingContext<'a> {
    pub arena: &'a mut ExprArena,
    pub graph: &'a mut NetGraph,
    pub names: &'a mut NameAllocator,
    /// Scope of the command being compiled.
    pub scope: ScopeId,
}

impl MappingContext<'_> {
    /// Start a new fragment in the command's net.
    pub fn builder(&mut self, label: &str) -> NetResult<FragmentBuilder<'_>> {
        FragmentBuilder::new(self.graph, self.names, label)
    }

    /// Cancel signal of the command being compiled.
    pub fn cancel(&mut self) -> Expr {
        self.arena.cancel_of(self.scope)
    }

    /// Named state of the command being compiled.
    pub fn state(&mut self, state: &str) -> Expr {
        self.arena.command_state_of(self.scope, state)
    }
}

/// Maps an action to an [`ActionResult`].
pub trait ActionMapper: Send + Sync {
    /// Returns `Ok(None)` to let the next candidate try.
    fn map(
        &self,
        action: &dyn Action,
        cx: &mut MappingContext<'_>,
    ) -> MappingResult<Option<ActionResult>>;
}

/// Maps a driver plus an action result to the fragment that feeds the
/// device.
pub trait DriverMapper: Send + Sync {
    /// Returns `Ok(None)` to let the next candidate try.
    fn map(
        &self,
        driver: &dyn ActuatorDriver,
        result: &ActionResult,
        cx: &mut MappingContext<'_>,
    ) -> MappingResult<Option<ConsumerFragment>>;
}

/// Rewrites a value into an equivalent one.
pub trait AliasFactory: Send + Sync {
    /// Returns the replacement, or `Ok(None)` if the factory does not apply.
    fn alias(&self, arena: &mut ExprArena, expr: Expr) -> MappingResult<Option<Expr>>;
}

/// What a [`FragmentFactory`] may touch.
pub struct FragmentContext<'a> {
    pub arena: &'a ExprArena,
    pub graph: &'a mut NetGraph,
    pub names: &'a mut NameAllocator,
}

impl<'a> FragmentContext<'a> {
    /// Node behind `expr`, borrowed from the arena rather than the context.
    pub fn node(&self, expr: Expr) -> MappingResult<&'a ExprNode> {
        let arena: &'a ExprArena = self.arena;
        Ok(arena.node(expr)?)
    }

    pub fn builder(&mut self, label: &str) -> NetResult<FragmentBuilder<'_>> {
        FragmentBuilder::new(self.graph, self.names, label)
    }
}

/// Builds the fragment computing a value.
///
/// Operands are not built by the factory; it declares them as dependencies
/// on the fragment and the compiler resolves and wires them.
pub trait FragmentFactory: Send + Sync {
    /// Returns `Ok(None)` if the factory does not apply.
    fn fragment(
        &self,
        cx: &mut FragmentContext<'_>,
        expr: Expr,
    ) -> MappingResult<Option<ValueFragment>>;
}
