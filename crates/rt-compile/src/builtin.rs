//! Built-in alias and fragment factories for the core expression kinds.

use rt_core::{DataType, NameAllocator, PortId, Value};
use rt_expr::{Expr, ExprArena, ExprKind};
use rt_mapping::{
    AliasFactory, FragmentContext, FragmentFactory, MapperRegistry, MappingResult,
};
use rt_net::catalogue::params;
use rt_net::{CorePrimitive, FragmentBuilder, NetGraph, NetResult, ValueFragment};

use crate::options::CompileOptions;

/// Register the built-in factories, aliases first.
pub fn register_core_factories(registry: &mut MapperRegistry, options: &CompileOptions) {
    if options.fold_cheap_values {
        registry.register_alias(FoldCheapValues);
    }
    registry.register_alias(AgeAsTimeDifference);
    registry.register_fragment(ConstantFragments);
    registry.register_fragment(UnaryFragments);
    registry.register_fragment(BinaryFragments);
    registry.register_fragment(ConditionalFragments);
    registry.register_fragment(RisingEdgeFragments);
    registry.register_fragment(TimestampFragments);
    registry.register_fragment(NetcommFragments);
}

/// Statically known, non-constant values become constants.
pub struct FoldCheapValues;

impl AliasFactory for FoldCheapValues {
    fn alias(&self, arena: &mut ExprArena, expr: Expr) -> MappingResult<Option<Expr>> {
        let node = arena.node(expr)?;
        if matches!(node.kind, ExprKind::Constant { .. }) {
            return Ok(None);
        }
        let Some(value) = node.cheap.clone() else {
            return Ok(None);
        };
        // Mixed-type conditionals fold to the chosen branch's own type.
        let value = match (node.ty, value) {
            (DataType::Double, Value::Int(i)) => Value::Double(i as f64),
            (_, v) => v,
        };
        Ok(Some(arena.constant(value)))
    }
}

/// `Age(x)` is `NetTime - Timestamp(x)`.
pub struct AgeAsTimeDifference;

impl AliasFactory for AgeAsTimeDifference {
    fn alias(&self, arena: &mut ExprArena, expr: Expr) -> MappingResult<Option<Expr>> {
        let node = arena.node(expr)?;
        if !matches!(node.kind, ExprKind::Age) {
            return Ok(None);
        }
        let operand = node.operands[0];
        let now = arena.net_time();
        let stamp = arena.timestamp(operand)?;
        Ok(Some(arena.subtract(now, stamp)?))
    }
}

pub struct ConstantFragments;

impl FragmentFactory for ConstantFragments {
    fn fragment(
        &self,
        cx: &mut FragmentContext<'_>,
        expr: Expr,
    ) -> MappingResult<Option<ValueFragment>> {
        let node = cx.node(expr)?;
        let ExprKind::Constant { value } = &node.kind else {
            return Ok(None);
        };
        let mut b = cx.builder("Constant")?;
        let k = b.value(value)?;
        Ok(Some(b.finish_value(k.output())?))
    }
}

pub struct UnaryFragments;

impl FragmentFactory for UnaryFragments {
    fn fragment(
        &self,
        cx: &mut FragmentContext<'_>,
        expr: Expr,
    ) -> MappingResult<Option<ValueFragment>> {
        let arena = cx.arena;
        let node = cx.node(expr)?;
        let ExprKind::Unary { op } = &node.kind else {
            return Ok(None);
        };
        let mut b = cx.builder(op.name())?;
        let prim = b.primitive(CorePrimitive::Unary(*op))?;
        feed(&mut b, arena, node.operands[0], prim.input(0))?;
        Ok(Some(b.finish_value(prim.output())?))
    }
}

pub struct BinaryFragments;

impl FragmentFactory for BinaryFragments {
    fn fragment(
        &self,
        cx: &mut FragmentContext<'_>,
        expr: Expr,
    ) -> MappingResult<Option<ValueFragment>> {
        let arena = cx.arena;
        let node = cx.node(expr)?;
        let ExprKind::Binary { op } = &node.kind else {
            return Ok(None);
        };
        let mut b = cx.builder(op.name())?;
        let prim = b.primitive(CorePrimitive::Binary(*op))?;
        feed(&mut b, arena, node.operands[0], prim.input(0))?;
        feed(&mut b, arena, node.operands[1], prim.input(1))?;
        Ok(Some(b.finish_value(prim.output())?))
    }
}

pub struct ConditionalFragments;

impl FragmentFactory for ConditionalFragments {
    fn fragment(
        &self,
        cx: &mut FragmentContext<'_>,
        expr: Expr,
    ) -> MappingResult<Option<ValueFragment>> {
        let arena = cx.arena;
        let node = cx.node(expr)?;
        if !matches!(node.kind, ExprKind::Conditional) {
            return Ok(None);
        }
        let mut b = cx.builder("Conditional")?;
        let prim = b.primitive(CorePrimitive::Conditional(node.ty))?;
        for (i, &operand) in node.operands.iter().enumerate() {
            feed(&mut b, arena, operand, prim.input(i))?;
        }
        Ok(Some(b.finish_value(prim.output())?))
    }
}

pub struct RisingEdgeFragments;

impl FragmentFactory for RisingEdgeFragments {
    fn fragment(
        &self,
        cx: &mut FragmentContext<'_>,
        expr: Expr,
    ) -> MappingResult<Option<ValueFragment>> {
        let node = cx.node(expr)?;
        if !matches!(node.kind, ExprKind::RisingEdge) {
            return Ok(None);
        }
        let mut b = cx.builder("RisingEdge")?;
        let prim = b.primitive(CorePrimitive::RisingEdge)?;
        b.depend(node.operands[0], prim.input(0))?;
        Ok(Some(b.finish_value(prim.output())?))
    }
}

/// Timestamps take the operand's own sample time when it has one.
pub struct TimestampFragments;

impl FragmentFactory for TimestampFragments {
    fn fragment(
        &self,
        cx: &mut FragmentContext<'_>,
        expr: Expr,
    ) -> MappingResult<Option<ValueFragment>> {
        let arena = cx.arena;
        let node = cx.node(expr)?;
        if !matches!(node.kind, ExprKind::Timestamp) {
            return Ok(None);
        }
        let operand = node.operands[0];
        let ty = arena.node(operand)?.ty;
        let mut b = cx.builder("Timestamp")?;
        let prim = b.primitive(CorePrimitive::Timestamp(ty))?;
        b.depend_synced(operand, prim.input(0), prim.input(1))?;
        Ok(Some(b.finish_value(prim.output())?))
    }
}

pub struct NetcommFragments;

impl FragmentFactory for NetcommFragments {
    fn fragment(
        &self,
        cx: &mut FragmentContext<'_>,
        expr: Expr,
    ) -> MappingResult<Option<ValueFragment>> {
        let node = cx.node(expr)?;
        let ExprKind::Netcomm { key, ty } = &node.kind else {
            return Ok(None);
        };
        let mut b = cx.builder("Netcomm")?;
        let prim = b.primitive(CorePrimitive::NetcommIn(*ty))?;
        b.set_param(prim.id, params::KEY, key.as_str())?;
        Ok(Some(b.finish_value(prim.output())?))
    }
}

/// Declare `source` as the feed of `target`, widening `Int` to `Double`.
fn feed(
    b: &mut FragmentBuilder<'_>,
    arena: &ExprArena,
    source: Expr,
    target: PortId,
) -> MappingResult<()> {
    let from = arena.node(source)?.ty;
    let to = b.graph().port(target)?.ty;
    if from == DataType::Int && to == DataType::Double {
        let widen = b.primitive(CorePrimitive::IntToDouble)?;
        b.depend(source, widen.input(0))?;
        b.connect(widen.output(), target)?;
    } else {
        b.depend(source, target)?;
    }
    Ok(())
}

/// A single-primitive source fragment (net time, cancel).
pub(crate) fn ambient(
    graph: &mut NetGraph,
    names: &mut NameAllocator,
    prim: CorePrimitive,
) -> NetResult<ValueFragment> {
    let mut b = FragmentBuilder::new(graph, names, prim.type_id())?;
    let p = b.primitive(prim)?;
    b.finish_value(p.output())
}
