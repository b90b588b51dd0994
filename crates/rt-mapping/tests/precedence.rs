//! Mapper precedence through the public registry API.

use std::any::Any;

use proptest::prelude::*;
use rt_core::NameAllocator;
use rt_expr::ExprArena;
use rt_mapping::{
    Action, ActionMapper, ActionResult, MapperRegistry, MappingContext, MappingResult, Variant,
};
use rt_net::NetGraph;

static TASK: Variant = Variant::root("Task");
static MOVE: Variant = Variant::new("Move", &[&TASK]);
static LINEAR_MOVE: Variant = Variant::new("LinearMove", &[&MOVE]);
static TIMED: Variant = Variant::root("Timed");
static TIMED_LINEAR_MOVE: Variant = Variant::new("TimedLinearMove", &[&LINEAR_MOVE, &TIMED]);
static DONE: Variant = Variant::root("Done");

static KEYS: [&Variant; 5] = [&TASK, &MOVE, &LINEAR_MOVE, &TIMED, &TIMED_LINEAR_MOVE];

struct Instance(&'static Variant);

impl Action for Instance {
    fn variant(&self) -> &'static Variant {
        self.0
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Tag(&'static str);

impl ActionMapper for Tag {
    fn map(
        &self,
        _action: &dyn Action,
        _cx: &mut MappingContext<'_>,
    ) -> MappingResult<Option<ActionResult>> {
        Ok(Some(ActionResult::new(&DONE).with_payload(self.0)))
    }
}

fn map_with(reg: &MapperRegistry, variant: &'static Variant) -> &'static str {
    let mut arena = ExprArena::new();
    let mut graph = NetGraph::new();
    let mut names = NameAllocator::new();
    let scope = arena.new_scope();
    let mut cx = MappingContext {
        arena: &mut arena,
        graph: &mut graph,
        names: &mut names,
        scope,
    };
    let result = reg.map_action(&Instance(variant), &mut cx).unwrap();
    *result.payload::<&'static str>().unwrap()
}

#[test]
fn exact_variant_beats_ancestors() {
    let mut reg = MapperRegistry::new();
    reg.register_action_mapper(&TASK, Tag("Task"));
    reg.register_action_mapper(&MOVE, Tag("Move"));
    assert_eq!(map_with(&reg, &LINEAR_MOVE), "Move");
    assert_eq!(map_with(&reg, &MOVE), "Move");
    assert_eq!(map_with(&reg, &TASK), "Task");
}

proptest! {
    /// Registering a mapper for every key in any order, the most specific
    /// key for the action always wins.
    #[test]
    fn most_specific_registration_wins(
        order in Just((0..KEYS.len()).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let mut reg = MapperRegistry::new();
        for &i in &order {
            reg.register_action_mapper(KEYS[i], Tag(KEYS[i].name));
        }
        prop_assert_eq!(map_with(&reg, &TIMED_LINEAR_MOVE), "TimedLinearMove");
        prop_assert_eq!(map_with(&reg, &LINEAR_MOVE), "LinearMove");
        prop_assert_eq!(map_with(&reg, &MOVE), "Move");
    }
}
