//! Mapper registry.
//!
//! Global, append-only lists of value factories plus variant-keyed action
//! and driver mappers. Lookup returns candidates most-specific-first; driver
//! candidates are ordered driver-major (each matching driver key, then each
//! matching result key, then registration order for the exact pair).

use std::sync::Arc;

use tracing::debug;

use crate::error::{MappingError, MappingResult};
use crate::result::{ActionResult, ConsumerFragment};
use crate::traits::{
    Action, ActionMapper, ActuatorDriver, AliasFactory, DriverMapper, FragmentFactory,
    MappingContext,
};
use crate::variant::{Variant, VariantTable};

#[derive(Default)]
pub struct MapperRegistry {
    aliases: Vec<Arc<dyn AliasFactory>>,
    fragments: Vec<Arc<dyn FragmentFactory>>,
    actions: VariantTable<Arc<dyn ActionMapper>>,
    drivers: VariantTable<VariantTable<Arc<dyn DriverMapper>>>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_alias(&mut self, factory: impl AliasFactory + 'static) {
        self.aliases.push(Arc::new(factory));
    }

    pub fn register_fragment(&mut self, factory: impl FragmentFactory + 'static) {
        self.fragments.push(Arc::new(factory));
    }

    pub fn register_action_mapper(
        &mut self,
        action: &'static Variant,
        mapper: impl ActionMapper + 'static,
    ) {
        self.actions.insert(action, Arc::new(mapper));
    }

    pub fn register_driver_mapper(
        &mut self,
        driver: &'static Variant,
        result: &'static Variant,
        mapper: impl DriverMapper + 'static,
    ) {
        // one result table per driver key
        let slot = self.drivers.entry(driver);
        if slot.is_empty() {
            slot.push(VariantTable::new());
        }
        slot[0].insert(result, Arc::new(mapper));
    }

    /// Global alias factories in registration order.
    pub fn alias_factories(&self) -> &[Arc<dyn AliasFactory>] {
        &self.aliases
    }

    /// Global fragment factories in registration order.
    pub fn fragment_factories(&self) -> &[Arc<dyn FragmentFactory>] {
        &self.fragments
    }

    /// Action mappers applicable to `variant`, most specific first.
    pub fn action_candidates<'a>(
        &'a self,
        variant: &'a Variant,
    ) -> impl Iterator<Item = &'a Arc<dyn ActionMapper>> + 'a {
        self.actions.lookup(variant)
    }

    /// Driver mappers applicable to the pair, in driver-major order.
    pub fn driver_candidates<'a>(
        &'a self,
        driver: &'a Variant,
        result: &'a Variant,
    ) -> impl Iterator<Item = &'a Arc<dyn DriverMapper>> + 'a {
        self.drivers
            .lookup(driver)
            .flat_map(move |by_result| by_result.lookup(result))
    }

    /// Map an action with the first candidate that accepts it.
    pub fn map_action(
        &self,
        action: &dyn Action,
        cx: &mut MappingContext<'_>,
    ) -> MappingResult<ActionResult> {
        let variant = action.variant();
        for mapper in self.action_candidates(variant) {
            if let Some(result) = mapper.map(action, cx)? {
                debug!(action = variant.name, result = result.variant().name, "mapped action");
                return Ok(result);
            }
        }
        Err(MappingError::UnmappedAction {
            variant: variant.name,
        })
    }

    /// Map a driver against an action result.
    ///
    /// The outermost result is tried first; if no mapper accepts it, each
    /// wrapped result is tried in turn.
    pub fn map_driver(
        &self,
        driver: &dyn ActuatorDriver,
        result: &ActionResult,
        cx: &mut MappingContext<'_>,
    ) -> MappingResult<ConsumerFragment> {
        for candidate in result.chain() {
            for mapper in self.driver_candidates(driver.variant(), candidate.variant()) {
                if let Some(consumer) = mapper.map(driver, candidate, cx)? {
                    debug!(
                        driver = driver.name(),
                        result = candidate.variant().name,
                        "mapped driver"
                    );
                    return Ok(consumer);
                }
            }
        }
        Err(MappingError::UnmappedDriver {
            driver: driver.variant().name,
            result: result.variant().name,
        })
    }
}
