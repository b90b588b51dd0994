//! rt-mapping: pluggable rules that turn actions, drivers and values into
//! net fragments.
//!
//! - [`Variant`] descriptors form a DAG of super-variants
//! - [`MapperRegistry`] orders mappers most-specific-first at registration
//! - [`ActionResult`] carries command-local factories and a typed payload
//! - Alias and fragment factories rewrite or build individual values

pub mod error;
pub mod registry;
pub mod result;
pub mod traits;
pub mod variant;

pub use error::{MappingError, MappingResult};
pub use registry::MapperRegistry;
pub use result::{ActionResult, ConsumerFragment};
pub use traits::{
    Action, ActionMapper, ActuatorDriver, AliasFactory, DriverMapper, FragmentContext,
    FragmentFactory, MappingContext,
};
pub use variant::{Variant, VariantTable};
