//! Products of action and driver mapping.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use rt_core::ElemId;
use rt_expr::Expr;

use crate::traits::{AliasFactory, FragmentFactory};
use crate::variant::Variant;

/// Result of mapping one action.
///
/// Carries command-local value factories (tried before the global ones), a
/// typed payload for driver mappers, and the condition under which the
/// action is complete. Results compose: a result may wrap an inner one, and
/// factories, payloads and completion conditions are looked up through the
/// whole chain, outermost first.
#[derive(Clone)]
pub struct ActionResult {
    variant: &'static Variant,
    aliases: Vec<Arc<dyn AliasFactory>>,
    fragments: Vec<Arc<dyn FragmentFactory>>,
    payload: Option<Arc<dyn Any + Send + Sync>>,
    completion: Option<Expr>,
    handles_cancel: bool,
    inner: Option<Box<ActionResult>>,
}

impl ActionResult {
    pub fn new(variant: &'static Variant) -> Self {
        Self {
            variant,
            aliases: Vec::new(),
            fragments: Vec::new(),
            payload: None,
            completion: None,
            handles_cancel: false,
            inner: None,
        }
    }

    /// Wrap `inner`, keeping its factories and payload reachable.
    pub fn wrapping(variant: &'static Variant, inner: ActionResult) -> Self {
        Self {
            inner: Some(Box::new(inner)),
            ..Self::new(variant)
        }
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    pub fn with_completion(mut self, condition: Expr) -> Self {
        self.completion = Some(condition);
        self
    }

    pub fn with_alias(mut self, factory: impl AliasFactory + 'static) -> Self {
        self.aliases.push(Arc::new(factory));
        self
    }

    pub fn with_fragment(mut self, factory: impl FragmentFactory + 'static) -> Self {
        self.fragments.push(Arc::new(factory));
        self
    }

    /// The action reacts to its cancel signal itself; cancel does not
    /// terminate the net directly.
    pub fn handling_cancel(mut self) -> Self {
        self.handles_cancel = true;
        self
    }

    pub fn variant(&self) -> &'static Variant {
        self.variant
    }

    pub fn inner(&self) -> Option<&ActionResult> {
        self.inner.as_deref()
    }

    /// This result followed by every wrapped result.
    pub fn chain(&self) -> impl Iterator<Item = &ActionResult> {
        std::iter::successors(Some(self), |r| r.inner())
    }

    /// First payload of type `T` along the chain.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.chain()
            .filter_map(|r| r.payload.as_deref())
            .find_map(|p| p.downcast_ref::<T>())
    }

    pub fn alias_factories(&self) -> impl Iterator<Item = &Arc<dyn AliasFactory>> {
        self.chain().flat_map(|r| r.aliases.iter())
    }

    pub fn fragment_factories(&self) -> impl Iterator<Item = &Arc<dyn FragmentFactory>> {
        self.chain().flat_map(|r| r.fragments.iter())
    }

    /// Completion conditions along the chain.
    pub fn completions(&self) -> Vec<Expr> {
        self.chain().filter_map(|r| r.completion).collect()
    }

    pub fn handles_cancel(&self) -> bool {
        self.chain().any(|r| r.handles_cancel)
    }
}

impl fmt::Debug for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionResult")
            .field("variant", &self.variant.name)
            .field("aliases", &self.aliases.len())
            .field("fragments", &self.fragments.len())
            .field("completion", &self.completion)
            .field("handles_cancel", &self.handles_cancel)
            .field("inner", &self.inner)
            .finish()
    }
}

/// Fragment produced by a driver mapper.
///
/// Its declared dependencies are resolved and wired by the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerFragment {
    pub fragment: ElemId,
    /// True once the device has finished consuming the action.
    pub completion: Option<Expr>,
}

impl ConsumerFragment {
    pub fn new(fragment: ElemId) -> Self {
        Self {
            fragment,
            completion: None,
        }
    }

    pub fn with_completion(mut self, condition: Expr) -> Self {
        self.completion = Some(condition);
        self
    }
}
