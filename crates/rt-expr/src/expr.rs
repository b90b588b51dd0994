//! Public expression handle.

use std::fmt;

use rt_core::{ExprId, RuntimeId};

/// Handle to an expression node.
///
/// Handles are cheap to copy. Two handles compare equal exactly when they
/// denote structurally equal nodes of the same runtime, because the arena
/// hash-conses nodes on insertion.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Expr {
    runtime: RuntimeId,
    id: ExprId,
}

impl Expr {
    pub(crate) fn new(runtime: RuntimeId, id: ExprId) -> Self {
        Self { runtime, id }
    }

    /// Runtime the node was built in.
    pub fn runtime(&self) -> RuntimeId {
        self.runtime
    }

    /// Arena id of the node.
    pub fn id(&self) -> ExprId {
        self.id
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_runtime_and_id() {
        let rt = RuntimeId::new();
        let a = Expr::new(rt, ExprId::from_index(3));
        let b = Expr::new(rt, ExprId::from_index(3));
        let c = Expr::new(RuntimeId::new(), ExprId::from_index(3));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
