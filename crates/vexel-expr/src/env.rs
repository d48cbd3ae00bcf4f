//! Variable references and the lexical scope stack.
//!
//! Two kinds of variable exist behind one lookup surface: *external*
//! variables handed out by the host's resolver, and *locals* created by
//! assignment. Locals are slot indices into the owning expression's storage
//! buffer; the buffer is threaded through evaluation explicitly, so the
//! environment itself is only ever consulted during prep. Once prep
//! returns, every name is resolved and the environment is frozen.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::node::Node;
use crate::types::{ExprType, Vec3};

/// A host-provided variable.
///
/// The engine treats external variables as read-only and calls `eval` once
/// per variable reference per evaluation. The referencing node is passed
/// along so stateful hosts can distinguish call sites.
pub trait ExternalVar: Send + Sync {
    /// Type the variable produces; fixed for the lifetime of the binding.
    fn value_type(&self) -> ExprType;

    /// Write the current value into `out` (lane 0 only for scalars).
    fn eval(&self, node: &Node, out: &mut Vec3);
}

/// A resolved variable reference, recorded into Var/Assign nodes at prep.
#[derive(Clone)]
pub enum VarBinding {
    /// Bound through the host resolver.
    External(Arc<dyn ExternalVar>),
    /// Created by an assignment; `slot` indexes the expression's locals.
    Local { slot: usize, ty: ExprType },
}

impl VarBinding {
    pub fn value_type(&self) -> ExprType {
        match self {
            VarBinding::External(var) => var.value_type(),
            VarBinding::Local { ty, .. } => *ty,
        }
    }
}

impl std::fmt::Debug for VarBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarBinding::External(var) => {
                write!(f, "External({})", var.value_type())
            }
            VarBinding::Local { slot, ty } => {
                write!(f, "Local({slot}: {ty})")
            }
        }
    }
}

/// One lexical scope: a frame of names added here, delegating misses to the
/// enclosing scope. Scopes are pushed only by if/else branches.
#[derive(Default)]
pub struct VarEnv<'p> {
    vars: IndexMap<String, VarBinding>,
    parent: Option<&'p VarEnv<'p>>,
}

impl<'p> VarEnv<'p> {
    /// Fresh root environment.
    pub fn new() -> VarEnv<'static> {
        VarEnv {
            vars: IndexMap::new(),
            parent: None,
        }
    }

    /// Push an empty child scope that resolves misses through `parent`.
    pub fn child<'a>(parent: &'a VarEnv<'a>) -> VarEnv<'a> {
        VarEnv {
            vars: IndexMap::new(),
            parent: Some(parent),
        }
    }

    /// Innermost-outward lookup.
    pub fn find(&self, name: &str) -> Option<&VarBinding> {
        match self.vars.get(name) {
            Some(binding) => Some(binding),
            None => self.parent.and_then(|p| p.find(name)),
        }
    }

    /// Insert into the current frame. Shadowing an outer binding is legal.
    pub fn add(&mut self, name: &str, binding: VarBinding) {
        self.vars.insert(name.to_string(), binding);
    }

    /// True iff two sibling child scopes declared exactly the same names
    /// with the same types. Required before an if/else may publish its
    /// branch-local assignments to this scope.
    pub fn changes_match(&self, a: &VarEnv<'_>, b: &VarEnv<'_>) -> bool {
        if a.vars.len() != b.vars.len() {
            return false;
        }
        a.vars.iter().all(|(name, binding)| {
            b.vars
                .get(name)
                .is_some_and(|other| other.value_type() == binding.value_type())
        })
    }

    /// Merge a child scope's additions into this scope.
    pub fn adopt(&mut self, frame: IndexMap<String, VarBinding>) {
        self.vars.extend(frame);
    }

    /// Tear down a child scope, keeping only the names it added.
    pub fn into_frame(self) -> IndexMap<String, VarBinding> {
        self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(slot: usize, ty: ExprType) -> VarBinding {
        VarBinding::Local { slot, ty }
    }

    #[test]
    fn lookup_walks_outward() {
        let mut root = VarEnv::new();
        root.add("x", local(0, ExprType::FP1));

        let inner = VarEnv::child(&root);
        assert!(inner.find("x").is_some());
        assert!(inner.find("y").is_none());
    }

    #[test]
    fn shadowing_resolves_to_innermost() {
        let mut root = VarEnv::new();
        root.add("x", local(0, ExprType::FP1));

        let mut inner = VarEnv::child(&root);
        inner.add("x", local(1, ExprType::FP3));

        match inner.find("x").unwrap() {
            VarBinding::Local { slot, ty } => {
                assert_eq!(*slot, 1);
                assert_eq!(*ty, ExprType::FP3);
            }
            _ => panic!("expected local binding"),
        }
        // the outer frame is untouched
        assert_eq!(root.find("x").unwrap().value_type(), ExprType::FP1);
    }

    #[test]
    fn changes_match_requires_same_names_and_types() {
        let root = VarEnv::new();

        let mut a = VarEnv::child(&root);
        let mut b = VarEnv::child(&root);
        a.add("x", local(0, ExprType::FP1));
        b.add("x", local(1, ExprType::FP1));
        assert!(root.changes_match(&a, &b));

        b.add("y", local(2, ExprType::FP1));
        assert!(!root.changes_match(&a, &b));

        let mut c = VarEnv::child(&root);
        c.add("x", local(3, ExprType::FP3));
        assert!(!root.changes_match(&a, &c));
    }

    #[test]
    fn adopt_publishes_child_additions() {
        let mut root = VarEnv::new();
        let mut branch = VarEnv::child(&root);
        branch.add("x", local(0, ExprType::FP1));
        let frame = branch.into_frame();

        root.adopt(frame);
        assert!(root.find("x").is_some());
    }
}
