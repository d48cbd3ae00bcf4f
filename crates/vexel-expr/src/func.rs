//! Function descriptors, calling conventions, and the process-wide registry.
//!
//! A bound function is described by a [`FuncDef`]: arity bounds, declared
//! return type, and a [`FuncKind`] carrying exactly the signature the
//! implementation needs. Scalar-shaped functions (`Func0`..`FuncN`) are
//! automatically lifted over vectors by the evaluator, one lane per call;
//! vector shapes receive full 3-wide arguments and run once.
//!
//! The registry is a process-wide name → descriptor table. The host (and
//! the built-in library) populates it at startup; after that it is treated
//! as immutable shared data.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use crate::env::VarEnv;
use crate::node::{EvalState, FuncCall, PrepCtx};
use crate::types::{ExprType, Vec3};

/// A host function that does its own prep and eval.
///
/// The callback receives the call node itself, so it can inspect string
/// arguments through [`FuncCall::is_str_arg`] / [`FuncCall::str_arg`] and
/// evaluate numeric arguments on demand. A callback holding per-call
/// mutable state reports itself thread-unsafe, which marks the whole
/// expression for serialized evaluation.
pub trait FuncX: Send + Sync {
    /// Whether concurrent evaluation of expressions using this function is
    /// safe. Defaults to true.
    fn is_thread_safe(&self) -> bool {
        true
    }

    /// Type-check the call. Implementations usually delegate argument
    /// handling to [`FuncCall::prep_args`] and return their result type.
    fn prep(
        &self,
        call: &mut FuncCall,
        wanted: ExprType,
        env: &mut VarEnv<'_>,
        ctx: &mut PrepCtx<'_>,
    ) -> ExprType;

    /// Evaluate the call into `out`.
    fn eval(&self, call: &FuncCall, state: &mut EvalState, out: &mut Vec3);
}

/// Calling convention and implementation of a bound function.
///
/// Each variant stores exactly the signature it needs; dispatch in the
/// evaluator is an exhaustive match. `V` shapes take vector arguments and
/// reduce to a scalar, `VV` shapes produce a vector, and the `N` shapes
/// receive all arguments packed in a slice.
#[derive(Clone)]
pub enum FuncKind {
    Func0(fn() -> f64),
    Func1(fn(f64) -> f64),
    Func2(fn(f64, f64) -> f64),
    Func3(fn(f64, f64, f64) -> f64),
    Func4(fn(f64, f64, f64, f64) -> f64),
    Func5(fn(f64, f64, f64, f64, f64) -> f64),
    Func6(fn(f64, f64, f64, f64, f64, f64) -> f64),
    FuncN(fn(&[f64]) -> f64),
    Func1V(fn(&Vec3) -> f64),
    Func2V(fn(&Vec3, &Vec3) -> f64),
    FuncNV(fn(&[Vec3]) -> f64),
    Func1VV(fn(&Vec3) -> Vec3),
    Func2VV(fn(&Vec3, &Vec3) -> Vec3),
    FuncNVV(fn(&[Vec3]) -> Vec3),
    FuncX(Arc<dyn FuncX>),
}

impl FuncKind {
    /// Fixed arity implied by the shape, if any.
    fn natural_arity(&self) -> Option<usize> {
        match self {
            FuncKind::Func0(_) => Some(0),
            FuncKind::Func1(_) | FuncKind::Func1V(_) | FuncKind::Func1VV(_) => Some(1),
            FuncKind::Func2(_) | FuncKind::Func2V(_) | FuncKind::Func2VV(_) => Some(2),
            FuncKind::Func3(_) => Some(3),
            FuncKind::Func4(_) => Some(4),
            FuncKind::Func5(_) => Some(5),
            FuncKind::Func6(_) => Some(6),
            FuncKind::FuncN(_)
            | FuncKind::FuncNV(_)
            | FuncKind::FuncNVV(_)
            | FuncKind::FuncX(_) => None,
        }
    }

    /// Return type implied by the shape: vector producers yield `FPN(3)`,
    /// everything else a scalar.
    fn natural_ret(&self) -> ExprType {
        match self {
            FuncKind::Func1VV(_) | FuncKind::Func2VV(_) | FuncKind::FuncNVV(_) => ExprType::FP3,
            _ => ExprType::FP1,
        }
    }
}

impl std::fmt::Debug for FuncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            FuncKind::Func0(_) => "Func0",
            FuncKind::Func1(_) => "Func1",
            FuncKind::Func2(_) => "Func2",
            FuncKind::Func3(_) => "Func3",
            FuncKind::Func4(_) => "Func4",
            FuncKind::Func5(_) => "Func5",
            FuncKind::Func6(_) => "Func6",
            FuncKind::FuncN(_) => "FuncN",
            FuncKind::Func1V(_) => "Func1V",
            FuncKind::Func2V(_) => "Func2V",
            FuncKind::FuncNV(_) => "FuncNV",
            FuncKind::Func1VV(_) => "Func1VV",
            FuncKind::Func2VV(_) => "Func2VV",
            FuncKind::FuncNVV(_) => "FuncNVV",
            FuncKind::FuncX(_) => "FuncX",
        };
        f.write_str(tag)
    }
}

/// Descriptor for a bound function: name, arity bounds, return type, and
/// the tagged implementation.
#[derive(Debug, Clone)]
pub struct FuncDef {
    name: String,
    ret: ExprType,
    min_args: usize,
    max_args: Option<usize>,
    kind: FuncKind,
}

impl FuncDef {
    /// Build a descriptor, deriving arity and return type from the shape.
    /// Variadic shapes default to at least one argument; override with
    /// [`FuncDef::with_arity`].
    pub fn new(name: impl Into<String>, kind: FuncKind) -> Self {
        let (min_args, max_args) = match kind.natural_arity() {
            Some(n) => (n, Some(n)),
            None => (1, None),
        };
        Self {
            name: name.into(),
            ret: kind.natural_ret(),
            min_args,
            max_args,
            kind,
        }
    }

    /// Build a custom-dispatch descriptor. FUNCX callbacks declare their
    /// own return type and arity bounds.
    pub fn funcx(
        name: impl Into<String>,
        ret: ExprType,
        min_args: usize,
        max_args: Option<usize>,
        callback: Arc<dyn FuncX>,
    ) -> Self {
        Self {
            name: name.into(),
            ret,
            min_args,
            max_args,
            kind: FuncKind::FuncX(callback),
        }
    }

    /// Override the arity bounds. `None` for `max` means unbounded.
    pub fn with_arity(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_args = min;
        self.max_args = max;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ret_type(&self) -> ExprType {
        self.ret
    }

    pub fn min_args(&self) -> usize {
        self.min_args
    }

    pub fn max_args(&self) -> Option<usize> {
        self.max_args
    }

    pub fn kind(&self) -> &FuncKind {
        &self.kind
    }

    /// True for the scalar-argument shapes (`Func0`..`Func6`, `FuncN`).
    /// Selects the FP1 argument hint during prep and the per-lane fan-out
    /// during eval.
    pub fn is_scalar_args(&self) -> bool {
        matches!(
            self.kind,
            FuncKind::Func0(_)
                | FuncKind::Func1(_)
                | FuncKind::Func2(_)
                | FuncKind::Func3(_)
                | FuncKind::Func4(_)
                | FuncKind::Func5(_)
                | FuncKind::Func6(_)
                | FuncKind::FuncN(_)
        )
    }

    /// Thread safety of the implementation. Plain function pointers are
    /// always safe; FUNCX callbacks answer for themselves.
    pub fn is_thread_safe(&self) -> bool {
        match &self.kind {
            FuncKind::FuncX(callback) => callback.is_thread_safe(),
            _ => true,
        }
    }
}

fn table() -> &'static RwLock<HashMap<String, Arc<FuncDef>>> {
    static TABLE: OnceLock<RwLock<HashMap<String, Arc<FuncDef>>>> = OnceLock::new();
    TABLE.get_or_init(Default::default)
}

/// Add a descriptor to the process-wide registry, replacing any previous
/// binding of the same name. Intended for host startup; the registry is
/// read-only once expressions start prepping.
pub fn register(def: FuncDef) {
    debug!(name = %def.name(), kind = ?def.kind(), "function registered");
    let mut map = table().write().expect("function registry poisoned");
    map.insert(def.name().to_string(), Arc::new(def));
}

/// Exact-name lookup in the process-wide registry.
pub fn lookup(name: &str) -> Option<Arc<FuncDef>> {
    let map = table().read().expect("function registry poisoned");
    map.get(name).cloned()
}

/// Whether a name is bound in the process-wide registry.
pub fn is_defined(name: &str) -> bool {
    lookup(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_arity_follows_shape() {
        let def = FuncDef::new("registry_test_cos", FuncKind::Func1(f64::cos));
        assert_eq!(def.min_args(), 1);
        assert_eq!(def.max_args(), Some(1));
        assert_eq!(def.ret_type(), ExprType::FP1);
        assert!(def.is_scalar_args());
    }

    #[test]
    fn vector_producers_return_fp3() {
        fn flip(v: &Vec3) -> Vec3 {
            [v[2], v[1], v[0]]
        }
        let def = FuncDef::new("registry_test_flip", FuncKind::Func1VV(flip));
        assert_eq!(def.ret_type(), ExprType::FP3);
        assert!(!def.is_scalar_args());
    }

    #[test]
    fn variadic_arity_is_overridable() {
        fn total(args: &[f64]) -> f64 {
            args.iter().sum()
        }
        let def = FuncDef::new("registry_test_total", FuncKind::FuncN(total)).with_arity(2, None);
        assert_eq!(def.min_args(), 2);
        assert_eq!(def.max_args(), None);
    }

    #[test]
    fn register_then_lookup() {
        register(FuncDef::new("registry_test_floor", FuncKind::Func1(f64::floor)));
        let def = lookup("registry_test_floor").expect("registered function");
        assert_eq!(def.name(), "registry_test_floor");
        assert!(is_defined("registry_test_floor"));
        assert!(!is_defined("registry_test_missing"));
    }
}
