//! The Expression façade: owns one AST, its diagnostics, and its locals.
//!
//! One `Expression` is a single-threaded unit: prep and eval of the same
//! instance must be serialized by the caller. Distinct instances are
//! independent and may live on different threads, provided the variables
//! and functions bound into them are themselves thread-safe — a FUNCX
//! callback that is not marks the whole expression (see
//! [`Expression::is_thread_safe`]).

use std::sync::Arc;

use tracing::debug;

use crate::env::{ExternalVar, VarEnv};
use crate::error::{ExprError, Spanned};
use crate::func::FuncDef;
use crate::node::{EvalState, FuncResolverFn, Node, PrepCtx, VarResolverFn};
use crate::parser;
use crate::types::{ExprType, Vec3, ZERO};

/// An expression bound to a host: source text in, 3-wide values out.
///
/// ```
/// use vexel_expr::Expression;
///
/// let mut e = Expression::new("[1, 2, 3] * 2");
/// assert!(e.is_valid());
/// assert_eq!(e.evaluate(), [2.0, 4.0, 6.0]);
/// ```
pub struct Expression {
    source: String,
    wanted: ExprType,
    root: Option<Node>,
    errors: Vec<Spanned<ExprError>>,
    state: EvalState,
    n_locals: usize,
    thread_unsafe: Option<String>,
    var_resolver: Option<Box<VarResolverFn>>,
    func_resolver: Option<Box<FuncResolverFn>>,
}

impl Default for Expression {
    fn default() -> Self {
        Self {
            source: String::new(),
            wanted: ExprType::Any,
            root: None,
            errors: Vec::new(),
            state: EvalState::new(),
            n_locals: 0,
            thread_unsafe: None,
            var_resolver: None,
            func_resolver: None,
        }
    }
}

impl Expression {
    /// Parse and prep `source` with no host bindings and no requested type.
    pub fn new(source: impl Into<String>) -> Self {
        let mut expr = Self::default();
        expr.set_expression(source);
        expr
    }

    /// An unbound expression. Configure resolvers and the desired type,
    /// then call [`Expression::set_expression`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// The type the host wants the expression to produce. Takes effect at
    /// the next [`Expression::set_expression`].
    pub fn set_desired_type(&mut self, wanted: ExprType) {
        self.wanted = wanted;
    }

    /// Hook consulted by variable references after the local environment
    /// misses. Takes effect at the next [`Expression::set_expression`].
    pub fn set_var_resolver<F>(&mut self, resolver: F)
    where
        F: Fn(&str) -> Option<Arc<dyn ExternalVar>> + Send + Sync + 'static,
    {
        self.var_resolver = Some(Box::new(resolver));
    }

    /// Hook consulted by function calls before the process-wide registry.
    /// Takes effect at the next [`Expression::set_expression`].
    pub fn set_func_resolver<F>(&mut self, resolver: F)
    where
        F: Fn(&str) -> Option<Arc<FuncDef>> + Send + Sync + 'static,
    {
        self.func_resolver = Some(Box::new(resolver));
    }

    /// Replace the source text: lex, parse, and prep in one step.
    ///
    /// On a parse failure the single syntax diagnostic is recorded; on a
    /// prep failure every offending node contributes one diagnostic. Either
    /// way the expression reports invalid and refuses to evaluate.
    pub fn set_expression(&mut self, source: impl Into<String>) {
        self.source = source.into();
        self.root = None;
        self.errors.clear();
        self.thread_unsafe = None;
        self.n_locals = 0;

        match parser::parse(&self.source) {
            Ok(mut root) => {
                let mut env = VarEnv::new();
                let mut n_locals = 0;
                let mut ctx = PrepCtx {
                    errors: &mut self.errors,
                    var_resolver: self.var_resolver.as_deref(),
                    func_resolver: self.func_resolver.as_deref(),
                    thread_unsafe: &mut self.thread_unsafe,
                    n_locals: &mut n_locals,
                };
                let ty = root.prep(self.wanted, &mut env, &mut ctx);
                self.n_locals = n_locals;
                debug!(%ty, errors = self.errors.len(), "expression prepped");
                self.root = Some(root);
            }
            Err(err) => {
                debug!(%err, "parse failed");
                self.errors
                    .push(Spanned::new(ExprError::Syntax(err.message), err.span));
            }
        }
    }

    /// True iff parse and prep both produced no diagnostics.
    pub fn is_valid(&self) -> bool {
        self.root.is_some() && self.errors.is_empty()
    }

    /// Human-readable diagnostics collected by the last
    /// [`Expression::set_expression`].
    pub fn errors(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.node.to_string()).collect()
    }

    /// Structured diagnostics with their source ranges.
    pub fn diagnostics(&self) -> &[Spanned<ExprError>] {
        &self.errors
    }

    /// The type the prepped expression produces, or `Error` when invalid.
    pub fn result_type(&self) -> ExprType {
        match &self.root {
            Some(root) if self.errors.is_empty() => root.ty(),
            _ => ExprType::Error,
        }
    }

    /// Whether concurrent evaluation of this expression is permitted.
    /// False as soon as prep binds a FUNCX callback that declares itself
    /// thread-unsafe.
    pub fn is_thread_safe(&self) -> bool {
        self.thread_unsafe.is_none()
    }

    /// Name of the function that made this expression thread-unsafe.
    pub fn thread_unsafe_reason(&self) -> Option<&str> {
        self.thread_unsafe.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the prepped tree.
    ///
    /// Locals are zeroed before the walk. An invalid expression is never
    /// walked and yields zero.
    pub fn evaluate(&mut self) -> Vec3 {
        let mut out = ZERO;
        if !self.errors.is_empty() {
            return out;
        }
        let Some(root) = self.root.as_ref() else {
            return out;
        };
        self.state.reset(self.n_locals);
        root.eval(&mut self.state, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{self, FuncDef, FuncKind};
    use crate::types::ExprType;

    struct Constant {
        ty: ExprType,
        value: Vec3,
    }

    impl ExternalVar for Constant {
        fn value_type(&self) -> ExprType {
            self.ty
        }

        fn eval(&self, _node: &Node, out: &mut Vec3) {
            *out = self.value;
        }
    }

    #[test]
    fn arithmetic_on_literals() {
        let mut e = Expression::new("1 + 2");
        assert!(e.is_valid(), "{:?}", e.errors());
        assert_eq!(e.result_type(), ExprType::FP1);
        assert_eq!(e.evaluate()[0], 3.0);
    }

    #[test]
    fn undefined_variable_is_collected_not_thrown() {
        let mut e = Expression::new("$undefined + 1");
        assert!(!e.is_valid());
        assert_eq!(e.errors(), vec!["No variable named $undefined".to_string()]);
        assert_eq!(e.evaluate(), ZERO);
    }

    #[test]
    fn syntax_errors_poison_the_expression() {
        let e = Expression::new("1 +");
        assert!(!e.is_valid());
        assert!(e.errors()[0].starts_with("Syntax error:"));
    }

    #[test]
    fn host_variables_resolve_through_the_hook() {
        let mut e = Expression::empty();
        e.set_var_resolver(|name| match name {
            "P" => Some(Arc::new(Constant {
                ty: ExprType::FP3,
                value: [1.0, 2.0, 3.0],
            }) as Arc<dyn ExternalVar>),
            _ => None,
        });
        e.set_expression("$P * 2");
        assert!(e.is_valid(), "{:?}", e.errors());
        assert_eq!(e.result_type(), ExprType::FP3);
        assert_eq!(e.evaluate(), [2.0, 4.0, 6.0]);
    }

    #[test]
    fn host_functions_shadow_the_registry() {
        func::register(FuncDef::new("expr_test_twelve", FuncKind::Func0(|| 7.0)));

        let mut e = Expression::empty();
        e.set_func_resolver(|name| match name {
            "expr_test_twelve" => Some(Arc::new(FuncDef::new(
                "expr_test_twelve",
                FuncKind::Func0(|| 12.0),
            ))),
            _ => None,
        });
        e.set_expression("expr_test_twelve()");
        assert!(e.is_valid(), "{:?}", e.errors());
        assert_eq!(e.evaluate()[0], 12.0);
    }

    #[test]
    fn locals_are_rezeroed_between_evaluations() {
        let mut e = Expression::new("$a = $a + 1; $a");
        // `$a` on the right-hand side is undefined on first use
        assert!(!e.is_valid());

        let mut e = Expression::new("$a = 1; $a + 1");
        assert!(e.is_valid(), "{:?}", e.errors());
        assert_eq!(e.evaluate()[0], 2.0);
        assert_eq!(e.evaluate()[0], 2.0);
    }

    #[test]
    fn desired_type_reaches_the_root() {
        let mut e = Expression::empty();
        e.set_desired_type(ExprType::Numeric);
        e.set_expression("[1, 1, 1]");
        assert!(e.is_valid(), "{:?}", e.errors());
        assert_eq!(e.result_type(), ExprType::FP3);
    }
}
