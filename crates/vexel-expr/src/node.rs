//! The typed AST: node taxonomy, the prep pass, and the eval pass.
//!
//! Nodes go through two phases. `prep` runs once after parsing: it resolves
//! every variable and function reference, computes the type of every node,
//! and records diagnostics for everything that does not fit — siblings keep
//! prepping after a failure so one pass reports all problems. `eval` is a
//! read-only walk of the prepped tree, called as often as the host likes.
//!
//! Output convention: a scalar node fills only lane 0 of its output; a
//! vector node fills all three lanes; a statement node zeroes the output.
//! Consumers that need uniform width broadcast lane 0 across the vector.

use std::collections::HashMap;
use std::sync::Arc;

use logos::Span;

use crate::env::{ExternalVar, VarBinding, VarEnv};
use crate::error::{ExprError, Spanned};
use crate::func::{self, FuncDef, FuncKind};
use crate::types::{ExprType, Vec3, ZERO};

/// Host hook resolving a variable name, consulted when the environment
/// misses.
pub type VarResolverFn = dyn Fn(&str) -> Option<Arc<dyn ExternalVar>> + Send + Sync;

/// Host hook resolving a function name, consulted before the process-wide
/// registry.
pub type FuncResolverFn = dyn Fn(&str) -> Option<Arc<FuncDef>> + Send + Sync;

/// Prep-pass state threaded through the tree: the diagnostic sink, the
/// host's resolver hooks, the thread-unsafe marker, and the local-slot
/// allocator.
pub struct PrepCtx<'a> {
    pub(crate) errors: &'a mut Vec<Spanned<ExprError>>,
    pub(crate) var_resolver: Option<&'a VarResolverFn>,
    pub(crate) func_resolver: Option<&'a FuncResolverFn>,
    pub(crate) thread_unsafe: &'a mut Option<String>,
    pub(crate) n_locals: &'a mut usize,
}

impl PrepCtx<'_> {
    /// Record a diagnostic against a source range.
    pub fn error(&mut self, span: &Span, error: ExprError) {
        self.errors.push(Spanned::new(error, span.clone()));
    }

    fn alloc_local(&mut self) -> usize {
        let slot = *self.n_locals;
        *self.n_locals += 1;
        slot
    }

    fn mark_thread_unsafe(&mut self, func_name: &str) {
        if self.thread_unsafe.is_none() {
            *self.thread_unsafe = Some(func_name.to_string());
        }
    }
}

/// Mutable evaluation state: the backing storage for local variables,
/// zeroed at the start of every evaluation and indexed by the slots
/// allocated during prep.
pub struct EvalState {
    locals: Vec<Vec3>,
}

impl EvalState {
    pub(crate) fn new() -> Self {
        Self { locals: Vec::new() }
    }

    pub(crate) fn reset(&mut self, n_locals: usize) {
        self.locals.clear();
        self.locals.resize(n_locals, ZERO);
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!x` — logical not, per lane.
    Not,
    /// `-x` — negation, per lane.
    Neg,
    /// `~x` — the `1 - x` inversion, per lane.
    Invert,
}

impl UnaryOp {
    fn describe(self) -> &'static str {
        match self {
            UnaryOp::Not => "not operator",
            UnaryOp::Neg => "negation operator",
            UnaryOp::Invert => "inversion operator",
        }
    }

    fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Not => bool_to(x == 0.0),
            UnaryOp::Neg => -x,
            UnaryOp::Invert => 1.0 - x,
        }
    }
}

/// Comparison operators. `Eq`/`Ne` compare all three lanes after
/// broadcasting; the orderings compare lane 0 only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Binary arithmetic operators, all subject to broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
            ArithOp::Pow => "^",
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Mod => nice_mod(a, b),
            ArithOp::Pow => a.powf(b),
        }
    }
}

/// Floor-mod with the engine's single defined arithmetic exception: a zero
/// divisor yields zero instead of NaN. Every other fault follows IEEE.
fn nice_mod(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        a - (a / b).floor() * b
    }
}

fn bool_to(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn splat(v: &mut Vec3) {
    v[1] = v[0];
    v[2] = v[0];
}

/// A function call site: the callee name, the argument nodes, and the
/// descriptor resolved during prep.
#[derive(Debug)]
pub struct FuncCall {
    pub name: String,
    pub args: Vec<Node>,
    func: Option<Arc<FuncDef>>,
}

impl FuncCall {
    pub fn new(name: impl Into<String>, args: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            args,
            func: None,
        }
    }

    /// Descriptor bound at prep, if resolution succeeded.
    pub fn def(&self) -> Option<&Arc<FuncDef>> {
        self.func.as_ref()
    }

    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    /// Whether argument `i` is a string literal. String arguments are never
    /// evaluated numerically; FUNCX callbacks read them with
    /// [`FuncCall::str_arg`].
    pub fn is_str_arg(&self, i: usize) -> bool {
        matches!(self.args.get(i), Some(node) if matches!(node.kind, NodeKind::Str(_)))
    }

    /// The string literal at argument `i`, or `""` if it is not one.
    pub fn str_arg(&self, i: usize) -> &str {
        match self.args.get(i) {
            Some(Node {
                kind: NodeKind::Str(s),
                ..
            }) => s,
            _ => "",
        }
    }

    /// Evaluate argument `i` to a full 3-wide value, broadcasting lane 0
    /// when the argument is scalar.
    pub fn eval_arg(&self, i: usize, state: &mut EvalState) -> Vec3 {
        let arg = &self.args[i];
        let mut v = ZERO;
        arg.eval(state, &mut v);
        if !arg.is_vec() {
            splat(&mut v);
        }
        v
    }

    /// Evaluate every argument with broadcast applied.
    pub fn eval_args(&self, state: &mut EvalState) -> Vec<Vec3> {
        (0..self.args.len())
            .map(|i| self.eval_arg(i, state))
            .collect()
    }

    /// Prep every argument against a single requested type, recording a
    /// diagnostic per mismatch. Returns true iff all arguments conform.
    /// FUNCX callbacks may reuse this for conventional argument lists.
    pub fn prep_args(
        &mut self,
        wanted: ExprType,
        env: &mut VarEnv<'_>,
        ctx: &mut PrepCtx<'_>,
    ) -> bool {
        let mut ok = true;
        for (i, arg) in self.args.iter_mut().enumerate() {
            let ty = arg.prep(wanted, env, ctx);
            if !ty.is_valid() {
                ok = false;
            } else if !ty.isa(wanted) {
                ok = false;
                let span = arg.span.clone();
                ctx.error(
                    &span,
                    ExprError::ExpectedTypeFrom {
                        expected: wanted,
                        context: format!("operand {i} to {} function", self.name),
                        found: ty,
                    },
                );
            }
        }
        ok
    }

    /// Prep arguments with no type requirement, so a call that already
    /// failed resolution still surfaces the errors inside its arguments.
    fn prep_args_for_errors(&mut self, env: &mut VarEnv<'_>, ctx: &mut PrepCtx<'_>) {
        for arg in &mut self.args {
            arg.prep(ExprType::Any, env, ctx);
        }
    }

    fn prep(
        &mut self,
        span: &Span,
        wanted: ExprType,
        env: &mut VarEnv<'_>,
        ctx: &mut PrepCtx<'_>,
    ) -> ExprType {
        // Host resolver first, then the process-wide registry.
        self.func = ctx
            .func_resolver
            .and_then(|resolve| resolve(&self.name))
            .or_else(|| func::lookup(&self.name));

        let Some(def) = self.func.clone() else {
            ctx.error(span, ExprError::UndefinedFunction(self.name.clone()));
            self.prep_args_for_errors(env, ctx);
            return ExprType::Error;
        };

        let nargs = self.args.len();
        if nargs < def.min_args() {
            ctx.error(span, ExprError::TooFewArgs(self.name.clone()));
            self.prep_args_for_errors(env, ctx);
            return ExprType::Error;
        }
        if def.max_args().is_some_and(|max| nargs > max) {
            ctx.error(span, ExprError::TooManyArgs(self.name.clone()));
            self.prep_args_for_errors(env, ctx);
            return ExprType::Error;
        }

        match def.kind() {
            FuncKind::FuncX(callback) => {
                let callback = callback.clone();
                if !callback.is_thread_safe() {
                    ctx.mark_thread_unsafe(&self.name);
                }
                if callback.prep(self, wanted, env, ctx).is_valid() {
                    def.ret_type()
                } else {
                    ExprType::Error
                }
            }
            _ => {
                let hint = if def.is_scalar_args() {
                    ExprType::FP1
                } else {
                    ExprType::FP3
                };
                if self.prep_args(hint, env, ctx) {
                    def.ret_type()
                } else {
                    ExprType::Error
                }
            }
        }
    }

    fn eval(&self, node: &Node, state: &mut EvalState, out: &mut Vec3) {
        let Some(def) = self.func.as_ref() else {
            *out = ZERO;
            return;
        };

        // FUNCX is a catch-all that does all its own processing.
        if let FuncKind::FuncX(callback) = def.kind() {
            callback.eval(self, state, out);
            return;
        }

        let argv = self.eval_args(state);

        match def.kind() {
            FuncKind::Func1VV(f) => *out = f(&argv[0]),
            FuncKind::Func2VV(f) => *out = f(&argv[0], &argv[1]),
            FuncKind::FuncNVV(f) => *out = f(&argv),
            kind => {
                // A scalar-shaped function under a vector node runs once
                // per lane; otherwise a single call fills lane 0.
                let lanes = if node.is_vec && def.is_scalar_args() {
                    3
                } else {
                    1
                };
                for lane in 0..lanes {
                    out[lane] = match kind {
                        FuncKind::Func0(f) => f(),
                        FuncKind::Func1(f) => f(argv[0][lane]),
                        FuncKind::Func2(f) => f(argv[0][lane], argv[1][lane]),
                        FuncKind::Func3(f) => f(argv[0][lane], argv[1][lane], argv[2][lane]),
                        FuncKind::Func4(f) => {
                            f(argv[0][lane], argv[1][lane], argv[2][lane], argv[3][lane])
                        }
                        FuncKind::Func5(f) => f(
                            argv[0][lane],
                            argv[1][lane],
                            argv[2][lane],
                            argv[3][lane],
                            argv[4][lane],
                        ),
                        FuncKind::Func6(f) => f(
                            argv[0][lane],
                            argv[1][lane],
                            argv[2][lane],
                            argv[3][lane],
                            argv[4][lane],
                            argv[5][lane],
                        ),
                        FuncKind::FuncN(f) => {
                            let packed: Vec<f64> = argv.iter().map(|a| a[lane]).collect();
                            f(&packed)
                        }
                        FuncKind::Func1V(f) => f(&argv[0]),
                        FuncKind::Func2V(f) => f(&argv[0], &argv[1]),
                        FuncKind::FuncNV(f) => f(&argv),
                        FuncKind::Func1VV(_)
                        | FuncKind::Func2VV(_)
                        | FuncKind::FuncNVV(_)
                        | FuncKind::FuncX(_) => unreachable!("handled above"),
                    };
                }
            }
        }
    }
}

/// Every syntactic construct of the language.
///
/// Statement lists (the bodies of blocks and if/else branches) are plain
/// vectors evaluated for their side effects.
#[derive(Debug)]
pub enum NodeKind {
    /// Statements followed by the value-producing expression.
    Block { stmts: Vec<Node>, expr: Box<Node> },
    /// Branching statement; branches hold statements only.
    IfThenElse {
        cond: Box<Node>,
        then_stmts: Vec<Node>,
        else_stmts: Vec<Node>,
    },
    /// `$name = rhs;` — creates or overwrites a local.
    Assign {
        name: String,
        rhs: Box<Node>,
        slot: Option<usize>,
    },
    /// Ternary `cond ? then : otherwise`.
    Cond {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    /// Short-circuit `&&`.
    And { left: Box<Node>, right: Box<Node> },
    /// Short-circuit `||`.
    Or { left: Box<Node>, right: Box<Node> },
    /// `!x`, `-x`, `~x`.
    Unary { op: UnaryOp, operand: Box<Node> },
    /// `== != < <= > >=`.
    Compare {
        op: CmpOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// `+ - * / % ^`.
    Arith {
        op: ArithOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// `v[i]`, index truncated, out-of-range lanes read as zero.
    Subscript { vec: Box<Node>, index: Box<Node> },
    /// `[a, b, c]` — three scalar lanes.
    VecLit { lanes: Box<[Node; 3]> },
    /// Numeric literal.
    Num(f64),
    /// String literal; only meaningful as a function argument.
    Str(String),
    /// `$name`, resolved during prep.
    Var {
        name: String,
        binding: Option<VarBinding>,
    },
    /// `name(args…)`, resolved during prep.
    Func(FuncCall),
}

/// An AST node: the tagged construct plus its source span and the type
/// computed by prep.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    ty: ExprType,
    is_vec: bool,
}

impl Node {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: ExprType::Error,
            is_vec: false,
        }
    }

    /// The type computed by prep; `Error` before prep has run.
    pub fn ty(&self) -> ExprType {
        self.ty
    }

    /// Whether this node produces a vector. Derived from the type.
    pub fn is_vec(&self) -> bool {
        self.is_vec
    }

    /// Type-check this subtree against the requested type.
    ///
    /// Children are prepped in source order; every local failure is
    /// recorded and poisons this node's type, but never stops the walk.
    /// The returned type is also stored on the node.
    pub fn prep(
        &mut self,
        wanted: ExprType,
        env: &mut VarEnv<'_>,
        ctx: &mut PrepCtx<'_>,
    ) -> ExprType {
        let span = self.span.clone();
        let ty = match &mut self.kind {
            NodeKind::Block { stmts, expr } => {
                let mut ok = true;
                for stmt in stmts.iter_mut() {
                    ok &= stmt.prep(ExprType::Any, env, ctx).is_valid();
                }
                let ty = expr.prep(wanted, env, ctx);
                if ok {
                    ty
                } else {
                    ExprType::Error
                }
            }

            NodeKind::IfThenElse {
                cond,
                then_stmts,
                else_stmts,
            } => {
                let mut error = false;

                let cond_ty = cond.prep(ExprType::FP1, env, ctx);
                if !cond_ty.is_valid() {
                    error = true;
                } else if !cond_ty.isa(ExprType::FP1) {
                    error = true;
                    let cond_span = cond.span.clone();
                    ctx.error(
                        &cond_span,
                        ExprError::ExpectedTypeIn {
                            expected: ExprType::FP1,
                            context: "condition expression of if statement".to_string(),
                            found: cond_ty,
                        },
                    );
                }

                let mut then_env = VarEnv::child(env);
                for stmt in then_stmts.iter_mut() {
                    error |= !stmt.prep(ExprType::Any, &mut then_env, ctx).is_valid();
                }

                let mut else_env = VarEnv::child(env);
                for stmt in else_stmts.iter_mut() {
                    error |= !stmt.prep(ExprType::Any, &mut else_env, ctx).is_valid();
                }

                if env.changes_match(&then_env, &else_env) {
                    let then_frame = then_env.into_frame();
                    let else_frame = else_env.into_frame();

                    // Publish the then branch's references. Every matching
                    // assignment in the else branch is rewritten onto the
                    // same slots, so a later read observes whichever branch
                    // actually ran.
                    let mut remap = HashMap::new();
                    for (name, else_binding) in &else_frame {
                        if let (
                            VarBinding::Local { slot: from, .. },
                            Some(VarBinding::Local { slot: to, .. }),
                        ) = (else_binding, then_frame.get(name))
                        {
                            if from != to {
                                remap.insert(*from, *to);
                            }
                        }
                    }
                    if !remap.is_empty() {
                        for stmt in else_stmts.iter_mut() {
                            stmt.remap_local_slots(&remap);
                        }
                    }
                    env.adopt(then_frame);
                } else {
                    error = true;
                    ctx.error(&span, ExprError::ScopeMismatch);
                }

                if error {
                    ExprType::Error
                } else {
                    ExprType::None
                }
            }

            NodeKind::Assign { name, rhs, slot } => {
                let rhs_ty = rhs.prep(ExprType::Any, env, ctx);
                let allocated = ctx.alloc_local();
                *slot = Some(allocated);
                env.add(
                    name,
                    VarBinding::Local {
                        slot: allocated,
                        ty: rhs_ty,
                    },
                );
                if rhs_ty.is_valid() {
                    ExprType::None
                } else {
                    ExprType::Error
                }
            }

            NodeKind::Cond {
                cond,
                then,
                otherwise,
            } => {
                let mut error = false;

                let cond_ty = cond.prep(ExprType::FP1, env, ctx);
                if !cond_ty.is_valid() {
                    error = true;
                } else if !cond_ty.isa(ExprType::FP1) {
                    error = true;
                    let cond_span = cond.span.clone();
                    ctx.error(
                        &cond_span,
                        ExprError::ExpectedTypeIn {
                            expected: ExprType::FP1,
                            context: "condition of ternary conditional expression".to_string(),
                            found: cond_ty,
                        },
                    );
                }

                let then_ty = then.prep(wanted, env, ctx);
                let else_ty = otherwise.prep(wanted, env, ctx);

                if !then_ty.is_valid() || !else_ty.is_valid() {
                    error = true;
                } else {
                    if !then_ty.isa(wanted) {
                        error = true;
                        let then_span = then.span.clone();
                        ctx.error(
                            &then_span,
                            ExprError::ExpectedTypeFrom {
                                expected: wanted,
                                context: "then branch of ternary conditional expression"
                                    .to_string(),
                                found: then_ty,
                            },
                        );
                    }
                    if !else_ty.isa(wanted) {
                        error = true;
                        let else_span = otherwise.span.clone();
                        ctx.error(
                            &else_span,
                            ExprError::ExpectedTypeFrom {
                                expected: wanted,
                                context: "else branch of ternary conditional expression"
                                    .to_string(),
                                found: else_ty,
                            },
                        );
                    }
                }

                if error {
                    ExprType::Error
                } else {
                    then_ty
                }
            }

            NodeKind::And { left, right } => prep_logical(left, right, "and", env, ctx),

            NodeKind::Or { left, right } => prep_logical(left, right, "or", env, ctx),

            NodeKind::Unary { op, operand } => {
                let ty = operand.prep(wanted, env, ctx);
                if ty.is_valid() && !ty.isa(ExprType::Numeric) {
                    let operand_span = operand.span.clone();
                    ctx.error(
                        &operand_span,
                        ExprError::ExpectedTypeFrom {
                            expected: ExprType::Numeric,
                            context: format!("operand to {}", op.describe()),
                            found: ty,
                        },
                    );
                    ExprType::Error
                } else {
                    ty
                }
            }

            NodeKind::Compare { op, left, right } => {
                let op = *op;
                match prep_numeric_pair(left, right, op.symbol(), env, ctx) {
                    Some(_) => ExprType::FP1,
                    None => ExprType::Error,
                }
            }

            NodeKind::Arith { op, left, right } => {
                let op = *op;
                match prep_numeric_pair(left, right, op.symbol(), env, ctx) {
                    Some((left_ty, right_ty)) => {
                        if left_ty.is_fp1() {
                            right_ty
                        } else {
                            left_ty
                        }
                    }
                    None => ExprType::Error,
                }
            }

            NodeKind::Subscript { vec, index } => {
                let mut error = false;

                let vec_ty = vec.prep(ExprType::Numeric, env, ctx);
                if !vec_ty.is_valid() {
                    error = true;
                } else if !vec_ty.isa(ExprType::Numeric) {
                    error = true;
                    let vec_span = vec.span.clone();
                    ctx.error(
                        &vec_span,
                        ExprError::ExpectedTypeFrom {
                            expected: ExprType::Numeric,
                            context: "vector operand of subscript operator".to_string(),
                            found: vec_ty,
                        },
                    );
                }

                let index_ty = index.prep(ExprType::FP1, env, ctx);
                if !index_ty.is_valid() {
                    error = true;
                } else if !index_ty.isa(ExprType::FP1) {
                    error = true;
                    let index_span = index.span.clone();
                    ctx.error(
                        &index_span,
                        ExprError::ExpectedTypeFrom {
                            expected: ExprType::FP1,
                            context: "subscript operand of subscript operator".to_string(),
                            found: index_ty,
                        },
                    );
                }

                if error {
                    ExprType::Error
                } else {
                    ExprType::FP1
                }
            }

            NodeKind::VecLit { lanes } => {
                let mut error = false;
                for (i, lane) in lanes.iter_mut().enumerate() {
                    let lane_ty = lane.prep(ExprType::FP1, env, ctx);
                    if !lane_ty.is_valid() {
                        error = true;
                    } else if !lane_ty.isa(ExprType::FP1) {
                        error = true;
                        let lane_span = lane.span.clone();
                        ctx.error(
                            &lane_span,
                            ExprError::ExpectedTypeIn {
                                expected: ExprType::FP1,
                                context: format!("position {} of vector literal", i + 1),
                                found: lane_ty,
                            },
                        );
                    }
                }
                if error {
                    ExprType::Error
                } else {
                    ExprType::FP3
                }
            }

            NodeKind::Num(_) => ExprType::FP1,

            NodeKind::Str(_) => ExprType::Str,

            NodeKind::Var { name, binding } => {
                let resolved = env.find(name).cloned().or_else(|| {
                    ctx.var_resolver
                        .and_then(|resolve| resolve(name))
                        .map(VarBinding::External)
                });
                match resolved {
                    Some(found) => {
                        let ty = found.value_type();
                        *binding = Some(found);
                        ty
                    }
                    None => {
                        ctx.error(&span, ExprError::UndefinedVariable(name.clone()));
                        ExprType::Error
                    }
                }
            }

            NodeKind::Func(call) => call.prep(&span, wanted, env, ctx),
        };

        self.ty = ty;
        self.is_vec = ty.is_vec();
        ty
    }

    /// Evaluate the prepped subtree into `out`.
    pub fn eval(&self, state: &mut EvalState, out: &mut Vec3) {
        match &self.kind {
            NodeKind::Block { stmts, expr } => {
                let mut scratch = ZERO;
                for stmt in stmts {
                    stmt.eval(state, &mut scratch);
                }
                expr.eval(state, out);
            }

            NodeKind::IfThenElse {
                cond,
                then_stmts,
                else_stmts,
            } => {
                let mut chosen = ZERO;
                cond.eval(state, &mut chosen);
                let branch = if chosen[0] != 0.0 {
                    then_stmts
                } else {
                    else_stmts
                };
                let mut scratch = ZERO;
                for stmt in branch {
                    stmt.eval(state, &mut scratch);
                }
                *out = ZERO;
            }

            NodeKind::Assign { rhs, slot, .. } => {
                if let Some(slot) = slot {
                    let mut value = ZERO;
                    rhs.eval(state, &mut value);
                    state.locals[*slot] = value;
                }
                *out = ZERO;
            }

            NodeKind::Cond {
                cond,
                then,
                otherwise,
            } => {
                let mut picked = ZERO;
                cond.eval(state, &mut picked);
                let branch = if picked[0] != 0.0 { then } else { otherwise };
                branch.eval(state, out);
                if self.is_vec && !branch.is_vec() {
                    splat(out);
                }
            }

            NodeKind::And { left, right } => {
                let mut a = ZERO;
                left.eval(state, &mut a);
                if a[0] == 0.0 {
                    out[0] = 0.0;
                } else {
                    let mut b = ZERO;
                    right.eval(state, &mut b);
                    out[0] = bool_to(b[0] != 0.0);
                }
            }

            NodeKind::Or { left, right } => {
                let mut a = ZERO;
                left.eval(state, &mut a);
                if a[0] != 0.0 {
                    out[0] = 1.0;
                } else {
                    let mut b = ZERO;
                    right.eval(state, &mut b);
                    out[0] = bool_to(b[0] != 0.0);
                }
            }

            NodeKind::Unary { op, operand } => {
                let mut a = ZERO;
                operand.eval(state, &mut a);
                out[0] = op.apply(a[0]);
                if self.is_vec {
                    out[1] = op.apply(a[1]);
                    out[2] = op.apply(a[2]);
                }
            }

            NodeKind::Compare { op, left, right } => {
                let mut a = ZERO;
                let mut b = ZERO;
                left.eval(state, &mut a);
                right.eval(state, &mut b);
                out[0] = match op {
                    CmpOp::Eq | CmpOp::Ne => {
                        if !left.is_vec() {
                            splat(&mut a);
                        }
                        if !right.is_vec() {
                            splat(&mut b);
                        }
                        let all_equal = a[0] == b[0] && a[1] == b[1] && a[2] == b[2];
                        bool_to(if *op == CmpOp::Eq { all_equal } else { !all_equal })
                    }
                    CmpOp::Lt => bool_to(a[0] < b[0]),
                    CmpOp::Le => bool_to(a[0] <= b[0]),
                    CmpOp::Gt => bool_to(a[0] > b[0]),
                    CmpOp::Ge => bool_to(a[0] >= b[0]),
                };
            }

            NodeKind::Arith { op, left, right } => {
                let mut a = ZERO;
                let mut b = ZERO;
                left.eval(state, &mut a);
                right.eval(state, &mut b);
                if !self.is_vec {
                    out[0] = op.apply(a[0], b[0]);
                } else {
                    if !left.is_vec() {
                        splat(&mut a);
                    }
                    if !right.is_vec() {
                        splat(&mut b);
                    }
                    for lane in 0..3 {
                        out[lane] = op.apply(a[lane], b[lane]);
                    }
                }
            }

            NodeKind::Subscript { vec, index } => {
                let mut a = ZERO;
                let mut b = ZERO;
                vec.eval(state, &mut a);
                index.eval(state, &mut b);
                let i = b[0] as i64;
                out[0] = if vec.is_vec() {
                    match i {
                        0 => a[0],
                        1 => a[1],
                        2 => a[2],
                        _ => 0.0,
                    }
                } else {
                    // a scalar reads as itself on any in-range lane
                    match i {
                        0..=2 => a[0],
                        _ => 0.0,
                    }
                };
            }

            NodeKind::VecLit { lanes } => {
                if self.is_vec {
                    let mut v = ZERO;
                    for lane in 0..3 {
                        lanes[lane].eval(state, &mut v);
                        out[lane] = v[0];
                    }
                } else {
                    lanes[0].eval(state, out);
                }
            }

            NodeKind::Num(value) => out[0] = *value,

            NodeKind::Str(_) => *out = ZERO,

            NodeKind::Var { binding, .. } => match binding {
                Some(VarBinding::External(var)) => var.eval(self, out),
                Some(VarBinding::Local { slot, .. }) => *out = state.locals[*slot],
                None => *out = ZERO,
            },

            NodeKind::Func(call) => call.eval(self, state, out),
        }
    }

    /// Rewrite local-slot references according to `map`. Used when an
    /// if/else publishes its assignments: the else branch is redirected
    /// onto the then branch's storage so both write the published slot.
    fn remap_local_slots(&mut self, map: &HashMap<usize, usize>) {
        match &mut self.kind {
            NodeKind::Block { stmts, expr } => {
                for stmt in stmts {
                    stmt.remap_local_slots(map);
                }
                expr.remap_local_slots(map);
            }
            NodeKind::IfThenElse {
                cond,
                then_stmts,
                else_stmts,
            } => {
                cond.remap_local_slots(map);
                for stmt in then_stmts.iter_mut().chain(else_stmts.iter_mut()) {
                    stmt.remap_local_slots(map);
                }
            }
            NodeKind::Assign { rhs, slot, .. } => {
                rhs.remap_local_slots(map);
                if let Some(slot) = slot {
                    if let Some(to) = map.get(slot) {
                        *slot = *to;
                    }
                }
            }
            NodeKind::Cond {
                cond,
                then,
                otherwise,
            } => {
                cond.remap_local_slots(map);
                then.remap_local_slots(map);
                otherwise.remap_local_slots(map);
            }
            NodeKind::And { left, right }
            | NodeKind::Or { left, right }
            | NodeKind::Compare { left, right, .. }
            | NodeKind::Arith { left, right, .. } => {
                left.remap_local_slots(map);
                right.remap_local_slots(map);
            }
            NodeKind::Unary { operand, .. } => operand.remap_local_slots(map),
            NodeKind::Subscript { vec, index } => {
                vec.remap_local_slots(map);
                index.remap_local_slots(map);
            }
            NodeKind::VecLit { lanes } => {
                for lane in lanes.iter_mut() {
                    lane.remap_local_slots(map);
                }
            }
            NodeKind::Var { binding, .. } => {
                if let Some(VarBinding::Local { slot, .. }) = binding {
                    if let Some(to) = map.get(slot) {
                        *slot = *to;
                    }
                }
            }
            NodeKind::Func(call) => {
                for arg in &mut call.args {
                    arg.remap_local_slots(map);
                }
            }
            NodeKind::Num(_) | NodeKind::Str(_) => {}
        }
    }
}

/// Shared prep rule for `&&` and `||`: both operands must be scalar.
fn prep_logical(
    left: &mut Node,
    right: &mut Node,
    which: &'static str,
    env: &mut VarEnv<'_>,
    ctx: &mut PrepCtx<'_>,
) -> ExprType {
    let mut error = false;
    for (operand, position) in [(left, "first"), (right, "second")] {
        let ty = operand.prep(ExprType::FP1, env, ctx);
        if !ty.is_valid() {
            error = true;
        } else if !ty.isa(ExprType::FP1) {
            error = true;
            let span = operand.span.clone();
            ctx.error(
                &span,
                ExprError::ExpectedTypeFrom {
                    expected: ExprType::FP1,
                    context: format!("{position} operand of {which} expression"),
                    found: ty,
                },
            );
        }
    }
    if error {
        ExprType::Error
    } else {
        ExprType::FP1
    }
}

/// Shared prep rule for the comparison and arithmetic operators: both
/// operands must be numeric and broadcast-compatible. Returns the operand
/// types on success.
fn prep_numeric_pair(
    left: &mut Node,
    right: &mut Node,
    op_symbol: &'static str,
    env: &mut VarEnv<'_>,
    ctx: &mut PrepCtx<'_>,
) -> Option<(ExprType, ExprType)> {
    let mut error = false;

    let left_ty = left.prep(ExprType::Numeric, env, ctx);
    if !left_ty.is_valid() {
        error = true;
    } else if !left_ty.isa(ExprType::Numeric) {
        error = true;
        let span = left.span.clone();
        ctx.error(
            &span,
            ExprError::ExpectedTypeFrom {
                expected: ExprType::Numeric,
                context: format!("first operand to {op_symbol} operator"),
                found: left_ty,
            },
        );
    }

    let right_ty = right.prep(ExprType::Numeric, env, ctx);
    if !right_ty.is_valid() {
        error = true;
    } else if !right_ty.isa(ExprType::Numeric) {
        error = true;
        let span = right.span.clone();
        ctx.error(
            &span,
            ExprError::ExpectedTypeFrom {
                expected: ExprType::Numeric,
                context: format!("second operand to {op_symbol} operator"),
                found: right_ty,
            },
        );
    }

    if left_ty.is_valid() && right_ty.is_valid() && !left_ty.compatible_num(right_ty) {
        error = true;
        let span = left.span.start..right.span.end;
        ctx.error(
            &span,
            ExprError::IncompatibleOperands {
                left: left_ty,
                right: right_ty,
                op: op_symbol,
            },
        );
    }

    if error {
        None
    } else {
        Some((left_ty, right_ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prep_root(
        node: &mut Node,
        wanted: ExprType,
    ) -> (ExprType, Vec<Spanned<ExprError>>, usize) {
        let mut errors = Vec::new();
        let mut thread_unsafe = None;
        let mut n_locals = 0;
        let mut env = VarEnv::new();
        let ty = {
            let mut ctx = PrepCtx {
                errors: &mut errors,
                var_resolver: None,
                func_resolver: None,
                thread_unsafe: &mut thread_unsafe,
                n_locals: &mut n_locals,
            };
            node.prep(wanted, &mut env, &mut ctx)
        };
        (ty, errors, n_locals)
    }

    fn eval_root(node: &Node, n_locals: usize) -> Vec3 {
        let mut state = EvalState::new();
        state.reset(n_locals);
        let mut out = ZERO;
        node.eval(&mut state, &mut out);
        out
    }

    fn num(value: f64) -> Node {
        Node::new(NodeKind::Num(value), 0..0)
    }

    fn vec_lit(a: f64, b: f64, c: f64) -> Node {
        Node::new(
            NodeKind::VecLit {
                lanes: Box::new([num(a), num(b), num(c)]),
            },
            0..0,
        )
    }

    fn arith(op: ArithOp, left: Node, right: Node) -> Node {
        Node::new(
            NodeKind::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            0..0,
        )
    }

    fn assign(name: &str, rhs: Node) -> Node {
        Node::new(
            NodeKind::Assign {
                name: name.to_string(),
                rhs: Box::new(rhs),
                slot: None,
            },
            0..0,
        )
    }

    fn var(name: &str) -> Node {
        Node::new(
            NodeKind::Var {
                name: name.to_string(),
                binding: None,
            },
            0..0,
        )
    }

    #[test]
    fn nice_mod_is_floor_mod_with_a_zero_guard() {
        assert_eq!(nice_mod(7.0, 3.0), 1.0);
        assert_eq!(nice_mod(-1.0, 3.0), 2.0);
        assert_eq!(nice_mod(7.0, 0.0), 0.0);
    }

    #[test]
    fn num_preps_scalar_and_evals_its_literal() {
        let mut node = num(4.25);
        let (ty, errors, _) = prep_root(&mut node, ExprType::Any);
        assert_eq!(ty, ExprType::FP1);
        assert!(errors.is_empty());
        assert_eq!(eval_root(&node, 0)[0], 4.25);
    }

    #[test]
    fn scalar_vector_broadcast_matches_explicit_splat() {
        for op in [
            ArithOp::Add,
            ArithOp::Sub,
            ArithOp::Mul,
            ArithOp::Div,
            ArithOp::Mod,
            ArithOp::Pow,
        ] {
            let mut implicit = arith(op, num(2.0), vec_lit(1.0, 2.0, 3.0));
            let mut explicit = arith(op, vec_lit(2.0, 2.0, 2.0), vec_lit(1.0, 2.0, 3.0));
            let (ty, errors, _) = prep_root(&mut implicit, ExprType::Any);
            assert_eq!(ty, ExprType::FP3, "{op:?}");
            assert!(errors.is_empty());
            prep_root(&mut explicit, ExprType::Any);
            assert_eq!(
                eval_root(&implicit, 0),
                eval_root(&explicit, 0),
                "broadcast law broken for {op:?}"
            );
        }
    }

    #[test]
    fn subscript_clamps_out_of_range_lanes_to_zero() {
        let cases = [(0.0, 1.0), (1.0, 2.0), (2.9, 3.0), (3.0, 0.0), (-1.0, 0.0)];
        for (index, expected) in cases {
            let mut node = Node::new(
                NodeKind::Subscript {
                    vec: Box::new(vec_lit(1.0, 2.0, 3.0)),
                    index: Box::new(num(index)),
                },
                0..0,
            );
            let (ty, errors, _) = prep_root(&mut node, ExprType::Any);
            assert_eq!(ty, ExprType::FP1);
            assert!(errors.is_empty());
            assert_eq!(eval_root(&node, 0)[0], expected, "index {index}");
        }
    }

    #[test]
    fn scalar_subscript_reads_itself_on_any_lane() {
        for (index, expected) in [(0.0, 7.0), (2.0, 7.0), (3.0, 0.0)] {
            let mut node = Node::new(
                NodeKind::Subscript {
                    vec: Box::new(num(7.0)),
                    index: Box::new(num(index)),
                },
                0..0,
            );
            prep_root(&mut node, ExprType::Any);
            assert_eq!(eval_root(&node, 0)[0], expected, "index {index}");
        }
    }

    #[test]
    fn equality_compares_every_lane() {
        let mut equal = Node::new(
            NodeKind::Compare {
                op: CmpOp::Eq,
                left: Box::new(vec_lit(1.0, 2.0, 3.0)),
                right: Box::new(vec_lit(1.0, 2.0, 4.0)),
            },
            0..0,
        );
        let (ty, errors, _) = prep_root(&mut equal, ExprType::Any);
        assert_eq!(ty, ExprType::FP1);
        assert!(errors.is_empty());
        assert_eq!(eval_root(&equal, 0)[0], 0.0);

        let mut not_equal = Node::new(
            NodeKind::Compare {
                op: CmpOp::Ne,
                left: Box::new(vec_lit(1.0, 2.0, 3.0)),
                right: Box::new(vec_lit(1.0, 2.0, 4.0)),
            },
            0..0,
        );
        prep_root(&mut not_equal, ExprType::Any);
        assert_eq!(eval_root(&not_equal, 0)[0], 1.0);
    }

    #[test]
    fn orderings_compare_lane_zero_only() {
        let mut node = Node::new(
            NodeKind::Compare {
                op: CmpOp::Lt,
                left: Box::new(vec_lit(1.0, 9.0, 9.0)),
                right: Box::new(vec_lit(2.0, 0.0, 0.0)),
            },
            0..0,
        );
        prep_root(&mut node, ExprType::Any);
        assert_eq!(eval_root(&node, 0)[0], 1.0);
    }

    #[test]
    fn string_operands_are_rejected_with_a_typed_message() {
        let mut node = arith(
            ArithOp::Add,
            Node::new(NodeKind::Str("oops".to_string()), 0..0),
            num(1.0),
        );
        let (ty, errors, _) = prep_root(&mut node, ExprType::Any);
        assert_eq!(ty, ExprType::Error);
        assert_eq!(
            errors[0].node.to_string(),
            "Expected Numeric type from first operand to + operator but found String"
        );
    }

    #[test]
    fn negation_under_a_vector_covers_all_lanes() {
        let mut node = Node::new(
            NodeKind::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(vec_lit(1.0, -2.0, 3.0)),
            },
            0..0,
        );
        let (ty, errors, _) = prep_root(&mut node, ExprType::Any);
        assert_eq!(ty, ExprType::FP3);
        assert!(errors.is_empty());
        assert_eq!(eval_root(&node, 0), [-1.0, 2.0, -3.0]);
    }

    #[test]
    fn lopsided_branch_assignments_fail_the_scope_match() {
        let mut node = Node::new(
            NodeKind::IfThenElse {
                cond: Box::new(num(1.0)),
                then_stmts: vec![assign("x", num(5.0))],
                else_stmts: vec![],
            },
            0..0,
        );
        let (ty, errors, _) = prep_root(&mut node, ExprType::Any);
        assert_eq!(ty, ExprType::Error);
        assert!(errors
            .iter()
            .any(|e| matches!(e.node, ExprError::ScopeMismatch)));
    }

    #[test]
    fn matched_branches_publish_their_locals() {
        for (cond, expected) in [(1.0, 5.0), (0.0, 7.0)] {
            let mut node = Node::new(
                NodeKind::Block {
                    stmts: vec![Node::new(
                        NodeKind::IfThenElse {
                            cond: Box::new(num(cond)),
                            then_stmts: vec![assign("x", num(5.0))],
                            else_stmts: vec![assign("x", num(7.0))],
                        },
                        0..0,
                    )],
                    expr: Box::new(var("x")),
                },
                0..0,
            );
            let (ty, errors, n_locals) = prep_root(&mut node, ExprType::Any);
            assert_eq!(ty, ExprType::FP1, "{errors:?}");
            assert!(errors.is_empty());
            // both branches write the published slot
            assert_eq!(eval_root(&node, n_locals)[0], expected);
        }
    }
}
