//! # vexel-expr
//!
//! An embeddable expression-language engine for procedural content:
//! shaders, animation rigs, point clouds. End users author short
//! arithmetic/vector expressions such as `$P * noise($P * 4) + [1, 0, 0]`;
//! the host binds external variables and functions and evaluates the
//! expression — typically millions of times — on varying inputs.
//!
//! The engine is built around a typed AST with a two-pass lifecycle:
//!
//! 1. **prep** — after parsing, one pass resolves every variable and
//!    function reference against the lexical environment, the host's
//!    resolver hooks, and the process-wide [function registry](func),
//!    computes a type for every node, and collects diagnostics. Errors are
//!    collected, not thrown; one pass reports all of them.
//! 2. **eval** — a read-only walk producing a 3-wide value, with scalars
//!    broadcast across vector lanes wherever the two meet.
//!
//! ```
//! use vexel_expr::Expression;
//!
//! let mut e = Expression::new("$x = 3; [$x, $x, $x] * [1, 2, 3]");
//! assert!(e.is_valid());
//! assert_eq!(e.evaluate(), [3.0, 6.0, 9.0]);
//! ```
//!
//! One [`Expression`] is a single-threaded unit; distinct instances are
//! independent. Hosts evaluating a single expression from several threads
//! must consult [`Expression::is_thread_safe`] and serialize when a bound
//! FUNCX callback demands it.

pub mod env;
pub mod error;
pub mod expr;
pub mod func;
pub mod lexer;
pub mod node;
pub mod parser;
pub mod types;

pub use env::{ExternalVar, VarBinding, VarEnv};
pub use error::{ExprError, Spanned};
pub use expr::Expression;
pub use func::{FuncDef, FuncKind, FuncX};
pub use node::{EvalState, FuncCall, Node, NodeKind, PrepCtx};
pub use types::{ExprType, Vec3, ZERO};
