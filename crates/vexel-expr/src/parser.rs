//! Hand-written recursive descent parser.
//!
//! The grammar is small: an optional list of statements (assignments and
//! if/then/else) followed by the value-producing expression. Binary
//! operators are parsed by precedence climbing, loosest first:
//! `?:`, `||`, `&&`, `== !=`, `< <= > >=`, `+ -`, `* / %`, unary, `^`
//! (right-associative, binding tighter than unary minus).

use logos::Span;
use thiserror::Error;

use crate::error::Spanned;
use crate::lexer::{lex, Token};
use crate::node::{ArithOp, CmpOp, FuncCall, Node, NodeKind, UnaryOp};

/// A syntax error with the byte range it was detected at.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Parse source text into an untyped AST, ready for the prep pass.
pub fn parse(source: &str) -> Result<Node, ParseError> {
    let tokens = lex(source).map_err(|err| ParseError::new(err.to_string(), err.span.clone()))?;
    Parser {
        tokens,
        pos: 0,
        end: source.len(),
    }
    .parse_program()
}

struct Parser<'src> {
    tokens: Vec<Spanned<Token<'src>>>,
    pos: usize,
    end: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<Token<'src>> {
        self.tokens.get(self.pos).map(|t| t.node)
    }

    fn peek2(&self) -> Option<Token<'src>> {
        self.tokens.get(self.pos + 1).map(|t| t.node)
    }

    /// Span of the current token, or the empty range at end of input.
    fn here(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span.clone())
            .unwrap_or(self.end..self.end)
    }

    fn bump(&mut self) -> Option<Spanned<Token<'src>>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: Token<'src>) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token<'src>, what: &str) -> Result<Span, ParseError> {
        if self.peek() == Some(token) {
            let span = self.here();
            self.pos += 1;
            Ok(span)
        } else {
            Err(ParseError::new(format!("expected {what}"), self.here()))
        }
    }

    fn parse_program(mut self) -> Result<Node, ParseError> {
        let start = self.here().start;
        let stmts = self.parse_stmts()?;
        let expr = self.parse_expr()?;

        if self.peek().is_some() {
            return Err(ParseError::new(
                "unexpected input after expression",
                self.here(),
            ));
        }

        if stmts.is_empty() {
            Ok(expr)
        } else {
            let span = start..expr.span.end;
            Ok(Node::new(
                NodeKind::Block {
                    stmts,
                    expr: Box::new(expr),
                },
                span,
            ))
        }
    }

    /// Statements run until the lookahead is neither an `if` nor a
    /// `$name =` assignment; whatever follows is the block's expression
    /// (or the closing brace of the enclosing branch).
    fn parse_stmts(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            match (self.peek(), self.peek2()) {
                (Some(Token::If), _) => stmts.push(self.parse_if()?),
                (Some(Token::Var(_)), Some(Token::Assign)) => stmts.push(self.parse_assign()?),
                _ => break,
            }
        }
        Ok(stmts)
    }

    fn parse_assign(&mut self) -> Result<Node, ParseError> {
        let start = self.here();
        let Some(Spanned {
            node: Token::Var(name),
            ..
        }) = self.bump()
        else {
            return Err(ParseError::new("expected variable", start));
        };
        self.expect(Token::Assign, "'=' in assignment")?;
        let rhs = self.parse_expr()?;
        let semi = self.expect(Token::Semi, "';' after assignment")?;

        Ok(Node::new(
            NodeKind::Assign {
                name: name.to_string(),
                rhs: Box::new(rhs),
                slot: None,
            },
            start.start..semi.end,
        ))
    }

    fn parse_if(&mut self) -> Result<Node, ParseError> {
        let if_span = self.expect(Token::If, "'if'")?;
        self.expect(Token::ParenOpen, "'(' after if")?;
        let cond = self.parse_expr()?;
        self.expect(Token::ParenClose, "')' after if condition")?;

        self.expect(Token::BraceOpen, "'{' to open if branch")?;
        let then_stmts = self.parse_stmts()?;
        let close = self.expect(Token::BraceClose, "'}' to close if branch")?;

        let mut else_stmts = Vec::new();
        let mut end = close.end;
        if self.eat(Token::Else) {
            if self.peek() == Some(Token::If) {
                let nested = self.parse_if()?;
                end = nested.span.end;
                else_stmts.push(nested);
            } else {
                self.expect(Token::BraceOpen, "'{' to open else branch")?;
                else_stmts = self.parse_stmts()?;
                let close = self.expect(Token::BraceClose, "'}' to close else branch")?;
                end = close.end;
            }
        }

        Ok(Node::new(
            NodeKind::IfThenElse {
                cond: Box::new(cond),
                then_stmts,
                else_stmts,
            },
            if_span.start..end,
        ))
    }

    fn parse_expr(&mut self) -> Result<Node, ParseError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Node, ParseError> {
        let cond = self.parse_or()?;
        if !self.eat(Token::Question) {
            return Ok(cond);
        }
        let then = self.parse_expr()?;
        self.expect(Token::Colon, "':' in conditional expression")?;
        let otherwise = self.parse_ternary()?;
        let span = cond.span.start..otherwise.span.end;
        Ok(Node::new(
            NodeKind::Cond {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            span,
        ))
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(Token::OrOr) {
            let right = self.parse_and()?;
            let span = left.span.start..right.span.end;
            left = Node::new(
                NodeKind::Or {
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_equality()?;
        while self.eat(Token::AndAnd) {
            let right = self.parse_equality()?;
            let span = left.span.start..right.span.end;
            left = Node::new(
                NodeKind::And {
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => CmpOp::Eq,
                Some(Token::NotEq) => CmpOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_relational()?;
            let span = left.span.start..right.span.end;
            left = Node::new(
                NodeKind::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Less) => CmpOp::Lt,
                Some(Token::LessEq) => CmpOp::Le,
                Some(Token::Greater) => CmpOp::Gt,
                Some(Token::GreaterEq) => CmpOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            let span = left.span.start..right.span.end;
            left = Node::new(
                NodeKind::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            let span = left.span.start..right.span.end;
            left = Node::new(
                NodeKind::Arith {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::Percent) => ArithOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            let span = left.span.start..right.span.end;
            left = Node::new(
                NodeKind::Arith {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        let op = match self.peek() {
            Some(Token::Bang) => Some(UnaryOp::Not),
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Tilde) => Some(UnaryOp::Invert),
            Some(Token::Plus) => {
                // unary plus is a no-op
                self.pos += 1;
                return self.parse_unary();
            }
            _ => None,
        };
        match op {
            Some(op) => {
                let op_span = self.here();
                self.pos += 1;
                let operand = self.parse_unary()?;
                let span = op_span.start..operand.span.end;
                Ok(Node::new(
                    NodeKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            None => self.parse_power(),
        }
    }

    /// `^` binds tighter than unary minus and associates to the right:
    /// `-2^2` is `-(2^2)` and `2^3^2` is `2^(3^2)`.
    fn parse_power(&mut self) -> Result<Node, ParseError> {
        let base = self.parse_postfix()?;
        if !self.eat(Token::Caret) {
            return Ok(base);
        }
        let exponent = self.parse_unary()?;
        let span = base.span.start..exponent.span.end;
        Ok(Node::new(
            NodeKind::Arith {
                op: ArithOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_primary()?;
        while self.eat(Token::BracketOpen) {
            let index = self.parse_expr()?;
            let close = self.expect(Token::BracketClose, "']' to close subscript")?;
            let span = node.span.start..close.end;
            node = Node::new(
                NodeKind::Subscript {
                    vec: Box::new(node),
                    index: Box::new(index),
                },
                span,
            );
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let Some(Spanned { node: token, span }) = self.bump() else {
            return Err(ParseError::new("unexpected end of expression", self.here()));
        };

        match token {
            Token::Num(text) => {
                let value: f64 = text
                    .parse()
                    .map_err(|_| ParseError::new("malformed number", span.clone()))?;
                Ok(Node::new(NodeKind::Num(value), span))
            }

            Token::Str(text) => Ok(Node::new(NodeKind::Str(text.to_string()), span)),

            Token::Var(name) => Ok(Node::new(
                NodeKind::Var {
                    name: name.to_string(),
                    binding: None,
                },
                span,
            )),

            Token::Ident(name) => {
                self.expect(Token::ParenOpen, "'(' after function name")?;
                let mut args = Vec::new();
                if self.peek() != Some(Token::ParenClose) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(Token::Comma) {
                            break;
                        }
                    }
                }
                let close = self.expect(Token::ParenClose, "')' to close function call")?;
                Ok(Node::new(
                    NodeKind::Func(FuncCall::new(name, args)),
                    span.start..close.end,
                ))
            }

            Token::ParenOpen => {
                let inner = self.parse_expr()?;
                self.expect(Token::ParenClose, "')' to close parenthesized expression")?;
                Ok(inner)
            }

            Token::BracketOpen => {
                let a = self.parse_expr()?;
                self.expect(Token::Comma, "',' in vector literal")?;
                let b = self.parse_expr()?;
                self.expect(Token::Comma, "',' in vector literal")?;
                let c = self.parse_expr()?;
                let close = self.expect(Token::BracketClose, "']' to close vector literal")?;
                Ok(Node::new(
                    NodeKind::VecLit {
                        lanes: Box::new([a, b, c]),
                    },
                    span.start..close.end,
                ))
            }

            _ => Err(ParseError::new("unexpected token in expression", span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literals_and_vectors() {
        let node = parse("[1, 2, 3]").unwrap();
        assert!(matches!(node.kind, NodeKind::VecLit { .. }));

        let node = parse("2.5e2").unwrap();
        assert!(matches!(node.kind, NodeKind::Num(v) if v == 250.0));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let node = parse("1 + 2 * 3").unwrap();
        let NodeKind::Arith { op, right, .. } = node.kind else {
            panic!("expected arithmetic node");
        };
        assert_eq!(op, ArithOp::Add);
        assert!(matches!(
            right.kind,
            NodeKind::Arith {
                op: ArithOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let node = parse("-2^2").unwrap();
        let NodeKind::Unary { op, operand } = node.kind else {
            panic!("expected unary node");
        };
        assert_eq!(op, UnaryOp::Neg);
        assert!(matches!(
            operand.kind,
            NodeKind::Arith {
                op: ArithOp::Pow,
                ..
            }
        ));
    }

    #[test]
    fn power_is_right_associative() {
        let node = parse("2^3^2").unwrap();
        let NodeKind::Arith { op, right, .. } = node.kind else {
            panic!("expected arithmetic node");
        };
        assert_eq!(op, ArithOp::Pow);
        assert!(matches!(
            right.kind,
            NodeKind::Arith {
                op: ArithOp::Pow,
                ..
            }
        ));
    }

    #[test]
    fn statements_wrap_into_a_block() {
        let node = parse("$x = 1; $y = 2; $x + $y").unwrap();
        let NodeKind::Block { stmts, expr } = node.kind else {
            panic!("expected block node");
        };
        assert_eq!(stmts.len(), 2);
        assert!(matches!(expr.kind, NodeKind::Arith { .. }));
    }

    #[test]
    fn if_else_chains_nest_in_the_else_branch() {
        let node = parse("if (1) { $x = 1; } else if (2) { $x = 2; } else { $x = 3; } $x").unwrap();
        let NodeKind::Block { stmts, .. } = node.kind else {
            panic!("expected block node");
        };
        let NodeKind::IfThenElse { else_stmts, .. } = &stmts[0].kind else {
            panic!("expected if node");
        };
        assert_eq!(else_stmts.len(), 1);
        assert!(matches!(else_stmts[0].kind, NodeKind::IfThenElse { .. }));
    }

    #[test]
    fn subscript_and_calls_parse_as_postfix() {
        let node = parse("cross([1,0,0], [0,1,0])[1]").unwrap();
        let NodeKind::Subscript { vec, .. } = node.kind else {
            panic!("expected subscript node");
        };
        assert!(matches!(&vec.kind, NodeKind::Func(call) if call.name == "cross"));
    }

    #[test]
    fn reports_missing_semicolon() {
        let err = parse("$x = 1 $x").unwrap_err();
        assert!(err.message.contains("';'"));
    }

    #[test]
    fn reports_trailing_garbage() {
        let err = parse("1 2").unwrap_err();
        assert!(err.message.contains("unexpected input"));
    }

    #[test]
    fn ternary_is_right_associative() {
        let node = parse("1 ? 2 : 0 ? 3 : 4").unwrap();
        let NodeKind::Cond { otherwise, .. } = node.kind else {
            panic!("expected conditional node");
        };
        assert!(matches!(otherwise.kind, NodeKind::Cond { .. }));
    }
}
