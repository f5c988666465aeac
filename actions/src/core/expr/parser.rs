//! Recursive-descent parser producing the expression AST.
//!
//! Precedence, lowest first: `?:`, `||`/`or`, `&&`/`and`, `==` `!=`,
//! `<` `<=` `>` `>=`, `+` `-`, `*` `/` `%`, unary `!`/`not`/`-`, member access.

use serde_json::Value;

use super::lexer::{Token, TokenKind, tokenize};
use crate::error::ExprError;

/// Deepest nesting of parentheses, calls, conditionals and unary operators
/// one expression may use.
pub const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `$name`; the stored name keeps the `$`.
    State(String),
    /// `#name`.
    Field(String),
    /// A bare name, resolved against event data first, then state.
    Ident(String),
    Member(Box<Expr>, String),
    Call { name: String, args: Vec<Expr> },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        depth: 0,
    };
    if parser.peek() == &TokenKind::Eof {
        return Err(parser.error_here("empty expression"));
    }
    let expr = parser.conditional()?;
    if parser.peek() != &TokenKind::Eof {
        return Err(parser.error_here("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn conditional(&mut self) -> Result<Expr, ExprError> {
        self.nested(Self::conditional_inner)
    }

    fn conditional_inner(&mut self) -> Result<Expr, ExprError> {
        let test = self.or()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(test);
        }
        let then = self.conditional()?;
        self.expect(&TokenKind::Colon, "`:` in conditional")?;
        let otherwise = self.conditional()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and()?;
        while self.eat(&TokenKind::OrOr) || self.eat_word("or") {
            let right = self.and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.equality()?;
        while self.eat(&TokenKind::AndAnd) || self.eat_word("and") {
            let right = self.equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.comparison()?;
            left = binary(op, left, right);
        }
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = binary(op, left, right);
        }
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        self.nested(Self::unary_inner)
    }

    fn unary_inner(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&TokenKind::Bang) || self.eat_word("not") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat(&TokenKind::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        while self.eat(&TokenKind::Dot) {
            match self.advance() {
                TokenKind::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                TokenKind::Number(n) if n.fract() == 0.0 && n >= 0.0 => {
                    expr = Expr::Member(Box::new(expr), format!("{}", n as u64));
                }
                _ => return Err(self.error_prev("expected a field name after `.`")),
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            TokenKind::Number(n) => Ok(Expr::Literal(number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::State(name) => Ok(Expr::State(name)),
            TokenKind::Field(name) => Ok(Expr::Field(name)),
            TokenKind::Ident(name) => self.word(name),
            TokenKind::LParen => {
                let inner = self.conditional()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(inner)
            }
            TokenKind::Eof => Err(self.error_prev("unexpected end of expression")),
            _ => Err(self.error_prev("unexpected token")),
        }
    }

    fn word(&mut self, name: String) -> Result<Expr, ExprError> {
        match name.as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            "and" | "or" | "not" => return Err(self.error_prev("unexpected keyword")),
            _ => {}
        }
        if self.eat(&TokenKind::LParen) {
            let args = self.arguments()?;
            return Ok(Expr::Call { name, args });
        }
        Ok(Expr::Ident(name))
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.conditional()?);
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
            self.expect(&TokenKind::Comma, "`,` or `)` in argument list")?;
        }
    }

    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here("expression nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), TokenKind::Ident(name) if name == word) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), ExprError> {
        if self.eat(kind) {
            return Ok(());
        }
        Err(self.error_here(&format!("expected {what}")))
    }

    fn error_here(&self, message: &str) -> ExprError {
        let offset = self.tokens[self.pos.min(self.tokens.len() - 1)].offset;
        self.error_at(offset, message)
    }

    fn error_prev(&self, message: &str) -> ExprError {
        let offset = self.tokens[self.pos.saturating_sub(1)].offset;
        self.error_at(offset, message)
    }

    fn error_at(&self, offset: usize, message: &str) -> ExprError {
        ExprError::Parse {
            source_text: self.source.to_string(),
            offset,
            message: message.to_string(),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary(op, Box::new(left), Box::new(right))
}

/// Integral values become JSON integers so `$count + 1` stores `1`, not `1.0`.
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_comparison_against_state() {
        let expr = parse("$count < 3").expect("parse");
        assert_eq!(
            expr,
            binary(
                BinaryOp::Lt,
                Expr::State("$count".into()),
                Expr::Literal(json!(3))
            )
        );
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("1 + 2 * 3").expect("parse");
        assert_eq!(
            expr,
            binary(
                BinaryOp::Add,
                Expr::Literal(json!(1)),
                binary(BinaryOp::Mul, Expr::Literal(json!(2)), Expr::Literal(json!(3)))
            )
        );
    }

    #[test]
    fn word_operators_match_symbol_operators() {
        assert_eq!(
            parse("$a and not $b or $c").expect("words"),
            parse("$a && !$b || $c").expect("symbols")
        );
    }

    #[test]
    fn parses_calls_members_and_conditionals() {
        let expr = parse("max($a.b, 2) > 1 ? 'big' : #label").expect("parse");
        let Expr::Conditional { test, otherwise, .. } = expr else {
            panic!("expected conditional");
        };
        assert_eq!(*otherwise, Expr::Field("label".into()));
        let Expr::Binary(BinaryOp::Gt, call, _) = *test else {
            panic!("expected comparison");
        };
        assert_eq!(
            *call,
            Expr::Call {
                name: "max".into(),
                args: vec![
                    Expr::Member(Box::new(Expr::State("$a".into())), "b".into()),
                    Expr::Literal(json!(2)),
                ],
            }
        );
    }

    #[test]
    fn rejects_malformed_input() {
        for source in ["", "   ", "1 +", "(1", "f(1,", "1 2", "$a.", "and"] {
            let err = parse(source).expect_err(source);
            assert!(matches!(err, ExprError::Parse { .. }), "{source}: {err:?}");
        }
    }

    #[test]
    fn numeric_member_segments_index_nested_arrays() {
        let grid = Box::new(Expr::State("$grid".into()));
        assert_eq!(
            parse("$grid.0.1").expect("parse"),
            Expr::Member(Box::new(Expr::Member(grid, "0".into())), "1".into())
        );
    }

    #[test]
    fn deep_nesting_is_a_parse_error() {
        let shallow = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(parse(&shallow).expect("shallow"), Expr::Literal(json!(1)));

        let parens = format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000));
        let bangs = format!("{}true", "!".repeat(50_000));
        for source in [parens, bangs] {
            let Err(ExprError::Parse { message, .. }) = parse(&source) else {
                panic!("expected a parse error");
            };
            assert_eq!(message, "expression nested too deeply");
        }
    }

    #[test]
    fn number_keeps_integers_integral() {
        assert_eq!(number(4.0), json!(4));
        assert_eq!(number(-2.0), json!(-2));
        assert_eq!(number(0.5), json!(0.5));
    }
}
