//! The rule expression language.
//!
//! Expressions are parsed once when a rule document is loaded and evaluated
//! many times against a [`Context`]. Parsing is the only place a malformed
//! expression is reported.

mod eval;
mod functions;
mod lexer;
mod parser;

pub use eval::{Context, DiscardEvents, EventQueue, display, loose_eq, truthy};
pub use functions::{Function, FunctionLibrary};
pub use parser::{BinaryOp, Expr, UnaryOp};

use serde_json::Value;

use crate::error::ExprError;

/// Parsed expression together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
}

impl CompiledExpr {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        Ok(Self {
            source: source.to_string(),
            ast: parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    pub fn eval(&self, ctx: &Context<'_>) -> Result<Value, ExprError> {
        eval::evaluate(&self.ast, ctx)
    }

    pub fn holds(&self, ctx: &Context<'_>) -> Result<bool, ExprError> {
        self.eval(ctx).map(|value| truthy(&value))
    }
}
