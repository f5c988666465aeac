//! Tree-walking evaluator and the evaluation context.
//!
//! Value semantics follow the loose rules rule authors expect from a
//! spreadsheet-like formula language: `null` counts as `0` in arithmetic,
//! `+` concatenates when either side is a string, and `&&`/`||` return the
//! deciding operand.

use std::cmp::Ordering;

use serde_json::Value;
use tracing::debug;

use super::functions::FunctionLibrary;
use super::parser::{BinaryOp, Expr, UnaryOp, number};
use crate::core::patch::Document;
use crate::error::ExprError;

/// Receiver for events synthesized while an expression is evaluated.
pub trait EventQueue {
    fn queue_event(&self, origin: &str, event: &str);
}

/// Drops queued events. Used when evaluating outside of a dispatch.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardEvents;

impl EventQueue for DiscardEvents {
    fn queue_event(&self, origin: &str, event: &str) {
        debug!(origin, event, "event queued outside of a dispatch; discarded");
    }
}

/// Read-only view used to evaluate one dispatch cycle.
///
/// Name lookup prefers event data over state; library functions are only
/// reachable through calls.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    functions: &'a FunctionLibrary,
    state: &'a Document,
    data: &'a Document,
    queue: &'a dyn EventQueue,
}

impl<'a> Context<'a> {
    pub fn new(
        functions: &'a FunctionLibrary,
        state: &'a Document,
        data: &'a Document,
        queue: &'a dyn EventQueue,
    ) -> Self {
        Self {
            functions,
            state,
            data,
            queue,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&'a Value> {
        self.data.get(name).or_else(|| self.state.get(name))
    }

    pub fn state(&self) -> &'a Document {
        self.state
    }

    pub fn data(&self) -> &'a Document {
        self.data
    }

    pub fn queue(&self) -> &'a dyn EventQueue {
        self.queue
    }
}

pub fn evaluate(expr: &Expr, ctx: &Context<'_>) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::State(name) => Ok(ctx.lookup(name).cloned().unwrap_or(Value::Null)),
        Expr::Field(name) => Ok(ctx.data().get(name).cloned().unwrap_or(Value::Null)),
        Expr::Ident(name) => ctx
            .lookup(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
        Expr::Member(base, field) => Ok(member(&evaluate(base, ctx)?, field)),
        Expr::Call { name, args } => {
            let function = ctx
                .functions
                .get(name)
                .ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;
            let values = args
                .iter()
                .map(|arg| evaluate(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            function(&values, ctx)
        }
        Expr::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!truthy(&evaluate(operand, ctx)?))),
        Expr::Unary(UnaryOp::Neg, operand) => {
            let value = evaluate(operand, ctx)?;
            Ok(number(-to_number("-", &value)?))
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            let left = evaluate(left, ctx)?;
            if !truthy(&left) {
                return Ok(left);
            }
            evaluate(right, ctx)
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            let left = evaluate(left, ctx)?;
            if truthy(&left) {
                return Ok(left);
            }
            evaluate(right, ctx)
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            binary(*op, &left, &right)
        }
        Expr::Conditional {
            test,
            then,
            otherwise,
        } => {
            if truthy(&evaluate(test, ctx)?) {
                evaluate(then, ctx)
            } else {
                evaluate(otherwise, ctx)
            }
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    let symbol = op.symbol();
    let value = match op {
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::NotEq => Value::Bool(!loose_eq(left, right)),
        BinaryOp::Lt => Value::Bool(compare(symbol, left, right)? == Some(Ordering::Less)),
        BinaryOp::LtEq => Value::Bool(matches!(
            compare(symbol, left, right)?,
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(symbol, left, right)? == Some(Ordering::Greater)),
        BinaryOp::GtEq => Value::Bool(matches!(
            compare(symbol, left, right)?,
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Add if left.is_string() || right.is_string() => {
            Value::String(format!("{}{}", display(left), display(right)))
        }
        BinaryOp::Add => number(to_number(symbol, left)? + to_number(symbol, right)?),
        BinaryOp::Sub => number(to_number(symbol, left)? - to_number(symbol, right)?),
        BinaryOp::Mul => number(to_number(symbol, left)? * to_number(symbol, right)?),
        BinaryOp::Div | BinaryOp::Rem => {
            let divisor = to_number(symbol, right)?;
            if divisor == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            let dividend = to_number(symbol, left)?;
            if op == BinaryOp::Div {
                number(dividend / divisor)
            } else {
                number(dividend % divisor)
            }
        }
        BinaryOp::And if truthy(left) => right.clone(),
        BinaryOp::Or if !truthy(left) => right.clone(),
        BinaryOp::And | BinaryOp::Or => left.clone(),
    };
    Ok(value)
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<Option<Ordering>, ExprError> {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Ok(Some(a.cmp(b)));
    }
    Ok(to_number(op, left)?.partial_cmp(&to_number(op, right)?))
}

fn member(base: &Value, field: &str) -> Value {
    match base {
        Value::Object(map) => map.get(field).cloned().unwrap_or(Value::Null),
        Value::Array(items) if field == "length" => Value::from(items.len()),
        Value::Array(items) => field
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index).cloned())
            .unwrap_or(Value::Null),
        Value::String(s) if field == "length" => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

/// JavaScript-style truthiness: `null`, `false`, `0`, and `""` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric coercion for arithmetic and ordering.
pub fn to_number(op: &str, value: &Value) -> Result<f64, ExprError> {
    match value {
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64().ok_or_else(|| type_error(op, "number out of range")),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| type_error(op, &format!("`{s}` is not a number"))),
        Value::Array(_) | Value::Object(_) => {
            Err(type_error(op, "arrays and objects are not numbers"))
        }
    }
}

/// The string form used by `+`, interpolation, and the text functions.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Equality that treats `1`, `1.0`, and `"1"` as equal.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => s
            .trim()
            .parse::<f64>()
            .is_ok_and(|parsed| n.as_f64() == Some(parsed)),
        _ => left == right,
    }
}

pub(crate) fn type_error(op: &str, message: &str) -> ExprError {
    ExprError::Type {
        op: op.to_string(),
        message: message.to_string(),
    }
}
