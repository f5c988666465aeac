//! Library functions callable from rule expressions.

use std::collections::BTreeMap;

use serde_json::Value;

use super::eval::{Context, display, to_number, truthy, type_error};
use super::parser::number;
use crate::error::ExprError;

/// A library function. Arguments are evaluated eagerly, left to right.
pub type Function = fn(&[Value], &Context<'_>) -> Result<Value, ExprError>;

/// Name → function table consulted by call expressions.
#[derive(Clone, Default)]
pub struct FunctionLibrary {
    functions: BTreeMap<String, Function>,
}

impl std::fmt::Debug for FunctionLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

impl FunctionLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in library: math, text editing for on-screen keyboards,
    /// and `queue` for synthesizing follow-up events.
    pub fn standard() -> Self {
        let mut library = Self::empty();
        library.register("min", min);
        library.register("max", max);
        library.register("abs", |args, _| unary_math("abs", args, f64::abs));
        library.register("round", |args, _| unary_math("round", args, f64::round));
        library.register("floor", |args, _| unary_math("floor", args, f64::floor));
        library.register("ceil", |args, _| unary_math("ceil", args, f64::ceil));
        library.register("len", len);
        library.register("concat", concat);
        library.register("upper", |args, _| {
            Ok(Value::String(text_arg("upper", args)?.to_uppercase()))
        });
        library.register("lower", |args, _| {
            Ok(Value::String(text_arg("lower", args)?.to_lowercase()))
        });
        library.register("trim", |args, _| {
            Ok(Value::String(text_arg("trim", args)?.trim().to_string()))
        });
        library.register("contains", contains);
        library.register("if", if_);
        library.register("empty", empty);
        library.register("add_letter", add_letter);
        library.register("add_word", add_word);
        library.register("delete_letter", delete_letter);
        library.register("delete_word", delete_word);
        library.register("queue", queue);
        library
    }

    /// Add or replace a function.
    pub fn register(&mut self, name: impl Into<String>, function: Function) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<Function> {
        self.functions.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), ExprError> {
    if args.len() == expected {
        return Ok(());
    }
    Err(ExprError::Arity {
        function: name.to_string(),
        expected: expected.to_string(),
        found: args.len(),
    })
}

fn text_arg(name: &str, args: &[Value]) -> Result<String, ExprError> {
    arity(name, args, 1)?;
    Ok(display(&args[0]))
}

fn unary_math(name: &str, args: &[Value], f: fn(f64) -> f64) -> Result<Value, ExprError> {
    arity(name, args, 1)?;
    Ok(number(f(to_number(name, &args[0])?)))
}

fn fold_numbers(
    name: &str,
    args: &[Value],
    pick: fn(f64, f64) -> f64,
) -> Result<Value, ExprError> {
    let (first, rest) = args.split_first().ok_or_else(|| ExprError::Arity {
        function: name.to_string(),
        expected: "at least 1".to_string(),
        found: 0,
    })?;
    let mut acc = to_number(name, first)?;
    for arg in rest {
        acc = pick(acc, to_number(name, arg)?);
    }
    Ok(number(acc))
}

fn min(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    fold_numbers("min", args, f64::min)
}

fn max(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    fold_numbers("max", args, f64::max)
}

fn len(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    arity("len", args, 1)?;
    let n = match &args[0] {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Bool(_) | Value::Number(_) => {
            return Err(type_error("len", "expected a string, array, or object"));
        }
    };
    Ok(Value::from(n))
}

fn concat(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    Ok(Value::String(args.iter().map(display).collect()))
}

fn contains(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    arity("contains", args, 2)?;
    let found = match &args[0] {
        Value::Array(items) => items.contains(&args[1]),
        haystack => display(haystack).contains(&display(&args[1])),
    };
    Ok(Value::Bool(found))
}

fn if_(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    arity("if", args, 3)?;
    Ok(if truthy(&args[0]) {
        args[1].clone()
    } else {
        args[2].clone()
    })
}

fn empty(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    arity("empty", args, 1)?;
    let is_empty = match &args[0] {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    };
    Ok(Value::Bool(is_empty))
}

fn add_letter(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    arity("add_letter", args, 2)?;
    Ok(Value::String(format!(
        "{}{}",
        display(&args[0]),
        display(&args[1])
    )))
}

/// Append a word and a trailing space, replacing any partially typed word.
fn add_word(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    arity("add_word", args, 2)?;
    let text = display(&args[0]);
    let kept = text.trim_end_matches(|c: char| !c.is_whitespace());
    Ok(Value::String(format!("{kept}{} ", display(&args[1]))))
}

fn delete_letter(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    let mut text = text_arg("delete_letter", args)?;
    text.pop();
    Ok(Value::String(text))
}

fn delete_word(args: &[Value], _: &Context<'_>) -> Result<Value, ExprError> {
    let text = text_arg("delete_word", args)?;
    let trimmed = text.trim_end();
    let kept = trimmed.trim_end_matches(|c: char| !c.is_whitespace());
    Ok(Value::String(kept.to_string()))
}

/// `queue(origin, event)` schedules a follow-up dispatch cycle.
fn queue(args: &[Value], ctx: &Context<'_>) -> Result<Value, ExprError> {
    arity("queue", args, 2)?;
    ctx.queue()
        .queue_event(&display(&args[0]), &display(&args[1]));
    Ok(Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::eval::{DiscardEvents, evaluate};
    use crate::core::expr::parser::parse;
    use crate::core::patch::Document;
    use serde_json::json;

    fn eval(source: &str) -> Result<Value, ExprError> {
        let library = FunctionLibrary::standard();
        let state = Document::new();
        let data = Document::new();
        let ctx = Context::new(&library, &state, &data, &DiscardEvents);
        evaluate(&parse(source).expect("parse"), &ctx)
    }

    #[test]
    fn math_functions() {
        assert_eq!(eval("min(3, 1, 2)"), Ok(json!(1)));
        assert_eq!(eval("max(3, 1, 2)"), Ok(json!(3)));
        assert_eq!(eval("abs(-4)"), Ok(json!(4)));
        assert_eq!(eval("round(2.5)"), Ok(json!(3)));
        assert_eq!(eval("floor(2.7)"), Ok(json!(2)));
        assert_eq!(eval("ceil(2.1)"), Ok(json!(3)));
    }

    #[test]
    fn text_functions() {
        assert_eq!(eval("len('héllo')"), Ok(json!(5)));
        assert_eq!(eval("concat('a', 1, null, true)"), Ok(json!("a1true")));
        assert_eq!(eval("upper('ab')"), Ok(json!("AB")));
        assert_eq!(eval("contains('keyboard', 'board')"), Ok(json!(true)));
        assert_eq!(eval("empty('')"), Ok(json!(true)));
        assert_eq!(eval("if(0, 'a', 'b')"), Ok(json!("b")));
    }

    #[test]
    fn keyboard_editing_functions() {
        assert_eq!(eval("add_letter('hel', 'l')"), Ok(json!("hell")));
        assert_eq!(eval("add_word('I want dri', 'drink')"), Ok(json!("I want drink ")));
        assert_eq!(eval("add_word('', 'hi')"), Ok(json!("hi ")));
        assert_eq!(eval("delete_letter('abc')"), Ok(json!("ab")));
        assert_eq!(eval("delete_word('I want drink ')"), Ok(json!("I want ")));
        assert_eq!(eval("delete_word('')"), Ok(json!("")));
    }

    #[test]
    fn arity_is_checked() {
        assert_eq!(
            eval("abs(1, 2)"),
            Err(ExprError::Arity {
                function: "abs".into(),
                expected: "1".into(),
                found: 2,
            })
        );
        assert!(matches!(eval("min()"), Err(ExprError::Arity { .. })));
    }

    #[test]
    fn embedders_can_register_functions() {
        let mut library = FunctionLibrary::standard();
        library.register("double", |args, _| {
            Ok(number(2.0 * to_number("double", &args[0])?))
        });
        let state = Document::new();
        let data = Document::new();
        let ctx = Context::new(&library, &state, &data, &DiscardEvents);
        let value = evaluate(&parse("double(21)").expect("parse"), &ctx).expect("eval");
        assert_eq!(value, json!(42));
    }
}
