//! Compilation contract: turn an `Expr` into a pure `row -> value`
//! closure. Two forms are produced: single-row (used by
//! indexes and per-row filters) and namespaced (multi-source queries).

use super::{AggName, Expr, FuncName};
use crate::error::CollectionError;
use crate::row::{Namespaced, Row};
use crate::Value;
use regex::Regex;
use std::rc::Rc;

/// A compiled single-row expression.
#[derive(Clone)]
pub struct Compiled<R: Row> {
    f: Rc<dyn Fn(&R) -> Value>,
}

impl<R: Row> Compiled<R> {
    #[must_use]
    pub fn eval(&self, row: &R) -> Value {
        (self.f)(row)
    }

    /// Evaluate and coerce to a boolean via truthiness, for use as a
    /// where-clause predicate.
    #[must_use]
    pub fn eval_bool(&self, row: &R) -> bool {
        truthy(&self.eval(row))
    }
}

/// A compiled namespaced expression (`row = {alias: item}`).
#[derive(Clone)]
pub struct NamespacedCompiled<R: Row> {
    f: Rc<dyn for<'a> Fn(&Namespaced<'a, R>) -> Value>,
}

impl<R: Row> NamespacedCompiled<R> {
    #[must_use]
    pub fn eval(&self, row: &Namespaced<'_, R>) -> Value {
        (self.f)(row)
    }
}

/// JS-style truthiness over `Value`, used to decide where-clause
/// pass/fail from a compiled expression's result.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Undefined => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Text(s) => !s.is_empty(),
        Value::Date(_) => true,
        Value::List(items) => !items.is_empty(),
    }
}

/// Compile an expression into the single-row form.
pub fn compile<R: Row + 'static>(expr: &Expr) -> Result<Compiled<R>, CollectionError> {
    let f = compile_inner::<R>(expr)?;
    Ok(Compiled { f })
}

/// Compile an expression into the namespaced form. `PropRef` paths are
/// expected to begin with the alias they target; any other leading
/// segment resolves through `alias_default` (the row not under test).
pub fn compile_namespaced<R: Row + 'static>(
    expr: &Expr,
) -> Result<NamespacedCompiled<R>, CollectionError> {
    let f = compile_namespaced_inner::<R>(expr)?;
    Ok(NamespacedCompiled { f })
}

#[allow(clippy::too_many_lines)]
fn compile_inner<R: Row + 'static>(
    expr: &Expr,
) -> Result<Rc<dyn Fn(&R) -> Value>, CollectionError> {
    match expr {
        Expr::Value(v) => {
            let v = v.clone();
            Ok(Rc::new(move |_: &R| v.clone()))
        }
        Expr::PropRef(path) => {
            if path.is_empty() {
                return Err(CollectionError::EmptyReferencePath);
            }
            let path = path.clone();
            Ok(Rc::new(move |row: &R| row.field(&path)))
        }
        Expr::CollectionRef | Expr::QueryRef => Ok(Rc::new(|_: &R| Value::Undefined)),
        Expr::Aggregate(_, args) => {
            // Per-row use only; evaluate the first argument and pass it
            // through so a top-level Aggregate still compiles to *a*
            // value rather than failing the whole expression tree.
            let arg = args
                .first()
                .map(compile_inner::<R>)
                .transpose()?
                .unwrap_or_else(|| Rc::new(|_: &R| Value::Undefined));
            Ok(arg)
        }
        Expr::Func(name, args) => {
            let compiled_args: Vec<_> = args
                .iter()
                .map(compile_inner::<R>)
                .collect::<Result<_, _>>()?;
            build_func::<R>(*name, compiled_args)
        }
    }
}

#[allow(clippy::too_many_lines)]
fn compile_namespaced_inner<R: Row + 'static>(
    expr: &Expr,
) -> Result<Rc<dyn for<'a> Fn(&Namespaced<'a, R>) -> Value>, CollectionError> {
    match expr {
        Expr::Value(v) => {
            let v = v.clone();
            Ok(Rc::new(move |_: &Namespaced<'_, R>| v.clone()))
        }
        Expr::PropRef(path) => {
            if path.is_empty() {
                return Err(CollectionError::EmptyReferencePath);
            }
            // First segment is the alias; the remainder is the field path.
            let alias = path[0].clone();
            let rest = path[1..].to_vec();
            Ok(Rc::new(move |row: &Namespaced<'_, R>| {
                if row.alias == alias {
                    row.row.field(&rest)
                } else {
                    Value::Undefined
                }
            }))
        }
        Expr::CollectionRef | Expr::QueryRef => {
            Ok(Rc::new(|_: &Namespaced<'_, R>| Value::Undefined))
        }
        Expr::Aggregate(_, args) => {
            let arg = args
                .first()
                .map(compile_namespaced_inner::<R>)
                .transpose()?
                .unwrap_or_else(|| Rc::new(|_: &Namespaced<'_, R>| Value::Undefined));
            Ok(arg)
        }
        Expr::Func(name, args) => {
            let compiled_args: Vec<_> = args
                .iter()
                .map(compile_namespaced_inner::<R>)
                .collect::<Result<_, _>>()?;
            build_func_namespaced::<R>(*name, compiled_args)
        }
    }
}

fn build_func<R: Row + 'static>(
    name: FuncName,
    args: Vec<Rc<dyn Fn(&R) -> Value>>,
) -> Result<Rc<dyn Fn(&R) -> Value>, CollectionError> {
    Ok(Rc::new(move |row: &R| {
        let values: Vec<Value> = args.iter().map(|f| f(row)).collect();
        apply_func(name, &values)
    }))
}

fn build_func_namespaced<R: Row + 'static>(
    name: FuncName,
    args: Vec<Rc<dyn for<'a> Fn(&Namespaced<'a, R>) -> Value>>,
) -> Result<Rc<dyn for<'a> Fn(&Namespaced<'a, R>) -> Value>, CollectionError> {
    Ok(Rc::new(move |row: &Namespaced<'_, R>| {
        let values: Vec<Value> = args.iter().map(|f| f(row)).collect();
        apply_func(name, &values)
    }))
}

/// Pure function application shared by both compilation forms.
#[allow(clippy::too_many_lines)]
fn apply_func(name: FuncName, args: &[Value]) -> Value {
    match name {
        FuncName::Eq => Value::Bool(binary_eq(args)),
        FuncName::Gt => compare(args, std::cmp::Ordering::Greater, false),
        FuncName::Gte => compare(args, std::cmp::Ordering::Greater, true),
        FuncName::Lt => compare(args, std::cmp::Ordering::Less, false),
        FuncName::Lte => compare(args, std::cmp::Ordering::Less, true),
        FuncName::And => Value::Bool(args.iter().all(truthy)),
        FuncName::Or => Value::Bool(args.iter().any(truthy)),
        FuncName::Not => Value::Bool(args.first().map(|v| !truthy(v)).unwrap_or(true)),
        FuncName::In => Value::Bool(func_in(args)),
        FuncName::Like => Value::Bool(like(args, false)),
        FuncName::ILike => Value::Bool(like(args, true)),
        FuncName::Upper => text_case(args, str::to_uppercase),
        FuncName::Lower => text_case(args, str::to_lowercase),
        FuncName::Length => length(args),
        FuncName::Concat => concat(args),
        FuncName::Coalesce => coalesce(args),
        FuncName::Add => arith(args, |a, b| a + b),
        FuncName::Subtract => arith(args, |a, b| a - b),
        FuncName::Multiply => arith(args, |a, b| a * b),
        FuncName::Divide => divide(args),
        FuncName::IsNull => Value::Bool(args.first().is_some_and(Value::is_null)),
        FuncName::IsUndefined => Value::Bool(args.first().is_some_and(Value::is_undefined)),
    }
}

fn binary_eq(args: &[Value]) -> bool {
    let (Some(a), Some(b)) = (args.first(), args.get(1)) else {
        return false;
    };
    // `Value`'s `PartialEq` already normalizes `Date` to its instant.
    a == b
}

fn compare(args: &[Value], direction: std::cmp::Ordering, or_equal: bool) -> Value {
    let (Some(a), Some(b)) = (args.first(), args.get(1)) else {
        return Value::Bool(false);
    };
    if a.is_absent() || b.is_absent() {
        return Value::Bool(false);
    }
    let ord = a.cmp(b);
    Value::Bool(ord == direction || (or_equal && ord == std::cmp::Ordering::Equal))
}

fn func_in(args: &[Value]) -> bool {
    let Some(needle) = args.first() else {
        return false;
    };
    match args.get(1) {
        Some(Value::List(items)) => items.contains(needle),
        _ => false,
    }
}

/// Compile the SQL-ish `%`/`_` pattern to a fully anchored regex.
fn like_pattern_to_regex(pattern: &str, case_insensitive: bool) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            special if "\\.+*?()|[]{}^$".contains(special) => {
                re.push('\\');
                re.push(special);
            }
            other => re.push(other),
        }
    }
    re.push('$');
    if case_insensitive {
        re = format!("(?i){re}");
    }
    Regex::new(&re).ok()
}

fn like(args: &[Value], case_insensitive: bool) -> bool {
    let (Some(Value::Text(text)), Some(Value::Text(pattern))) = (args.first(), args.get(1))
    else {
        return false;
    };
    like_pattern_to_regex(pattern, case_insensitive)
        .is_some_and(|re| re.is_match(text))
}

fn text_case(args: &[Value], f: impl Fn(&str) -> String) -> Value {
    match args.first() {
        Some(Value::Text(s)) => Value::Text(f(s)),
        Some(v) if v.is_absent() => v.clone(),
        _ => Value::Undefined,
    }
}

fn length(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Text(s)) => Value::Int(s.chars().count() as i64),
        Some(Value::List(items)) => Value::Int(items.len() as i64),
        Some(v) if v.is_absent() => v.clone(),
        _ => Value::Undefined,
    }
}

fn concat(args: &[Value]) -> Value {
    let mut out = String::new();
    for v in args {
        if !v.is_absent() {
            out.push_str(&v.to_string());
        }
    }
    Value::Text(out)
}

fn coalesce(args: &[Value]) -> Value {
    args.iter()
        .find(|v| !v.is_absent())
        .cloned()
        .unwrap_or(Value::Null)
}

/// `add(null, x) ≡ x`, generalized to the other three arithmetic ops:
/// an absent operand falls back to the other operand unchanged.
fn arith(args: &[Value], op: impl Fn(f64, f64) -> f64) -> Value {
    let (Some(a), Some(b)) = (args.first(), args.get(1)) else {
        return Value::Null;
    };
    match (a.is_absent(), b.is_absent()) {
        (true, true) => Value::Null,
        (true, false) => b.clone(),
        (false, true) => a.clone(),
        (false, false) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => numeric_result(a, b, op(x, y)),
            _ => Value::Null,
        },
    }
}

fn divide(args: &[Value]) -> Value {
    let (Some(a), Some(b)) = (args.first(), args.get(1)) else {
        return Value::Null;
    };
    if b.is_absent() {
        return a.clone();
    }
    if a.is_absent() {
        return Value::Null;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(_), Some(y)) if y == 0.0 => Value::Null,
        (Some(x), Some(y)) => numeric_result(a, b, x / y),
        _ => Value::Null,
    }
}

/// Keep `Int` results when both operands were integral and the result
/// has no fractional part; otherwise widen to `Float`.
fn numeric_result(a: &Value, b: &Value, result: f64) -> Value {
    let both_int = matches!(a, Value::Int(_)) && matches!(b, Value::Int(_));
    if both_int && result.fract() == 0.0 {
        Value::Int(result as i64)
    } else {
        Value::Float(result)
    }
}
