//! The whitelisted condition expression language.
//!
//! A condition is a JSON-shaped expression tree. A node is a scalar, an
//! array of nodes, or an operator object: exactly one key drawn from
//! [`ALLOWED_OPERATORS`], whose value is the operand list. The
//! whitelist is the security boundary: no reflection, no user code, no
//! I/O from expressions.
//!
//! Validation runs before persistence and before every evaluation.

use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

/// Maximum nesting depth of a condition tree. Every operator object and
/// every array level counts.
pub const MAX_DEPTH: usize = 10;

/// Maximum number of operator objects across the whole tree.
pub const MAX_OPERATORS: usize = 50;

/// The fixed operator whitelist.
pub const ALLOWED_OPERATORS: &[&str] = &[
    "==", "===", "!=", "!==", ">", ">=", "<", "<=", "and", "or", "!", "var", "missing",
    "missing_some", "in", "if", "+", "-", "*", "/", "%", "min", "max", "cat", "substr", "length",
];

/// Validates a condition tree against the whitelist and limits.
///
/// # Errors
///
/// Returns a validation error when the root is not an operator object,
/// an operator is not allowed, the tree exceeds [`MAX_DEPTH`], or it
/// contains more than [`MAX_OPERATORS`] operator nodes.
pub fn validate(condition: &Value) -> Result<()> {
    let Value::Object(map) = condition else {
        return Err(Error::validation(
            "condition root must be an operator object",
        ));
    };
    if map.len() != 1 {
        return Err(Error::validation(
            "condition root must be an operator object with exactly one key",
        ));
    }

    let mut operators = 0usize;
    check_node(condition, 1, &mut operators)
}

fn check_node(node: &Value, depth: usize, operators: &mut usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::validation(format!(
            "condition exceeds maximum nesting depth of {MAX_DEPTH}"
        )));
    }

    match node {
        Value::Object(map) => {
            let (op, operands) = single_operator(map)?;
            if !ALLOWED_OPERATORS.contains(&op) {
                return Err(Error::validation(format!("Operator not allowed: {op}")));
            }
            *operators += 1;
            if *operators > MAX_OPERATORS {
                return Err(Error::validation(format!(
                    "condition exceeds maximum of {MAX_OPERATORS} operators"
                )));
            }
            check_node(operands, depth + 1, operators)
        }
        Value::Array(items) => {
            for item in items {
                check_node(item, depth + 1, operators)?;
            }
            Ok(())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
    }
}

fn single_operator(map: &Map<String, Value>) -> Result<(&str, &Value)> {
    let mut entries = map.iter();
    let (op, operands) = entries
        .next()
        .ok_or_else(|| Error::validation("operator object must not be empty"))?;
    if entries.next().is_some() {
        return Err(Error::validation(
            "operator object must have exactly one key",
        ));
    }
    Ok((op.as_str(), operands))
}

/// Evaluates a condition against an event payload, coercing the result
/// to a boolean via [`is_truthy`].
///
/// # Errors
///
/// Returns a validation error when the condition fails [`validate`],
/// and an evaluation error when an operator is applied to operands it
/// cannot handle (e.g. arithmetic on non-numbers).
pub fn evaluate(condition: &Value, payload: &Value) -> Result<bool> {
    validate(condition)?;
    Ok(is_truthy(&eval_node(condition, payload)?))
}

/// Truthiness: null is false, booleans are themselves, numbers are
/// truthy when finite and non-zero, strings when non-empty, and arrays
/// and objects are always truthy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.is_finite() && f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn eval_node(node: &Value, payload: &Value) -> Result<Value> {
    match node {
        Value::Object(map) => {
            let (op, operands) = single_operator(map)?;
            apply(op, operands, payload)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_node(item, payload)?);
            }
            Ok(Value::Array(out))
        }
        scalar => Ok(scalar.clone()),
    }
}

#[allow(clippy::too_many_lines)]
fn apply(op: &str, operands: &Value, payload: &Value) -> Result<Value> {
    // `var` and `if`/`and`/`or` handle their own operand evaluation
    // (path literals and lazy branches respectively).
    match op {
        "var" => return eval_var(operands, payload),
        "if" => return eval_if(operands, payload),
        "and" => return eval_and(operands, payload),
        "or" => return eval_or(operands, payload),
        "missing" => return eval_missing(operands, payload),
        "missing_some" => return eval_missing_some(operands, payload),
        _ => {}
    }

    let args = eval_operands(operands, payload)?;
    match op {
        "==" => Ok(Value::Bool(loose_eq(arg(&args, 0), arg(&args, 1)))),
        "!=" => Ok(Value::Bool(!loose_eq(arg(&args, 0), arg(&args, 1)))),
        "===" => Ok(Value::Bool(strict_eq(arg(&args, 0), arg(&args, 1)))),
        "!==" => Ok(Value::Bool(!strict_eq(arg(&args, 0), arg(&args, 1)))),
        ">" => compare(op, &args, |ord| ord == std::cmp::Ordering::Greater),
        ">=" => compare(op, &args, |ord| ord != std::cmp::Ordering::Less),
        "<" => compare(op, &args, |ord| ord == std::cmp::Ordering::Less),
        "<=" => compare(op, &args, |ord| ord != std::cmp::Ordering::Greater),
        "!" => Ok(Value::Bool(!is_truthy(arg(&args, 0)))),
        "in" => eval_in(&args),
        "+" => fold_numbers(op, &args, 0.0, |acc, n| acc + n),
        "*" => fold_numbers(op, &args, 1.0, |acc, n| acc * n),
        "-" => eval_sub(&args),
        "/" => eval_div(&args),
        "%" => eval_mod(&args),
        "min" => reduce_numbers(op, &args, f64::min),
        "max" => reduce_numbers(op, &args, f64::max),
        "cat" => eval_cat(&args),
        "substr" => eval_substr(&args),
        "length" => eval_length(&args),
        other => Err(Error::validation(format!("Operator not allowed: {other}"))),
    }
}

/// Evaluates an operand list. A non-array operand is a single argument.
fn eval_operands(operands: &Value, payload: &Value) -> Result<Vec<Value>> {
    match operands {
        Value::Array(items) => items.iter().map(|i| eval_node(i, payload)).collect(),
        single => Ok(vec![eval_node(single, payload)?]),
    }
}

fn arg<'a>(args: &'a [Value], index: usize) -> &'a Value {
    static NULL: Value = Value::Null;
    args.get(index).unwrap_or(&NULL)
}

// ── variable access ──────────────────────────────────────────────────

fn eval_var(operands: &Value, payload: &Value) -> Result<Value> {
    let (path, default) = match operands {
        Value::Array(items) => {
            let path = items.first().cloned().unwrap_or(Value::Null);
            (eval_path(&path, payload)?, items.get(1).cloned())
        }
        other => (eval_path(other, payload)?, None),
    };

    let resolved = resolve_path(payload, &path);
    match resolved {
        Value::Null => match default {
            Some(d) => eval_node(&d, payload),
            None => Ok(Value::Null),
        },
        found => Ok(found),
    }
}

/// The path operand may itself be an expression; it must evaluate to a
/// string (or null/empty for "the whole payload").
fn eval_path(path: &Value, payload: &Value) -> Result<String> {
    match eval_node(path, payload)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Err(Error::eval(format!(
            "var path must be a string, got {other}"
        ))),
    }
}

fn resolve_path(payload: &Value, path: &str) -> Value {
    if path.is_empty() {
        return payload.clone();
    }
    let mut current = payload;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => v,
                None => return Value::Null,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}

// ── boolean operators ────────────────────────────────────────────────

fn eval_and(operands: &Value, payload: &Value) -> Result<Value> {
    let items = operand_list(operands);
    let mut last = Value::Bool(true);
    for item in items {
        last = eval_node(item, payload)?;
        if !is_truthy(&last) {
            return Ok(last);
        }
    }
    Ok(last)
}

fn eval_or(operands: &Value, payload: &Value) -> Result<Value> {
    let items = operand_list(operands);
    let mut last = Value::Bool(false);
    for item in items {
        last = eval_node(item, payload)?;
        if is_truthy(&last) {
            return Ok(last);
        }
    }
    Ok(last)
}

fn eval_if(operands: &Value, payload: &Value) -> Result<Value> {
    let items = operand_list(operands);
    let mut i = 0;
    while i + 1 < items.len() {
        if is_truthy(&eval_node(&items[i], payload)?) {
            return eval_node(&items[i + 1], payload);
        }
        i += 2;
    }
    match items.get(i) {
        Some(fallback) => eval_node(fallback, payload),
        None => Ok(Value::Null),
    }
}

fn operand_list(operands: &Value) -> &[Value] {
    match operands {
        Value::Array(items) => items.as_slice(),
        single => std::slice::from_ref(single),
    }
}

// ── membership ───────────────────────────────────────────────────────

fn eval_missing(operands: &Value, payload: &Value) -> Result<Value> {
    let keys = eval_operands(operands, payload)?;
    // A single evaluated array operand is the key list itself.
    let keys = match keys.as_slice() {
        [Value::Array(inner)] => inner.clone(),
        _ => keys,
    };
    let mut missing = Vec::new();
    for key in keys {
        if let Value::String(path) = &key {
            if resolve_path(payload, path) == Value::Null {
                missing.push(key);
            }
        }
    }
    Ok(Value::Array(missing))
}

fn eval_missing_some(operands: &Value, payload: &Value) -> Result<Value> {
    let args = eval_operands(operands, payload)?;
    let need = to_number("missing_some", arg(&args, 0))? as usize;
    let keys = match arg(&args, 1) {
        Value::Array(keys) => keys.clone(),
        other => {
            return Err(Error::eval(format!(
                "missing_some expects a key list, got {other}"
            )))
        }
    };
    let total = keys.len();
    let missing = eval_missing(&Value::Array(keys), payload)?;
    let missing_count = missing.as_array().map_or(0, Vec::len);
    if total - missing_count >= need {
        Ok(Value::Array(Vec::new()))
    } else {
        Ok(missing)
    }
}

fn eval_in(args: &[Value]) -> Result<Value> {
    let needle = arg(args, 0);
    match arg(args, 1) {
        Value::String(haystack) => match needle {
            Value::String(n) => Ok(Value::Bool(haystack.contains(n.as_str()))),
            other => Ok(Value::Bool(haystack.contains(&coerce_string(other)))),
        },
        Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| loose_eq(i, needle)))),
        _ => Ok(Value::Bool(false)),
    }
}

// ── equality and comparison ──────────────────────────────────────────

fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Loose equality coerces number-like strings and booleans to numbers
/// before comparing mismatched types.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if strict_eq(a, b) {
        return true;
    }
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        _ => match (coerce_number(a), coerce_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn compare(
    op: &str,
    args: &[Value],
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value> {
    let a = to_number(op, arg(args, 0))?;
    let b = to_number(op, arg(args, 1))?;
    let ord = a
        .partial_cmp(&b)
        .ok_or_else(|| Error::eval(format!("{op} cannot order {a} and {b}")))?;
    Ok(Value::Bool(accept(ord)))
}

// ── arithmetic ───────────────────────────────────────────────────────

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        _ => None,
    }
}

fn to_number(op: &str, value: &Value) -> Result<f64> {
    coerce_number(value)
        .filter(|f| f.is_finite())
        .ok_or_else(|| Error::eval(format!("{op} requires numeric operands, got {value}")))
}

fn number(f: f64) -> Result<Value> {
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        Ok(Value::Number(Number::from(f as i64)))
    } else {
        Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| Error::eval(format!("arithmetic produced a non-finite result: {f}")))
    }
}

fn fold_numbers(op: &str, args: &[Value], init: f64, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
    let mut acc = init;
    for value in args {
        acc = f(acc, to_number(op, value)?);
    }
    number(acc)
}

fn reduce_numbers(op: &str, args: &[Value], f: impl Fn(f64, f64) -> f64) -> Result<Value> {
    let mut numbers = Vec::with_capacity(args.len());
    for value in args {
        numbers.push(to_number(op, value)?);
    }
    let first = *numbers
        .first()
        .ok_or_else(|| Error::eval(format!("{op} requires at least one operand")))?;
    number(numbers.into_iter().skip(1).fold(first, f))
}

fn eval_sub(args: &[Value]) -> Result<Value> {
    match args.len() {
        1 => number(-to_number("-", arg(args, 0))?),
        _ => number(to_number("-", arg(args, 0))? - to_number("-", arg(args, 1))?),
    }
}

fn eval_div(args: &[Value]) -> Result<Value> {
    let a = to_number("/", arg(args, 0))?;
    let b = to_number("/", arg(args, 1))?;
    if b == 0.0 {
        return Err(Error::eval("division by zero"));
    }
    number(a / b)
}

fn eval_mod(args: &[Value]) -> Result<Value> {
    let a = to_number("%", arg(args, 0))?;
    let b = to_number("%", arg(args, 1))?;
    if b == 0.0 {
        return Err(Error::eval("modulo by zero"));
    }
    number(a % b)
}

// ── strings ──────────────────────────────────────────────────────────

fn coerce_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        composite => composite.to_string(),
    }
}

fn eval_cat(args: &[Value]) -> Result<Value> {
    let mut out = String::new();
    for value in args {
        out.push_str(&coerce_string(value));
    }
    Ok(Value::String(out))
}

fn eval_substr(args: &[Value]) -> Result<Value> {
    let source = coerce_string(arg(args, 0));
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len() as i64;

    let start = to_number("substr", arg(args, 1))? as i64;
    let start = if start < 0 {
        (len + start).max(0)
    } else {
        start.min(len)
    };

    let end = match args.get(2) {
        Some(take) => {
            let take = to_number("substr", take)? as i64;
            if take < 0 {
                (len + take).max(start)
            } else {
                (start + take).min(len)
            }
        }
        None => len,
    };

    Ok(Value::String(
        chars[start as usize..end.max(start) as usize]
            .iter()
            .collect(),
    ))
}

fn eval_length(args: &[Value]) -> Result<Value> {
    match arg(args, 0) {
        Value::String(s) => Ok(Value::Number(Number::from(s.chars().count()))),
        Value::Array(items) => Ok(Value::Number(Number::from(items.len()))),
        other => Err(Error::eval(format!(
            "length requires a string or array, got {other}"
        ))),
    }
}
