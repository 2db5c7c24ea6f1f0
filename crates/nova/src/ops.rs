//! Operator semantics: numeric promotion, string/list joins, comparison,
//! and the operator-overload fallback chain.
//!
//! Binary operations try special forms first (string concatenation, list
//! join, operator-overload methods), then fall back to numeric promotion.
//! Overload dispatch may run Nova code, so every entry point takes the
//! calling interpreter.

use std::cmp::Ordering;

use crate::{
    error::{ErrorKind, RunError, RunResult},
    interp::Interp,
    invoke::{self, CallArgs},
    value::{Num, TypeTag, Value},
};

/// Binary operators covered by the promotion ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    /// The operator token, for error messages.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }

    /// Name of the overload method tried on object operands.
    #[must_use]
    pub fn overload_name(self) -> &'static str {
        match self {
            Self::Add => "plus",
            Self::Sub => "minus",
            Self::Mul => "times",
            Self::Div => "div",
            Self::Mod => "rem",
        }
    }
}

/// Evaluates `lhs op rhs`: special forms first, overloads next, then the
/// numeric promotion ladder.
pub(crate) fn binary(interp: &mut Interp, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    match op {
        BinOp::Add => {
            // String concatenation wins over everything, from either side.
            if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
                let mut joined = lhs.display();
                joined.push_str(&rhs.display());
                return Ok(Value::str(joined));
            }
            if let (Value::List(a), Value::List(b)) = (lhs, rhs) {
                let mut joined = a.read().clone();
                joined.extend(b.read().iter().cloned());
                return Ok(Value::list(joined));
            }
        }
        BinOp::Mul => {
            // String repetition: String * Int and Int * String.
            if let Some(repeated) = string_repetition(lhs, rhs) {
                return Ok(repeated);
            }
        }
        _ => {}
    }

    if let Some(result) = try_overload(interp, op, lhs, rhs)? {
        return Ok(result);
    }

    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => numeric(op, a, b),
        _ => Err(type_op(op, lhs, rhs)),
    }
}

/// The operator-overload fallback chain on object and enum receivers:
/// the named overload method first, then `inc`/`dec` for `x + 1` / `x - 1`.
fn try_overload(interp: &mut Interp, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    let method = match lhs {
        Value::Object(instance) => {
            let name = op.overload_name();
            instance.class().lookup_method(name).map(|m| (m, false)).or_else(|| {
                inc_dec_name(op, rhs)
                    .and_then(|n| instance.class().lookup_method(n))
                    .map(|m| (m, true))
            })
        }
        Value::Enum(entry) => {
            let name = op.overload_name();
            entry.lookup_method(name).map(|m| (m, false)).or_else(|| {
                inc_dec_name(op, rhs)
                    .and_then(|n| entry.lookup_method(n))
                    .map(|m| (m, true))
            })
        }
        _ => None,
    };
    match method {
        Some((callable, unary)) => {
            let args = if unary {
                CallArgs::empty()
            } else {
                CallArgs::positional(vec![rhs.clone()])
            };
            invoke::call_method(interp, lhs.clone(), &callable, args).map(Some)
        }
        None => Ok(None),
    }
}

fn inc_dec_name(op: BinOp, rhs: &Value) -> Option<&'static str> {
    match (op, rhs) {
        (BinOp::Add, Value::Int(1)) => Some("inc"),
        (BinOp::Sub, Value::Int(1)) => Some("dec"),
        _ => None,
    }
}

fn string_repetition(lhs: &Value, rhs: &Value) -> Option<Value> {
    let (s, n) = match (lhs, rhs) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => (s, *n),
        _ => return None,
    };
    let count = usize::try_from(n).unwrap_or(0);
    Some(Value::str(s.repeat(count)))
}

/// The numeric promotion ladder. `%` omits the Float rung.
fn numeric(op: BinOp, a: Num, b: Num) -> RunResult<Value> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        return int_arith(op, x, y);
    }
    let (a_tag, b_tag) = (a.tag(), b.tag());
    if a_tag == TypeTag::Double || b_tag == TypeTag::Double {
        return Ok(Value::Double(double_arith(op, a.as_f64(), b.as_f64())));
    }
    if a_tag == TypeTag::Float || b_tag == TypeTag::Float {
        if op == BinOp::Mod {
            // the % ladder skips Float: promote to Double instead
            return Ok(Value::Double(double_arith(op, a.as_f64(), b.as_f64())));
        }
        return Ok(Value::Float(float_arith(op, a.as_f32(), b.as_f32())));
    }
    if a_tag == TypeTag::Long || b_tag == TypeTag::Long {
        return long_arith(op, a.as_i64(), b.as_i64());
    }
    int_arith(op, a.as_i64() as i32, b.as_i64() as i32)
}

/// 32-bit wrapping integer arithmetic; division and modulo by zero fail.
fn int_arith(op: BinOp, a: i32, b: i32) -> RunResult<Value> {
    let result = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(arith_zero("division"));
            }
            a.wrapping_div(b)
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(arith_zero("modulo"));
            }
            a.wrapping_rem(b)
        }
    };
    Ok(Value::Int(result))
}

fn long_arith(op: BinOp, a: i64, b: i64) -> RunResult<Value> {
    let result = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(arith_zero("division"));
            }
            a.wrapping_div(b)
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(arith_zero("modulo"));
            }
            a.wrapping_rem(b)
        }
    };
    Ok(Value::Long(result))
}

fn float_arith(op: BinOp, a: f32, b: f32) -> f32 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Mod => a % b,
    }
}

fn double_arith(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Mod => a % b,
    }
}

/// Arithmetic negation.
pub(crate) fn negate(value: &Value) -> RunResult<Value> {
    match value {
        Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
        Value::Long(v) => Ok(Value::Long(v.wrapping_neg())),
        Value::Float(v) => Ok(Value::Float(-v)),
        Value::Double(v) => Ok(Value::Double(-v)),
        other => Err(RunError::raise(
            ErrorKind::TypeOp,
            format!("operator '-' unsupported for {}", other.type_name()),
        )),
    }
}

/// Three-way comparison: Int/Int by integer compare, any number pair
/// by double compare, strings and chars lexically, then the `compareTo`
/// overload on the left operand.
pub(crate) fn compare(interp: &mut Interp, lhs: &Value, rhs: &Value) -> RunResult<Ordering> {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        return Ok(a.cmp(b));
    }
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        // NaN ordering follows the host's total double compare
        return Ok(a.as_f64().total_cmp(&b.as_f64()));
    }
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Char(a), Value::Char(b)) => Ok(a.cmp(b)),
        _ => {
            let overload = match lhs {
                Value::Object(instance) => instance.class().lookup_method("compareTo"),
                Value::Enum(entry) => entry.lookup_method("compareTo"),
                _ => None,
            };
            let Some(callable) = overload else {
                return Err(RunError::raise(
                    ErrorKind::TypeOp,
                    format!(
                        "cannot compare {} with {}",
                        lhs.type_name(),
                        rhs.type_name()
                    ),
                ));
            };
            let result = invoke::call_method(
                interp,
                lhs.clone(),
                &callable,
                CallArgs::positional(vec![rhs.clone()]),
            )?;
            match result.as_index() {
                Some(n) => Ok(n.cmp(&0)),
                None => Err(RunError::raise(
                    ErrorKind::TypeOp,
                    format!("compareTo returned {}, expected Int", result.type_name()),
                )),
            }
        }
    }
}

/// Container indexing: `list[i]`, `map[k]`, `string[i]`.
pub(crate) fn get_index(container: &Value, index: &Value) -> RunResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.read();
            let i = index_within(index, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            let i = index_within(index, units.len(), "string")?;
            Ok(Value::Char(units[i]))
        }
        Value::Map(entries) => Ok(entries.read().get(index).cloned().unwrap_or(Value::Null)),
        other => Err(RunError::raise(
            ErrorKind::TypeOp,
            format!("{} is not indexable", other.type_name()),
        )),
    }
}

/// Container index assignment: `list[i] = v`, `map[k] = v`.
pub(crate) fn set_index(container: &Value, index: &Value, value: Value) -> RunResult<()> {
    match container {
        Value::List(items) => {
            let mut items = items.write();
            let i = index_within(index, items.len(), "list")?;
            items[i] = value;
            Ok(())
        }
        Value::Map(entries) => {
            entries.write().insert(index.clone(), value);
            Ok(())
        }
        other => Err(RunError::raise(
            ErrorKind::TypeOp,
            format!("{} does not support index assignment", other.type_name()),
        )),
    }
}

fn index_within(index: &Value, len: usize, what: &str) -> RunResult<usize> {
    let Some(i) = index.as_index() else {
        return Err(RunError::raise(
            ErrorKind::TypeOp,
            format!("{what} index must be an integer, got {}", index.type_name()),
        ));
    };
    let within = usize::try_from(i).ok().filter(|i| *i < len);
    within.ok_or_else(|| {
        RunError::raise(
            ErrorKind::TypeOp,
            format!("{what} index {i} out of bounds for length {len}"),
        )
    })
}

fn type_op(op: BinOp, lhs: &Value, rhs: &Value) -> RunError {
    RunError::raise(
        ErrorKind::TypeOp,
        format!(
            "operator '{}' unsupported for {} and {}",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ),
    )
}

fn arith_zero(what: &str) -> RunError {
    RunError::raise(ErrorKind::ArithZero, format!("{what} by zero"))
}
