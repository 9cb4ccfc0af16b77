// Function registry: explicit calling conventions resolved in a fixed
// order, replacing reflective trial-and-error dispatch. Scalar functions
// live here; the aggregate library registers itself from aggregate.rs.

use std::collections::HashMap;

use crate::aggregate::AggregateFn;
use crate::ast::Expression;
use crate::eval::Evaluator;
use crate::value::Value;

/// Function taking its single argument unevaluated; it decides if and how
/// to evaluate the expression against the receiver.
pub type UnevaluatedFn = fn(&mut Evaluator, &Value, Option<&Expression>) -> Value;

/// Function taking pre-evaluated arguments.
pub type EvaluatedFn = fn(&mut Evaluator, &[Value]) -> Value;

/// Function taking the receiver as an implicit first argument plus
/// pre-evaluated explicit arguments.
pub type ReceiverFn = fn(&mut Evaluator, &Value, &[Value]) -> Value;

/// A registered calling convention. Resolution tries the variants in
/// declaration order: unevaluated-remainder first, then exact-arity
/// evaluated, then receiver, then the variadic fallback.
#[derive(Clone, Copy)]
pub enum FunctionKind {
    /// Zero/one-argument form receiving the unevaluated argument expression.
    Unevaluated(UnevaluatedFn),
    /// Exact-arity form over the evaluated argument list.
    Evaluated { arity: usize, f: EvaluatedFn },
    /// Receiver form: current value as implicit first argument.
    Receiver { arity: usize, f: ReceiverFn },
    /// Variadic fallback over the evaluated argument slice.
    Variadic(EvaluatedFn),
}

/// Registry mapping names to scalar calling conventions and aggregate
/// functions. Built once at startup; callers extend it with their own
/// entries before creating evaluators.
#[derive(Default)]
pub struct FunctionRegistry {
    scalars: HashMap<String, Vec<FunctionKind>>,
    aggregates: HashMap<String, AggregateFn>,
}

impl FunctionRegistry {
    /// Empty registry, no built-ins.
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    /// Registry pre-loaded with the scalar and aggregate built-ins.
    pub fn with_defaults() -> Self {
        let mut registry = FunctionRegistry::new();
        register_scalar_builtins(&mut registry);
        crate::aggregate::register_builtins(&mut registry);
        registry
    }

    pub fn register_scalar(&mut self, name: impl Into<String>, kind: FunctionKind) {
        self.scalars.entry(name.into()).or_default().push(kind);
    }

    pub fn register_aggregate(&mut self, name: impl Into<String>, f: AggregateFn) {
        self.aggregates.insert(name.into(), f);
    }

    /// Resolve a scalar call to a convention, honoring the fixed order.
    pub fn resolve_scalar(&self, name: &str, arg_count: usize) -> Option<FunctionKind> {
        let entries = self.scalars.get(name)?;
        for pass in 0..4 {
            for kind in entries {
                let accepts = match (pass, kind) {
                    (0, FunctionKind::Unevaluated(_)) => arg_count <= 1,
                    (1, FunctionKind::Evaluated { arity, .. }) => *arity == arg_count,
                    (2, FunctionKind::Receiver { arity, .. }) => *arity == arg_count,
                    (3, FunctionKind::Variadic(_)) => true,
                    _ => false,
                };
                if accepts {
                    return Some(*kind);
                }
            }
        }
        None
    }

    pub fn aggregate(&self, name: &str) -> Option<AggregateFn> {
        self.aggregates.get(name).copied()
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.aggregates.contains_key(name)
    }
}

// ── Scalar built-ins ─────────────────────────────────────────────────────────

fn register_scalar_builtins(registry: &mut FunctionRegistry) {
    registry.register_scalar("string", FunctionKind::Evaluated { arity: 1, f: fn_string });
    registry.register_scalar("number", FunctionKind::Evaluated { arity: 1, f: fn_number });
    registry.register_scalar("length", FunctionKind::Evaluated { arity: 1, f: fn_length });
    registry.register_scalar("uppercase", FunctionKind::Evaluated { arity: 1, f: fn_uppercase });
    registry.register_scalar("lowercase", FunctionKind::Evaluated { arity: 1, f: fn_lowercase });
    registry.register_scalar("substring", FunctionKind::Variadic(fn_substring));
    registry.register_scalar("hasValue", FunctionKind::Unevaluated(fn_has_value));
}

/// string(v) - cast to the display string form.
fn fn_string(_ev: &mut Evaluator, args: &[Value]) -> Value {
    match args.first() {
        Some(v) => Value::from(v.display_string()),
        None => Value::Null,
    }
}

/// number(v) - cast to number; numeric strings parse, anything else is Null.
fn fn_number(_ev: &mut Evaluator, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Number(n)) => Value::Number(*n),
        Some(Value::Bool(b)) => Value::Number(if *b { 1.0 } else { 0.0 }),
        Some(Value::Str(s)) => match s.trim().parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Null,
        },
        _ => Value::Null,
    }
}

/// length(v) - character count of a string, element count of a list.
fn fn_length(_ev: &mut Evaluator, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Str(s)) => Value::from(s.chars().count()),
        Some(Value::List(items)) => Value::from(items.len()),
        _ => Value::Null,
    }
}

fn fn_uppercase(_ev: &mut Evaluator, args: &[Value]) -> Value {
    match args.first().and_then(Value::as_str) {
        Some(s) => Value::from(s.to_uppercase()),
        None => Value::Null,
    }
}

fn fn_lowercase(_ev: &mut Evaluator, args: &[Value]) -> Value {
    match args.first().and_then(Value::as_str) {
        Some(s) => Value::from(s.to_lowercase()),
        None => Value::Null,
    }
}

/// substring(s, start[, len]) - character-indexed slice, clamped to bounds.
fn fn_substring(_ev: &mut Evaluator, args: &[Value]) -> Value {
    let Some(s) = args.first().and_then(Value::as_str) else {
        return Value::Null;
    };
    let Some(start) = args.get(1).and_then(Value::as_number) else {
        return Value::Null;
    };
    let chars: Vec<char> = s.chars().collect();
    let start = (start.max(0.0) as usize).min(chars.len());
    let end = match args.get(2).and_then(Value::as_number) {
        Some(len) => (start + len.max(0.0) as usize).min(chars.len()),
        None => chars.len(),
    };
    Value::from(chars[start..end].iter().collect::<String>())
}

/// hasValue(expr) - unevaluated form: true when the argument expression
/// resolves to a non-null value against the receiver.
fn fn_has_value(ev: &mut Evaluator, receiver: &Value, arg: Option<&Expression>) -> Value {
    match arg {
        Some(expr) => Value::Bool(!ev.evaluate(expr, receiver).is_null()),
        None => Value::Bool(!receiver.is_null()),
    }
}
