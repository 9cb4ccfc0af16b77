// Expression evaluator: scalar operator semantics, key/chain navigation,
// conditional/assignment, and registry dispatch. Evaluation is best-effort
// and total — invalid operand types degrade to Null, never to an error.

use std::collections::HashMap;
use std::rc::Rc;

use crate::aggregate;
use crate::ast::{BinaryOp, Expression, UnaryOp};
use crate::functions::{FunctionKind, FunctionRegistry};
use crate::value::{compare, Comparison, Value};

/// Evaluation session: one per report run.
///
/// Holds the root value of the run, the assignment scope written by
/// `Assign` nodes and read as the `Key` fallback, and the recursion guard.
/// Dropping the evaluator ends the session; the scope is never implicitly
/// cleared mid-run.
pub struct Evaluator {
    registry: Rc<FunctionRegistry>,
    scope: HashMap<String, Value>,
    root: Option<Value>,
    depth: usize,
    max_depth: usize,
}

impl Evaluator {
    /// Session over the default registry (scalar and aggregate built-ins).
    pub fn new() -> Self {
        Evaluator::with_registry(Rc::new(FunctionRegistry::with_defaults()))
    }

    /// Session over a caller-extended registry.
    pub fn with_registry(registry: Rc<FunctionRegistry>) -> Self {
        Evaluator {
            registry,
            scope: HashMap::new(),
            root: None,
            // Pathological self-referential expressions are a caller
            // responsibility; the guard keeps them from overflowing the
            // stack.
            depth: 0,
            max_depth: 256,
        }
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Root value of the current run, set by the first `evaluate` call.
    pub fn root(&self) -> Option<&Value> {
        self.root.as_ref()
    }

    /// Write a name into the assignment scope.
    pub fn assign(&mut self, name: impl Into<String>, value: Value) {
        self.scope.insert(name.into(), value);
    }

    /// Read a name from the assignment scope.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scope.get(name)
    }

    /// Evaluate an expression against a receiver. List-like receivers hand
    /// key, call and chain expressions to the aggregate evaluator.
    pub fn evaluate(&mut self, expr: &Expression, data: &Value) -> Value {
        if self.root.is_none() {
            self.root = Some(data.clone());
        }
        self.eval(expr, data)
    }

    pub(crate) fn eval(&mut self, expr: &Expression, data: &Value) -> Value {
        if self.depth >= self.max_depth {
            log::warn!(
                "expression recursion depth {} exceeded; evaluating to null",
                self.max_depth
            );
            return Value::Null;
        }
        self.depth += 1;
        let result = match expr {
            Expression::Chain(steps) => self.eval_chain(steps, data),
            Expression::Key(_) | Expression::Call { .. } if data.is_list_like() => {
                aggregate::evaluate_over_steps(self, data, std::slice::from_ref(expr))
            }
            _ => self.eval_scalar(expr, data),
        };
        self.depth -= 1;
        result
    }

    /// Fold a chain left. Whenever the running value becomes list-like with
    /// steps still unconsumed, the remaining suffix goes to the aggregate
    /// evaluator — this is what lets one expression walk a single record or
    /// an entire grouped list transparently.
    pub(crate) fn eval_chain(&mut self, steps: &[Expression], data: &Value) -> Value {
        let mut current = data.clone();
        for (i, step) in steps.iter().enumerate() {
            if current.is_list_like() {
                return aggregate::evaluate_over_steps(self, &current, &steps[i..]);
            }
            current = self.eval(step, &current);
        }
        current
    }

    /// Chain evaluation that forces the first step to resolve scalar-style
    /// against the receiver, even when the receiver is list-like. The
    /// aggregate evaluator uses this for its "treat the list itself as the
    /// value" fallback, where a `Group` answers its own accessor keys.
    pub(crate) fn eval_receiver_steps(&mut self, steps: &[Expression], data: &Value) -> Value {
        match steps.split_first() {
            None => data.clone(),
            Some((first, rest)) => {
                let value = self.eval_scalar(first, data);
                if rest.is_empty() {
                    value
                } else {
                    self.eval_chain(rest, &value)
                }
            }
        }
    }

    fn eval_scalar(&mut self, expr: &Expression, data: &Value) -> Value {
        match expr {
            Expression::Literal(v) => v.clone(),

            Expression::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, data),

            Expression::Unary { op, operand } => {
                let v = self.eval(operand, data);
                match op {
                    UnaryOp::Negate => match v.as_number() {
                        Some(n) => Value::Number(-n),
                        None => Value::Null,
                    },
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                }
            }

            Expression::Key(name) => {
                let resolved = data.resolve_key(name);
                if resolved.is_null() {
                    if let Some(bound) = self.scope.get(name) {
                        return bound.clone();
                    }
                }
                resolved
            }

            Expression::Index { list, index } => {
                let list = self.eval(list, data);
                let Some(items) = list.as_list() else {
                    return Value::Null;
                };
                let Some(n) = self.eval(index, data).as_number() else {
                    return Value::Null;
                };
                if n < 0.0 || n.fract() != 0.0 {
                    return Value::Null;
                }
                items.get(n as usize).cloned().unwrap_or(Value::Null)
            }

            Expression::Call { name, args } => self.call_scalar(name, args, data),

            Expression::Chain(steps) => self.eval_chain(steps, data),

            Expression::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition, data).truthy() {
                    self.eval(then_branch, data)
                } else {
                    match else_branch {
                        Some(e) => self.eval(e, data),
                        None => Value::Null,
                    }
                }
            }

            Expression::Assign { name, value } => {
                let v = self.eval(value, data);
                self.scope.insert(name.clone(), v);
                // Assignments render as nothing in a template.
                Value::from("")
            }
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expression,
        rhs: &Expression,
        data: &Value,
    ) -> Value {
        // And/Or short-circuit on truthiness.
        match op {
            BinaryOp::And => {
                let l = self.eval(lhs, data);
                if !l.truthy() {
                    return Value::Bool(false);
                }
                return Value::Bool(self.eval(rhs, data).truthy());
            }
            BinaryOp::Or => {
                let l = self.eval(lhs, data);
                if l.truthy() {
                    return Value::Bool(true);
                }
                return Value::Bool(self.eval(rhs, data).truthy());
            }
            _ => {}
        }

        let l = self.eval(lhs, data);
        let r = self.eval(rhs, data);
        match op {
            BinaryOp::Add => add_values(&l, &r),
            BinaryOp::Subtract => numeric_op(&l, &r, |a, b| Some(a - b)),
            BinaryOp::Multiply => numeric_op(&l, &r, |a, b| Some(a * b)),
            BinaryOp::Divide => numeric_op(&l, &r, |a, b| (b != 0.0).then(|| a / b)),
            BinaryOp::Modulo => numeric_op(&l, &r, |a, b| (b != 0.0).then(|| a % b)),

            BinaryOp::Equal => Value::Bool(compare(&l, &r) == Comparison::Same),
            BinaryOp::NotEqual => Value::Bool(compare(&l, &r) != Comparison::Same),
            BinaryOp::LessThan => Value::Bool(compare(&l, &r) == Comparison::Ascend),
            BinaryOp::LessThanOrEqual => {
                Value::Bool(compare(&l, &r) != Comparison::Descend)
            }
            BinaryOp::GreaterThan => Value::Bool(compare(&l, &r) == Comparison::Descend),
            BinaryOp::GreaterThanOrEqual => {
                Value::Bool(compare(&l, &r) != Comparison::Ascend)
            }

            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn call_scalar(&mut self, name: &str, args: &[Expression], data: &Value) -> Value {
        let Some(kind) = self.registry.resolve_scalar(name, args.len()) else {
            log::debug!("unresolved function {:?}; evaluating to null", name);
            return Value::Null;
        };
        match kind {
            FunctionKind::Unevaluated(f) => f(self, data, args.first()),
            FunctionKind::Evaluated { f, .. } | FunctionKind::Variadic(f) => {
                let values: Vec<Value> = args.iter().map(|a| self.eval(a, data)).collect();
                f(self, &values)
            }
            FunctionKind::Receiver { f, .. } => {
                let values: Vec<Value> = args.iter().map(|a| self.eval(a, data)).collect();
                f(self, data, &values)
            }
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new()
    }
}

/// `Add` is polymorphic: a string operand means concatenation (Null renders
/// empty), a numeric operand means numeric addition with loose coercion,
/// two Nulls stay Null, and anything else concatenates best-effort.
fn add_values(l: &Value, r: &Value) -> Value {
    if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
        return Value::from(format!("{}{}", l.display_string(), r.display_string()));
    }
    if matches!(l, Value::Number(_)) || matches!(r, Value::Number(_)) {
        if let (Some(a), Some(b)) = (l.coerce_number(), r.coerce_number()) {
            return Value::Number(a + b);
        }
    }
    if l.is_null() && r.is_null() {
        return Value::Null;
    }
    Value::from(format!("{}{}", l.display_string(), r.display_string()))
}

/// Strict numeric operators: both operands must be numbers, else Null.
/// Division and remainder by zero also degrade to Null.
fn numeric_op(l: &Value, r: &Value, f: impl Fn(f64, f64) -> Option<f64>) -> Value {
    match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => match f(a, b) {
            Some(n) => Value::Number(n),
            None => Value::Null,
        },
        _ => Value::Null,
    }
}
