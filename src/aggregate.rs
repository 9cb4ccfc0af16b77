// Aggregate evaluator: everything that happens when an expression meets a
// list-like value. Owns the dispatch order (top-N override, leaf call
// override, aggregate names, per-element recursion, fallback) and the
// built-in aggregate library.

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::Expression;
use crate::eval::Evaluator;
use crate::functions::FunctionRegistry;
use crate::group::GroupRef;
use crate::value::{compare, Comparison, Value};

/// Uniform list facade over the two list-like values. A leaf group counts
/// as a one-element list exposing its wrapped record.
#[derive(Clone)]
pub enum ListView {
    Items(Rc<Vec<Value>>),
    Group(GroupRef),
}

impl ListView {
    pub fn of(value: &Value) -> Option<ListView> {
        match value {
            Value::List(items) => Some(ListView::Items(items.clone())),
            Value::Group(g) => Some(ListView::Group(g.clone())),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ListView::Items(items) => items.len(),
            ListView::Group(g) => {
                let b = g.borrow();
                if b.is_leaf() {
                    1
                } else {
                    b.children.len()
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The i-th element; out of range is Null.
    pub fn item(&self, i: usize) -> Value {
        match self {
            ListView::Items(items) => items.get(i).cloned().unwrap_or(Value::Null),
            ListView::Group(g) => {
                let b = g.borrow();
                if let Some(item) = &b.leaf_item {
                    if i == 0 {
                        item.clone()
                    } else {
                        Value::Null
                    }
                } else {
                    match b.children.get(i) {
                        Some(c) => Value::Group(c.clone()),
                        None => Value::Null,
                    }
                }
            }
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, ListView::Group(g) if g.borrow().is_leaf())
    }

    pub fn is_top_n_others(&self) -> bool {
        matches!(self, ListView::Group(g) if g.borrow().is_top_n_others)
    }

    /// Grouping key of the immediate children, for grouped branches.
    pub fn element_key(&self) -> Option<Rc<str>> {
        match self {
            ListView::Group(g) => g
                .borrow()
                .children
                .first()
                .and_then(|c| c.borrow().key.clone()),
            ListView::Items(_) => None,
        }
    }

    pub fn as_value(&self) -> Value {
        match self {
            ListView::Items(items) => Value::List(items.clone()),
            ListView::Group(g) => Value::Group(g.clone()),
        }
    }

    // Identity for cycle guards on shared nodes.
    fn identity(&self) -> usize {
        match self {
            ListView::Items(items) => Rc::as_ptr(items) as *const () as usize,
            ListView::Group(g) => Rc::as_ptr(g) as *const () as usize,
        }
    }
}

/// How an aggregate received its arguments: as the unconsumed chain suffix
/// (`total.Rev`) or as an explicit call list (`total(Rev)`).
pub enum AggArgs<'a> {
    Remainder(&'a [Expression]),
    Call(&'a [Expression]),
}

impl AggArgs<'_> {
    /// The projection expression, if any. A bare aggregate name and an
    /// explicit Null argument both mean "no projection".
    pub fn primary(&self) -> Option<Expression> {
        let expr = match self {
            AggArgs::Remainder(steps) if steps.is_empty() => None,
            AggArgs::Remainder(steps) => Some(Expression::chain(steps.to_vec())),
            AggArgs::Call(args) => args.first().cloned(),
        };
        expr.filter(|e| !e.is_null_literal())
    }

    pub fn second(&self) -> Option<&Expression> {
        match self {
            AggArgs::Call(args) => args.get(1),
            AggArgs::Remainder(_) => None,
        }
    }
}

/// An aggregate function: consumes the whole list view at once.
pub type AggregateFn = fn(&mut Evaluator, &ListView, &AggArgs) -> Value;

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Evaluate one expression over a list-like value.
pub fn evaluate_over_list(ev: &mut Evaluator, list: &Value, expr: &Expression) -> Value {
    evaluate_over_steps(ev, list, std::slice::from_ref(expr))
}

/// Evaluate the remaining chain steps over a list-like value.
pub fn evaluate_over_steps(ev: &mut Evaluator, value: &Value, steps: &[Expression]) -> Value {
    let Some(view) = ListView::of(value) else {
        return ev.eval_chain(steps, value);
    };
    // A lone chain step unwraps so `steps` is the real step sequence.
    if steps.len() == 1 {
        if let Expression::Chain(inner) = &steps[0] {
            return evaluate_over_steps(ev, value, inner);
        }
    }
    if steps.is_empty() {
        return value.clone();
    }

    // A merged "others" bucket answers detail expressions in aggregate:
    // numbers re-total over the merged members, strings become the literal
    // "Others" label. Row keeps its real row number.
    if view.is_top_n_others() && !steps[0].is_exact_key("Row") {
        let naive = dispatch(ev, &view, steps);
        return match naive {
            Value::Number(_) => {
                let projection = Expression::chain(steps.to_vec());
                match sum_view(ev, &view, Some(&projection), false) {
                    Some(n) => Value::Number(n),
                    None => Value::Null,
                }
            }
            Value::Str(_) => Value::from("Others"),
            other => other,
        };
    }

    dispatch(ev, &view, steps)
}

fn dispatch(ev: &mut Evaluator, view: &ListView, steps: &[Expression]) -> Value {
    let first = &steps[0];

    // A function call asked of a leaf applies to the wrapped record.
    if view.is_leaf() {
        if matches!(first, Expression::Call { .. }) {
            let item = view.item(0);
            return ev.eval_chain(steps, &item);
        }
    }

    // Aggregate names shadow data keys on lists.
    match first {
        Expression::Key(name) => {
            if let Some(f) = ev.registry().aggregate(name) {
                return f(ev, view, &AggArgs::Remainder(&steps[1..]));
            }
        }
        Expression::Call { name, args } => {
            if let Some(f) = ev.registry().aggregate(name) {
                let result = f(ev, view, &AggArgs::Call(args));
                return if steps.len() > 1 {
                    ev.eval_chain(&steps[1..], &result)
                } else {
                    result
                };
            }
        }
        _ => {}
    }

    // Elements that are themselves grouped: push the expression down a
    // level and collect the per-element answers.
    if should_recurse(ev, view, steps) {
        let mut out = Vec::with_capacity(view.len());
        for i in 0..view.len() {
            let elem = view.item(i);
            out.push(evaluate_over_steps(ev, &elem, steps));
        }
        return Value::list(out);
    }

    match view {
        // A group is also a value: let it answer through its own accessor
        // (heritage keys, bucket values, first-record data keys). A Null
        // answer retries against the first element, which covers leaves
        // wrapping further hierarchies.
        ListView::Group(_) => {
            let receiver = view.as_value();
            let direct = ev.eval_receiver_steps(steps, &receiver);
            if !direct.is_null() {
                return direct;
            }
            if !view.is_empty() {
                let head = view.item(0);
                return ev.eval_chain(steps, &head);
            }
            Value::Null
        }
        // A plain list projects element-wise.
        ListView::Items(_) => {
            let mut out = Vec::with_capacity(view.len());
            for i in 0..view.len() {
                out.push(ev.eval_chain(steps, &view.item(i)));
            }
            Value::list(out)
        }
    }
}

/// Whether a non-aggregate expression recurses into the elements rather
/// than being answered at this level. Requires grouped (non-leaf) elements;
/// an expression that is exactly the children's own grouping key stays at
/// this level, a bare Null literal always descends.
fn should_recurse(ev: &Evaluator, view: &ListView, steps: &[Expression]) -> bool {
    if view.is_empty() || view.is_leaf() {
        return false;
    }
    let head = view.item(0);
    let Some(sub) = ListView::of(&head) else {
        return false;
    };
    if sub.is_leaf() {
        return false;
    }
    if let Some(name) = steps[0].head_name() {
        if ev.registry().is_aggregate(name) {
            return false;
        }
    }
    if steps[0].is_null_literal() {
        return true;
    }
    // Heritage keys navigate from this node, never from its elements.
    if let Expression::Key(name) = &steps[0] {
        if matches!(
            name.as_str(),
            "Up" | "Row" | "Running" | "Remaining" | "Parent" | "Page"
        ) {
            return false;
        }
    }
    if let Some(key) = view.element_key() {
        if steps.len() == 1 && steps[0].is_exact_key(&key) {
            return false;
        }
    }
    true
}

// ── Projection helpers ───────────────────────────────────────────────────────

fn eval_on(ev: &mut Evaluator, elem: &Value, arg: Option<&Expression>) -> Value {
    match arg {
        Some(expr) => ev.evaluate(expr, elem),
        None => elem.clone(),
    }
}

/// Evaluate `arg` against every leaf below the view, depth-first. The leaf
/// group itself is the receiver, so projections may use heritage keys and
/// nested aggregates; without a projection the wrapped record is taken.
/// Shared branch nodes are visited once.
fn project_leaves(
    ev: &mut Evaluator,
    view: &ListView,
    arg: Option<&Expression>,
    visited: &mut HashSet<usize>,
    out: &mut Vec<Value>,
) {
    for i in 0..view.len() {
        let elem = view.item(i);
        match ListView::of(&elem) {
            Some(sub) if sub.is_leaf() => match arg {
                Some(expr) => out.push(ev.evaluate(expr, &elem)),
                None => out.push(sub.item(0)),
            },
            Some(sub) => {
                if visited.insert(sub.identity()) {
                    project_leaves(ev, &sub, arg, visited, out);
                }
            }
            None => out.push(eval_on(ev, &elem, arg)),
        }
    }
}

/// Collect the leaf records themselves.
fn collect_items(view: &ListView, visited: &mut HashSet<usize>, out: &mut Vec<Value>) {
    for i in 0..view.len() {
        let elem = view.item(i);
        match ListView::of(&elem) {
            Some(sub) if sub.is_leaf() => out.push(sub.item(0)),
            Some(sub) => {
                if visited.insert(sub.identity()) {
                    collect_items(&sub, visited, out);
                }
            }
            None => out.push(elem),
        }
    }
}

/// Deep sum. Loose mode coerces Null/Bool and skips anything else; strict
/// mode nulls the whole sum on the first non-number.
fn sum_view(
    ev: &mut Evaluator,
    view: &ListView,
    arg: Option<&Expression>,
    strict: bool,
) -> Option<f64> {
    let mut vals = Vec::new();
    project_leaves(ev, view, arg, &mut HashSet::new(), &mut vals);
    let mut total = 0.0;
    for v in &vals {
        if strict && !matches!(v, Value::Number(_)) {
            return None;
        }
        if let Some(n) = v.coerce_number() {
            total += n;
        }
    }
    Some(total)
}

// ── Built-in aggregates ──────────────────────────────────────────────────────

pub fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register_aggregate("total", agg_total);
    // Legacy alias kept so existing templates keep working.
    registry.register_aggregate("total2", agg_total);
    registry.register_aggregate("totalX", agg_total_strict);
    registry.register_aggregate("count", agg_count);
    registry.register_aggregate("countDeep", agg_count_deep);
    registry.register_aggregate("countUnique", agg_count_unique);
    registry.register_aggregate("average", agg_average);
    registry.register_aggregate("averageX", agg_average_strict);
    registry.register_aggregate("min", agg_min);
    registry.register_aggregate("max", agg_max);
    registry.register_aggregate("get", agg_get);
    registry.register_aggregate("filter", agg_filter);
    registry.register_aggregate("group", agg_group);
    registry.register_aggregate("join", agg_join);
    registry.register_aggregate("listOf", agg_list_of);
}

fn agg_total(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    match sum_view(ev, view, args.primary().as_ref(), false) {
        Some(n) => Value::Number(n),
        None => Value::Null,
    }
}

fn agg_total_strict(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    match sum_view(ev, view, args.primary().as_ref(), true) {
        Some(n) => Value::Number(n),
        None => Value::Null,
    }
}

/// count - immediate element count; with a projection, the count of
/// elements where it evaluates truthy.
fn agg_count(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    match args.primary() {
        None => Value::from(view.len()),
        Some(cond) => {
            let mut n = 0usize;
            for i in 0..view.len() {
                let elem = view.item(i);
                if ev.evaluate(&cond, &elem).truthy() {
                    n += 1;
                }
            }
            Value::from(n)
        }
    }
}

/// countDeep - leaf record count across all levels.
fn agg_count_deep(_ev: &mut Evaluator, view: &ListView, _args: &AggArgs) -> Value {
    fn walk(view: &ListView, visited: &mut HashSet<usize>) -> usize {
        let mut n = 0;
        for i in 0..view.len() {
            let elem = view.item(i);
            match ListView::of(&elem) {
                Some(sub) if sub.is_leaf() => n += 1,
                Some(sub) => {
                    if visited.insert(sub.identity()) {
                        n += walk(&sub, visited);
                    }
                }
                None => n += 1,
            }
        }
        n
    }
    Value::from(walk(view, &mut HashSet::new()))
}

/// countUnique - number of distinct projected values, by the canonical
/// comparator (so string comparison is case-insensitive here too).
fn agg_count_unique(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    let arg = args.primary();
    let mut vals = Vec::new();
    project_leaves(ev, view, arg.as_ref(), &mut HashSet::new(), &mut vals);
    let mut distinct: Vec<Value> = Vec::new();
    for v in vals {
        if !distinct.iter().any(|d| compare(d, &v) == Comparison::Same) {
            distinct.push(v);
        }
    }
    Value::from(distinct.len())
}

fn agg_average(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    average_view(ev, view, args, false)
}

fn agg_average_strict(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    average_view(ev, view, args, true)
}

fn average_view(ev: &mut Evaluator, view: &ListView, args: &AggArgs, strict: bool) -> Value {
    let arg = args.primary();
    let mut vals = Vec::new();
    project_leaves(ev, view, arg.as_ref(), &mut HashSet::new(), &mut vals);
    if vals.is_empty() {
        return Value::Null;
    }
    let mut total = 0.0;
    for v in &vals {
        if strict && !matches!(v, Value::Number(_)) {
            return Value::Null;
        }
        total += v.coerce_number().unwrap_or(0.0);
    }
    Value::Number(total / vals.len() as f64)
}

fn agg_min(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    extremum(ev, view, args, Comparison::Ascend)
}

fn agg_max(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    extremum(ev, view, args, Comparison::Descend)
}

fn extremum(ev: &mut Evaluator, view: &ListView, args: &AggArgs, wanted: Comparison) -> Value {
    let arg = args.primary();
    let mut vals = Vec::new();
    project_leaves(ev, view, arg.as_ref(), &mut HashSet::new(), &mut vals);
    let mut best: Option<Value> = None;
    for v in vals {
        if v.is_null() {
            continue;
        }
        best = match best {
            None => Some(v),
            Some(b) => {
                if compare(&v, &b) == wanted {
                    Some(v)
                } else {
                    Some(b)
                }
            }
        };
    }
    best.unwrap_or(Value::Null)
}

/// get - first element; with a projection, the first element where it
/// evaluates truthy.
fn agg_get(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    let cond = args.primary();
    for i in 0..view.len() {
        let elem = view.item(i);
        match &cond {
            None => return elem,
            Some(c) if ev.evaluate(c, &elem).truthy() => return elem,
            _ => {}
        }
    }
    Value::Null
}

/// filter - elements where the projection evaluates truthy.
fn agg_filter(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    let Some(cond) = args.primary() else {
        return view.as_value();
    };
    let mut out = Vec::new();
    for i in 0..view.len() {
        let elem = view.item(i);
        if ev.evaluate(&cond, &elem).truthy() {
            out.push(elem);
        }
    }
    Value::list(out)
}

/// group - ad-hoc regrouping of the flattened leaf records by the given
/// key expressions, producing a fresh group tree.
fn agg_group(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    let keys: Vec<Expression> = match args {
        AggArgs::Call(a) => a.iter().filter(|e| !e.is_null_literal()).cloned().collect(),
        AggArgs::Remainder(steps) if !steps.is_empty() => {
            vec![Expression::chain(steps.to_vec())]
        }
        AggArgs::Remainder(_) => Vec::new(),
    };
    if keys.is_empty() {
        return view.as_value();
    }
    let mut records = Vec::new();
    collect_items(view, &mut HashSet::new(), &mut records);
    Value::Group(crate::grouper::build_with_keys(ev, &records, &keys))
}

/// join - projected leaf values as one delimited string; Null values drop
/// out, the delimiter defaults to ", ".
fn agg_join(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    let arg = args.primary();
    let separator = match args.second() {
        Some(sep) => {
            let receiver = view.as_value();
            ev.evaluate(sep, &receiver).display_string()
        }
        None => ", ".to_string(),
    };
    let mut vals = Vec::new();
    project_leaves(ev, view, arg.as_ref(), &mut HashSet::new(), &mut vals);
    let parts: Vec<String> = vals
        .iter()
        .filter(|v| !v.is_null())
        .map(Value::display_string)
        .collect();
    Value::from(parts.join(&separator))
}

/// listOf - immediate element-wise projection, no flattening.
fn agg_list_of(ev: &mut Evaluator, view: &ListView, args: &AggArgs) -> Value {
    let arg = args.primary();
    let mut out = Vec::with_capacity(view.len());
    for i in 0..view.len() {
        out.push(eval_on(ev, &view.item(i), arg.as_ref()));
    }
    Value::list(out)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{attach, Group};
    use crate::value::MapRecord;

    fn rec(name: &str, rev: f64) -> Value {
        MapRecord::new()
            .with("Name", name)
            .with("Rev", rev)
            .into_value()
    }

    fn record_list() -> Value {
        Value::list(vec![rec("a", 5.0), rec("b", 10.0), rec("c", 1.0)])
    }

    /// Branch bucket of `key = value` wrapping one leaf per record.
    fn bucket(key: &str, value: &str, records: Vec<Value>) -> GroupRef {
        let g = Group::branch(Some(key.into()), Value::from(value));
        let leaves: Vec<GroupRef> = records.into_iter().map(Group::leaf).collect();
        for leaf in &leaves {
            attach(&g, leaf);
        }
        g.borrow_mut().children = leaves;
        g
    }

    #[test]
    fn test_total_remainder_form() {
        let mut ev = Evaluator::new();
        let data = record_list();
        // total.Rev arrives as the chain [total, Rev].
        let e = Expression::keychain("total.Rev");
        assert_eq!(ev.evaluate(&e, &data), Value::from(16.0));
    }

    #[test]
    fn test_total_call_form_with_expression() {
        let mut ev = Evaluator::new();
        let data = record_list();
        let e = Expression::call(
            "total",
            vec![Expression::binary(
                crate::ast::BinaryOp::Multiply,
                Expression::key("Rev"),
                Expression::number(2.0),
            )],
        );
        assert_eq!(ev.evaluate(&e, &data), Value::from(32.0));
    }

    #[test]
    fn test_total_over_plain_numbers() {
        let mut ev = Evaluator::new();
        let data = Value::list(vec![Value::from(1.0), Value::from(2.0), Value::Null]);
        assert_eq!(
            evaluate_over_list(&mut ev, &data, &Expression::key("total")),
            Value::from(3.0)
        );
        // Strict variant nulls out on the Null element.
        assert_eq!(
            evaluate_over_list(&mut ev, &data, &Expression::key("totalX")),
            Value::Null
        );
    }

    #[test]
    fn test_count_and_count_deep() {
        let mut ev = Evaluator::new();
        let root = Group::new_root();
        let a = bucket("Cat", "A", vec![rec("x", 5.0), rec("y", 10.0)]);
        let b = bucket("Cat", "B", vec![rec("z", 7.0)]);
        attach(&root, &a);
        attach(&root, &b);
        root.borrow_mut().children = vec![a, b];
        let data = Value::Group(root);

        // count is immediate: two buckets.
        let e = Expression::call("count", vec![Expression::null()]);
        assert_eq!(ev.evaluate(&e, &data), Value::from(2.0));
        // countDeep reaches the leaves.
        assert_eq!(ev.evaluate(&Expression::key("countDeep"), &data), Value::from(3.0));
    }

    #[test]
    fn test_count_with_condition() {
        let mut ev = Evaluator::new();
        let data = record_list();
        let e = Expression::call(
            "count",
            vec![Expression::binary(
                crate::ast::BinaryOp::GreaterThan,
                Expression::key("Rev"),
                Expression::number(4.0),
            )],
        );
        assert_eq!(ev.evaluate(&e, &data), Value::from(2.0));
    }

    #[test]
    fn test_count_unique_case_insensitive() {
        let mut ev = Evaluator::new();
        let data = Value::list(vec![
            rec("Apple", 1.0),
            rec("aPPLE", 2.0),
            rec("pear", 3.0),
        ]);
        let e = Expression::keychain("countUnique.Name");
        assert_eq!(ev.evaluate(&e, &data), Value::from(2.0));
    }

    #[test]
    fn test_min_max_average() {
        let mut ev = Evaluator::new();
        let data = record_list();
        assert_eq!(ev.evaluate(&Expression::keychain("min.Rev"), &data), Value::from(1.0));
        assert_eq!(ev.evaluate(&Expression::keychain("max.Rev"), &data), Value::from(10.0));
        let avg = ev.evaluate(&Expression::keychain("average.Rev"), &data);
        assert_eq!(avg, Value::from(16.0 / 3.0));
    }

    #[test]
    fn test_get_and_filter() {
        let mut ev = Evaluator::new();
        let data = record_list();
        let cond = Expression::binary(
            crate::ast::BinaryOp::GreaterThan,
            Expression::key("Rev"),
            Expression::number(6.0),
        );
        let got = ev.evaluate(&Expression::call("get", vec![cond.clone()]), &data);
        assert_eq!(got.resolve_key("Name"), Value::from("b"));

        let kept = ev.evaluate(&Expression::call("filter", vec![cond]), &data);
        assert_eq!(kept.as_list().map(Vec::len), Some(1));
    }

    #[test]
    fn test_join() {
        let mut ev = Evaluator::new();
        let data = record_list();
        assert_eq!(
            ev.evaluate(&Expression::keychain("join.Name"), &data),
            Value::from("a, b, c")
        );
        let e = Expression::call(
            "join",
            vec![Expression::key("Name"), Expression::string("|")],
        );
        assert_eq!(ev.evaluate(&e, &data), Value::from("a|b|c"));
    }

    #[test]
    fn test_list_of_projection() {
        let mut ev = Evaluator::new();
        let data = record_list();
        let out = ev.evaluate(&Expression::keychain("listOf.Rev"), &data);
        assert_eq!(
            out,
            Value::list(vec![Value::from(5.0), Value::from(10.0), Value::from(1.0)])
        );
    }

    #[test]
    fn test_plain_list_projects_element_wise() {
        let mut ev = Evaluator::new();
        let data = record_list();
        // A non-aggregate key over a plain list maps over the elements.
        let out = ev.evaluate(&Expression::key("Name"), &data);
        assert_eq!(
            out,
            Value::list(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
    }

    #[test]
    fn test_group_answers_its_own_keys() {
        let mut ev = Evaluator::new();
        let g = bucket("Cat", "A", vec![rec("x", 5.0), rec("y", 10.0)]);
        let data = Value::Group(g);
        // The bucket key answers at this level, not per element.
        assert_eq!(ev.evaluate(&Expression::key("Cat"), &data), Value::from("A"));
        // Aggregates still reach the members.
        assert_eq!(ev.evaluate(&Expression::keychain("total.Rev"), &data), Value::from(15.0));
    }

    #[test]
    fn test_others_bucket_overrides() {
        let mut ev = Evaluator::new();
        let root = Group::new_root();
        let others = bucket("Cat", "Others", vec![rec("x", 5.0), rec("y", 10.0)]);
        others.borrow_mut().is_top_n_others = true;
        attach(&root, &others);
        root.borrow_mut().children = vec![others.clone()];
        let data = Value::Group(others);

        // Numeric answers re-total over the merged members.
        assert_eq!(ev.evaluate(&Expression::key("Rev"), &data), Value::from(15.0));
        // String answers collapse to the label.
        assert_eq!(ev.evaluate(&Expression::key("Name"), &data), Value::from("Others"));
        // Row passes through untouched.
        assert_eq!(ev.evaluate(&Expression::key("Row"), &data), Value::from(1.0));
    }

    #[test]
    fn test_ad_hoc_group_aggregate() {
        let mut ev = Evaluator::new();
        let data = Value::list(vec![
            rec("x", 5.0),
            rec("x", 10.0),
            rec("y", 1.0),
        ]);
        let e = Expression::call("group", vec![Expression::key("Name")]);
        let grouped = ev.evaluate(&e, &data);
        let g = grouped.as_group().expect("group result").clone();
        assert_eq!(g.borrow().children.len(), 2);
        // The fresh tree supports aggregation per bucket.
        let first = Value::Group(g.borrow().children[0].clone());
        assert_eq!(
            ev.evaluate(&Expression::keychain("total.Rev"), &first),
            Value::from(15.0)
        );
    }

    #[test]
    fn test_aggregate_call_with_chain_continuation() {
        let mut ev = Evaluator::new();
        let data = record_list();
        // filter(...).count — the call result feeds the rest of the chain.
        let cond = Expression::binary(
            crate::ast::BinaryOp::GreaterThan,
            Expression::key("Rev"),
            Expression::number(4.0),
        );
        let e = Expression::chain(vec![
            Expression::call("filter", vec![cond]),
            Expression::key("count"),
        ]);
        assert_eq!(ev.evaluate(&e, &data), Value::from(2.0));
    }
}
