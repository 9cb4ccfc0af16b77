// End-to-end tests through the public API: grouping real record sets and
// evaluating expressions against the resulting trees.

use reportcore::{
    compare, Comparison, Evaluator, Expression, Grouper, Grouping, MapRecord, Sort, TopNSort,
    Value,
};

fn rec(cat: &str, rev: f64) -> Value {
    MapRecord::new()
        .with("Cat", cat)
        .with("Rev", rev)
        .into_value()
}

fn cat_records() -> Vec<Value> {
    vec![rec("A", 10.0), rec("A", 5.0), rec("B", 7.0)]
}

fn group_by_cat(ev: &mut Evaluator, records: &[Value]) -> reportcore::GroupRef {
    Grouper::new()
        .build(ev, records, &[Grouping::new("Cat"), Grouping::details()])
        .expect("grouping keys parse")
}

#[test]
fn comparator_symmetry_within_a_type() {
    let pairs = [
        (Value::from(1.0), Value::from(2.0)),
        (Value::from("alpha"), Value::from("beta")),
        (Value::from(false), Value::from(true)),
    ];
    for (a, b) in &pairs {
        assert_eq!(compare(a, b), Comparison::Ascend);
        assert_eq!(compare(b, a), Comparison::Descend);
    }
    // Symmetry is not promised across mixed types: the fallback orders
    // unequal unrelated values Ascend both ways.
    let n = Value::from(1.0);
    let b = Value::from(true);
    assert_eq!(compare(&n, &b), Comparison::Ascend);
    assert_eq!(compare(&b, &n), Comparison::Ascend);
}

#[test]
fn total_matches_manual_sum_on_flat_list() {
    let mut ev = Evaluator::new();
    let records = cat_records();
    let data = Value::list(records.clone());
    let total = ev.evaluate(&Expression::keychain("total.Rev"), &data);

    let manual: f64 = records
        .iter()
        .map(|r| r.resolve_key("Rev").as_number().unwrap_or(0.0))
        .sum();
    assert_eq!(total, Value::from(manual));
}

#[test]
fn grouping_then_flattening_recovers_the_records() {
    let mut ev = Evaluator::new();
    let records = cat_records();
    let root = group_by_cat(&mut ev, &records);

    let mut items = Vec::new();
    reportcore::group::leaf_items(&root, &mut items);
    assert_eq!(items.len(), records.len());
    for r in &records {
        // Records compare by identity, so this checks the actual objects
        // survived, not lookalikes.
        assert_eq!(items.iter().filter(|i| *i == r).count(), 1);
    }
}

#[test]
fn top_n_with_others_yields_stay_plus_one_merged_bucket() {
    let mut ev = Evaluator::new();
    let records: Vec<Value> = (0..5).map(|i| rec(&format!("C{}", i), i as f64)).collect();
    let grouping = Grouping::new("Cat").with_top_n(TopNSort {
        sort: Some(Sort::descending("total.Rev")),
        count: 2,
        include_others: true,
        pad: false,
    });
    let root = Grouper::new()
        .build(&mut ev, &records, &[grouping, Grouping::details()])
        .unwrap();

    let children = root.borrow().children.clone();
    assert_eq!(children.len(), 3);
    let flags: Vec<bool> = children.iter().map(|c| c.borrow().is_top_n_others).collect();
    assert_eq!(flags, vec![false, false, true]);

    // The others bucket answers numeric expressions with a total over its
    // merged members and string expressions with the literal label.
    let others = Value::Group(children[2].clone());
    assert_eq!(
        ev.evaluate(&Expression::key("Rev"), &others),
        Value::from(0.0 + 1.0 + 2.0)
    );
    assert_eq!(
        ev.evaluate(&Expression::key("Cat"), &others),
        Value::from("Others")
    );
    assert_eq!(ev.evaluate(&Expression::key("Row"), &others), Value::from(3.0));
}

#[test]
fn top_n_pad_appends_empty_clones() {
    let mut ev = Evaluator::new();
    let records: Vec<Value> = (0..3).map(|i| rec(&format!("C{}", i), i as f64)).collect();
    let grouping = Grouping::new("Cat").with_top_n(TopNSort {
        sort: None,
        count: 5,
        include_others: false,
        pad: true,
    });
    let root = Grouper::new()
        .build(&mut ev, &records, &[grouping, Grouping::details()])
        .unwrap();

    let children = root.borrow().children.clone();
    assert_eq!(children.len(), 5);
    for pad in &children[3..] {
        assert_eq!(pad.borrow().value, Value::Null);
        // Shape preserved, data cleared: a padded row totals to zero.
        let v = ev.evaluate(
            &Expression::keychain("total.Rev"),
            &Value::Group(pad.clone()),
        );
        assert_eq!(v, Value::from(0.0));
    }
}

#[test]
fn assignments_are_session_scoped() {
    let data = rec("A", 1.0);
    let assign = Expression::assign("x", Expression::number(5.0));
    let read = Expression::key("x");

    let mut ev = Evaluator::new();
    assert_eq!(ev.evaluate(&assign, &data), Value::from(""));
    assert_eq!(ev.evaluate(&read, &data), Value::from(5.0));

    let mut fresh = Evaluator::new();
    assert_eq!(fresh.evaluate(&read, &data), Value::Null);
}

#[test]
fn chain_over_a_list_projects_without_explicit_aggregate() {
    let movie = |title: &str, studio: &str| {
        MapRecord::new()
            .with("Title", title)
            .with("Studio", MapRecord::new().with("Name", studio).into_value())
            .into_value()
    };
    let root = MapRecord::new()
        .with(
            "Movies",
            Value::list(vec![
                movie("One", "Alpha Films"),
                movie("Two", "Beta Pictures"),
            ]),
        )
        .into_value();

    let mut ev = Evaluator::new();
    let names = ev.evaluate(&Expression::keychain("Movies.Studio.Name"), &root);
    assert_eq!(
        names,
        Value::list(vec![
            Value::from("Alpha Films"),
            Value::from("Beta Pictures"),
        ])
    );
}

#[test]
fn grouped_scenario_totals_and_counts() {
    let mut ev = Evaluator::new();
    let root = group_by_cat(&mut ev, &cat_records());
    assert_eq!(root.borrow().children.len(), 2);

    let a = Value::Group(root.borrow().children[0].clone());
    assert_eq!(
        ev.evaluate(&Expression::keychain("total.Rev"), &a),
        Value::from(15.0)
    );

    let data = Value::Group(root.clone());
    let count = Expression::call("count", vec![Expression::null()]);
    assert_eq!(ev.evaluate(&count, &data), Value::from(2.0));
    assert_eq!(
        ev.evaluate(&Expression::key("countDeep"), &data),
        Value::from(3.0)
    );
}

#[test]
fn heritage_keys_resolve_through_expressions() {
    let mut ev = Evaluator::new();
    let root = group_by_cat(&mut ev, &cat_records());
    let b = Value::Group(root.borrow().children[1].clone());

    assert_eq!(ev.evaluate(&Expression::key("Row"), &b), Value::from(2.0));
    // Up.countDeep sees the whole tree from the bucket.
    assert_eq!(
        ev.evaluate(&Expression::keychain("Up.countDeep"), &b),
        Value::from(3.0)
    );
    // Running from B covers both buckets, Remaining is empty.
    assert_eq!(
        ev.evaluate(&Expression::keychain("Running.countDeep"), &b),
        Value::from(3.0)
    );
    assert_eq!(
        ev.evaluate(&Expression::keychain("Remaining.countDeep"), &b),
        Value::from(0.0)
    );
}

#[test]
fn page_scoped_running_view() {
    let mut ev = Evaluator::new();
    let root = group_by_cat(&mut ev, &cat_records());
    // Page covers the second and third records.
    let a = root.borrow().children[0].clone();
    let b = root.borrow().children[1].clone();
    let page_start = a.borrow().children[1].clone();
    let page_end = b.borrow().children[0].clone();

    let view = reportcore::group::running_view(&root, &page_start, &page_end);
    let data = Value::Group(view);

    // The running view totals everything printed so far (all three).
    assert_eq!(
        ev.evaluate(&Expression::keychain("total.Rev"), &data),
        Value::from(22.0)
    );
    // Page narrows to the two records on this page.
    assert_eq!(
        ev.evaluate(&Expression::keychain("Page.total.Rev"), &data),
        Value::from(12.0)
    );
    // Up is the unsliced source.
    assert_eq!(
        ev.evaluate(&Expression::keychain("Up.countDeep"), &data),
        Value::from(3.0)
    );
}

#[test]
fn registered_functions_extend_the_evaluator() {
    use reportcore::{FunctionKind, FunctionRegistry};
    use std::rc::Rc;

    let mut registry = FunctionRegistry::with_defaults();
    registry.register_scalar(
        "double",
        FunctionKind::Evaluated {
            arity: 1,
            f: |_ev, args| match args.first().and_then(Value::as_number) {
                Some(n) => Value::from(n * 2.0),
                None => Value::Null,
            },
        },
    );
    let mut ev = Evaluator::with_registry(Rc::new(registry));
    let data = rec("A", 21.0);
    let e = Expression::call("double", vec![Expression::key("Rev")]);
    assert_eq!(ev.evaluate(&e, &data), Value::from(42.0));
}

#[test]
fn evaluation_is_total_on_bad_input() {
    let mut ev = Evaluator::new();
    let data = rec("A", 1.0);

    // Arithmetic on a string, unknown function, out-of-range index: all
    // degrade to Null, none abort.
    let bad = [
        Expression::binary(
            reportcore::BinaryOp::Subtract,
            Expression::key("Cat"),
            Expression::number(1.0),
        ),
        Expression::call("definitelyNotRegistered", vec![]),
        Expression::Index {
            list: Box::new(Expression::key("Cat")),
            index: Box::new(Expression::number(0.0)),
        },
    ];
    for e in &bad {
        assert_eq!(ev.evaluate(e, &data), Value::Null);
    }
}
