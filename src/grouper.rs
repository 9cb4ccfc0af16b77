// Grouping engine: turns a flat record list plus an ordered list of
// Grouping specs into a nested Group tree, with per-level top-N truncation
// and multi-key sorting. Grouping specs are plain serializable data, the
// shape templates declare them in.

use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ast::Expression;
use crate::cache::{ExpressionCache, ParseError};
use crate::eval::Evaluator;
use crate::group::{self, attach, Group, GroupRef};
use crate::value::{compare, Comparison, Value};

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// One sort criterion: a key expression and a direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sort {
    pub key: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl Sort {
    pub fn ascending(key: impl Into<String>) -> Self {
        Sort {
            key: key.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Sort {
            key: key.into(),
            order: SortOrder::Descending,
        }
    }
}

/// Top-N truncation policy for one level. `count == 0` disables it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopNSort {
    pub sort: Option<Sort>,
    pub count: usize,
    pub include_others: bool,
    pub pad: bool,
}

/// One level of a multi-level grouping specification.
///
/// The last grouping in a list is the leaf level: its key does no further
/// bucketing, every remaining record becomes a singleton leaf, and only its
/// sorts and top-N policy apply. The presentation flags are pass-through
/// data for the renderer and are not consumed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Grouping {
    pub key: String,
    pub sorts: Vec<Sort>,
    pub top_n: TopNSort,
    /// Explicit bucket values, pre-seeding bucket order.
    pub values: Vec<Value>,
    pub sort_on_values: bool,
    pub include_values: bool,
    pub include_all_values: bool,
    pub has_header: bool,
    pub has_details: bool,
    pub has_summary: bool,
}

impl Default for Grouping {
    fn default() -> Self {
        Grouping {
            key: String::new(),
            sorts: Vec::new(),
            top_n: TopNSort::default(),
            values: Vec::new(),
            sort_on_values: false,
            include_values: false,
            include_all_values: false,
            has_header: false,
            has_details: true,
            has_summary: false,
        }
    }
}

impl Grouping {
    pub fn new(key: impl Into<String>) -> Self {
        Grouping {
            key: key.into(),
            ..Grouping::default()
        }
    }

    /// The trailing leaf level: one leaf per record, no bucketing.
    pub fn details() -> Self {
        Grouping::default()
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_top_n(mut self, top_n: TopNSort) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = values;
        self
    }
}

// ── Parsed levels ────────────────────────────────────────────────────────────

struct ParsedTopN {
    sort: Option<(Rc<Expression>, SortOrder)>,
    count: usize,
    include_others: bool,
    pad: bool,
}

struct ParsedLevel {
    /// Bucketing expression; None for the leaf level.
    key: Option<Rc<Expression>>,
    key_name: Option<Rc<str>>,
    sorts: Vec<(Rc<Expression>, SortOrder)>,
    top_n: Option<ParsedTopN>,
    values: Vec<Value>,
    sort_on_values: bool,
    include_values: bool,
    include_all_values: bool,
}

impl ParsedLevel {
    fn leaf() -> Self {
        ParsedLevel {
            key: None,
            key_name: None,
            sorts: Vec::new(),
            top_n: None,
            values: Vec::new(),
            sort_on_values: false,
            include_values: false,
            include_all_values: false,
        }
    }
}

// ── Bucket identity ──────────────────────────────────────────────────────────

/// Hashable stand-in for a bucket value. Scalars bucket by value (strings
/// case-insensitively, matching the comparator); compound values bucket by
/// identity so cyclic record graphs never get deep-compared.
#[derive(PartialEq, Eq, Hash)]
enum BucketKey {
    Null,
    Bool(bool),
    Num(u64),
    Str(String),
    Date(i64),
    Ident(usize),
}

impl BucketKey {
    fn of(v: &Value) -> BucketKey {
        match v {
            Value::Null => BucketKey::Null,
            Value::Bool(b) => BucketKey::Bool(*b),
            Value::Number(n) => BucketKey::Num(n.to_bits()),
            Value::Str(s) => BucketKey::Str(s.to_lowercase()),
            Value::Date(d) => BucketKey::Date(d.timestamp_millis()),
            Value::List(items) => BucketKey::Ident(Rc::as_ptr(items) as *const () as usize),
            Value::Record(r) => BucketKey::Ident(Rc::as_ptr(r) as *const () as usize),
            Value::Group(g) => BucketKey::Ident(Rc::as_ptr(g) as *const () as usize),
        }
    }
}

// ── Grouper ──────────────────────────────────────────────────────────────────

/// Builds group trees. Owns the expression cache for grouping and sort
/// keys, so repeated builds re-parse nothing.
pub struct Grouper {
    cache: ExpressionCache,
}

impl Grouper {
    /// Grouper over the built-in dotted key-chain reader.
    pub fn new() -> Self {
        Grouper {
            cache: ExpressionCache::keychains(),
        }
    }

    /// Grouper over a host-supplied expression parser.
    pub fn with_cache(cache: ExpressionCache) -> Self {
        Grouper { cache }
    }

    /// Build the nested group tree for `records` per `groupings`.
    ///
    /// All key expressions are parsed up front, so malformed text fails the
    /// build before any bucketing happens. With no groupings at all, every
    /// record becomes a leaf under the root.
    pub fn build(
        &self,
        ev: &mut Evaluator,
        records: &[Value],
        groupings: &[Grouping],
    ) -> Result<GroupRef, ParseError> {
        let levels = self.parse_levels(groupings)?;
        let root = Group::new_root();
        let children = if levels.is_empty() {
            records.iter().cloned().map(Group::leaf).collect()
        } else {
            build_level(ev, &levels, 0, records, records)
        };
        for child in &children {
            attach(&root, child);
        }
        root.borrow_mut().children = children;
        Ok(root)
    }

    fn parse_levels(&self, groupings: &[Grouping]) -> Result<Vec<ParsedLevel>, ParseError> {
        let mut levels = Vec::with_capacity(groupings.len());
        for (i, g) in groupings.iter().enumerate() {
            let last = i + 1 == groupings.len();
            let (key, key_name) = if last {
                (None, None)
            } else {
                (
                    Some(self.cache.get(&g.key)?),
                    Some(Rc::<str>::from(g.key.as_str())),
                )
            };
            let mut sorts = Vec::with_capacity(g.sorts.len());
            for s in &g.sorts {
                sorts.push((self.cache.get(&s.key)?, s.order));
            }
            let top_n = if g.top_n.count > 0 {
                Some(ParsedTopN {
                    sort: match &g.top_n.sort {
                        Some(s) => Some((self.cache.get(&s.key)?, s.order)),
                        None => None,
                    },
                    count: g.top_n.count,
                    include_others: g.top_n.include_others,
                    pad: g.top_n.pad,
                })
            } else {
                None
            };
            levels.push(ParsedLevel {
                key,
                key_name,
                sorts,
                top_n,
                values: g.values.clone(),
                sort_on_values: g.sort_on_values,
                include_values: g.include_values,
                include_all_values: g.include_all_values,
            });
        }
        Ok(levels)
    }
}

impl Default for Grouper {
    fn default() -> Self {
        Grouper::new()
    }
}

/// Ad-hoc tree for the `group` aggregate: one level per key expression plus
/// the implicit leaf level, no sorts or truncation.
pub(crate) fn build_with_keys(
    ev: &mut Evaluator,
    records: &[Value],
    keys: &[Expression],
) -> GroupRef {
    let mut levels: Vec<ParsedLevel> = keys
        .iter()
        .map(|k| ParsedLevel {
            key: Some(Rc::new(k.clone())),
            key_name: k.head_name().map(Rc::from),
            ..ParsedLevel::leaf()
        })
        .collect();
    levels.push(ParsedLevel::leaf());

    let root = Group::new_root();
    let children = build_level(ev, &levels, 0, records, records);
    for child in &children {
        attach(&root, child);
    }
    root.borrow_mut().children = children;
    root
}

// ── Build ────────────────────────────────────────────────────────────────────

fn build_level(
    ev: &mut Evaluator,
    levels: &[ParsedLevel],
    idx: usize,
    items: &[Value],
    all: &[Value],
) -> Vec<GroupRef> {
    let level = &levels[idx];

    let mut children = match &level.key {
        // Leaf level: one leaf per record, no further bucketing.
        None => items.iter().cloned().map(Group::leaf).collect(),
        Some(key_expr) => {
            // First-seen-value order, unless seed values come first.
            let mut buckets: IndexMap<BucketKey, (Value, Vec<Value>)> = IndexMap::new();
            if level.include_values {
                for v in &level.values {
                    buckets
                        .entry(BucketKey::of(v))
                        .or_insert_with(|| (v.clone(), Vec::new()));
                }
            }
            if level.include_all_values {
                // Every distinct value of this key across the whole record
                // set, so categories absent from this branch still render.
                for item in all {
                    let v = ev.evaluate(key_expr, item);
                    buckets
                        .entry(BucketKey::of(&v))
                        .or_insert_with(|| (v, Vec::new()));
                }
            }
            for item in items {
                let v = ev.evaluate(key_expr, item);
                buckets
                    .entry(BucketKey::of(&v))
                    .or_insert_with(|| (v, Vec::new()))
                    .1
                    .push(item.clone());
            }

            let mut nodes = Vec::with_capacity(buckets.len());
            for (_, (value, members)) in buckets {
                let node = Group::branch(level.key_name.clone(), value);
                let sub = build_level(ev, levels, idx + 1, &members, all);
                for child in &sub {
                    attach(&node, child);
                }
                node.borrow_mut().children = sub;
                nodes.push(node);
            }
            nodes
        }
    };

    apply_top_n(ev, level, &mut children);
    apply_sorts(ev, level, &mut children);
    children
}

// ── Top-N ────────────────────────────────────────────────────────────────────

fn apply_top_n(ev: &mut Evaluator, level: &ParsedLevel, children: &mut Vec<GroupRef>) {
    let Some(tn) = &level.top_n else {
        return;
    };
    if tn.count == 0 {
        return;
    }

    if let Some((expr, order)) = &tn.sort {
        sort_children(ev, children, std::slice::from_ref(&(expr.clone(), *order)), None);
    }

    if children.len() <= tn.count {
        if tn.pad {
            if let Some(template) = children.last().cloned() {
                while children.len() < tn.count {
                    children.push(group::empty_clone(&template));
                }
            }
        }
        return;
    }

    let leftovers = children.split_off(tn.count);
    if !tn.include_others {
        return;
    }
    // A single leftover is not worth merging.
    if leftovers.len() == 1 {
        children.extend(leftovers);
        return;
    }

    // Merge the leftovers into one synthetic bucket: flatten one level, so
    // a leftover leaf contributes itself and a leftover branch contributes
    // its children directly.
    let others = Group::branch(leftovers[0].borrow().key.clone(), Value::from("Others"));
    let mut members = Vec::new();
    for g in &leftovers {
        if g.borrow().is_leaf() {
            members.push(g.clone());
        } else {
            members.extend(g.borrow().children.iter().cloned());
        }
    }
    for m in &members {
        attach(&others, m);
    }
    {
        let mut b = others.borrow_mut();
        b.children = members;
        b.is_top_n_others = true;
    }
    children.push(others);
}

// ── Sorting ──────────────────────────────────────────────────────────────────

fn apply_sorts(ev: &mut Evaluator, level: &ParsedLevel, children: &mut Vec<GroupRef>) {
    let value_order = (level.sort_on_values && !level.values.is_empty())
        .then_some(level.values.as_slice());
    if level.sorts.is_empty() && value_order.is_none() {
        return;
    }

    // A trailing others bucket stays last no matter what.
    let others = match children.last() {
        Some(last) if last.borrow().is_top_n_others => children.pop(),
        _ => None,
    };
    sort_children(ev, children, &level.sorts, value_order);
    if let Some(o) = others {
        children.push(o);
    }
}

/// Stable lexicographic multi-key sort: earlier sorts win, later sorts only
/// break ties. An explicit value order, when present, is the implicit first
/// criterion; unlisted values sort after all listed ones and tie among
/// themselves.
fn sort_children(
    ev: &mut Evaluator,
    children: &mut Vec<GroupRef>,
    sorts: &[(Rc<Expression>, SortOrder)],
    value_order: Option<&[Value]>,
) {
    // Sort keys are evaluated once per child up front; evaluating inside
    // the comparator would re-run expressions O(n log n) times and borrow
    // the nodes mid-sort.
    let mut keyed: Vec<(GroupRef, Option<usize>, Vec<Value>)> = children
        .iter()
        .map(|g| {
            let value_pos = value_order.map(|vals| {
                let gv = g.borrow().value.clone();
                vals.iter()
                    .position(|v| compare(v, &gv) == Comparison::Same)
                    .unwrap_or(vals.len())
            });
            let receiver = Value::Group(g.clone());
            let keys = sorts
                .iter()
                .map(|(expr, _)| ev.evaluate(expr, &receiver))
                .collect();
            (g.clone(), value_pos, keys)
        })
        .collect();

    keyed.sort_by(|a, b| {
        if let (Some(pa), Some(pb)) = (a.1, b.1) {
            match pa.cmp(&pb) {
                std::cmp::Ordering::Equal => {}
                other => return other,
            }
        }
        for (i, (_, order)) in sorts.iter().enumerate() {
            let mut cmp = compare(&a.2[i], &b.2[i]);
            if *order == SortOrder::Descending {
                cmp = cmp.reverse();
            }
            match cmp.as_ordering() {
                std::cmp::Ordering::Equal => continue,
                other => return other,
            }
        }
        std::cmp::Ordering::Equal
    });

    *children = keyed.into_iter().map(|(g, _, _)| g).collect();
}

// ── Tests ────────────────────────────────────────────────────────────────────
