// Group tree: the nested report structure produced by the grouping engine.
// A node is either a leaf wrapping exactly one record or a branch of
// sub-groups, never a mix. Nodes resolve heritage keys (Up, Row, Running,
// Remaining, Parent, Page) through the same accessor contract records use.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::value::Value;

/// Shared handle to a group node.
///
/// Parent links are weak: ownership always flows down the child list (or
/// from the caller holding the root). Subgroup slicing shares child nodes
/// across views, so a node's stored parent is a structural hint that is
/// only trusted when freshly resolved.
pub type GroupRef = Rc<RefCell<Group>>;

/// One node of the grouping tree.
#[derive(Debug)]
pub struct Group {
    /// Grouping key this node is a bucket of (None for the root and for
    /// plain leaves).
    pub key: Option<Rc<str>>,
    /// The distinct bucket value shared by this node's members.
    pub value: Value,
    /// Child groups; empty for leaves.
    pub children: Vec<GroupRef>,
    /// Structural back-reference, not ownership.
    pub parent: Weak<RefCell<Group>>,
    /// The single wrapped record, for leaf nodes.
    pub leaf_item: Option<Value>,
    /// Synthetic merged "others" bucket from top-N truncation.
    pub is_top_n_others: bool,

    // Set only on page-scoped running views; overrides Up/Page/Running.
    pub(crate) view_source: Option<GroupRef>,
    pub(crate) page_start: Option<GroupRef>,
    pub(crate) page_end: Option<GroupRef>,
}

impl Group {
    fn bare(key: Option<Rc<str>>, value: Value) -> Group {
        Group {
            key,
            value,
            children: Vec::new(),
            parent: Weak::new(),
            leaf_item: None,
            is_top_n_others: false,
            view_source: None,
            page_start: None,
            page_end: None,
        }
    }

    /// Root node of a new tree.
    pub fn new_root() -> GroupRef {
        Rc::new(RefCell::new(Group::bare(None, Value::Null)))
    }

    /// Branch node: a bucket of `key` holding the distinct `value`.
    pub fn branch(key: Option<Rc<str>>, value: Value) -> GroupRef {
        Rc::new(RefCell::new(Group::bare(key, value)))
    }

    /// Leaf node wrapping one record.
    pub fn leaf(item: Value) -> GroupRef {
        let mut g = Group::bare(None, Value::Null);
        g.leaf_item = Some(item);
        Rc::new(RefCell::new(g))
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf_item.is_some()
    }
}

/// Point `child`'s parent link at `parent`.
pub fn attach(parent: &GroupRef, child: &GroupRef) {
    child.borrow_mut().parent = Rc::downgrade(parent);
}

fn parent_of(g: &GroupRef) -> Option<GroupRef> {
    g.borrow().parent.upgrade()
}

/// 1-based position of `g` among its parent's children.
pub fn row_index(g: &GroupRef) -> Option<usize> {
    let parent = parent_of(g)?;
    let pos = parent
        .borrow()
        .children
        .iter()
        .position(|c| Rc::ptr_eq(c, g))?;
    Some(pos + 1)
}

/// True when `target` is `g` or lives anywhere under it.
fn contains(g: &GroupRef, target: &GroupRef) -> bool {
    if Rc::ptr_eq(g, target) {
        return true;
    }
    g.borrow().children.iter().any(|c| contains(c, target))
}

/// First leaf group in depth-first order.
pub fn first_leaf(g: &GroupRef) -> Option<GroupRef> {
    if g.borrow().is_leaf() {
        return Some(g.clone());
    }
    let children = g.borrow().children.clone();
    children.iter().find_map(first_leaf)
}

/// First non-group descendant item in depth-first order — the record that
/// answers plain data keys asked of a group.
fn first_record(g: &GroupRef) -> Option<Value> {
    let node = g.borrow();
    if let Some(item) = &node.leaf_item {
        return match item {
            Value::Group(inner) => {
                let inner = inner.clone();
                drop(node);
                first_record(&inner)
            }
            other => Some(other.clone()),
        };
    }
    let children = node.children.clone();
    drop(node);
    children.iter().find_map(first_record)
}

/// Resolve a named key against a group node.
///
/// Heritage keys navigate the tree; any other name first walks self and
/// ancestors for a bucket of that grouping key, then falls back to the
/// accessor of the first record found below.
pub fn resolve_key(g: &GroupRef, key: &str) -> Value {
    // Page-scoped running views override the structural answers.
    let (view_source, page_start, page_end) = {
        let b = g.borrow();
        (b.view_source.clone(), b.page_start.clone(), b.page_end.clone())
    };
    if let Some(source) = &view_source {
        match key {
            "Up" => return Value::Group(source.clone()),
            "Page" => {
                if let (Some(ps), Some(pe)) = (&page_start, &page_end) {
                    return Value::Group(subgroup_through(g, ps, pe));
                }
            }
            "Running" => {
                if let (Some(parent), Some(pe)) = (parent_of(source), &page_end) {
                    let start = first_leaf(&parent).unwrap_or_else(|| parent.clone());
                    return Value::Group(subgroup_through(&parent, &start, pe));
                }
            }
            _ => {}
        }
    }

    match key {
        "Up" => match parent_of(g) {
            Some(p) => Value::Group(p),
            None => Value::Null,
        },
        "Row" => match row_index(g) {
            Some(i) => Value::from(i),
            None => Value::Null,
        },
        "Running" => prefix_of_parent(g, true),
        "Remaining" => suffix_of_parent(g),
        "Parent" => {
            // Nearest strict ancestor that is itself a leaf drills through
            // independently grouped sibling hierarchies.
            let mut ancestor = parent_of(g);
            while let Some(a) = ancestor {
                if a.borrow().is_leaf() {
                    return Value::Group(a);
                }
                ancestor = parent_of(&a);
            }
            match parent_of(g) {
                Some(p) => Value::Group(p),
                None => Value::Null,
            }
        }
        "Page" => Value::Group(g.clone()),
        _ => {
            // Walk self and ancestors for a bucket of this grouping key.
            let mut node = Some(g.clone());
            while let Some(n) = node {
                let b = n.borrow();
                if b.key.as_deref() == Some(key) {
                    return b.value.clone();
                }
                let up = b.parent.upgrade();
                drop(b);
                node = up;
            }
            match first_record(g) {
                Some(item) => item.resolve_key(key),
                None => Value::Null,
            }
        }
    }
}

/// Slice of the parent's children from its start through `g` inclusive
/// (`Running`), or from just after `g` to the end (`Remaining`).
fn prefix_of_parent(g: &GroupRef, inclusive: bool) -> Value {
    let Some(parent) = parent_of(g) else {
        return Value::Null;
    };
    let children = parent.borrow().children.clone();
    let Some(pos) = children.iter().position(|c| Rc::ptr_eq(c, g)) else {
        return Value::Null;
    };
    let end = if inclusive { pos + 1 } else { pos };
    Value::Group(shallow_clone_with_children(
        &parent,
        children[..end].to_vec(),
    ))
}

fn suffix_of_parent(g: &GroupRef) -> Value {
    let Some(parent) = parent_of(g) else {
        return Value::Null;
    };
    let children = parent.borrow().children.clone();
    let Some(pos) = children.iter().position(|c| Rc::ptr_eq(c, g)) else {
        return Value::Null;
    };
    Value::Group(shallow_clone_with_children(
        &parent,
        children[pos + 1..].to_vec(),
    ))
}

// ── Clones ───────────────────────────────────────────────────────────────────

/// Copy of the node over a fresh child sequence holding the same shared
/// child nodes.
pub fn shallow_clone(g: &GroupRef) -> GroupRef {
    let children = g.borrow().children.clone();
    shallow_clone_with_children(g, children)
}

fn shallow_clone_with_children(g: &GroupRef, children: Vec<GroupRef>) -> GroupRef {
    let b = g.borrow();
    Rc::new(RefCell::new(Group {
        key: b.key.clone(),
        value: b.value.clone(),
        children,
        parent: b.parent.clone(),
        leaf_item: b.leaf_item.clone(),
        is_top_n_others: b.is_top_n_others,
        view_source: None,
        page_start: None,
        page_end: None,
    }))
}

/// Recursive copy; every cloned child is re-parented to its new parent.
pub fn deep_clone(g: &GroupRef) -> GroupRef {
    let clone = shallow_clone_with_children(g, Vec::new());
    let children: Vec<GroupRef> = g.borrow().children.iter().map(deep_clone).collect();
    for child in &children {
        attach(&clone, child);
    }
    clone.borrow_mut().children = children;
    clone
}

/// Shape-preserving copy with all values and leaf items cleared. Used only
/// for top-N padding, where empty placeholder rows must keep the branch
/// shape of the row they pad after.
pub fn empty_clone(g: &GroupRef) -> GroupRef {
    let b = g.borrow();
    let clone = Rc::new(RefCell::new(Group {
        key: b.key.clone(),
        value: Value::Null,
        children: Vec::new(),
        parent: b.parent.clone(),
        leaf_item: b.leaf_item.as_ref().map(|_| Value::Null),
        is_top_n_others: b.is_top_n_others,
        view_source: None,
        page_start: None,
        page_end: None,
    }));
    let children: Vec<GroupRef> = b.children.iter().map(empty_clone).collect();
    drop(b);
    for child in &children {
        attach(&clone, child);
    }
    clone.borrow_mut().children = children;
    clone
}

// ── Slicing ──────────────────────────────────────────────────────────────────

/// General structural slice of `g` between the descendants `start` and
/// `end`: start inclusive, a direct-child end marker exclusive. An end
/// marker buried deeper includes its containing child, which is then
/// re-sliced against the same pair so nested boundaries are respected.
pub fn subgroup(g: &GroupRef, start: &GroupRef, end: &GroupRef) -> GroupRef {
    slice_range(g, start, end, false)
}

/// Slice that keeps `end` itself, at every nesting level. Page views need
/// the boundary row on the page, not before it.
fn subgroup_through(g: &GroupRef, start: &GroupRef, end: &GroupRef) -> GroupRef {
    slice_range(g, start, end, true)
}

/// Each marker is located by finding the immediate child of `g` that
/// contains it; a marker that is not under `g` extends the slice to the
/// respective edge. The result is built from shallow clones: interior
/// children are shared with the source tree, so their stored parents still
/// point into it.
fn slice_range(g: &GroupRef, start: &GroupRef, end: &GroupRef, inclusive: bool) -> GroupRef {
    let children = g.borrow().children.clone();
    let start_idx = children
        .iter()
        .position(|c| contains(c, start))
        .unwrap_or(0);
    let end_idx = match children.iter().position(|c| Rc::ptr_eq(c, end)) {
        Some(i) => {
            if inclusive {
                i + 1
            } else {
                i
            }
        }
        None => children
            .iter()
            .position(|c| contains(c, end))
            .map(|i| i + 1)
            .unwrap_or(children.len()),
    };
    let end_idx = end_idx.clamp(start_idx, children.len());

    let mut kept: Vec<GroupRef> = children[start_idx..end_idx].to_vec();

    if let Some(first) = kept.first().cloned() {
        let resliceable = !Rc::ptr_eq(&first, start)
            && !first.borrow().is_leaf()
            && (contains(&first, start) || contains(&first, end));
        if resliceable {
            kept[0] = slice_range(&first, start, end, inclusive);
        }
    }
    if kept.len() > 1 {
        let last = kept[kept.len() - 1].clone();
        let resliceable =
            !Rc::ptr_eq(&last, end) && !last.borrow().is_leaf() && contains(&last, end);
        if resliceable {
            let idx = kept.len() - 1;
            kept[idx] = slice_range(&last, start, end, inclusive);
        }
    }

    shallow_clone_with_children(g, kept)
}

/// Page-scoped running view: everything from the start of `source` through
/// `page_end` inclusive, with page-aware heritage resolution.
///
/// On the view, `Up` answers the unsliced source, `Page` the slice
/// constrained to `[page_start, page_end]`, and `Running` (when the source
/// has a parent) the parent sliced from its start through `page_end`.
pub fn running_view(source: &GroupRef, page_start: &GroupRef, page_end: &GroupRef) -> GroupRef {
    let start = first_leaf(source).unwrap_or_else(|| source.clone());
    let view = subgroup_through(source, &start, page_end);
    {
        let mut b = view.borrow_mut();
        b.view_source = Some(source.clone());
        b.page_start = Some(page_start.clone());
        b.page_end = Some(page_end.clone());
    }
    view
}

/// Collect every leaf item below `g`, depth-first.
pub fn leaf_items(g: &GroupRef, out: &mut Vec<Value>) {
    let node = g.borrow();
    if let Some(item) = &node.leaf_item {
        out.push(item.clone());
        return;
    }
    let children = node.children.clone();
    drop(node);
    for child in &children {
        leaf_items(child, out);
    }
}
