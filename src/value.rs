// Value model: the dynamically typed value space shared by the evaluator,
// the aggregate library, and the grouping engine, plus the canonical
// four-outcome comparator every operator and sort goes through.

use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::group::{self, GroupRef};

/// External accessor capability: fetch a named value from an opaque object.
///
/// Hosts supply this for their concrete record types; `resolve` must return
/// [`Value::Null`] for unknown keys rather than erroring. `Group` nodes
/// answer the same contract internally, so the evaluator never special-cases
/// them.
pub trait PropertyAccess {
    fn resolve(&self, key: &str) -> Value;
}

/// A dynamically typed value with O(1) clone semantics.
///
/// Compound variants (strings, lists, records, groups) are Rc-wrapped so
/// values can be passed around and stored in buckets without deep copies.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Date(DateTime<Utc>),
    List(Rc<Vec<Value>>),
    Record(Rc<dyn PropertyAccess>),
    Group(GroupRef),
}

/// Outcome of comparing two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `a` sorts before `b`.
    Ascend,
    /// `a` sorts after `b`.
    Descend,
    /// Equal for ordering purposes.
    Same,
}

impl Comparison {
    /// Flip for descending sorts.
    pub fn reverse(self) -> Comparison {
        match self {
            Comparison::Ascend => Comparison::Descend,
            Comparison::Descend => Comparison::Ascend,
            Comparison::Same => Comparison::Same,
        }
    }

    pub fn as_ordering(self) -> std::cmp::Ordering {
        match self {
            Comparison::Ascend => std::cmp::Ordering::Less,
            Comparison::Descend => std::cmp::Ordering::Greater,
            Comparison::Same => std::cmp::Ordering::Equal,
        }
    }
}

/// Compare two values for ordering.
///
/// Null handling is asymmetric on purpose (legacy-compatible): when exactly
/// one side is Null, a String sorts before the Null, while any other type
/// sorts after it. Strings compare case-insensitively. Pairs of unrelated
/// types that are not equal order as `Ascend` — this is not a total order,
/// which is a known limitation kept for compatibility. Do not extend the
/// fallback to new type pairs.
pub fn compare(a: &Value, b: &Value) -> Comparison {
    use Comparison::*;
    match (a, b) {
        (Value::Null, Value::Null) => Same,
        // Null vs String: Null sorts after. Null vs anything else: before.
        (Value::Null, Value::Str(_)) => Descend,
        (Value::Str(_), Value::Null) => Ascend,
        (Value::Null, _) => Ascend,
        (_, Value::Null) => Descend,

        (Value::Bool(x), Value::Bool(y)) => order(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => match x.partial_cmp(y) {
            Some(ord) => order(ord),
            // NaN involved: arbitrary branch.
            None => Ascend,
        },
        (Value::Str(x), Value::Str(y)) => order(x.to_lowercase().cmp(&y.to_lowercase())),
        (Value::Date(x), Value::Date(y)) => order(x.cmp(y)),

        _ => {
            if a == b {
                Same
            } else {
                // Arbitrary ordering for mixed/unrelated types.
                Ascend
            }
        }
    }
}

fn order(ord: std::cmp::Ordering) -> Comparison {
    match ord {
        std::cmp::Ordering::Less => Comparison::Ascend,
        std::cmp::Ordering::Greater => Comparison::Descend,
        std::cmp::Ordering::Equal => Comparison::Same,
    }
}

// ── Type checks and extraction ───────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// List-like values hand evaluation over to the aggregate evaluator:
    /// plain lists and group nodes both qualify.
    #[inline]
    pub fn is_list_like(&self) -> bool {
        matches!(self, Value::List(_) | Value::Group(_))
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    #[inline]
    pub fn as_group(&self) -> Option<&GroupRef> {
        match self {
            Value::Group(g) => Some(g),
            _ => None,
        }
    }

    /// Coercion used by the boolean operators and conditionals: Null, false,
    /// zero, NaN, the empty string, and the empty list are falsy; everything
    /// else (dates, records, groups, non-empty compounds) is truthy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Date(_) | Value::Record(_) | Value::Group(_) => true,
        }
    }

    /// Loose numeric coercion for arithmetic: Null counts as 0 and booleans
    /// as 0/1, so `Number + Null` still adds. Strings never coerce here —
    /// a string operand routes `Add` to concatenation instead, and the other
    /// arithmetic operators degrade to Null.
    pub fn coerce_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => Some(0.0),
            _ => None,
        }
    }

    /// String form used by concatenation, `join` and `string()`: Null renders
    /// empty, integral numbers drop the trailing `.0`, dates render RFC 3339.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Date(d) => d.to_rfc3339(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.display_string()).collect();
                parts.join(", ")
            }
            Value::Record(_) => "<record>".to_string(),
            Value::Group(g) => format!("<group:{}>", g.borrow().value.display_string()),
        }
    }

    /// Resolve a named key against this value via its accessor capability.
    /// Lists have no accessor of their own; the aggregate evaluator owns
    /// list semantics.
    pub fn resolve_key(&self, key: &str) -> Value {
        match self {
            Value::Record(r) => r.resolve(key),
            Value::Group(g) => group::resolve_key(g, key),
            _ => Value::Null,
        }
    }
}

fn format_number(n: f64) -> String {
    if !n.is_finite() {
        String::new()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    #[inline]
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(items))
    }

    #[inline]
    pub fn record(r: impl PropertyAccess + 'static) -> Self {
        Value::Record(Rc::new(r))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Rc::new(items))
    }
}

// ── Equality ─────────────────────────────────────────────────────────────────

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            // NaN != NaN, matching float semantics.
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a.eq_ignore_ascii_case(b),
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Compound opaque values compare by identity, never structurally:
            // record graphs may be cyclic.
            (Value::Record(a), Value::Record(b)) => Rc::ptr_eq(a, b),
            (Value::Group(a), Value::Group(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Date(d) => write!(f, "Date({})", d.to_rfc3339()),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Record(r) => {
                write!(f, "Record(0x{:x})", Rc::as_ptr(r) as *const () as usize)
            }
            Value::Group(g) => write!(f, "Group({:?})", g.borrow().value),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_string())
    }
}

// ── MapRecord: the bundled record implementation ─────────────────────────────

/// Insertion-ordered map record, the reference [`PropertyAccess`]
/// implementation. Hosts with reflective or columnar record types bring
/// their own; this one covers tests, fixtures, and JSON-shaped data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapRecord {
    fields: IndexMap<String, Value>,
}

impl MapRecord {
    pub fn new() -> Self {
        MapRecord {
            fields: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn into_value(self) -> Value {
        Value::record(self)
    }
}

impl PropertyAccess for MapRecord {
    fn resolve(&self, key: &str) -> Value {
        self.fields.get(key).cloned().unwrap_or(Value::Null)
    }
}

impl FromIterator<(String, Value)> for MapRecord {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        MapRecord {
            fields: iter.into_iter().collect(),
        }
    }
}

// ── serde ────────────────────────────────────────────────────────────────────

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if n.is_nan() || n.is_infinite() {
                    serializer.serialize_none()
                } else if n.fract() == 0.0 && n.abs() < 1e15 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::Str(s) => serializer.serialize_str(s),
            Value::Date(d) => serializer.serialize_str(&d.to_rfc3339()),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for v in items.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            // Opaque values do not round-trip; they serialize as null.
            Value::Record(_) | Value::Group(_) => serializer.serialize_none(),
        }
    }
}

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "any JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::string(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Str(v.into()))
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(elem) = seq.next_element()? {
            items.push(elem);
        }
        Ok(Value::list(items))
    }

    // JSON objects become MapRecord-backed records.
    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut record = MapRecord::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            record.insert(k, v);
        }
        Ok(record.into_value())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Str(s.into()),
            serde_json::Value::Array(items) => {
                Value::list(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect::<MapRecord>()
                .into_value(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_same_type() {
        assert_eq!(compare(&Value::from(1.0), &Value::from(2.0)), Comparison::Ascend);
        assert_eq!(compare(&Value::from(2.0), &Value::from(1.0)), Comparison::Descend);
        assert_eq!(compare(&Value::from(2.0), &Value::from(2.0)), Comparison::Same);
        assert_eq!(compare(&Value::from(false), &Value::from(true)), Comparison::Ascend);
    }

    #[test]
    fn test_compare_strings_case_insensitive() {
        assert_eq!(
            compare(&Value::from("apple"), &Value::from("BANANA")),
            Comparison::Ascend
        );
        assert_eq!(
            compare(&Value::from("Apple"), &Value::from("aPPLE")),
            Comparison::Same
        );
    }

    #[test]
    fn test_compare_null_asymmetry() {
        // Null sorts after strings...
        assert_eq!(compare(&Value::Null, &Value::from("x")), Comparison::Descend);
        assert_eq!(compare(&Value::from("x"), &Value::Null), Comparison::Ascend);
        // ...but before numbers and everything else.
        assert_eq!(compare(&Value::Null, &Value::from(0.0)), Comparison::Ascend);
        assert_eq!(compare(&Value::from(0.0), &Value::Null), Comparison::Descend);
    }

    #[test]
    fn test_compare_mixed_types_not_symmetric() {
        // The mixed-type fallback is Ascend both ways; symmetry is only
        // guaranteed within a type.
        let a = Value::from(1.0);
        let b = Value::from(true);
        assert_eq!(compare(&a, &b), Comparison::Ascend);
        assert_eq!(compare(&b, &a), Comparison::Ascend);
    }

    #[test]
    fn test_compare_dates() {
        let early: DateTime<Utc> = "2020-01-01T00:00:00Z".parse().unwrap();
        let late: DateTime<Utc> = "2021-06-15T12:00:00Z".parse().unwrap();
        assert_eq!(
            compare(&Value::Date(early), &Value::Date(late)),
            Comparison::Ascend
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::from(0.0).truthy());
        assert!(!Value::from("").truthy());
        assert!(!Value::from(false).truthy());
        assert!(!Value::list(vec![]).truthy());
        assert!(Value::from(1.0).truthy());
        assert!(Value::from("x").truthy());
        assert!(Value::list(vec![Value::Null]).truthy());
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Value::Null.display_string(), "");
        assert_eq!(Value::from(5.0).display_string(), "5");
        assert_eq!(Value::from(2.5).display_string(), "2.5");
        assert_eq!(Value::from("hi").display_string(), "hi");
    }

    #[test]
    fn test_map_record_resolve() {
        let rec = MapRecord::new().with("Name", "Ada").with("Age", 36);
        assert_eq!(rec.resolve("Name"), Value::from("Ada"));
        assert_eq!(rec.resolve("Missing"), Value::Null);
    }

    #[test]
    fn test_record_identity_equality() {
        let a = MapRecord::new().with("x", 1).into_value();
        let b = MapRecord::new().with("x", 1).into_value();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_from_serde_json() {
        let v = Value::from(serde_json::json!({
            "name": "Ada",
            "scores": [1, 2, 3]
        }));
        assert_eq!(v.resolve_key("name"), Value::from("Ada"));
        let scores = v.resolve_key("scores");
        assert_eq!(scores.as_list().map(|l| l.len()), Some(3));
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(Value::Null.coerce_number(), Some(0.0));
        assert_eq!(Value::from(true).coerce_number(), Some(1.0));
        assert_eq!(Value::from("5").coerce_number(), None);
    }
}
