//! Evaluation core of a report-authoring engine.
//!
//! Given a flat collection of records and template-declared grouping and
//! sorting rules, this crate evaluates per-record key-chain expressions
//! against arbitrary object graphs and reorganizes record lists into nested
//! report groups with deterministic ordering, top-N truncation, and
//! nesting-aware aggregate rollups.
//!
//! The moving parts, leaves first:
//!
//! - [`value`] — the dynamically typed [`Value`] space and the canonical
//!   comparator every operator and sort goes through, plus the
//!   [`PropertyAccess`] capability hosts implement for their record types.
//! - [`ast`] / [`cache`] — the expression tree handed over by an external
//!   parser, and the per-text memoization in front of that parser.
//! - [`eval`] — the scalar [`Evaluator`]: operators, key and chain
//!   navigation, conditionals, the per-session assignment scope, and
//!   registry-based function dispatch.
//! - [`aggregate`] — what happens when evaluation lands on a list: the
//!   dispatch rules and the built-in aggregate library (`total`, `count`,
//!   `filter`, `join`, ...).
//! - [`group`] / [`grouper`] — the [`Group`] tree with its heritage keys
//!   (`Up`, `Row`, `Running`, `Remaining`, `Parent`, `Page`) and the
//!   [`Grouper`] that builds it from [`Grouping`] specs.
//!
//! Evaluation is best-effort and total: type mismatches, unresolved names
//! and out-of-range indexes degrade to [`Value::Null`] rather than failing
//! a report run. The only fallible surface is the parser boundary
//! ([`ParseError`]).
//!
//! ```
//! use reportcore::{Evaluator, Expression, Grouper, Grouping, MapRecord, Value};
//!
//! let records: Vec<Value> = vec![
//!     MapRecord::new().with("Cat", "A").with("Rev", 10).into_value(),
//!     MapRecord::new().with("Cat", "A").with("Rev", 5).into_value(),
//!     MapRecord::new().with("Cat", "B").with("Rev", 7).into_value(),
//! ];
//!
//! let mut ev = Evaluator::new();
//! let root = Grouper::new()
//!     .build(&mut ev, &records, &[Grouping::new("Cat"), Grouping::details()])
//!     .unwrap();
//!
//! let bucket = Value::Group(root.borrow().children[0].clone());
//! let total = ev.evaluate(&Expression::keychain("total.Rev"), &bucket);
//! assert_eq!(total, Value::from(15.0));
//! ```

pub mod aggregate;
pub mod ast;
pub mod cache;
pub mod eval;
pub mod functions;
pub mod group;
pub mod grouper;
pub mod value;

pub use aggregate::{evaluate_over_list, AggArgs, AggregateFn, ListView};
pub use ast::{BinaryOp, Expression, UnaryOp};
pub use cache::{ExpressionCache, ParseError, ParseResult};
pub use eval::Evaluator;
pub use functions::{FunctionKind, FunctionRegistry};
pub use group::{Group, GroupRef};
pub use grouper::{Grouper, Grouping, Sort, SortOrder, TopNSort};
pub use value::{compare, Comparison, MapRecord, PropertyAccess, Value};
