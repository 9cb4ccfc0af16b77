// Expression cache: memoizes the external parser by source text, since the
// same expression string is evaluated once per record.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::Expression;

/// Parser-boundary error. Malformed expression text surfaces here, before
/// any evaluation begins; nothing downstream recovers from it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("parse error in {text:?}: {message}")]
pub struct ParseError {
    pub text: String,
    pub message: String,
}

impl ParseError {
    pub fn new(text: impl Into<String>, message: impl Into<String>) -> Self {
        ParseError {
            text: text.into(),
            message: message.into(),
        }
    }
}

/// Result type of the external parser callback.
pub type ParseResult = Result<Expression, ParseError>;

/// Caches parsed expressions by source text.
///
/// The parser itself is an external collaborator supplied as a callback;
/// this type only owns the memoization. Cached trees are immutable and
/// shared via `Rc`, so one cache can back a whole report run.
pub struct ExpressionCache {
    parser: Box<dyn Fn(&str) -> ParseResult>,
    parsed: RefCell<HashMap<String, Rc<Expression>>>,
}

impl ExpressionCache {
    pub fn new(parser: impl Fn(&str) -> ParseResult + 'static) -> Self {
        ExpressionCache {
            parser: Box::new(parser),
            parsed: RefCell::new(HashMap::new()),
        }
    }

    /// Cache backed by the built-in dotted key-chain reader: `"A.B.C"`
    /// becomes a chain of keys. Enough for grouping/sort keys; hosts with a
    /// full expression grammar supply their own parser via [`Self::new`].
    pub fn keychains() -> Self {
        ExpressionCache::new(|text| {
            if text.is_empty() {
                return Err(ParseError::new(text, "empty expression"));
            }
            if text.split('.').any(str::is_empty) {
                return Err(ParseError::new(text, "empty key segment"));
            }
            Ok(Expression::keychain(text))
        })
    }

    /// Parse `text`, or return the cached tree from an earlier call.
    pub fn get(&self, text: &str) -> Result<Rc<Expression>, ParseError> {
        if let Some(hit) = self.parsed.borrow().get(text) {
            return Ok(hit.clone());
        }
        let expr = Rc::new((self.parser)(text)?);
        self.parsed
            .borrow_mut()
            .insert(text.to_string(), expr.clone());
        Ok(expr)
    }

    /// Number of distinct expressions parsed so far.
    pub fn len(&self) -> usize {
        self.parsed.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_shares_tree() {
        let cache = ExpressionCache::keychains();
        let a = cache.get("A.B").unwrap();
        let b = cache.get("A.B").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_parse_error_surfaces() {
        let cache = ExpressionCache::keychains();
        assert!(cache.get("").is_err());
        assert!(cache.get("A..B").is_err());
        // Failed parses are not cached.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_custom_parser() {
        let cache = ExpressionCache::new(|_| Ok(Expression::number(7.0)));
        assert_eq!(*cache.get("anything").unwrap(), Expression::number(7.0));
    }
}
