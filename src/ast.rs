// Expression AST: the opaque tree handed over by the external parser.
// Pure data — evaluation never mutates a node; per-run side effects live in
// the evaluator's assignment scope.

use crate::value::Value;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Logical
    And,
    Or,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

/// AST node for a key-chain expression.
///
/// The argument list of a call is carried inline as `args`; a chain is the
/// left-to-right sequence of navigation steps. Trees are cheap to clone and
/// are typically shared behind an `Rc` by the expression cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Literal value.
    Literal(Value),

    /// Binary operation.
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },

    /// Unary operation.
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },

    /// Named key, resolved against the current receiver's accessor, falling
    /// back to the assignment scope.
    Key(String),

    /// Indexing: `list[index]`.
    Index {
        list: Box<Expression>,
        index: Box<Expression>,
    },

    /// Function call dispatched through the registry.
    Call {
        name: String,
        args: Vec<Expression>,
    },

    /// Navigation chain, folded left. When the running value turns into a
    /// list mid-chain, the unconsumed suffix is handed to the aggregate
    /// evaluator.
    Chain(Vec<Expression>),

    /// Ternary conditional; a missing else branch evaluates to Null.
    Conditional {
        condition: Box<Expression>,
        then_branch: Box<Expression>,
        else_branch: Option<Box<Expression>>,
    },

    /// Scope assignment; evaluates to the empty string so it can be used as
    /// an in-template side effect.
    Assign {
        name: String,
        value: Box<Expression>,
    },
}

impl Expression {
    /// Literal number node.
    pub fn number(n: f64) -> Self {
        Expression::Literal(Value::Number(n))
    }

    /// Literal string node.
    pub fn string(s: impl Into<String>) -> Self {
        Expression::Literal(Value::Str(s.into().into()))
    }

    /// Literal null node.
    pub fn null() -> Self {
        Expression::Literal(Value::Null)
    }

    /// Key node.
    pub fn key(name: impl Into<String>) -> Self {
        Expression::Key(name.into())
    }

    /// Call node.
    pub fn call(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Call {
            name: name.into(),
            args,
        }
    }

    /// Chain node from navigation steps. A single step collapses to itself.
    pub fn chain(mut steps: Vec<Expression>) -> Self {
        if steps.len() == 1 {
            steps.swap_remove(0)
        } else {
            Expression::Chain(steps)
        }
    }

    /// Chain of keys from a dotted path, e.g. `"Movies.Studio.Name"`.
    pub fn keychain(path: &str) -> Self {
        Expression::chain(path.split('.').map(Expression::key).collect())
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Self {
        Expression::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn conditional(
        condition: Expression,
        then_branch: Expression,
        else_branch: Option<Expression>,
    ) -> Self {
        Expression::Conditional {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
        }
    }

    pub fn assign(name: impl Into<String>, value: Expression) -> Self {
        Expression::Assign {
            name: name.into(),
            value: Box::new(value),
        }
    }

    /// Name at the head of this expression, if it starts with a key or call.
    /// For a chain, the head of its first step.
    pub fn head_name(&self) -> Option<&str> {
        match self {
            Expression::Key(name) => Some(name),
            Expression::Call { name, .. } => Some(name),
            Expression::Chain(steps) => steps.first().and_then(Expression::head_name),
            _ => None,
        }
    }

    /// True when this expression is exactly the named key (possibly as a
    /// one-step chain). Used by the aggregate recursion rule to recognize
    /// "same level" grouping-key lookups.
    pub fn is_exact_key(&self, name: &str) -> bool {
        match self {
            Expression::Key(k) => k == name,
            Expression::Chain(steps) => {
                steps.len() == 1 && steps[0].is_exact_key(name)
            }
            _ => false,
        }
    }

    /// True for a bare Null literal, the "null-headed" shape raw deep counts
    /// use.
    pub fn is_null_literal(&self) -> bool {
        matches!(self, Expression::Literal(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keychain_builder() {
        let e = Expression::keychain("a.b.c");
        match &e {
            Expression::Chain(steps) => {
                assert_eq!(steps.len(), 3);
                assert_eq!(steps[0], Expression::key("a"));
            }
            other => panic!("expected chain, got {:?}", other),
        }

        // Single-segment paths collapse to a bare key.
        assert_eq!(Expression::keychain("a"), Expression::key("a"));
    }

    #[test]
    fn test_head_name() {
        assert_eq!(Expression::key("total").head_name(), Some("total"));
        assert_eq!(Expression::keychain("total.Rev").head_name(), Some("total"));
        assert_eq!(
            Expression::call("count", vec![]).head_name(),
            Some("count")
        );
        assert_eq!(Expression::number(1.0).head_name(), None);
    }

    #[test]
    fn test_is_exact_key() {
        assert!(Expression::key("Cat").is_exact_key("Cat"));
        assert!(!Expression::keychain("Cat.Sub").is_exact_key("Cat"));
        assert!(!Expression::call("Cat", vec![]).is_exact_key("Cat"));
    }
}
