//! Predicate AST handed to reads by the query layer.

use std::ops::Bound;

use crate::literal::Literal;

/// Logical expression over predicates.
///
/// `F` names a column; reads use `String` column names.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr<F> {
    And(Vec<Expr<F>>),
    Or(Vec<Expr<F>>),
    Not(Box<Expr<F>>),
    Pred(Filter<F>),
    /// Constant outcome; `Const(true)` selects every row.
    Const(bool),
}

impl<F> Expr<F> {
    /// The predicate that selects everything.
    #[inline]
    pub fn always() -> Expr<F> {
        Expr::Const(true)
    }

    /// Build an AND of filters.
    #[inline]
    pub fn all_of(fs: Vec<Filter<F>>) -> Expr<F> {
        Expr::And(fs.into_iter().map(Expr::Pred).collect())
    }

    /// Build an OR of filters.
    #[inline]
    pub fn any_of(fs: Vec<Filter<F>>) -> Expr<F> {
        Expr::Or(fs.into_iter().map(Expr::Pred).collect())
    }

    /// Wrap an expression in a logical NOT.
    #[allow(clippy::should_implement_trait)]
    #[inline]
    pub fn not(e: Expr<F>) -> Expr<F> {
        Expr::Not(Box::new(e))
    }

    /// Single-filter expression.
    #[inline]
    pub fn pred(field_id: F, op: Operator) -> Expr<F> {
        Expr::Pred(Filter { field_id, op })
    }

    /// Whether the expression trivially selects every row.
    pub fn is_trivially_true(&self) -> bool {
        match self {
            Expr::Const(v) => *v,
            Expr::And(children) => children.iter().all(Expr::is_trivially_true),
            _ => false,
        }
    }

    /// Visit every field referenced by the expression.
    pub fn for_each_field<'s>(&'s self, visit: &mut impl FnMut(&'s F)) {
        match self {
            Expr::And(children) | Expr::Or(children) => {
                for child in children {
                    child.for_each_field(visit);
                }
            }
            Expr::Not(inner) => inner.for_each_field(visit),
            Expr::Pred(filter) => visit(&filter.field_id),
            Expr::Const(_) => {}
        }
    }
}

/// Single predicate against a field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter<F> {
    pub field_id: F,
    pub op: Operator,
}

/// Comparison/matching operators. Literals are coerced to the column type at
/// evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    // Equality
    Equals(Literal),
    NotEquals(Literal),

    Range {
        lower: Bound<Literal>,
        upper: Bound<Literal>,
    },

    // Simple comparisons (can be implemented as special cases of Range if needed)
    GreaterThan(Literal),
    GreaterThanOrEquals(Literal),
    LessThan(Literal),
    LessThanOrEquals(Literal),

    // Set & pattern matching
    In(Vec<Literal>),
    StartsWith(String),
    EndsWith(String),
    Contains(String),

    IsNull,
    IsNotNull,
}

impl Operator {
    /// Half-open/closed range convenience constructor.
    pub fn range(lower: Bound<Literal>, upper: Bound<Literal>) -> Self {
        Operator::Range { lower, upper }
    }
}
