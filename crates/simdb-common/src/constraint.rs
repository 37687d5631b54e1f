//! Query constraints.
//!
//! A constraint is the typed triple `(column, operator, value)`. Multiple
//! constraints AND together; logical OR is expressed through `InSet`.
//! Constraint lists cross the back-end boundary as-is — user code never
//! hands query text to a back-end.

use crate::value::ColumnValue;

/// Comparison operator of a WHERE clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    /// Membership in a value set. The only way to express OR.
    InSet,
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Constraint::Equal => "=",
            Constraint::NotEqual => "!=",
            Constraint::Less => "<",
            Constraint::LessOrEqual => "<=",
            Constraint::Greater => ">",
            Constraint::GreaterOrEqual => ">=",
            Constraint::InSet => "IN",
        };
        write!(f, "{}", op)
    }
}

/// Right-hand side of a constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintValue {
    Scalar(ColumnValue),
    Set(Vec<ColumnValue>),
}

impl<T: Into<ColumnValue>> From<T> for ConstraintValue {
    fn from(v: T) -> Self {
        ConstraintValue::Scalar(v.into())
    }
}

impl ConstraintValue {
    /// Build a set value for `Constraint::InSet`.
    pub fn set<T: Into<ColumnValue>>(values: impl IntoIterator<Item = T>) -> Self {
        ConstraintValue::Set(values.into_iter().map(Into::into).collect())
    }
}

/// One fully-formed WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub column: String,
    pub constraint: Constraint,
    pub value: ConstraintValue,
}

impl WhereClause {
    pub fn new(
        column: impl Into<String>,
        constraint: Constraint,
        value: impl Into<ConstraintValue>,
    ) -> Self {
        WhereClause {
            column: column.into(),
            constraint,
            value: value.into(),
        }
    }

    /// Evaluate this clause against a candidate value. Back-ends without a
    /// native predicate engine filter rows through this.
    pub fn matches(&self, candidate: &ColumnValue) -> bool {
        match (&self.value, self.constraint) {
            (ConstraintValue::Set(set), Constraint::InSet) => {
                set.iter().any(|v| values_equal(candidate, v))
            }
            (ConstraintValue::Set(_), _) => false,
            (ConstraintValue::Scalar(rhs), op) => compare(candidate, rhs, op),
        }
    }
}

fn values_equal(a: &ColumnValue, b: &ColumnValue) -> bool {
    compare(a, b, Constraint::Equal)
}

fn compare(lhs: &ColumnValue, rhs: &ColumnValue, op: Constraint) -> bool {
    use std::cmp::Ordering;

    let ord = match (lhs, rhs) {
        (ColumnValue::String(a), ColumnValue::String(b)) => a.cmp(b),
        (ColumnValue::Blob(_), _) | (_, ColumnValue::Blob(_)) => return false,
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            // Float equality here is exact; epsilon-tolerant equality is a
            // query-layer concern handled before constraints reach us.
            (Some(a), Some(b)) => match a.partial_cmp(&b) {
                Some(ord) => ord,
                None => return false,
            },
            _ => return false,
        },
    };

    match op {
        Constraint::Equal => ord == Ordering::Equal,
        Constraint::NotEqual => ord != Ordering::Equal,
        Constraint::Less => ord == Ordering::Less,
        Constraint::LessOrEqual => ord != Ordering::Greater,
        Constraint::Greater => ord == Ordering::Greater,
        Constraint::GreaterOrEqual => ord != Ordering::Less,
        Constraint::InSet => false,
    }
}
