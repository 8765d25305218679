//! Structured row predicates for branch filters.
//!
//! Predicates are a closed set of comparisons over text-valued columns. They
//! evaluate against in-memory rows and lower to the statement IR.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ir::expr::{col, lit_str, table_col, Expr, ExprExt};

/// A filter over named columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq { column: String, value: String },
    NotEq { column: String, value: String },
    In { column: String, values: Vec<String> },
    Prefix { column: String, prefix: String },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn in_list<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Conjunction of two optional predicates.
    pub fn and_opt(left: Option<Predicate>, right: Option<Predicate>) -> Option<Predicate> {
        match (left, right) {
            (Some(l), Some(r)) => Some(Predicate::And(vec![l, r])),
            (l, r) => l.or(r),
        }
    }

    /// Evaluate against a row. A missing column never matches a comparison.
    pub fn evaluate<'a, F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        match self {
            Predicate::Eq { column, value } => lookup(column) == Some(value.as_str()),
            Predicate::NotEq { column, value } => {
                lookup(column).is_some_and(|v| v != value.as_str())
            }
            Predicate::In { column, values } => {
                lookup(column).is_some_and(|v| values.iter().any(|x| x == v))
            }
            Predicate::Prefix { column, prefix } => {
                lookup(column).is_some_and(|v| v.starts_with(prefix.as_str()))
            }
            Predicate::And(parts) => parts.iter().all(|p| p.evaluate(lookup)),
            Predicate::Or(parts) => parts.iter().any(|p| p.evaluate(lookup)),
            Predicate::Not(inner) => !inner.evaluate(lookup),
        }
    }

    /// Every column the predicate reads.
    pub fn columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Predicate::Eq { column, .. }
            | Predicate::NotEq { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Prefix { column, .. } => {
                out.insert(column.as_str());
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                for p in parts {
                    p.collect_columns(out);
                }
            }
            Predicate::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Lower to an IR expression, qualifying columns with `table` if given.
    pub fn to_expr(&self, table: Option<&str>) -> Expr {
        let column = |name: &str| match table {
            Some(t) => table_col(t, name),
            None => col(name),
        };
        match self {
            Predicate::Eq { column: c, value } => column(c).eq(lit_str(value)),
            Predicate::NotEq { column: c, value } => column(c).ne(lit_str(value)),
            Predicate::In { column: c, values } => {
                column(c).in_list(values.iter().map(|v| lit_str(v)).collect())
            }
            Predicate::Prefix { column: c, prefix } => {
                column(c).like(lit_str(&format!("{}%", prefix)))
            }
            Predicate::And(parts) => join_exprs(parts, table, |a, b| a.and(b)),
            Predicate::Or(parts) => join_exprs(parts, table, |a, b| a.or(b)),
            Predicate::Not(inner) => inner.to_expr(table).not(),
        }
    }
}

fn join_exprs(parts: &[Predicate], table: Option<&str>, op: fn(Expr, Expr) -> Expr) -> Expr {
    parts
        .iter()
        .map(|p| p.to_expr(table).paren())
        .reduce(op)
        .unwrap_or_else(|| crate::ir::expr::lit_bool(true))
}
