//! Expression AST for generated statements.
//!
//! Dialect-agnostic: expressions carry structure only. The `Display` impl
//! renders a neutral SQL-like form for inspection and snapshot tests.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::statement::Query;

// =============================================================================
// Expression AST
// =============================================================================

/// An expression in a generated statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Column reference: optional_table.column
    Column {
        table: Option<String>,
        column: String,
    },

    Literal(Literal),

    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },

    UnaryOp { op: UnaryOperator, expr: Box<Expr> },

    /// Function call: name(args...)
    Function { name: String, args: Vec<Expr> },

    /// CASE WHEN... THEN... ELSE... END
    Case {
        when_clauses: Vec<(Expr, Expr)>,
        else_clause: Option<Box<Expr>>,
    },

    /// expr [NOT] IN (values...)
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    IsNull { expr: Box<Expr>, negated: bool },

    Paren(Box<Expr>),

    /// function OVER (PARTITION BY ... ORDER BY ...)
    Window {
        function: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<Expr>,
    },

    /// EXISTS (subquery)
    Exists(Box<Query>),
}

/// Literal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Eq,
    Ne,
    And,
    Or,
    Plus,
    Minus,
    Mul,
    Div,
    Like,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Minus,
}

// =============================================================================
// Constructors
// =============================================================================

pub fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        column: name.into(),
    }
}

pub fn table_col(table: &str, column: &str) -> Expr {
    Expr::Column {
        table: Some(table.into()),
        column: column.into(),
    }
}

pub fn lit_int(n: i64) -> Expr {
    Expr::Literal(Literal::Int(n))
}

pub fn lit_float(f: f64) -> Expr {
    Expr::Literal(Literal::Float(f))
}

pub fn lit_str(s: &str) -> Expr {
    Expr::Literal(Literal::String(s.into()))
}

pub fn lit_bool(b: bool) -> Expr {
    Expr::Literal(Literal::Bool(b))
}

pub fn lit_null() -> Expr {
    Expr::Literal(Literal::Null)
}

pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function {
        name: name.into(),
        args,
    }
}

/// SUM(expr)
pub fn sum(expr: Expr) -> Expr {
    func("SUM", vec![expr])
}

/// COUNT(expr)
pub fn count(expr: Expr) -> Expr {
    func("COUNT", vec![expr])
}

/// EXISTS (query)
pub fn exists(query: Query) -> Expr {
    Expr::Exists(Box::new(query))
}

/// COALESCE(args...)
pub fn coalesce(args: Vec<Expr>) -> Expr {
    func("COALESCE", args)
}

/// NULLIF(a, b)
pub fn nullif(a: Expr, b: Expr) -> Expr {
    func("NULLIF", vec![a, b])
}

/// CASE WHEN cond THEN then [ELSE otherwise] END
pub fn case_when(cond: Expr, then: Expr, otherwise: Option<Expr>) -> Expr {
    Expr::Case {
        when_clauses: vec![(cond, then)],
        else_clause: otherwise.map(Box::new),
    }
}

/// DENSE_RANK() OVER (ORDER BY ...)
pub fn dense_rank_over(order_by: Vec<Expr>) -> Expr {
    Expr::Window {
        function: Box::new(func("DENSE_RANK", vec![])),
        partition_by: vec![],
        order_by,
    }
}

// =============================================================================
// Fluent operators
// =============================================================================

/// Fluent combinators for building expressions.
pub trait ExprExt: Sized {
    fn into_expr(self) -> Expr;

    fn binary(self, op: BinaryOperator, other: impl Into<Expr>) -> Expr {
        Expr::BinaryOp {
            left: Box::new(self.into_expr()),
            op,
            right: Box::new(other.into()),
        }
    }

    fn eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Eq, other)
    }

    fn ne(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Ne, other)
    }

    fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::And, other)
    }

    fn or(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Or, other)
    }

    fn add(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Plus, other)
    }

    fn sub(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Minus, other)
    }

    fn mul(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Mul, other)
    }

    fn div(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Div, other)
    }

    fn like(self, pattern: impl Into<Expr>) -> Expr {
        self.binary(BinaryOperator::Like, pattern)
    }

    fn not(self) -> Expr {
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(self.into_expr()),
        }
    }

    fn neg(self) -> Expr {
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: Box::new(self.into_expr()),
        }
    }

    fn in_list(self, values: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self.into_expr()),
            values,
            negated: false,
        }
    }

    fn not_in_list(self, values: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self.into_expr()),
            values,
            negated: true,
        }
    }

    fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: false,
        }
    }

    fn paren(self) -> Expr {
        Expr::Paren(Box::new(self.into_expr()))
    }
}

impl ExprExt for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

/// Conjunction of every expression, or `None` when empty.
pub fn all_of(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(|acc, e| acc.and(e))
}

// =============================================================================
// Rendering
// =============================================================================

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Literal::Null => f.write_str("NULL"),
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::Ne => "<>",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Like => "LIKE",
        };
        f.write_str(op)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { table: Some(t), column } => write!(f, "{}.{}", t, column),
            Expr::Column { table: None, column } => f.write_str(column),
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::BinaryOp { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => write!(f, "NOT {}", expr),
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => write!(f, "-{}", expr),
            Expr::Function { name, args } => {
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Case {
                when_clauses,
                else_clause,
            } => {
                f.write_str("CASE")?;
                for (cond, then) in when_clauses {
                    write!(f, " WHEN {} THEN {}", cond, then)?;
                }
                if let Some(otherwise) = else_clause {
                    write!(f, " ELSE {}", otherwise)?;
                }
                f.write_str(" END")
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                write!(f, "{} {}IN (", expr, if *negated { "NOT " } else { "" })?;
                write_list(f, values)?;
                f.write_str(")")
            }
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::Paren(inner) => write!(f, "({})", inner),
            Expr::Exists(query) => write!(f, "EXISTS ({})", query),
            Expr::Window {
                function,
                partition_by,
                order_by,
            } => {
                write!(f, "{} OVER (", function)?;
                if !partition_by.is_empty() {
                    f.write_str("PARTITION BY ")?;
                    write_list(f, partition_by)?;
                    if !order_by.is_empty() {
                        f.write_str(" ")?;
                    }
                }
                if !order_by.is_empty() {
                    f.write_str("ORDER BY ")?;
                    write_list(f, order_by)?;
                }
                f.write_str(")")
            }
        }
    }
}
