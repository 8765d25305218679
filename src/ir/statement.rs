//! Query and statement builders.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::expr::{Expr, ExprExt, Literal};

// =============================================================================
// Select list
// =============================================================================

/// A SELECT list item: expression with optional alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

// =============================================================================
// Relations
// =============================================================================

/// A physical table reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn new(table: &str) -> Self {
        Self {
            database: None,
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = Some(database.into());
        self
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in [&self.database, &self.schema].into_iter().flatten() {
            write!(f, "{}.", part)?;
        }
        f.write_str(&self.table)
    }
}

/// Anything a query can read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Table(TableRef),
    /// Another generated object or a CTE, by name.
    Named(String),
    Subquery(Box<Query>),
    /// Inline rows computed at compile time.
    Values {
        columns: Vec<String>,
        rows: Vec<Vec<Literal>>,
    },
}

/// A relation with an alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FromItem {
    pub relation: Relation,
    pub alias: Option<String>,
}

impl FromItem {
    pub fn new(relation: Relation) -> Self {
        Self {
            relation,
            alias: None,
        }
    }

    pub fn named(name: &str) -> Self {
        Self::new(Relation::Named(name.into()))
    }

    pub fn table(table: TableRef) -> Self {
        Self::new(Relation::Table(table))
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl fmt::Display for FromItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Relation::Table(t) => write!(f, "{}", t)?,
            Relation::Named(name) => f.write_str(name)?,
            Relation::Subquery(q) => write!(f, "({})", q)?,
            Relation::Values { rows, .. } => {
                f.write_str("(VALUES ")?;
                for (i, row) in rows.iter().enumerate() {
                    let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                    write!(f, "{}({})", if i > 0 { ", " } else { "" }, values.join(", "))?;
                }
                f.write_str(")")?;
            }
        }
        if let Some(alias) = &self.alias {
            write!(f, " AS {}", alias)?;
            if let Relation::Values { columns, .. } = &self.relation {
                write!(f, " ({})", columns.join(", "))?;
            }
        }
        Ok(())
    }
}

/// Type of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub join_type: JoinType,
    pub item: FromItem,
    pub on: Expr,
}

/// A common table expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cte {
    pub name: String,
    pub query: Query,
}

// =============================================================================
// Query
// =============================================================================

/// A SELECT query, optionally combined with others via UNION ALL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub with: Vec<Cte>,
    pub distinct: bool,
    pub select: Vec<SelectExpr>,
    pub from: Option<FromItem>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<Expr>,
    pub union_all: Vec<Query>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cte(mut self, name: &str, query: Query) -> Self {
        self.with.push(Cte {
            name: name.into(),
            query,
        });
        self
    }

    pub fn select(mut self, exprs: Vec<impl Into<SelectExpr>>) -> Self {
        self.select = exprs.into_iter().map(Into::into).collect();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn from(mut self, item: FromItem) -> Self {
        self.from = Some(item);
        self
    }

    pub fn join(mut self, join_type: JoinType, item: FromItem, on: Expr) -> Self {
        self.joins.push(Join { join_type, item, on });
        self
    }

    pub fn inner_join(self, item: FromItem, on: Expr) -> Self {
        self.join(JoinType::Inner, item, on)
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, condition: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    pub fn having(mut self, condition: Expr) -> Self {
        self.having = Some(condition);
        self
    }

    pub fn order_by(mut self, exprs: Vec<Expr>) -> Self {
        self.order_by = exprs;
        self
    }

    /// Combine queries with UNION ALL. Returns `None` for an empty input.
    pub fn union_all_of(queries: Vec<Query>) -> Option<Query> {
        let mut iter = queries.into_iter();
        let mut first = iter.next()?;
        first.union_all.extend(iter);
        Some(first)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.with.is_empty() {
            f.write_str("WITH ")?;
            for (i, cte) in self.with.iter().enumerate() {
                if i > 0 {
                    f.write_str(",\n")?;
                }
                write!(f, "{} AS ({})", cte.name, cte.query)?;
            }
            f.write_str("\n")?;
        }

        f.write_str(if self.distinct { "SELECT DISTINCT " } else { "SELECT " })?;
        for (i, item) in self.select.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", item.expr)?;
            if let Some(alias) = &item.alias {
                write!(f, " AS {}", alias)?;
            }
        }
        if let Some(from) = &self.from {
            write!(f, "\nFROM {}", from)?;
        }
        for join in &self.joins {
            let kind = match join.join_type {
                JoinType::Inner => "INNER JOIN",
                JoinType::Left => "LEFT JOIN",
            };
            write!(f, "\n{} {} ON {}", kind, join.item, join.on)?;
        }
        if let Some(cond) = &self.where_clause {
            write!(f, "\nWHERE {}", cond)?;
        }
        if !self.group_by.is_empty() {
            f.write_str("\nGROUP BY ")?;
            for (i, e) in self.group_by.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", e)?;
            }
        }
        if let Some(cond) = &self.having {
            write!(f, "\nHAVING {}", cond)?;
        }
        if !self.order_by.is_empty() {
            f.write_str("\nORDER BY ")?;
            for (i, e) in self.order_by.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", e)?;
            }
        }
        for other in &self.union_all {
            write!(f, "\nUNION ALL\n{}", other)?;
        }
        Ok(())
    }
}

// =============================================================================
// Statements
// =============================================================================

/// A generated statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "statement", rename_all = "snake_case")]
pub enum Statement {
    /// A table materialized from rows computed at compile time.
    CreateTable {
        name: String,
        columns: Vec<String>,
        rows: Vec<Vec<Literal>>,
    },

    /// A view over other generated objects and the fact source.
    CreateView { name: String, query: Query },
}

impl Statement {
    pub fn name(&self) -> &str {
        match self {
            Statement::CreateTable { name, .. } | Statement::CreateView { name, .. } => name,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateTable {
                name,
                columns,
                rows,
            } => {
                writeln!(f, "CREATE TABLE {} ({})", name, columns.join(", "))?;
                write!(f, "VALUES")?;
                for (i, row) in rows.iter().enumerate() {
                    let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                    write!(f, "{}\n  ({})", if i > 0 { "," } else { "" }, values.join(", "))?;
                }
                Ok(())
            }
            Statement::CreateView { name, query } => {
                write!(f, "CREATE VIEW {} AS\n{}", name, query)
            }
        }
    }
}
