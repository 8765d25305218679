//! Dialect-agnostic intermediate representation of generated objects.
//!
//! The compiler never emits dialect SQL. It produces [`GeneratedObject`]s
//! whose statements an external emitter turns into DDL/DML or model files.

pub mod expr;
pub mod statement;

pub use expr::{Expr, ExprExt, Literal};
pub use statement::{FromItem, Query, Relation, SelectExpr, Statement, TableRef};

use std::fmt;

use serde::Serialize;

use crate::diagnostics::Stage;

/// The four objects a successful compile produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    TranslationMapping,
    GranularityTable,
    PreAggregationFact,
    DataMart,
}

impl ObjectKind {
    pub fn stage(self) -> Stage {
        match self {
            ObjectKind::TranslationMapping => Stage::Resolve,
            ObjectKind::GranularityTable => Stage::Expand,
            ObjectKind::PreAggregationFact => Stage::Aggregate,
            ObjectKind::DataMart => Stage::Cascade,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            ObjectKind::TranslationMapping => "translation_mapping",
            ObjectKind::GranularityTable => "granularity",
            ObjectKind::PreAggregationFact => "pre_aggregation_fact",
            ObjectKind::DataMart => "data_mart",
        }
    }

    /// Object name for a project, e.g. `los_granularity`.
    pub fn object_name(self, project_id: &str) -> String {
        format!("{}_{}", sanitize(project_id), self.suffix())
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// One emitted artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedObject {
    pub kind: ObjectKind,
    pub stage: Stage,
    /// Names of the generated objects this one reads.
    pub depends_on: Vec<String>,
    pub statement: Statement,
}

impl GeneratedObject {
    pub fn new(kind: ObjectKind, depends_on: Vec<String>, statement: Statement) -> Self {
        Self {
            kind,
            stage: kind.stage(),
            depends_on,
            statement,
        }
    }

    pub fn name(&self) -> &str {
        self.statement.name()
    }
}

impl fmt::Display for GeneratedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-- {} [{}]", self.name(), self.stage)?;
        if !self.depends_on.is_empty() {
            write!(f, " depends on {}", self.depends_on.join(", "))?;
        }
        write!(f, "\n{}", self.statement)
    }
}
