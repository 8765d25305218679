//! Compile diagnostics: fatal errors, data-quality warnings, and the report.
//!
//! Every stage collects its own diagnostics. A fatal error at one stage stops
//! the stages after it, but everything collected up to that point is kept in
//! the [`CompileReport`].

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::connector::ConnectorError;

// ============================================================================
// Stages
// ============================================================================

/// The four compile stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Resolve,
    Expand,
    Aggregate,
    Cascade,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Resolve, Stage::Expand, Stage::Aggregate, Stage::Cascade];

    /// The stage that runs after this one, if any.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Resolve => Some(Stage::Expand),
            Stage::Expand => Some(Stage::Aggregate),
            Stage::Aggregate => Some(Stage::Cascade),
            Stage::Cascade => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "RESOLVE",
            Stage::Expand => "EXPAND",
            Stage::Aggregate => "AGGREGATE",
            Stage::Cascade => "CASCADE",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Fatal errors
// ============================================================================

/// Which side of a branch a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySide {
    Join,
    Fact,
}

impl fmt::Display for KeySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySide::Join => f.write_str("join"),
            KeySide::Fact => f.write_str("fact"),
        }
    }
}

/// What a configured fact column is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactColumnUsage {
    Measure,
    GroupBy,
}

impl fmt::Display for FactColumnUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactColumnUsage::Measure => f.write_str("measure"),
            FactColumnUsage::GroupBy => f.write_str("group-by"),
        }
    }
}

/// A configuration or model defect. Permanent until the input is fixed.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigValidationError {
    #[error("node '{node_id}' mapping {mapping_index}: unknown id_source '{token}'{}", nearest_hint(.nearest))]
    UnknownIdSource {
        node_id: String,
        mapping_index: u32,
        token: String,
        nearest: Option<String>,
    },

    #[error("branch '{branch}' pairs {join_keys} join keys with {fact_keys} fact keys")]
    KeyArityMismatch {
        branch: String,
        join_keys: usize,
        fact_keys: usize,
    },

    #[error("branch '{branch}' references unknown {side} key '{key}'")]
    UnknownBranchKey {
        branch: String,
        side: KeySide,
        key: String,
    },

    #[error("column map keys '{first}' and '{second}' name the same symbol")]
    DuplicateColumnSymbol { first: String, second: String },

    #[error("no join patterns configured")]
    NoBranches,

    #[error("fact source location is invalid: {message}")]
    InvalidFactSource { message: String },

    #[error("no measures configured and none match prefix {prefix:?}")]
    NoMeasures { prefix: Option<String> },

    #[error("{usage} column '{column}' is not in the fact schema")]
    UnknownFactColumn { usage: FactColumnUsage, column: String },

    #[error("formula '{group}' at level {level} references unknown '{reference}'")]
    MissingFormulaReference {
        group: String,
        level: u8,
        reference: String,
    },

    #[error("formula '{group}' at level {level} uses {logic} but has no second operand")]
    MissingSecondOperand {
        group: String,
        level: u8,
        logic: String,
    },

    #[error("formula '{group}' has precedence {level}, expected 1..=5")]
    InvalidPrecedence { group: String, level: u8 },

    #[error("node '{node_id}' skips group filter precedence round {missing} (declared {declared:?})")]
    SkippedPrecedenceRound {
        node_id: String,
        declared: Vec<u8>,
        missing: u8,
    },

    #[error("duplicate node id '{node_id}'")]
    DuplicateNode { node_id: String },

    #[error("node '{node_id}' references unknown parent '{parent_id}'")]
    UnknownParent { node_id: String, parent_id: String },

    #[error("hierarchy must have exactly one root, found {count}")]
    RootCount { count: usize },

    #[error("parent cycle through {}", .path.join(" -> "))]
    ParentCycle { path: Vec<String> },

    #[error("calculation node '{node_id}' carries {count} mapping(s)")]
    CalculationWithMappings { node_id: String, count: usize },

    #[error("mapping {mapping_index} is owned by unknown node '{node_id}'")]
    UnknownMappingOwner { node_id: String, mapping_index: u32 },

    #[error("node '{node_id}' declares {count} levels, at most 9 are supported")]
    TooManyLevels { node_id: String, count: usize },
}

fn nearest_hint(nearest: &Option<String>) -> String {
    match nearest {
        Some(candidate) => format!(" (did you mean '{}'?)", candidate),
        None => String::new(),
    }
}

/// A formula reads a value that is not available before it runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleError {
    #[error("formula '{group}' at level {level} reads '{reference}', produced at level {produced_at}")]
    ForwardReference {
        group: String,
        level: u8,
        reference: String,
        produced_at: u8,
    },

    #[error("formula dependency cycle: {}", .members.join(" -> "))]
    Cycle { members: Vec<String> },
}

/// Any fatal compile error.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(untagged)]
pub enum CompileError {
    #[error("{0}")]
    Config(#[from] ConfigValidationError),

    #[error("{0}")]
    Cycle(#[from] CycleError),

    #[error("{0}")]
    Connector(#[from] ConnectorError),
}

// ============================================================================
// Warnings
// ============================================================================

/// A non-fatal data-quality finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// A mapping names a filter group the node does not declare.
    SchemaDrift {
        node_id: String,
        filter_group: String,
        declared: Vec<String>,
    },

    /// An active leaf carries no mappings.
    OrphanNode { node_id: String },

    /// A node's grain satisfies more than one branch.
    AmbiguousRouting { node_id: String, branches: Vec<String> },

    /// A node's include mappings narrowed to no grain rows at all.
    EmptyGrain { node_id: String },

    /// A routed node matched nothing in the fact source for a branch.
    EmptyBranchResult { node_id: String, branch: String },

    /// A node's grain satisfies no branch at all.
    UnroutedNode { node_id: String },

    /// A DIVIDE formula hit a zero or absent denominator.
    DivideByZero {
        group: String,
        level: u8,
        occurrences: usize,
    },
}

impl DataQualityWarning {
    /// The node the warning is about, if it is about a node.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            DataQualityWarning::SchemaDrift { node_id, .. }
            | DataQualityWarning::OrphanNode { node_id }
            | DataQualityWarning::EmptyGrain { node_id }
            | DataQualityWarning::AmbiguousRouting { node_id, .. }
            | DataQualityWarning::EmptyBranchResult { node_id, .. }
            | DataQualityWarning::UnroutedNode { node_id } => Some(node_id),
            DataQualityWarning::DivideByZero { .. } => None,
        }
    }
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataQualityWarning::SchemaDrift {
                node_id,
                filter_group,
                declared,
            } => write!(
                f,
                "node '{}' maps filter group '{}' not declared on the node ({})",
                node_id,
                filter_group,
                declared.join(", ")
            ),
            DataQualityWarning::OrphanNode { node_id } => {
                write!(f, "leaf node '{}' has no mappings", node_id)
            }
            DataQualityWarning::EmptyGrain { node_id } => {
                write!(f, "node '{}' has mappings but admits no key values", node_id)
            }
            DataQualityWarning::AmbiguousRouting { node_id, branches } => write!(
                f,
                "node '{}' routes through multiple branches: {}",
                node_id,
                branches.join(", ")
            ),
            DataQualityWarning::EmptyBranchResult { node_id, branch } => write!(
                f,
                "node '{}' matched no fact rows in branch '{}'",
                node_id, branch
            ),
            DataQualityWarning::UnroutedNode { node_id } => {
                write!(f, "node '{}' satisfies no branch join keys", node_id)
            }
            DataQualityWarning::DivideByZero {
                group,
                level,
                occurrences,
            } => write!(
                f,
                "formula '{}' at level {} divided by zero {} time(s)",
                group, level, occurrences
            ),
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// A fatal error tagged with the stage that raised it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageError {
    pub stage: Stage,
    pub error: CompileError,
}

/// A warning tagged with the stage that raised it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageWarning {
    pub stage: Stage,
    pub warning: DataQualityWarning,
}

/// Terminal state of a compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum CompileState {
    Succeeded,
    Failed(Stage),
}

/// The single report returned by every compile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompileReport {
    pub success: bool,
    pub state: CompileState,
    pub errors: Vec<StageError>,
    pub warnings: Vec<StageWarning>,
    pub stage_row_estimates: BTreeMap<Stage, usize>,
    /// Distinct symbolic attribute names that resolved.
    pub discovered_sources: Vec<String>,
}

impl CompileReport {
    pub(crate) fn new() -> Self {
        Self {
            success: false,
            state: CompileState::Failed(Stage::Resolve),
            errors: Vec::new(),
            warnings: Vec::new(),
            stage_row_estimates: BTreeMap::new(),
            discovered_sources: Vec::new(),
        }
    }

    pub(crate) fn error(&mut self, stage: Stage, error: impl Into<CompileError>) {
        self.errors.push(StageError {
            stage,
            error: error.into(),
        });
    }

    pub(crate) fn warn_all(&mut self, stage: Stage, warnings: impl IntoIterator<Item = DataQualityWarning>) {
        self.warnings
            .extend(warnings.into_iter().map(|warning| StageWarning { stage, warning }));
    }

    /// Fatal errors raised at the given stage.
    pub fn errors_at(&self, stage: Stage) -> impl Iterator<Item = &CompileError> {
        self.errors
            .iter()
            .filter(move |e| e.stage == stage)
            .map(|e| &e.error)
    }

    /// All warnings, regardless of stage.
    pub fn all_warnings(&self) -> impl Iterator<Item = &DataQualityWarning> {
        self.warnings.iter().map(|w| &w.warning)
    }

    /// Render the report as pretty JSON for callers that persist it.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for CompileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            CompileState::Succeeded => writeln!(f, "compile succeeded")?,
            CompileState::Failed(stage) => writeln!(f, "compile failed at {}", stage)?,
        }
        for (stage, rows) in &self.stage_row_estimates {
            writeln!(f, "  {}: {} row(s)", stage, rows)?;
        }
        for e in &self.errors {
            writeln!(f, "  error [{}] {}", e.stage, e.error)?;
        }
        for w in &self.warnings {
            writeln!(f, "  warning [{}] {}", w.stage, w.warning)?;
        }
        Ok(())
    }
}
