//! # Strata
//!
//! Compiles a declarative reporting hierarchy into a dependency-ordered
//! aggregation pipeline that produces a BI-ready data mart.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        HierarchyModel + PipelineConfig (snapshot)        │
//! │   (nodes, source mappings, formulas, join patterns)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [resolve]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Resolved mappings → translation mapping           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [expand]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Granularity table (precedence rounds, exclusions)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [aggregate]  ◄── FactSource
//! ┌─────────────────────────────────────────────────────────┐
//! │     Per-branch joins, unioned → pre-aggregation fact     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [cascade]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Formula levels 1..5, surrogate keys → data mart        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every stage reports into one [`CompileReport`]. Generated objects are
//! rendered through the SQL [`ir`].

pub mod aggregate;
pub mod cascade;
pub mod compile;
pub mod config;
pub mod connector;
pub mod diagnostics;
pub mod emit;
pub mod expand;
pub mod ir;
pub mod model;
pub mod predicate;
pub mod resolve;
pub mod store;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::aggregate::{AggregatedRow, Aggregation, JoinPlanExecutor};
    pub use crate::cascade::{CascadeOutput, DataMartRow, FormulaCascadeEngine};
    pub use crate::compile::{compile, CompileOutcome, PipelineCompiler};
    pub use crate::config::{JoinPattern, PipelineConfig};
    pub use crate::connector::{FactSource, FactValue, InMemoryFactSource, RetryPolicy};
    pub use crate::diagnostics::{
        CompileError, CompileReport, ConfigValidationError, CycleError, DataQualityWarning, Stage,
    };
    pub use crate::expand::{GranularityExpander, GranularityTable};
    pub use crate::ir::{GeneratedObject, ObjectKind};
    pub use crate::model::{
        FormulaDefinition, FormulaLogic, HierarchyModel, HierarchyNode, SourceMapping,
    };
    pub use crate::predicate::Predicate;
    pub use crate::resolve::ColumnResolver;
    pub use crate::store::{HierarchyStore, InMemoryHierarchyStore};
}

pub use compile::{compile, CompileOutcome, PipelineCompiler};
pub use diagnostics::{CompileReport, Stage};
