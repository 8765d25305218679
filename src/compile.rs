//! End-to-end compilation of a hierarchy into its pipeline objects.
//!
//! The compiler runs four stages in strict order:
//!
//! ```text
//! RESOLVE ──► EXPAND ──► AGGREGATE ──► CASCADE ──► Succeeded
//!    │           │            │            │
//!    └───────────┴────────────┴────────────┴──────► Failed(stage)
//! ```
//!
//! A fatal error stops the stages after it. Diagnostics and artifacts from
//! every stage that ran are kept; generated objects are only handed out when
//! all four stages succeed.
//!
//! # Example
//!
//! ```ignore
//! use strata::compile::PipelineCompiler;
//!
//! let outcome = PipelineCompiler::new(&model, &config).compile(&fact_source);
//! if outcome.report.success {
//!     for object in outcome.objects() {
//!         println!("{}", object);
//!     }
//! } else {
//!     eprintln!("{}", outcome.report);
//! }
//! ```

use serde::Serialize;

use crate::aggregate::{Aggregation, JoinPlanExecutor};
use crate::cascade::{CascadeOutput, DataMartRow, FormulaCascadeEngine};
use crate::config::PipelineConfig;
use crate::connector::{FactSource, RetryPolicy};
use crate::diagnostics::{CompileReport, CompileState, ConfigValidationError, Stage};
use crate::emit;
use crate::expand::{Expansion, GranularityExpander};
use crate::ir::{GeneratedObject, ObjectKind};
use crate::model::HierarchyModel;
use crate::resolve::{ColumnResolver, Resolution};

// ============================================================================
// Result Types
// ============================================================================

/// What each stage produced, kept even when a later stage fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompileArtifacts {
    pub resolution: Option<Resolution>,
    pub expansion: Option<Expansion>,
    pub aggregation: Option<Aggregation>,
    pub cascade: Option<CascadeOutput>,
}

/// The result of one compile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompileOutcome {
    pub report: CompileReport,
    pub artifacts: CompileArtifacts,
    objects: Vec<GeneratedObject>,
}

impl CompileOutcome {
    /// The four generated objects in stage order. Empty unless the compile
    /// succeeded.
    pub fn objects(&self) -> &[GeneratedObject] {
        &self.objects
    }

    pub fn object(&self, kind: ObjectKind) -> Option<&GeneratedObject> {
        self.objects.iter().find(|o| o.kind == kind)
    }

    /// Evaluated data mart rows, when the cascade ran.
    pub fn data_mart_rows(&self) -> &[DataMartRow] {
        self.artifacts
            .cascade
            .as_ref()
            .map(|c| c.rows.as_slice())
            .unwrap_or(&[])
    }
}

// ============================================================================
// Compiler
// ============================================================================

/// Compiles one hierarchy against one configuration.
///
/// Both inputs are borrowed read-only for the whole compile.
#[derive(Debug, Clone)]
pub struct PipelineCompiler<'a> {
    model: &'a HierarchyModel,
    config: &'a PipelineConfig,
    retry: Option<RetryPolicy>,
}

/// Mutable state threaded through the stages of one compile.
struct Run {
    report: CompileReport,
    artifacts: CompileArtifacts,
    objects: Vec<GeneratedObject>,
}

impl<'a> PipelineCompiler<'a> {
    pub fn new(model: &'a HierarchyModel, config: &'a PipelineConfig) -> Self {
        Self {
            model,
            config,
            retry: None,
        }
    }

    /// Override the retry policy from the configuration.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Run every stage against the given fact source.
    pub fn compile(&self, source: &dyn FactSource) -> CompileOutcome {
        let span = tracing::info_span!("compile", project = %self.model.project_id());
        let _enter = span.enter();

        let mut run = Run {
            report: CompileReport::new(),
            artifacts: CompileArtifacts::default(),
            objects: Vec::new(),
        };

        let mut stage = Some(Stage::Resolve);
        while let Some(current) = stage {
            tracing::debug!(stage = %current, "entering stage");
            let ok = match current {
                Stage::Resolve => self.resolve(&mut run),
                Stage::Expand => self.expand(&mut run),
                Stage::Aggregate => self.aggregate(&mut run, source),
                Stage::Cascade => self.cascade(&mut run),
            };
            if !ok {
                tracing::warn!(
                    stage = %current,
                    errors = run.report.errors.len(),
                    "compile failed"
                );
                run.report.state = CompileState::Failed(current);
                run.objects.clear();
                return run.finish();
            }
            stage = current.next();
        }

        run.report.success = true;
        run.report.state = CompileState::Succeeded;
        tracing::info!(
            objects = run.objects.len(),
            warnings = run.report.warnings.len(),
            "compile succeeded"
        );
        run.finish()
    }

    fn resolve(&self, run: &mut Run) -> bool {
        for error in self.model.validate() {
            run.report.error(Stage::Resolve, error);
        }

        let resolution = ColumnResolver::new(&self.config.dynamic_column_map).resolve_all(self.model);
        for error in resolution.errors.iter().cloned() {
            run.report.error(Stage::Resolve, error);
        }
        run.report.discovered_sources = resolution.discovered.clone();
        run.report
            .stage_row_estimates
            .insert(Stage::Resolve, resolution.resolved.len());
        run.objects.push(emit::translation_mapping(
            self.model.project_id(),
            &resolution.resolved,
        ));
        run.artifacts.resolution = Some(resolution);

        run.report.errors_at(Stage::Resolve).next().is_none()
    }

    fn expand(&self, run: &mut Run) -> bool {
        let Some(resolution) = &run.artifacts.resolution else {
            return false;
        };
        let expansion = GranularityExpander::new(self.model, self.config).expand(&resolution.resolved);

        for error in expansion.errors.iter().cloned() {
            run.report.error(Stage::Expand, error);
        }
        run.report.warn_all(Stage::Expand, expansion.warnings.iter().cloned());
        run.report
            .stage_row_estimates
            .insert(Stage::Expand, expansion.table.len());
        run.objects.push(emit::granularity_table(
            self.model.project_id(),
            &expansion.table,
        ));
        let ok = expansion.errors.is_empty();
        run.artifacts.expansion = Some(expansion);
        ok
    }

    fn aggregate(&self, run: &mut Run, source: &dyn FactSource) -> bool {
        let Some(expansion) = &run.artifacts.expansion else {
            return false;
        };

        let fact_table = match self.config.fact_source.resolved() {
            Ok(table) => table,
            Err(err) => {
                run.report.error(
                    Stage::Aggregate,
                    ConfigValidationError::InvalidFactSource {
                        message: err.to_string(),
                    },
                );
                return false;
            }
        };

        let mut executor = JoinPlanExecutor::new(self.config, &expansion.table);
        if let Some(retry) = self.retry {
            executor = executor.with_retry(retry);
        }

        match executor.execute(source) {
            Ok(aggregation) => {
                run.report.warn_all(Stage::Aggregate, aggregation.warnings.iter().cloned());
                run.report
                    .stage_row_estimates
                    .insert(Stage::Aggregate, aggregation.rows.len());
                run.objects.push(emit::pre_aggregation_fact(
                    self.model.project_id(),
                    self.config,
                    &fact_table,
                    &expansion.table,
                    &aggregation,
                ));
                run.artifacts.aggregation = Some(aggregation);
                true
            }
            Err(errors) => {
                for error in errors {
                    run.report.error(Stage::Aggregate, error);
                }
                false
            }
        }
    }

    fn cascade(&self, run: &mut Run) -> bool {
        let Some(aggregation) = &run.artifacts.aggregation else {
            return false;
        };

        let engine = FormulaCascadeEngine::new(self.model, aggregation.measures.len());
        match engine.run(&aggregation.rows) {
            Ok(output) => {
                run.report.warn_all(Stage::Cascade, output.warnings.iter().cloned());
                run.report
                    .stage_row_estimates
                    .insert(Stage::Cascade, output.rows.len());
                run.objects.push(emit::data_mart(
                    self.model.project_id(),
                    self.model,
                    aggregation,
                    &output.plan,
                ));
                run.artifacts.cascade = Some(output);
                true
            }
            Err(errors) => {
                for error in errors {
                    run.report.error(Stage::Cascade, error);
                }
                false
            }
        }
    }
}

impl Run {
    fn finish(self) -> CompileOutcome {
        CompileOutcome {
            report: self.report,
            artifacts: self.artifacts,
            objects: self.objects,
        }
    }
}

/// Compile a hierarchy with the configuration's retry policy.
pub fn compile(model: &HierarchyModel, config: &PipelineConfig, source: &dyn FactSource) -> CompileOutcome {
    PipelineCompiler::new(model, config).compile(source)
}
