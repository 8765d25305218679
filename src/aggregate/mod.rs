//! Branch joins and measure aggregation.
//!
//! Each branch pairs grain columns with fact columns. The executor asks the
//! fact source for rows grouped at fact-key grain, joins them to the grain
//! rows routed to the branch, and sums measures per (node, grouping key).

mod routing;

pub use routing::{route, validate_branches, Routing};

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::{JoinPattern, PipelineConfig};
use crate::connector::{ConnectorError, FactRequest, FactSource, RetryPolicy};
use crate::diagnostics::{CompileError, ConfigValidationError, DataQualityWarning, FactColumnUsage};
use crate::expand::{GrainRow, GranularityTable};
use crate::predicate::Predicate;

/// Grouping-key values, position-paired with the configured group-by columns.
pub type GroupKey = Vec<Option<String>>;

/// Summed measures for one node and grouping key from one branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRow {
    pub node_id: String,
    pub branch: String,
    pub group_key: GroupKey,
    pub measures: Vec<Option<f64>>,
}

/// What one branch asked the fact source for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchPlan {
    pub branch: String,
    pub node_ids: Vec<String>,
    pub request: FactRequest,
}

/// Output of aggregating one branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BranchResult {
    pub branch: String,
    pub rows: Vec<AggregatedRow>,
    pub warnings: Vec<DataQualityWarning>,
}

/// Output of the aggregate stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregation {
    pub measures: Vec<String>,
    pub group_by: Vec<String>,
    pub rows: Vec<AggregatedRow>,
    pub plans: Vec<BranchPlan>,
    pub warnings: Vec<DataQualityWarning>,
}

/// Concatenate branch results, keeping branch order.
pub fn union(results: Vec<BranchResult>) -> (Vec<AggregatedRow>, Vec<DataQualityWarning>) {
    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for result in results {
        rows.extend(result.rows);
        warnings.extend(result.warnings);
    }
    (rows, warnings)
}

fn add_into(acc: &mut [Option<f64>], values: &[Option<f64>], sign: f64) {
    for (sum, value) in acc.iter_mut().zip(values) {
        if let Some(v) = value {
            *sum = Some(sum.unwrap_or(0.0) + sign * v);
        }
    }
}

fn unknown_columns(
    columns: &[String],
    usage: FactColumnUsage,
    fact_schema: &[String],
) -> Vec<ConfigValidationError> {
    columns
        .iter()
        .filter(|c| !fact_schema.contains(c))
        .map(|c| ConfigValidationError::UnknownFactColumn {
            usage,
            column: c.clone(),
        })
        .collect()
}

/// Joins the grain to fact data along the configured branches.
#[derive(Debug, Clone)]
pub struct JoinPlanExecutor<'a> {
    config: &'a PipelineConfig,
    grain: &'a GranularityTable,
    retry: RetryPolicy,
}

impl<'a> JoinPlanExecutor<'a> {
    pub fn new(config: &'a PipelineConfig, grain: &'a GranularityTable) -> Self {
        Self {
            config,
            grain,
            retry: RetryPolicy::from(&config.retry),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Measures to aggregate, checked against the fact schema.
    pub fn measures(&self, fact_schema: &[String]) -> Result<Vec<String>, Vec<ConfigValidationError>> {
        let measures = self.config.select_measures(fact_schema);
        if measures.is_empty() {
            return Err(vec![ConfigValidationError::NoMeasures {
                prefix: self.config.measure_prefix.clone(),
            }]);
        }
        let unknown = unknown_columns(&measures, FactColumnUsage::Measure, fact_schema);
        if !unknown.is_empty() {
            return Err(unknown);
        }
        Ok(measures)
    }

    /// The fact request a branch issues.
    pub fn request(&self, branch: &JoinPattern, measures: &[String]) -> FactRequest {
        let segment = self
            .config
            .account_segment
            .as_ref()
            .map(|segment| Predicate::eq(&self.config.account_segment_column, segment));

        FactRequest {
            keys: branch
                .fact_keys
                .iter()
                .chain(&self.config.group_by)
                .cloned()
                .collect(),
            predicate: Predicate::and_opt(branch.predicate.clone(), segment),
            measures: measures.to_vec(),
        }
    }

    /// Join one branch's fact rows to the grain rows routed to it.
    ///
    /// A fact row counts once per node even when several of the node's grain
    /// rows admit it.
    pub fn aggregate(
        &self,
        branch: &JoinPattern,
        source: &dyn FactSource,
        measures: &[String],
    ) -> Result<BranchResult, ConnectorError> {
        let routed: Vec<&GrainRow> = self
            .grain
            .rows
            .iter()
            .filter(|r| r.populates(&branch.join_keys))
            .collect();
        let request = self.request(branch, measures);
        let fact_rows = self.retry.run(&branch.name, || source.aggregate(&request))?;

        let arity = branch.join_keys.len();
        let mut sums: BTreeMap<(String, GroupKey), Vec<Option<f64>>> = BTreeMap::new();
        let mut matched: BTreeSet<String> = BTreeSet::new();

        for fact in &fact_rows {
            let pairs: Vec<(&str, Option<&str>)> = branch
                .join_keys
                .iter()
                .map(String::as_str)
                .zip(fact.keys.iter().map(Option::as_deref))
                .collect();
            let group_key: GroupKey = fact.keys.iter().skip(arity).cloned().collect();

            let nodes: BTreeMap<&str, bool> = routed
                .iter()
                .filter(|row| row.admits(&pairs))
                .map(|row| (row.node_id.as_str(), row.sign_change))
                .collect();

            for (node_id, sign_change) in nodes {
                let sign = if self.config.has_sign_change && sign_change {
                    -1.0
                } else {
                    1.0
                };
                let acc = sums
                    .entry((node_id.to_string(), group_key.clone()))
                    .or_insert_with(|| vec![None; measures.len()]);
                add_into(acc, &fact.measures, sign);
                matched.insert(node_id.to_string());
            }
        }

        let routed_nodes: BTreeSet<&str> = routed.iter().map(|r| r.node_id.as_str()).collect();
        let warnings = routed_nodes
            .into_iter()
            .filter(|node| !matched.contains(*node))
            .map(|node| DataQualityWarning::EmptyBranchResult {
                node_id: node.to_string(),
                branch: branch.name.clone(),
            })
            .collect();

        tracing::debug!(
            branch = %branch.name,
            fact_rows = fact_rows.len(),
            nodes = matched.len(),
            "aggregated branch"
        );

        Ok(BranchResult {
            branch: branch.name.clone(),
            rows: sums
                .into_iter()
                .map(|((node_id, group_key), measures)| AggregatedRow {
                    node_id,
                    branch: branch.name.clone(),
                    group_key,
                    measures,
                })
                .collect(),
            warnings,
        })
    }

    /// Validate, route, and aggregate every branch.
    ///
    /// Validation defects are all reported together. A connector failure
    /// stops at the first branch that fails.
    pub fn execute(&self, source: &dyn FactSource) -> Result<Aggregation, Vec<CompileError>> {
        let fact_schema = self
            .retry
            .run("schema", || source.schema())
            .map_err(|e| vec![CompileError::from(e)])?;

        let mut errors: Vec<CompileError> =
            validate_branches(&self.config.join_patterns, self.grain, &fact_schema)
                .into_iter()
                .map(CompileError::from)
                .collect();
        errors.extend(
            unknown_columns(&self.config.group_by, FactColumnUsage::GroupBy, &fact_schema)
                .into_iter()
                .map(CompileError::from),
        );
        let measures = match self.measures(&fact_schema) {
            Ok(measures) => measures,
            Err(errs) => {
                errors.extend(errs.into_iter().map(CompileError::from));
                Vec::new()
            }
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        let routing = route(&self.config.join_patterns, self.grain);
        let mut results = Vec::with_capacity(self.config.join_patterns.len());
        let mut plans = Vec::with_capacity(self.config.join_patterns.len());

        for branch in &self.config.join_patterns {
            let node_ids: BTreeSet<String> = routing
                .rows_for(&branch.name)
                .iter()
                .map(|&idx| self.grain.rows[idx].node_id.clone())
                .collect();
            plans.push(BranchPlan {
                branch: branch.name.clone(),
                node_ids: node_ids.into_iter().collect(),
                request: self.request(branch, &measures),
            });
            results.push(
                self.aggregate(branch, source, &measures)
                    .map_err(|e| vec![CompileError::from(e)])?,
            );
        }

        let (rows, branch_warnings) = union(results);
        let mut warnings = routing.warnings;
        warnings.extend(branch_warnings);

        Ok(Aggregation {
            measures,
            group_by: self.config.group_by.clone(),
            rows,
            plans,
            warnings,
        })
    }
}
