//! Formula cascade: calculated rows, surrogate keys, and label backfill.
//!
//! Formulas run one precedence level at a time. Level L reads the raw
//! aggregates plus a snapshot of everything levels below L produced, so a
//! formula never sees a value from its own level or later.
//!
//! ```text
//! raw aggregates ──► level 1 ──► level 2 ──► ... ──► level 5
//!        │              │            │                  │
//!        └──────────────┴────────────┴──────────────────┴──► data mart rows
//!                                                            (dense-ranked)
//! ```

mod graph;
mod keys;

pub use graph::{plan, FormulaPlan, Operand, PlannedFormula};
pub use keys::{backfill, dense_rank, node_extension_levels, node_levels};

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::aggregate::{AggregatedRow, GroupKey};
use crate::diagnostics::{CompileError, DataQualityWarning};
use crate::model::{FormulaLogic, HierarchyModel};

/// Measures per grouping key for one node.
pub type NodeValues = BTreeMap<GroupKey, Vec<Option<f64>>>;

/// One row of the data mart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataMartRow {
    pub surrogate_key: u64,
    pub node_id: String,
    pub node_name: String,
    pub sort_order: i64,
    pub levels: Vec<String>,
    pub extension_levels: Vec<String>,
    pub group_key: GroupKey,
    pub measures: Vec<Option<f64>>,
    pub is_calculated: bool,
    pub formula_group: Option<String>,
    pub precedence: Option<u8>,
}

/// Output of the cascade stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CascadeOutput {
    pub plan: FormulaPlan,
    /// Calculation node id -> computed values.
    pub computed: BTreeMap<String, NodeValues>,
    pub rows: Vec<DataMartRow>,
    pub warnings: Vec<DataQualityWarning>,
}

impl CascadeOutput {
    pub fn rows_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a DataMartRow> + 'a {
        self.rows.iter().filter(move |r| r.node_id == node_id)
    }

    /// A computed measure for a calculation node and grouping key.
    pub fn computed_value(&self, node_id: &str, group_key: &[Option<String>], measure: usize) -> Option<f64> {
        self.computed
            .get(node_id)?
            .get(group_key)?
            .get(measure)
            .copied()
            .flatten()
    }
}

/// Sum aggregated rows per node across branches.
pub fn raw_values(rows: &[AggregatedRow], width: usize) -> BTreeMap<String, NodeValues> {
    let mut out: BTreeMap<String, NodeValues> = BTreeMap::new();
    for row in rows {
        let acc = out
            .entry(row.node_id.clone())
            .or_default()
            .entry(row.group_key.clone())
            .or_insert_with(|| vec![None; width]);
        merge_into(acc, &row.measures);
    }
    out
}

fn merge_into(acc: &mut [Option<f64>], values: &[Option<f64>]) {
    for (sum, value) in acc.iter_mut().zip(values) {
        if let Some(v) = value {
            *sum = Some(sum.unwrap_or(0.0) + v);
        }
    }
}

/// NULL in, NULL out.
fn both(a: Option<f64>, b: Option<f64>, op: impl Fn(f64, f64) -> f64) -> Option<f64> {
    Some(op(a?, b?))
}

/// Apply a formula's logic per grouping key.
///
/// A key present on only one side reads 0 on the other. Returns the values
/// and how many zero or absent denominators DIVIDE hit.
pub fn evaluate(
    logic: FormulaLogic,
    first: &NodeValues,
    second: Option<&NodeValues>,
    width: usize,
) -> (NodeValues, usize) {
    let zero = vec![Some(0.0); width];
    let keys: BTreeSet<&GroupKey> = first
        .keys()
        .chain(second.into_iter().flat_map(|s| s.keys()))
        .collect();

    let mut out = NodeValues::new();
    let mut zero_divisions = 0;
    for key in keys {
        let a = first.get(key).unwrap_or(&zero);
        let b = second.map(|s| s.get(key).unwrap_or(&zero));
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            let x = a.get(i).copied().flatten();
            let y = b.and_then(|b| b.get(i).copied().flatten());
            let value = match (logic, b.is_some()) {
                (FormulaLogic::Add, false) => x,
                (FormulaLogic::Add, true) => both(x, y, |p, q| p + q),
                (FormulaLogic::Subtract, _) => both(x, y, |p, q| p - q),
                (FormulaLogic::Multiply, _) => both(x, y, |p, q| p * q),
                (FormulaLogic::Divide, _) => match y {
                    Some(d) if d == 0.0 => {
                        zero_divisions += 1;
                        None
                    }
                    _ => both(x, y, |p, q| p / q),
                },
            };
            values.push(value);
        }
        out.insert(key.clone(), values);
    }
    (out, zero_divisions)
}

/// Runs the formula cascade and builds the data mart rows.
#[derive(Debug, Clone, Copy)]
pub struct FormulaCascadeEngine<'a> {
    model: &'a HierarchyModel,
    width: usize,
}

impl<'a> FormulaCascadeEngine<'a> {
    /// `width` is the number of measures each row carries.
    pub fn new(model: &'a HierarchyModel, width: usize) -> Self {
        Self { model, width }
    }

    fn operand_values(
        &self,
        operand: &Operand,
        raw: &BTreeMap<String, NodeValues>,
        snapshot: &BTreeMap<String, NodeValues>,
    ) -> NodeValues {
        match operand {
            Operand::Rollup { node_ids, .. } => {
                let mut out = NodeValues::new();
                for values in node_ids.iter().filter_map(|id| raw.get(id)) {
                    for (key, measures) in values {
                        let acc = out
                            .entry(key.clone())
                            .or_insert_with(|| vec![None; self.width]);
                        merge_into(acc, measures);
                    }
                }
                out
            }
            Operand::Formula { node_id, .. } => snapshot.get(node_id).cloned().unwrap_or_default(),
        }
    }

    /// Plan, evaluate every level, then key and label the output rows.
    pub fn run(&self, aggregated: &[AggregatedRow]) -> Result<CascadeOutput, Vec<CompileError>> {
        let plan = plan(self.model)?;
        let raw = raw_values(aggregated, self.width);
        let mut computed: BTreeMap<String, NodeValues> = BTreeMap::new();
        let mut warnings = Vec::new();

        for (&level, formulas) in &plan.levels {
            let snapshot = computed.clone();
            for formula in formulas {
                let first = self.operand_values(&formula.first, &raw, &snapshot);
                let second = formula
                    .second
                    .as_ref()
                    .map(|o| self.operand_values(o, &raw, &snapshot));
                let (values, zero_divisions) =
                    evaluate(formula.logic, &first, second.as_ref(), self.width);
                if zero_divisions > 0 {
                    warnings.push(DataQualityWarning::DivideByZero {
                        group: formula.group.clone(),
                        level,
                        occurrences: zero_divisions,
                    });
                }
                computed.insert(formula.node_id.clone(), values);
            }
            tracing::debug!(level, formulas = formulas.len(), "evaluated precedence level");
        }

        let rows = self.data_mart_rows(&raw, &computed);
        Ok(CascadeOutput {
            plan,
            computed,
            rows,
            warnings,
        })
    }

    /// Raw rows for nodes with aggregates plus calculated rows, ordered and
    /// dense-ranked by `(sort_order, node_id)`.
    pub fn data_mart_rows(
        &self,
        raw: &BTreeMap<String, NodeValues>,
        computed: &BTreeMap<String, NodeValues>,
    ) -> Vec<DataMartRow> {
        let mut rows = Vec::new();
        for node in self.model.nodes().iter().filter(|n| n.participates()) {
            let (values, is_calculated) = if node.is_calculation() {
                (computed.get(&node.id), true)
            } else {
                (raw.get(&node.id), false)
            };
            let Some(values) = values else {
                continue;
            };

            let levels = node_levels(self.model, node);
            let extension_levels = node_extension_levels(node);
            let formula = node.formula.as_ref().filter(|_| is_calculated);
            for (group_key, measures) in values {
                rows.push(DataMartRow {
                    surrogate_key: 0,
                    node_id: node.id.clone(),
                    node_name: node.name.clone(),
                    sort_order: node.sort_order,
                    levels: levels.clone(),
                    extension_levels: extension_levels.clone(),
                    group_key: group_key.clone(),
                    measures: measures.clone(),
                    is_calculated,
                    formula_group: formula.map(|f| f.group.clone()),
                    precedence: formula.map(|f| f.precedence),
                });
            }
        }

        rows.sort_by(|a, b| {
            (a.sort_order, &a.node_id, &a.group_key).cmp(&(b.sort_order, &b.node_id, &b.group_key))
        });
        let keys: Vec<(i64, &str)> = rows.iter().map(|r| (r.sort_order, r.node_id.as_str())).collect();
        let ranks = dense_rank(&keys);
        for (row, rank) in rows.iter_mut().zip(ranks) {
            row.surrogate_key = rank;
        }
        rows
    }
}
