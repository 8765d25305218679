//! Granularity expansion.
//!
//! Turns resolved mappings into the finest grain the branches join on: one
//! [`GrainRow`] per distinct combination of key values a node admits.
//!
//! ```text
//! resolved mappings ──► precedence rounds ──► exclusions ──► GranularityTable
//!   (per node)           (AND-narrowing)      (drop/attach)
//! ```

mod filter_groups;

pub use filter_groups::{expand_filter_groups, FilterGroupRow, FilterGroups};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::diagnostics::{ConfigValidationError, DataQualityWarning};
use crate::model::{FilterValue, HierarchyModel, HierarchyNode};
use crate::resolve::ResolvedMapping;

// ============================================================================
// Grain rows
// ============================================================================

/// A value a node must not pick up on one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExclusionSpec {
    pub node_id: String,
    pub column: String,
    pub value: FilterValue,
}

impl ExclusionSpec {
    pub fn new(node_id: impl Into<String>, column: impl Into<String>, value: FilterValue) -> Self {
        Self {
            node_id: node_id.into(),
            column: column.into(),
            value,
        }
    }

    fn from_mapping(mapping: &ResolvedMapping) -> Self {
        Self::new(&mapping.node_id, &mapping.column.column, mapping.value.clone())
    }
}

/// One finest-grain row: the key values a node admits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrainRow {
    pub node_id: String,
    /// Grain column -> admitted value.
    pub keys: BTreeMap<String, FilterValue>,
    /// Exclusions enforced when joining to fact data.
    pub exclusions: Vec<ExclusionSpec>,
    pub sign_change: bool,
    /// Mappings that produced this row.
    pub mapping_indices: Vec<u32>,
}

impl GrainRow {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            keys: BTreeMap::new(),
            exclusions: Vec::new(),
            sign_change: false,
            mapping_indices: Vec::new(),
        }
    }

    pub fn with_key(mut self, column: impl Into<String>, value: FilterValue) -> Self {
        self.keys.insert(column.into(), value);
        self
    }

    fn from_mapping(node: &HierarchyNode, mapping: &ResolvedMapping) -> Self {
        let mut row = GrainRow::new(&node.id).with_key(&mapping.column.column, mapping.value.clone());
        row.sign_change = node.sign_change;
        row.mapping_indices.push(mapping.mapping_index);
        row
    }

    /// Narrow by one more mapping. `None` when the two constrain the same
    /// column to disjoint values.
    fn narrowed(&self, mapping: &ResolvedMapping) -> Option<GrainRow> {
        let mut row = self.clone();
        let column = &mapping.column.column;
        let value = match row.keys.get(column) {
            Some(existing) => existing.intersect(&mapping.value)?,
            None => mapping.value.clone(),
        };
        row.keys.insert(column.clone(), value);
        row.mapping_indices.push(mapping.mapping_index);
        Some(row)
    }

    /// True when the row carries a value for every given column.
    pub fn populates<S: AsRef<str>>(&self, columns: &[S]) -> bool {
        columns.iter().all(|c| self.keys.contains_key(c.as_ref()))
    }

    /// Whether fact values, paired with grain columns, fall inside this row.
    ///
    /// NULL fact values never match. Attached exclusions on a paired column
    /// reject the values they cover.
    pub fn admits(&self, pairs: &[(&str, Option<&str>)]) -> bool {
        pairs.iter().all(|(column, value)| {
            let Some(value) = value else {
                return false;
            };
            let admitted = self.keys.get(*column).is_some_and(|k| k.matches(value));
            let excluded = self
                .exclusions
                .iter()
                .any(|e| e.column == *column && e.value.matches(value));
            admitted && !excluded
        })
    }

    /// Every fact value `other` admits is also admitted by `self`.
    ///
    /// Both rows must belong to one node and key on the same columns. Each
    /// exclusion `self` enforces must either be enforced by `other` too or be
    /// disjoint from `other`'s value on that column.
    pub fn covers(&self, other: &GrainRow) -> bool {
        if self.node_id != other.node_id || !self.keys.keys().eq(other.keys.keys()) {
            return false;
        }
        let values_covered = self
            .keys
            .iter()
            .all(|(column, value)| value.covers(&other.keys[column]));
        let exclusions_hold = self.exclusions.iter().all(|e| {
            other.exclusions.contains(e)
                || other
                    .keys
                    .get(&e.column)
                    .is_some_and(|v| v.intersect(&e.value).is_none())
        });
        values_covered && exclusions_hold
    }

    pub fn has_pattern(&self, column: &str) -> bool {
        self.keys.get(column).is_some_and(FilterValue::is_pattern)
    }
}

/// The expanded grain of a hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GranularityTable {
    /// Grain columns, sorted.
    pub schema: Vec<String>,
    pub rows: Vec<GrainRow>,
    pub filter_groups: Vec<FilterGroupRow>,
}

impl GranularityTable {
    pub fn rows_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a GrainRow> + 'a {
        self.rows.iter().filter(move |r| r.node_id == node_id)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.schema.iter().any(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Output of the expand stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Expansion {
    pub table: GranularityTable,
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<DataQualityWarning>,
}

// ============================================================================
// Exclusions
// ============================================================================

/// Remove the grain rows exclusions cover.
///
/// Returns `rows` untouched when `enabled` is false. Otherwise a row is
/// dropped when an exclusion for its node covers the row's value on the
/// excluded column. An exclusion that only removes part of a row (a narrower
/// value inside a prefix pattern, or a column the row does not key on) is
/// attached to the row for the join to enforce.
pub fn apply_exclusions(rows: Vec<GrainRow>, specs: &[ExclusionSpec], enabled: bool) -> Vec<GrainRow> {
    if !enabled || specs.is_empty() {
        return rows;
    }

    rows.into_iter()
        .filter_map(|mut row| {
            for spec in specs.iter().filter(|s| s.node_id == row.node_id) {
                match row.keys.get(&spec.column) {
                    Some(value) if spec.value.covers(value) => return None,
                    Some(value) if value.intersect(&spec.value).is_none() => {}
                    _ => {
                        if !row.exclusions.contains(spec) {
                            row.exclusions.push(spec.clone());
                        }
                    }
                }
            }
            Some(row)
        })
        .collect()
}

// ============================================================================
// Expander
// ============================================================================

/// Expands resolved mappings to the finest grain.
#[derive(Debug, Clone, Copy)]
pub struct GranularityExpander<'a> {
    model: &'a HierarchyModel,
    config: &'a PipelineConfig,
}

impl<'a> GranularityExpander<'a> {
    pub fn new(model: &'a HierarchyModel, config: &'a PipelineConfig) -> Self {
        Self { model, config }
    }

    /// [`apply_exclusions`] gated on `has_exclusions`.
    pub fn apply_exclusions(&self, rows: Vec<GrainRow>, specs: &[ExclusionSpec]) -> Vec<GrainRow> {
        apply_exclusions(rows, specs, self.config.has_exclusions)
    }

    /// Combine a node's include mappings into grain rows.
    ///
    /// With precedence enabled, each mapping lands in a round: its own
    /// precedence, else the node's group-filter precedence, else 1. Round 1
    /// seeds the rows and every later round narrows each row by each of its
    /// mappings. Rounds must run 1, 2, 3... without gaps.
    ///
    /// With precedence disabled every mapping is its own row.
    pub fn apply_group_filter_precedence(
        &self,
        node: &HierarchyNode,
        mappings: &[&ResolvedMapping],
    ) -> Result<Vec<GrainRow>, ConfigValidationError> {
        if !self.config.has_group_filter_precedence {
            return Ok(mappings.iter().map(|m| GrainRow::from_mapping(node, m)).collect());
        }

        let mut rounds: BTreeMap<u8, Vec<&ResolvedMapping>> = BTreeMap::new();
        for &mapping in mappings {
            let round = mapping
                .precedence
                .or(node.group_filter_precedence)
                .unwrap_or(1);
            rounds.entry(round).or_default().push(mapping);
        }

        let declared: Vec<u8> = rounds.keys().copied().collect();
        for (expected, &round) in (1u8..).zip(&declared) {
            if round != expected {
                return Err(ConfigValidationError::SkippedPrecedenceRound {
                    node_id: node.id.clone(),
                    declared: declared.clone(),
                    missing: expected,
                });
            }
        }

        let mut rounds = rounds.into_values();
        let mut rows: Vec<GrainRow> = match rounds.next() {
            Some(first) => first.iter().map(|m| GrainRow::from_mapping(node, m)).collect(),
            None => return Ok(Vec::new()),
        };
        for round in rounds {
            rows = rows
                .iter()
                .flat_map(|row| round.iter().filter_map(move |m| row.narrowed(m)))
                .collect();
        }
        Ok(rows)
    }

    /// Expand every participating non-calculation node.
    pub fn expand(&self, resolved: &[ResolvedMapping]) -> Expansion {
        let mut expansion = Expansion::default();
        let mut schema = BTreeSet::new();

        let mut by_node: HashMap<&str, Vec<&ResolvedMapping>> = HashMap::new();
        for mapping in resolved {
            by_node.entry(mapping.node_id.as_str()).or_default().push(mapping);
        }

        for node in self.model.nodes() {
            if !node.participates() || node.is_calculation() {
                continue;
            }
            expansion.table.filter_groups.extend(expand_filter_groups(node));

            if self.model.is_leaf(&node.id) && self.model.mappings_for(&node.id).next().is_none() {
                expansion.warnings.push(DataQualityWarning::OrphanNode {
                    node_id: node.id.clone(),
                });
                continue;
            }

            let mappings = by_node.get(node.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            expansion.warnings.extend(schema_drift(node, mappings));

            let include: Vec<&ResolvedMapping> =
                mappings.iter().copied().filter(|m| !m.exclusion).collect();
            let specs: Vec<ExclusionSpec> = if self.config.has_exclusions {
                mappings
                    .iter()
                    .filter(|m| m.exclusion)
                    .map(|m| ExclusionSpec::from_mapping(m))
                    .collect()
            } else {
                Vec::new()
            };

            schema.extend(include.iter().map(|m| m.column.column.clone()));
            schema.extend(specs.iter().map(|s| s.column.clone()));

            match self.apply_group_filter_precedence(node, &include) {
                Ok(rows) => {
                    let rows = drop_covered(self.apply_exclusions(dedup(rows), &specs));
                    if rows.is_empty() && !include.is_empty() {
                        expansion.warnings.push(DataQualityWarning::EmptyGrain {
                            node_id: node.id.clone(),
                        });
                    }
                    expansion.table.rows.extend(rows);
                }
                Err(err) => expansion.errors.push(err),
            }
        }

        expansion.table.schema = schema.into_iter().collect();
        tracing::debug!(
            rows = expansion.table.rows.len(),
            columns = expansion.table.schema.len(),
            "expanded granularity"
        );
        expansion
    }
}

/// Merge rows that admit the same key values.
fn dedup(rows: Vec<GrainRow>) -> Vec<GrainRow> {
    let mut out: Vec<GrainRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match out.iter_mut().find(|r| r.keys == row.keys) {
            Some(existing) => {
                for idx in row.mapping_indices {
                    if !existing.mapping_indices.contains(&idx) {
                        existing.mapping_indices.push(idx);
                    }
                }
            }
            None => out.push(row),
        }
    }
    out
}

/// Fold rows another row of the same node fully covers into that row, so a
/// fact value reaches each node through at most one row per key.
fn drop_covered(rows: Vec<GrainRow>) -> Vec<GrainRow> {
    let covered: Vec<bool> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            rows.iter()
                .enumerate()
                .any(|(j, other)| i != j && other.covers(row))
        })
        .collect();

    let mut folded: Vec<(usize, Vec<u32>)> = Vec::new();
    for (i, row) in rows.iter().enumerate().filter(|(i, _)| covered[*i]) {
        let owner = rows
            .iter()
            .enumerate()
            .position(|(j, other)| j != i && !covered[j] && other.covers(row));
        if let Some(owner) = owner {
            folded.push((owner, row.mapping_indices.clone()));
        }
    }

    let mut out: Vec<GrainRow> = Vec::with_capacity(rows.len());
    for (i, mut row) in rows.into_iter().enumerate() {
        if covered[i] {
            continue;
        }
        for (_, indices) in folded.iter().filter(|(owner, _)| *owner == i) {
            for &idx in indices {
                if !row.mapping_indices.contains(&idx) {
                    row.mapping_indices.push(idx);
                }
            }
        }
        out.push(row);
    }
    out
}

fn schema_drift(node: &HierarchyNode, mappings: &[&ResolvedMapping]) -> Vec<DataQualityWarning> {
    let declared = node.declared_filter_groups();
    let drifted: BTreeSet<&str> = mappings
        .iter()
        .filter_map(|m| m.filter_group.as_deref().map(str::trim))
        .filter(|g| !g.is_empty())
        .filter(|g| !declared.iter().any(|d| d.eq_ignore_ascii_case(g)))
        .collect();

    drifted
        .into_iter()
        .map(|group| DataQualityWarning::SchemaDrift {
            node_id: node.id.clone(),
            filter_group: group.to_string(),
            declared: declared.iter().map(|d| d.to_string()).collect(),
        })
        .collect()
}
