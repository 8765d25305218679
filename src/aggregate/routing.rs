//! Branch validation and node routing.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::JoinPattern;
use crate::diagnostics::{ConfigValidationError, DataQualityWarning, KeySide};
use crate::expand::GranularityTable;

/// Check every branch against the grain and fact schemas.
///
/// Reports every defect rather than the first, each naming its branch.
pub fn validate_branches(
    branches: &[JoinPattern],
    grain: &GranularityTable,
    fact_schema: &[String],
) -> Vec<ConfigValidationError> {
    if branches.is_empty() {
        return vec![ConfigValidationError::NoBranches];
    }

    let mut errors = Vec::new();
    for branch in branches {
        if branch.join_keys.len() != branch.fact_keys.len() {
            errors.push(ConfigValidationError::KeyArityMismatch {
                branch: branch.name.clone(),
                join_keys: branch.join_keys.len(),
                fact_keys: branch.fact_keys.len(),
            });
            continue;
        }
        for key in branch.join_keys.iter().filter(|k| !grain.has_column(k)) {
            errors.push(ConfigValidationError::UnknownBranchKey {
                branch: branch.name.clone(),
                side: KeySide::Join,
                key: key.clone(),
            });
        }
        for key in branch.fact_keys.iter().filter(|k| !fact_schema.contains(k)) {
            errors.push(ConfigValidationError::UnknownBranchKey {
                branch: branch.name.clone(),
                side: KeySide::Fact,
                key: key.clone(),
            });
        }
    }
    errors
}

/// Which grain rows each branch joins, in branch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Routing {
    /// (branch name, indices into the grain rows).
    pub routes: Vec<(String, Vec<usize>)>,
    pub warnings: Vec<DataQualityWarning>,
}

impl Routing {
    pub fn rows_for(&self, branch: &str) -> &[usize] {
        self.routes
            .iter()
            .find(|(name, _)| name == branch)
            .map(|(_, rows)| rows.as_slice())
            .unwrap_or(&[])
    }
}

/// Route grain rows to branches.
///
/// A row belongs to every branch whose join keys it populates. A node whose
/// rows land in more than one branch is reported as ambiguous but stays in
/// all of them. A node that lands nowhere is reported as unrouted.
pub fn route(branches: &[JoinPattern], grain: &GranularityTable) -> Routing {
    let mut routes: Vec<(String, Vec<usize>)> = branches
        .iter()
        .map(|b| (b.name.clone(), Vec::new()))
        .collect();
    // Node -> branch positions, in first-seen node order.
    let mut node_branches: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
    let mut node_order: Vec<&str> = Vec::new();

    for (idx, row) in grain.rows.iter().enumerate() {
        let entry = node_branches.entry(row.node_id.as_str()).or_insert_with(|| {
            node_order.push(row.node_id.as_str());
            BTreeSet::new()
        });
        for (pos, branch) in branches.iter().enumerate() {
            if row.populates(&branch.join_keys) {
                routes[pos].1.push(idx);
                entry.insert(pos);
            }
        }
    }

    let mut warnings = Vec::new();
    for node_id in node_order {
        let positions = &node_branches[node_id];
        match positions.len() {
            0 => warnings.push(DataQualityWarning::UnroutedNode {
                node_id: node_id.to_string(),
            }),
            1 => {}
            _ => warnings.push(DataQualityWarning::AmbiguousRouting {
                node_id: node_id.to_string(),
                branches: positions.iter().map(|&p| branches[p].name.clone()).collect(),
            }),
        }
    }

    Routing { routes, warnings }
}
