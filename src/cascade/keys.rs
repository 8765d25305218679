//! Surrogate keys and level-label backfill.

use crate::model::{HierarchyModel, HierarchyNode, MAX_LEVELS};

/// Dense rank over `(sort_order, node_id)`, starting at 1.
///
/// Returns one key per input, in input order. Equal tuples share a key.
pub fn dense_rank<K: Ord>(keys: &[K]) -> Vec<u64> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));

    let mut ranks = vec![0u64; keys.len()];
    let mut rank = 0u64;
    let mut previous: Option<&K> = None;
    for idx in order {
        if previous != Some(&keys[idx]) {
            rank += 1;
            previous = Some(&keys[idx]);
        }
        ranks[idx] = rank;
    }
    ranks
}

/// Fill blank labels so every one of the nine level slots is populated.
///
/// A blank slot copies the nearest populated label above it. Slots before
/// the first populated label take that label. All-blank input stays blank.
pub fn backfill(labels: &[String]) -> Vec<String> {
    let first = labels.iter().map(|l| l.trim()).find(|l| !l.is_empty());
    let Some(first) = first else {
        return vec![String::new(); MAX_LEVELS];
    };

    let mut out = Vec::with_capacity(MAX_LEVELS);
    let mut current = first.to_string();
    for slot in 0..MAX_LEVELS {
        if let Some(label) = labels.get(slot).map(|l| l.trim()).filter(|l| !l.is_empty()) {
            current = label.to_string();
        }
        out.push(current.clone());
    }
    out
}

/// Level labels for a node, backfilled.
///
/// A node without declared labels takes the names along its path from the
/// root.
pub fn node_levels(model: &HierarchyModel, node: &HierarchyNode) -> Vec<String> {
    if node.levels.iter().any(|l| !l.trim().is_empty()) {
        return backfill(&node.levels);
    }
    let path: Vec<String> = model
        .ancestry(&node.id)
        .into_iter()
        .map(|n| n.name.clone())
        .collect();
    backfill(&path)
}

/// Extension labels, backfilled only when the node declares any.
pub fn node_extension_levels(node: &HierarchyNode) -> Vec<String> {
    if node.extension_levels.iter().any(|l| !l.trim().is_empty()) {
        backfill(&node.extension_levels)
    } else {
        Vec::new()
    }
}
