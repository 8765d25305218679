//! Filter group unpivot.

use serde::Serialize;

use crate::model::{HierarchyNode, MAX_FILTER_GROUPS};

/// One populated filter-group slot of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterGroupRow {
    pub node_id: String,
    /// 1-based slot number.
    pub slot: usize,
    pub value: String,
}

/// Lazy unpivot of a node's filter-group slots.
///
/// Finite and restartable: clone it to iterate again from the start.
#[derive(Debug, Clone)]
pub struct FilterGroups<'a> {
    node: &'a HierarchyNode,
    next_slot: usize,
}

impl<'a> Iterator for FilterGroups<'a> {
    type Item = FilterGroupRow;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_slot < MAX_FILTER_GROUPS {
            let slot = self.next_slot;
            self.next_slot += 1;
            let value = self.node.filter_groups[slot]
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(value) = value {
                return Some(FilterGroupRow {
                    node_id: self.node.id.clone(),
                    slot: slot + 1,
                    value: value.to_string(),
                });
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(MAX_FILTER_GROUPS - self.next_slot))
    }
}

/// Unpivot a node's filter-group slots into one row per populated slot.
pub fn expand_filter_groups(node: &HierarchyNode) -> FilterGroups<'_> {
    FilterGroups { node, next_slot: 0 }
}
