//! Hierarchy model: nodes, mappings, and formulas for one project.
//!
//! A [`HierarchyModel`] is an immutable snapshot. It is built once (from a
//! store, from JSON, or in code) and then only read by the compile stages.

pub mod formula;
pub mod mapping;
pub mod node;

pub use formula::{FormulaDefinition, FormulaLogic, MAX_PRECEDENCE, MIN_PRECEDENCE};
pub use mapping::{FilterValue, SourceMapping, SourceRef};
pub use node::{HierarchyNode, NodeFlags, MAX_FILTER_GROUPS, MAX_LEVELS};

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::diagnostics::ConfigValidationError;

/// Serialized form of a hierarchy model.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelData {
    project_id: String,
    #[serde(default)]
    nodes: Vec<HierarchyNode>,
    #[serde(default)]
    mappings: Vec<SourceMapping>,
}

/// Immutable representation of one project's hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ModelData", into = "ModelData")]
pub struct HierarchyModel {
    project_id: String,
    nodes: Vec<HierarchyNode>,
    mappings: Vec<SourceMapping>,
    by_id: HashMap<String, usize>,
    children: HashMap<String, Vec<usize>>,
    mappings_by_node: HashMap<String, Vec<usize>>,
}

impl From<ModelData> for HierarchyModel {
    fn from(data: ModelData) -> Self {
        HierarchyModel::new(data.project_id, data.nodes, data.mappings)
    }
}

impl From<HierarchyModel> for ModelData {
    fn from(model: HierarchyModel) -> Self {
        ModelData {
            project_id: model.project_id,
            nodes: model.nodes,
            mappings: model.mappings,
        }
    }
}

impl HierarchyModel {
    pub fn new(
        project_id: impl Into<String>,
        nodes: Vec<HierarchyNode>,
        mappings: Vec<SourceMapping>,
    ) -> Self {
        let mut by_id = HashMap::new();
        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            // First occurrence wins; duplicates are reported by validate().
            by_id.entry(node.id.clone()).or_insert(idx);
            if let Some(parent) = &node.parent_id {
                children.entry(parent.clone()).or_default().push(idx);
            }
        }

        let mut mappings_by_node: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, mapping) in mappings.iter().enumerate() {
            mappings_by_node
                .entry(mapping.node_id.clone())
                .or_default()
                .push(idx);
        }

        Self {
            project_id: project_id.into(),
            nodes,
            mappings,
            by_id,
            children,
            mappings_by_node,
        }
    }

    /// Parse a model from its JSON export.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn nodes(&self) -> &[HierarchyNode] {
        &self.nodes
    }

    pub fn mappings(&self) -> &[SourceMapping] {
        &self.mappings
    }

    pub fn node(&self, id: &str) -> Option<&HierarchyNode> {
        self.by_id.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn mappings_for<'a>(&'a self, node_id: &str) -> impl Iterator<Item = &'a SourceMapping> + 'a {
        self.mappings_by_node
            .get(node_id)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.mappings[idx])
    }

    pub fn children<'a>(&'a self, node_id: &str) -> impl Iterator<Item = &'a HierarchyNode> + 'a {
        self.children
            .get(node_id)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.nodes[idx])
    }

    /// A node is a leaf when flagged so, or when nothing hangs under it.
    pub fn is_leaf(&self, node_id: &str) -> bool {
        let flagged = self.node(node_id).is_some_and(|n| n.flags.is_leaf);
        flagged || self.children(node_id).next().is_none()
    }

    pub fn roots(&self) -> impl Iterator<Item = &HierarchyNode> {
        self.nodes.iter().filter(|n| n.parent_id.is_none())
    }

    /// Path from the root down to (and including) the node.
    ///
    /// Stops early on a parent cycle or a dangling parent.
    pub fn ancestry(&self, node_id: &str) -> Vec<&HierarchyNode> {
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.node(node_id);
        while let Some(node) = current {
            if !seen.insert(node.id.as_str()) {
                break;
            }
            path.push(node);
            current = node.parent_id.as_deref().and_then(|p| self.node(p));
        }
        path.reverse();
        path
    }

    /// All nodes below the given node, depth first.
    pub fn descendants(&self, node_id: &str) -> Vec<&HierarchyNode> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(node_id.to_string());
        let mut stack: Vec<&HierarchyNode> = self.children(node_id).collect();
        stack.reverse();
        while let Some(node) = stack.pop() {
            if !seen.insert(node.id.clone()) {
                continue;
            }
            out.push(node);
            let mut kids: Vec<&HierarchyNode> = self.children(&node.id).collect();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    /// Participating calculation nodes that carry a formula.
    pub fn formulas(&self) -> impl Iterator<Item = (&HierarchyNode, &FormulaDefinition)> {
        self.nodes
            .iter()
            .filter(|n| n.participates() && n.is_calculation())
            .filter_map(|n| n.formula.as_ref().map(|f| (n, f)))
    }

    /// Find the node a formula reference names.
    ///
    /// Matches node id exactly, then case-insensitively against id, name,
    /// and formula group.
    pub fn find_reference(&self, reference: &str) -> Option<&HierarchyNode> {
        let reference = reference.trim();
        if let Some(node) = self.node(reference) {
            return Some(node);
        }
        let folded = reference.to_lowercase();
        self.nodes
            .iter()
            .find(|n| n.id.to_lowercase() == folded)
            .or_else(|| self.nodes.iter().find(|n| n.name.to_lowercase() == folded))
            .or_else(|| {
                self.nodes.iter().find(|n| {
                    n.formula
                        .as_ref()
                        .is_some_and(|f| f.group.to_lowercase() == folded)
                })
            })
    }

    /// Check the structural invariants, returning every violation found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                errors.push(ConfigValidationError::DuplicateNode {
                    node_id: node.id.clone(),
                });
            }
            if let Some(parent) = &node.parent_id {
                if self.node(parent).is_none() {
                    errors.push(ConfigValidationError::UnknownParent {
                        node_id: node.id.clone(),
                        parent_id: parent.clone(),
                    });
                }
            }
            if node.levels.len() > MAX_LEVELS || node.extension_levels.len() > MAX_LEVELS {
                errors.push(ConfigValidationError::TooManyLevels {
                    node_id: node.id.clone(),
                    count: node.levels.len().max(node.extension_levels.len()),
                });
            }
            if node.is_calculation() {
                let count = self.mappings_for(&node.id).count();
                if count > 0 {
                    errors.push(ConfigValidationError::CalculationWithMappings {
                        node_id: node.id.clone(),
                        count,
                    });
                }
            }
            if let Some(formula) = &node.formula {
                if !formula.has_valid_precedence() {
                    errors.push(ConfigValidationError::InvalidPrecedence {
                        group: formula.group.clone(),
                        level: formula.precedence,
                    });
                }
            }
        }

        let root_count = self.roots().count();
        if root_count != 1 {
            errors.push(ConfigValidationError::RootCount { count: root_count });
        }

        errors.extend(self.parent_cycles());

        for mapping in &self.mappings {
            if self.node(&mapping.node_id).is_none() {
                errors.push(ConfigValidationError::UnknownMappingOwner {
                    node_id: mapping.node_id.clone(),
                    mapping_index: mapping.mapping_index,
                });
            }
        }

        errors
    }

    fn parent_cycles(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut cleared: HashSet<&str> = HashSet::new();

        for start in &self.nodes {
            let mut path: Vec<&str> = Vec::new();
            let mut on_path: HashSet<&str> = HashSet::new();
            let mut current = Some(start);

            while let Some(node) = current {
                let id = node.id.as_str();
                if cleared.contains(id) {
                    break;
                }
                if !on_path.insert(id) {
                    let begin = path.iter().position(|p| *p == id).unwrap_or(0);
                    let mut cycle: Vec<String> = path[begin..].iter().map(|s| s.to_string()).collect();
                    cycle.push(id.to_string());
                    errors.push(ConfigValidationError::ParentCycle { path: cycle });
                    break;
                }
                path.push(id);
                current = node.parent_id.as_deref().and_then(|p| self.node(p));
            }
            cleared.extend(path);
        }

        errors
    }
}
