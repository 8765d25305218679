//! Hierarchy nodes.

use serde::{Deserialize, Serialize};

use super::formula::FormulaDefinition;

/// Maximum number of primary (and extension) level labels per node.
pub const MAX_LEVELS: usize = 9;

/// Maximum number of filter-group slots per node.
pub const MAX_FILTER_GROUPS: usize = 4;

/// Node flags as authored in the hierarchy table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFlags {
    pub active: bool,
    pub is_leaf: bool,
    pub is_calculation: bool,
    pub include: bool,
    pub exclude: bool,
}

impl Default for NodeFlags {
    fn default() -> Self {
        Self {
            active: true,
            is_leaf: false,
            is_calculation: false,
            include: true,
            exclude: false,
        }
    }
}

/// A labeled category in the reporting tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub parent_id: Option<String>,

    /// Primary path labels, level 1 first. Blank entries are unpopulated.
    #[serde(default)]
    pub levels: Vec<String>,

    /// Optional parallel path, level 1 first.
    #[serde(default)]
    pub extension_levels: Vec<String>,

    #[serde(default)]
    pub sort_order: i64,

    #[serde(default)]
    pub flags: NodeFlags,

    #[serde(default)]
    pub filter_groups: [Option<String>; MAX_FILTER_GROUPS],

    #[serde(default)]
    pub formula: Option<FormulaDefinition>,

    #[serde(default)]
    pub sign_change: bool,

    /// Default precedence round for this node's mappings.
    #[serde(default)]
    pub group_filter_precedence: Option<u8>,
}

impl HierarchyNode {
    /// A new active, included node with no parent.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: None,
            levels: Vec::new(),
            extension_levels: Vec::new(),
            sort_order: 0,
            flags: NodeFlags::default(),
            filter_groups: Default::default(),
            formula: None,
            sign_change: false,
            group_filter_precedence: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn with_levels<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.levels = levels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter_group(mut self, slot: usize, value: impl Into<String>) -> Self {
        if slot < MAX_FILTER_GROUPS {
            self.filter_groups[slot] = Some(value.into());
        }
        self
    }

    /// Mark as a calculation node carrying the given formula.
    pub fn with_formula(mut self, formula: FormulaDefinition) -> Self {
        self.flags.is_calculation = true;
        self.formula = Some(formula);
        self
    }

    pub fn with_sign_change(mut self) -> Self {
        self.sign_change = true;
        self
    }

    pub fn with_group_filter_precedence(mut self, round: u8) -> Self {
        self.group_filter_precedence = Some(round);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.flags.active = false;
        self
    }

    /// Whether the node takes part in a compile at all.
    pub fn participates(&self) -> bool {
        self.flags.active && self.flags.include && !self.flags.exclude
    }

    pub fn is_calculation(&self) -> bool {
        self.flags.is_calculation
    }

    /// Declared filter-group values, in slot order.
    pub fn declared_filter_groups(&self) -> Vec<&str> {
        self.filter_groups
            .iter()
            .flatten()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .collect()
    }
}
