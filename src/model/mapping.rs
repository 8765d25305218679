//! Source mappings and filter values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a mapping's dimension data lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceRef {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
}

/// A rule linking a node to a dimension attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMapping {
    pub node_id: String,

    #[serde(default)]
    pub mapping_index: u32,

    /// Symbolic attribute name, resolved through the column map.
    pub id_source: String,

    #[serde(default)]
    pub source: SourceRef,

    /// Literal filter value. A trailing `%` makes it a prefix pattern.
    pub id: String,

    #[serde(default)]
    pub exclusion: bool,

    #[serde(default)]
    pub precedence: Option<u8>,

    #[serde(default)]
    pub filter_group: Option<String>,
}

impl SourceMapping {
    pub fn new(node_id: impl Into<String>, id_source: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            mapping_index: 0,
            id_source: id_source.into(),
            source: SourceRef::default(),
            id: id.into(),
            exclusion: false,
            precedence: None,
            filter_group: None,
        }
    }

    pub fn with_index(mut self, mapping_index: u32) -> Self {
        self.mapping_index = mapping_index;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.exclusion = true;
        self
    }

    pub fn with_precedence(mut self, round: u8) -> Self {
        self.precedence = Some(round);
        self
    }

    pub fn with_filter_group(mut self, group: impl Into<String>) -> Self {
        self.filter_group = Some(group.into());
        self
    }

    pub fn filter_value(&self) -> FilterValue {
        FilterValue::parse(&self.id)
    }
}

/// A mapping value: an exact literal or a prefix pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "match", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
    Exact(String),
    Prefix(String),
}

impl FilterValue {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.strip_suffix('%') {
            Some(stem) => FilterValue::Prefix(stem.to_string()),
            None => FilterValue::Exact(trimmed.to_string()),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            FilterValue::Exact(exact) => exact == value,
            FilterValue::Prefix(stem) => value.starts_with(stem.as_str()),
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, FilterValue::Prefix(_))
    }

    /// Every value `other` admits is also admitted by `self`.
    pub fn covers(&self, other: &FilterValue) -> bool {
        match (self, other) {
            (_, FilterValue::Exact(v)) => self.matches(v),
            (FilterValue::Prefix(a), FilterValue::Prefix(b)) => b.starts_with(a.as_str()),
            (FilterValue::Exact(_), FilterValue::Prefix(_)) => false,
        }
    }

    /// The values admitted by both, if any.
    pub fn intersect(&self, other: &FilterValue) -> Option<FilterValue> {
        if self.covers(other) {
            Some(other.clone())
        } else if other.covers(self) {
            Some(self.clone())
        } else {
            None
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Exact(v) => f.write_str(v),
            FilterValue::Prefix(stem) => write!(f, "{}%", stem),
        }
    }
}
