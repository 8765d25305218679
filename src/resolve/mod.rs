//! Column resolution: symbolic attribute names to physical columns.
//!
//! Every mapping names its dimension attribute symbolically (`id_source`).
//! The config's column map turns those names into physical columns. Misses
//! carry the nearest known name so near-miss typos are easy to spot.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use strsim::levenshtein;

use crate::diagnostics::ConfigValidationError;
use crate::model::{FilterValue, HierarchyModel, SourceMapping, SourceRef};

/// A physical dimension column, optionally table-qualified.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PhysicalColumn {
    pub table: Option<String>,
    pub column: String,
}

impl PhysicalColumn {
    /// Parse `column` or `table.column`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.rsplit_once('.') {
            Some((table, column)) if !table.is_empty() && !column.is_empty() => Self {
                table: Some(table.to_string()),
                column: column.to_string(),
            },
            _ => Self {
                table: None,
                column: raw.to_string(),
            },
        }
    }
}

impl fmt::Display for PhysicalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => f.write_str(&self.column),
        }
    }
}

/// A mapping whose symbolic name resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMapping {
    pub node_id: String,
    pub mapping_index: u32,
    /// The symbolic name as authored.
    pub id_source: String,
    pub column: PhysicalColumn,
    pub value: FilterValue,
    pub exclusion: bool,
    pub precedence: Option<u8>,
    pub filter_group: Option<String>,
    pub source: SourceRef,
}

/// A symbolic name with no entry in the column map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown id_source '{token}'")]
pub struct UnknownIdSource {
    /// The token exactly as authored.
    pub token: String,
    pub nearest: Option<String>,
}

/// Output of resolving a whole hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    pub resolved: Vec<ResolvedMapping>,
    pub errors: Vec<ConfigValidationError>,
    /// Distinct symbolic names that resolved, normalized, sorted.
    pub discovered: Vec<String>,
}

fn normalize(token: &str) -> String {
    token.trim().to_uppercase()
}

/// Looks symbolic names up in a column map.
#[derive(Debug, Clone)]
pub struct ColumnResolver {
    /// Normalized symbol -> (authored key, physical column).
    columns: BTreeMap<String, (String, PhysicalColumn)>,
    /// Keys that normalize onto a symbol already taken.
    duplicates: Vec<ConfigValidationError>,
}

impl ColumnResolver {
    /// Build a resolver over a column map.
    ///
    /// Keys that differ only in case or surrounding whitespace collide. The
    /// first key in map order keeps the symbol and every later one is kept
    /// as a [`ConfigValidationError::DuplicateColumnSymbol`].
    pub fn new(column_map: &BTreeMap<String, String>) -> Self {
        let mut columns: BTreeMap<String, (String, PhysicalColumn)> = BTreeMap::new();
        let mut duplicates = Vec::new();
        for (symbol, physical) in column_map {
            match columns.entry(normalize(symbol)) {
                Entry::Occupied(taken) => duplicates.push(ConfigValidationError::DuplicateColumnSymbol {
                    first: taken.get().0.clone(),
                    second: symbol.clone(),
                }),
                Entry::Vacant(slot) => {
                    slot.insert((symbol.clone(), PhysicalColumn::parse(physical)));
                }
            }
        }
        Self { columns, duplicates }
    }

    /// Column map keys that collided with an earlier key.
    pub fn duplicates(&self) -> &[ConfigValidationError] {
        &self.duplicates
    }

    /// Resolve one mapping.
    pub fn resolve(&self, mapping: &SourceMapping) -> Result<ResolvedMapping, UnknownIdSource> {
        let key = normalize(&mapping.id_source);
        let (_, column) = self.columns.get(&key).ok_or_else(|| UnknownIdSource {
            token: mapping.id_source.clone(),
            nearest: self.nearest(&mapping.id_source),
        })?;

        Ok(ResolvedMapping {
            node_id: mapping.node_id.clone(),
            mapping_index: mapping.mapping_index,
            id_source: mapping.id_source.clone(),
            column: column.clone(),
            value: mapping.filter_value(),
            exclusion: mapping.exclusion,
            precedence: mapping.precedence,
            filter_group: mapping.filter_group.clone(),
            source: mapping.source.clone(),
        })
    }

    /// The closest known symbolic name, as authored in the map.
    ///
    /// Containment in either direction counts as distance 1 so a dropped
    /// suffix still finds its key. Candidates further than half the token
    /// length (minimum 3) are not suggested.
    pub fn nearest(&self, token: &str) -> Option<String> {
        let needle = normalize(token);
        if needle.is_empty() {
            return None;
        }
        let max_distance = (needle.chars().count() / 2).max(3);

        self.columns
            .iter()
            .filter_map(|(key, (authored, _))| {
                let distance = if key.contains(&needle) || needle.contains(key.as_str()) {
                    1
                } else {
                    levenshtein(&needle, key)
                };
                (distance <= max_distance).then_some((distance, authored))
            })
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
            .map(|(_, authored)| authored.clone())
    }

    /// Resolve every mapping of every participating node.
    ///
    /// Misses are collected rather than short-circuiting, so one pass reports
    /// every unresolved token. Colliding column map keys are reported first.
    pub fn resolve_all(&self, model: &HierarchyModel) -> Resolution {
        let mut resolution = Resolution {
            errors: self.duplicates.clone(),
            ..Resolution::default()
        };
        let mut discovered = BTreeSet::new();

        for mapping in model.mappings() {
            let participates = model.node(&mapping.node_id).is_some_and(|n| n.participates());
            if !participates {
                continue;
            }
            match self.resolve(mapping) {
                Ok(resolved) => {
                    discovered.insert(normalize(&resolved.id_source));
                    resolution.resolved.push(resolved);
                }
                Err(miss) => resolution.errors.push(ConfigValidationError::UnknownIdSource {
                    node_id: mapping.node_id.clone(),
                    mapping_index: mapping.mapping_index,
                    token: miss.token,
                    nearest: miss.nearest,
                }),
            }
        }

        resolution.discovered = discovered.into_iter().collect();
        resolution
    }
}

/// Resolve one mapping against a column map.
pub fn resolve(
    mapping: &SourceMapping,
    column_map: &BTreeMap<String, String>,
) -> Result<ResolvedMapping, UnknownIdSource> {
    ColumnResolver::new(column_map).resolve(mapping)
}
