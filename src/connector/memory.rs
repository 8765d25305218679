//! In-memory fact source.

use std::collections::{BTreeMap, HashMap};

use super::{ConnectorError, ConnectorResult, FactRequest, FactRow, FactSource};

/// A cell in an in-memory fact row.
#[derive(Debug, Clone, PartialEq)]
pub enum FactValue {
    Text(String),
    Number(f64),
    Null,
}

impl FactValue {
    fn as_text(&self) -> Option<String> {
        match self {
            FactValue::Text(s) => Some(s.clone()),
            FactValue::Number(n) => Some(n.to_string()),
            FactValue::Null => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            FactValue::Number(n) => Some(*n),
            FactValue::Text(s) => s.trim().parse().ok(),
            FactValue::Null => None,
        }
    }
}

impl From<&str> for FactValue {
    fn from(s: &str) -> Self {
        FactValue::Text(s.to_string())
    }
}

impl From<String> for FactValue {
    fn from(s: String) -> Self {
        FactValue::Text(s)
    }
}

impl From<f64> for FactValue {
    fn from(n: f64) -> Self {
        FactValue::Number(n)
    }
}

impl From<i64> for FactValue {
    fn from(n: i64) -> Self {
        FactValue::Number(n as f64)
    }
}

/// Fact rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFactSource {
    columns: Vec<String>,
    rows: Vec<HashMap<String, FactValue>>,
}

impl InMemoryFactSource {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row. Cells for unknown columns are kept but never read.
    pub fn with_row<I, K, V>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FactValue>,
    {
        self.push_row(cells);
        self
    }

    pub fn push_row<I, K, V>(&mut self, cells: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FactValue>,
    {
        self.rows
            .push(cells.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FactSource for InMemoryFactSource {
    fn schema(&self) -> ConnectorResult<Vec<String>> {
        Ok(self.columns.clone())
    }

    fn aggregate(&self, request: &FactRequest) -> ConnectorResult<Vec<FactRow>> {
        for column in request.keys.iter().chain(&request.measures) {
            if !self.columns.contains(column) {
                return Err(ConnectorError::query(format!("unknown column '{}'", column)));
            }
        }

        let mut groups: BTreeMap<Vec<Option<String>>, Vec<Option<f64>>> = BTreeMap::new();

        for row in &self.rows {
            let text: HashMap<&str, String> = row
                .iter()
                .filter_map(|(k, v)| v.as_text().map(|t| (k.as_str(), t)))
                .collect();
            if let Some(predicate) = &request.predicate {
                if !predicate.evaluate(&|c: &str| text.get(c).map(String::as_str)) {
                    continue;
                }
            }

            let key: Vec<Option<String>> = request
                .keys
                .iter()
                .map(|k| row.get(k).and_then(FactValue::as_text))
                .collect();
            let sums = groups
                .entry(key)
                .or_insert_with(|| vec![None; request.measures.len()]);
            for (sum, measure) in sums.iter_mut().zip(&request.measures) {
                if let Some(value) = row.get(measure).and_then(FactValue::as_number) {
                    *sum = Some(sum.unwrap_or(0.0) + value);
                }
            }
        }

        Ok(groups
            .into_iter()
            .map(|(keys, measures)| FactRow { keys, measures })
            .collect())
    }
}
