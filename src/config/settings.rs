//! TOML-based pipeline configuration.
//!
//! Supports a config file (strata.toml) with environment variable expansion
//! in the fact source identifiers.
//!
//! Example configuration:
//! ```toml
//! measure_prefix = "amt_"
//! group_by = ["period", "entity"]
//! account_segment = "GROSS"
//! has_sign_change = true
//! has_exclusions = true
//!
//! [dynamic_column_map]
//! ACCOUNT_CODE = "account_code"
//! DEDUCT_CODE = "deduct_code"
//!
//! [fact_source]
//! database = "${FIN_DB}"
//! schema = "gl"
//! table = "fact_ledger"
//!
//! [[join_patterns]]
//! name = "account"
//! join_keys = ["account_code"]
//! fact_keys = ["fk_account"]
//!
//! [retry]
//! max_retries = 3
//! initial_backoff_ms = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ir::TableRef;
use crate::predicate::Predicate;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// One join pattern ("branch") routing nodes to the fact source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JoinPattern {
    pub name: String,

    /// Grain columns, position-paired with `fact_keys`.
    pub join_keys: Vec<String>,

    /// Fact columns, position-paired with `join_keys`.
    pub fact_keys: Vec<String>,

    #[serde(default)]
    pub predicate: Option<Predicate>,
}

impl JoinPattern {
    pub fn new<I, J, S, T>(name: &str, join_keys: I, fact_keys: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            join_keys: join_keys.into_iter().map(Into::into).collect(),
            fact_keys: fact_keys.into_iter().map(Into::into).collect(),
            predicate: None,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Position-paired (join key, fact key) columns.
    pub fn key_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.join_keys
            .iter()
            .map(String::as_str)
            .zip(self.fact_keys.iter().map(String::as_str))
    }
}

/// Location of the fact table the branches read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FactTableSettings {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl FactTableSettings {
    /// Table reference with environment variables expanded.
    pub fn resolved(&self) -> Result<TableRef, SettingsError> {
        let table = if self.table.is_empty() {
            "fact".to_string()
        } else {
            expand_env_vars(&self.table)?
        };
        let mut table_ref = TableRef::new(&table);
        if let Some(schema) = &self.schema {
            table_ref = table_ref.with_schema(&expand_env_vars(schema)?);
        }
        if let Some(database) = &self.database {
            table_ref = table_ref.with_database(&expand_env_vars(database)?);
        }
        Ok(table_ref)
    }
}

/// Retry settings for fact source calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry; doubles each retry.
    pub initial_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
        }
    }
}

impl RetrySettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Everything a compile needs besides the hierarchy itself.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub join_patterns: Vec<JoinPattern>,

    /// Symbolic attribute name -> physical column (`column` or `table.column`).
    pub dynamic_column_map: BTreeMap<String, String>,

    /// Segment value the fact rows are restricted to.
    pub account_segment: Option<String>,

    /// Fact column holding the account segment.
    pub account_segment_column: String,

    /// Prefix selecting measure columns from the fact schema.
    pub measure_prefix: Option<String>,

    /// Explicit measure columns. Takes priority over `measure_prefix`.
    pub measures: Vec<String>,

    /// Fact columns forming the grouping key (period, entity, ...).
    pub group_by: Vec<String>,

    pub has_sign_change: bool,
    pub has_exclusions: bool,
    pub has_group_filter_precedence: bool,

    pub fact_source: FactTableSettings,
    pub retry: RetrySettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            join_patterns: Vec::new(),
            dynamic_column_map: BTreeMap::new(),
            account_segment: None,
            account_segment_column: "account_segment".to_string(),
            measure_prefix: None,
            measures: Vec::new(),
            group_by: Vec::new(),
            has_sign_change: false,
            has_exclusions: false,
            has_group_filter_precedence: false,
            fact_source: FactTableSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `STRATA_CONFIG`
    /// 2. `./strata.toml`
    /// 3. `~/.config/strata/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("STRATA_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("strata.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("strata").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(PipelineConfig::default())
    }

    pub fn with_join_pattern(mut self, pattern: JoinPattern) -> Self {
        self.join_patterns.push(pattern);
        self
    }

    pub fn with_column(mut self, symbol: &str, physical: &str) -> Self {
        self.dynamic_column_map
            .insert(symbol.to_string(), physical.to_string());
        self
    }

    pub fn with_measures<I, S>(mut self, measures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.measures = measures.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Pick measure columns from the fact schema.
    ///
    /// Explicit measures win; otherwise every column starting with the
    /// measure prefix, in schema order.
    pub fn select_measures(&self, fact_schema: &[String]) -> Vec<String> {
        if !self.measures.is_empty() {
            return self.measures.clone();
        }
        match &self.measure_prefix {
            Some(prefix) if !prefix.is_empty() => fact_schema
                .iter()
                .filter(|c| c.starts_with(prefix.as_str()))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
