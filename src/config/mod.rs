//! Configuration module for Strata.
//!
//! Handles the pipeline configuration file and environment variables.

mod settings;

pub use settings::{
    expand_env_vars, FactTableSettings, JoinPattern, PipelineConfig, RetrySettings, SettingsError,
};
