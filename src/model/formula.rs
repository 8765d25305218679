//! Formula definitions for calculation nodes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lowest and highest formula precedence levels.
pub const MIN_PRECEDENCE: u8 = 1;
pub const MAX_PRECEDENCE: u8 = 5;

/// The closed set of formula operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormulaLogic {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl FormulaLogic {
    /// Whether `param2_ref` is required.
    pub fn requires_second_operand(self) -> bool {
        !matches!(self, FormulaLogic::Add)
    }
}

impl fmt::Display for FormulaLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormulaLogic::Add => "ADD",
            FormulaLogic::Subtract => "SUBTRACT",
            FormulaLogic::Multiply => "MULTIPLY",
            FormulaLogic::Divide => "DIVIDE",
        };
        f.write_str(name)
    }
}

/// How a calculation node derives its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaDefinition {
    pub precedence: u8,
    pub group: String,
    pub logic: FormulaLogic,
    pub param_ref: String,
    #[serde(default)]
    pub param2_ref: Option<String>,
}

impl FormulaDefinition {
    pub fn new(
        group: impl Into<String>,
        precedence: u8,
        logic: FormulaLogic,
        param_ref: impl Into<String>,
    ) -> Self {
        Self {
            precedence,
            group: group.into(),
            logic,
            param_ref: param_ref.into(),
            param2_ref: None,
        }
    }

    pub fn with_second(mut self, param2_ref: impl Into<String>) -> Self {
        self.param2_ref = Some(param2_ref.into());
        self
    }

    pub fn has_valid_precedence(&self) -> bool {
        (MIN_PRECEDENCE..=MAX_PRECEDENCE).contains(&self.precedence)
    }

    /// The references this formula reads, first operand first.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.param_ref.as_str()).chain(self.param2_ref.as_deref())
    }
}
