//! Static analysis of the formula graph.
//!
//! Every formula reference is resolved before anything is evaluated. The
//! result is a [`FormulaPlan`]: formulas bucketed by precedence level, each
//! operand bound to either a raw rollup or an earlier formula.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::diagnostics::{CompileError, ConfigValidationError, CycleError};
use crate::model::{FormulaDefinition, FormulaLogic, HierarchyModel, HierarchyNode};

/// Where a formula operand reads its values from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    /// Raw aggregates of a node plus its non-calculation descendants.
    Rollup {
        reference: String,
        node_ids: Vec<String>,
    },
    /// The output of a formula at a lower level.
    Formula {
        reference: String,
        node_id: String,
        level: u8,
    },
}

impl Operand {
    pub fn reference(&self) -> &str {
        match self {
            Operand::Rollup { reference, .. } | Operand::Formula { reference, .. } => reference,
        }
    }
}

/// One formula with its operands bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFormula {
    pub node_id: String,
    pub group: String,
    pub level: u8,
    pub logic: FormulaLogic,
    pub first: Operand,
    pub second: Option<Operand>,
}

/// Formulas grouped by precedence level, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormulaPlan {
    pub levels: BTreeMap<u8, Vec<PlannedFormula>>,
}

impl FormulaPlan {
    /// All formulas in execution order.
    pub fn formulas(&self) -> impl Iterator<Item = &PlannedFormula> {
        self.levels.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Build the execution plan for every participating formula.
///
/// Reports every defect found: unknown references and missing second
/// operands as [`ConfigValidationError`]s, references to a formula at the
/// same or a later level and dependency cycles as [`CycleError`]s.
pub fn plan(model: &HierarchyModel) -> Result<FormulaPlan, Vec<CompileError>> {
    let mut errors: Vec<CompileError> = Vec::new();
    let mut plan = FormulaPlan::default();

    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index: HashMap<String, NodeIndex> = HashMap::new();
    let mut node_index = |graph: &mut DiGraph<String, ()>, id: &str| -> NodeIndex {
        *index
            .entry(id.to_string())
            .or_insert_with(|| graph.add_node(id.to_string()))
    };

    for (node, formula) in model.formulas() {
        if !formula.has_valid_precedence() {
            errors.push(
                ConfigValidationError::InvalidPrecedence {
                    group: formula.group.clone(),
                    level: formula.precedence,
                }
                .into(),
            );
            continue;
        }
        if formula.logic.requires_second_operand() && formula.param2_ref.is_none() {
            errors.push(
                ConfigValidationError::MissingSecondOperand {
                    group: formula.group.clone(),
                    level: formula.precedence,
                    logic: formula.logic.to_string(),
                }
                .into(),
            );
        }

        let this = node_index(&mut graph, &node.id);
        let mut operands = Vec::with_capacity(2);
        for reference in formula.references() {
            match bind_operand(model, formula, reference) {
                Ok(operand) => {
                    if let Operand::Formula { node_id, .. } = &operand {
                        let dep = node_index(&mut graph, node_id);
                        graph.add_edge(dep, this, ());
                    }
                    operands.push(operand);
                }
                Err(err) => {
                    // Still record the edge so cycles are reported too.
                    if let Some(target) = model.find_reference(reference).filter(|t| t.is_calculation()) {
                        let dep = node_index(&mut graph, &target.id);
                        graph.add_edge(dep, this, ());
                    }
                    errors.push(err);
                }
            }
        }

        let mut operands = operands.into_iter();
        if let Some(first) = operands.next() {
            plan.levels
                .entry(formula.precedence)
                .or_default()
                .push(PlannedFormula {
                    node_id: node.id.clone(),
                    group: formula.group.clone(),
                    level: formula.precedence,
                    logic: formula.logic,
                    first,
                    second: operands.next(),
                });
        }
    }

    for members in detect_cycles(&graph) {
        errors.push(CycleError::Cycle { members }.into());
    }

    if errors.is_empty() {
        Ok(plan)
    } else {
        Err(errors)
    }
}

fn bind_operand(
    model: &HierarchyModel,
    formula: &FormulaDefinition,
    reference: &str,
) -> Result<Operand, CompileError> {
    let missing = || -> CompileError {
        ConfigValidationError::MissingFormulaReference {
            group: formula.group.clone(),
            level: formula.precedence,
            reference: reference.to_string(),
        }
        .into()
    };

    let target = model.find_reference(reference).ok_or_else(missing)?;
    if !target.participates() {
        return Err(missing());
    }
    if !target.is_calculation() {
        return Ok(Operand::Rollup {
            reference: reference.to_string(),
            node_ids: rollup_members(model, target),
        });
    }

    let produced = target.formula.as_ref().ok_or_else(missing)?;
    if produced.precedence >= formula.precedence {
        return Err(CycleError::ForwardReference {
            group: formula.group.clone(),
            level: formula.precedence,
            reference: reference.to_string(),
            produced_at: produced.precedence,
        }
        .into());
    }
    Ok(Operand::Formula {
        reference: reference.to_string(),
        node_id: target.id.clone(),
        level: produced.precedence,
    })
}

/// A node and its participating non-calculation descendants.
fn rollup_members(model: &HierarchyModel, target: &HierarchyNode) -> Vec<String> {
    std::iter::once(target)
        .chain(model.descendants(&target.id))
        .filter(|n| n.participates() && !n.is_calculation())
        .map(|n| n.id.clone())
        .collect()
}

/// Strongly connected components that form a cycle, members sorted.
fn detect_cycles(graph: &DiGraph<String, ()>) -> Vec<Vec<String>> {
    tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.edges_connecting(scc[0], scc[0]).next().is_some())
        .map(|scc| {
            let mut members: Vec<String> = scc
                .into_iter()
                .filter_map(|idx| graph.node_weight(idx).cloned())
                .collect();
            members.sort();
            members
        })
        .collect()
}
