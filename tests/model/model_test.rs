//! Tests for the hierarchy model: structure queries, validation, JSON loading.

use strata::diagnostics::ConfigValidationError;
use strata::model::{
    FormulaDefinition, FormulaLogic, HierarchyModel, HierarchyNode, SourceMapping,
};

fn income_statement() -> HierarchyModel {
    HierarchyModel::new(
        "los",
        vec![
            HierarchyNode::new("is", "Income Statement"),
            HierarchyNode::new("rev", "Revenue").with_parent("is").with_sort_order(10),
            HierarchyNode::new("oil", "Oil Sales").with_parent("rev").with_sort_order(11),
            HierarchyNode::new("gas", "Gas Sales").with_parent("rev").with_sort_order(12),
            HierarchyNode::new("total_rev", "Total Revenue")
                .with_parent("is")
                .with_formula(FormulaDefinition::new("Total_Revenue", 1, FormulaLogic::Add, "rev")),
        ],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "41%"),
            SourceMapping::new("gas", "ACCOUNT_CODE", "4200").with_index(1),
        ],
    )
}

// ============================================================================
// Structure
// ============================================================================

#[test]
fn test_ancestry_is_root_first() {
    let model = income_statement();
    let path: Vec<&str> = model.ancestry("oil").iter().map(|n| n.id.as_str()).collect();
    assert_eq!(path, vec!["is", "rev", "oil"]);
}

#[test]
fn test_descendants_depth_first() {
    let model = income_statement();
    let ids: Vec<&str> = model.descendants("is").iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["rev", "oil", "gas", "total_rev"]);
}

#[test]
fn test_leaves_and_mappings() {
    let model = income_statement();
    assert!(model.is_leaf("oil"));
    assert!(!model.is_leaf("rev"));
    assert_eq!(model.mappings_for("gas").count(), 1);
    assert_eq!(model.mappings_for("rev").count(), 0);
}

#[test]
fn test_find_reference_by_group_and_name() {
    let model = income_statement();
    assert_eq!(model.find_reference("TOTAL_REV").map(|n| n.id.as_str()), Some("total_rev"));
    assert_eq!(model.find_reference("total_revenue").map(|n| n.id.as_str()), Some("total_rev"));
    assert_eq!(model.find_reference("oil sales").map(|n| n.id.as_str()), Some("oil"));
    assert!(model.find_reference("nowhere").is_none());
}

#[test]
fn test_inactive_nodes_do_not_participate() {
    let node = HierarchyNode::new("old", "Legacy").inactive();
    assert!(!node.participates());
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_valid_model_has_no_errors() {
    assert!(income_statement().validate().is_empty());
}

#[test]
fn test_validate_reports_every_violation() {
    let model = HierarchyModel::new(
        "broken",
        vec![
            HierarchyNode::new("a", "A"),
            HierarchyNode::new("b", "B"),
            HierarchyNode::new("c", "C").with_parent("missing"),
            HierarchyNode::new("calc", "Calc")
                .with_parent("a")
                .with_formula(FormulaDefinition::new("Calc", 7, FormulaLogic::Add, "a")),
        ],
        vec![SourceMapping::new("calc", "ACCOUNT_CODE", "4100")],
    );

    let errors = model.validate();
    assert!(errors.contains(&ConfigValidationError::RootCount { count: 2 }));
    assert!(errors.contains(&ConfigValidationError::UnknownParent {
        node_id: "c".into(),
        parent_id: "missing".into(),
    }));
    assert!(errors.contains(&ConfigValidationError::CalculationWithMappings {
        node_id: "calc".into(),
        count: 1,
    }));
    assert!(errors.contains(&ConfigValidationError::InvalidPrecedence {
        group: "Calc".into(),
        level: 7,
    }));
}

#[test]
fn test_parent_cycle_detected() {
    let model = HierarchyModel::new(
        "cyclic",
        vec![
            HierarchyNode::new("root", "Root"),
            HierarchyNode::new("x", "X").with_parent("y"),
            HierarchyNode::new("y", "Y").with_parent("x"),
        ],
        vec![],
    );
    let errors = model.validate();
    assert!(errors
        .iter()
        .any(|e| matches!(e, ConfigValidationError::ParentCycle { .. })));
}

// ============================================================================
// JSON
// ============================================================================

#[test]
fn test_model_from_json() {
    let json = r#"{
        "project_id": "los",
        "nodes": [
            { "id": "is", "name": "Income Statement" },
            { "id": "oil", "name": "Oil Sales", "parent_id": "is", "sort_order": 5,
              "filter_groups": ["Oil", null, null, null] },
            { "id": "gp", "name": "Gross Profit", "parent_id": "is",
              "flags": { "is_calculation": true },
              "formula": { "precedence": 3, "group": "Gross_Profit", "logic": "SUBTRACT",
                           "param_ref": "oil", "param2_ref": "oil" } }
        ],
        "mappings": [
            { "node_id": "oil", "mapping_index": 0, "id_source": "ACCOUNT_CODE", "id": "41%" }
        ]
    }"#;

    let model = HierarchyModel::from_json(json).unwrap();
    assert_eq!(model.project_id(), "los");
    assert_eq!(model.nodes().len(), 3);
    assert_eq!(model.node("oil").unwrap().declared_filter_groups(), vec!["Oil"]);

    let gp = model.node("gp").unwrap();
    assert!(gp.is_calculation());
    assert!(gp.participates());
    assert_eq!(gp.formula.as_ref().unwrap().logic, FormulaLogic::Subtract);
    assert!(model.validate().is_empty());
}
