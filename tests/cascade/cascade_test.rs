//! Tests for formula planning, level-ordered evaluation, and data mart rows.

use strata::aggregate::AggregatedRow;
use strata::cascade::{plan, CascadeOutput, FormulaCascadeEngine, Operand};
use strata::diagnostics::{CompileError, ConfigValidationError, CycleError, DataQualityWarning};
use strata::model::{FormulaDefinition, FormulaLogic, HierarchyModel, HierarchyNode};

fn period(p: &str) -> Vec<Option<String>> {
    vec![Some(p.to_string())]
}

fn raw(node: &str, p: &str, amount: f64) -> AggregatedRow {
    AggregatedRow {
        node_id: node.into(),
        branch: "account".into(),
        group_key: period(p),
        measures: vec![Some(amount)],
    }
}

fn calc(id: &str, sort_order: i64, formula: FormulaDefinition) -> HierarchyNode {
    HierarchyNode::new(id, id)
        .with_parent("is")
        .with_sort_order(sort_order)
        .with_formula(formula)
}

/// Revenue and taxes roll up through levels 1 and 2 into gross profit at 3.
fn gross_profit_model() -> HierarchyModel {
    HierarchyModel::new(
        "los",
        vec![
            HierarchyNode::new("is", "Income Statement"),
            HierarchyNode::new("rev", "Revenue").with_parent("is").with_sort_order(10),
            HierarchyNode::new("oil", "Oil Sales").with_parent("rev").with_sort_order(11),
            HierarchyNode::new("gas", "Gas Sales").with_parent("rev").with_sort_order(12),
            HierarchyNode::new("taxes", "Taxes and Deducts").with_parent("is").with_sort_order(20),
            calc(
                "total_revenue",
                30,
                FormulaDefinition::new("Total_Revenue", 1, FormulaLogic::Add, "rev"),
            ),
            calc(
                "total_taxes",
                40,
                FormulaDefinition::new("Total_Taxes_and_Deducts", 2, FormulaLogic::Add, "taxes"),
            ),
            calc(
                "gross_profit",
                50,
                FormulaDefinition::new("Gross_Profit", 3, FormulaLogic::Subtract, "Total_Revenue")
                    .with_second("Total_Taxes_and_Deducts"),
            ),
        ],
        vec![],
    )
}

fn run(model: &HierarchyModel, rows: &[AggregatedRow]) -> CascadeOutput {
    FormulaCascadeEngine::new(model, 1).run(rows).unwrap()
}

// ============================================================================
// Planning
// ============================================================================

#[test]
fn test_plan_orders_levels() {
    let plan = plan(&gross_profit_model()).unwrap();
    let order: Vec<(u8, &str)> = plan
        .formulas()
        .map(|f| (f.level, f.node_id.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![(1, "total_revenue"), (2, "total_taxes"), (3, "gross_profit")]
    );

    let gp = plan.levels[&3][0].clone();
    assert!(matches!(gp.first, Operand::Formula { level: 1, .. }));
    assert!(matches!(gp.second, Some(Operand::Formula { level: 2, .. })));
}

#[test]
fn test_reference_to_later_level_is_cycle_error() {
    let model = HierarchyModel::new(
        "los",
        vec![
            HierarchyNode::new("is", "Income Statement"),
            HierarchyNode::new("rev", "Revenue").with_parent("is"),
            calc("net", 10, FormulaDefinition::new("Net", 2, FormulaLogic::Add, "Margin")),
            calc("margin", 20, FormulaDefinition::new("Margin", 3, FormulaLogic::Add, "rev")),
        ],
        vec![],
    );

    let errors = plan(&model).unwrap_err();
    assert_eq!(
        errors,
        vec![CompileError::Cycle(CycleError::ForwardReference {
            group: "Net".into(),
            level: 2,
            reference: "Margin".into(),
            produced_at: 3,
        })]
    );
}

#[test]
fn test_mutual_references_report_cycle() {
    let model = HierarchyModel::new(
        "los",
        vec![
            HierarchyNode::new("is", "Income Statement"),
            calc("a", 10, FormulaDefinition::new("A", 2, FormulaLogic::Add, "B")),
            calc("b", 20, FormulaDefinition::new("B", 3, FormulaLogic::Add, "A")),
        ],
        vec![],
    );

    let errors = plan(&model).unwrap_err();
    assert!(errors.contains(&CompileError::Cycle(CycleError::Cycle {
        members: vec!["a".into(), "b".into()],
    })));
}

#[test]
fn test_reference_to_inactive_node_is_missing() {
    let model = HierarchyModel::new(
        "los",
        vec![
            HierarchyNode::new("is", "Income Statement"),
            HierarchyNode::new("old", "Legacy").with_parent("is").inactive(),
            calc("a", 10, FormulaDefinition::new("A", 1, FormulaLogic::Add, "old")),
        ],
        vec![],
    );

    let errors = plan(&model).unwrap_err();
    assert_eq!(
        errors,
        vec![CompileError::Config(ConfigValidationError::MissingFormulaReference {
            group: "A".into(),
            level: 1,
            reference: "old".into(),
        })]
    );
}

// ============================================================================
// Evaluation
// ============================================================================

#[test]
fn test_gross_profit_is_revenue_minus_taxes() {
    let model = gross_profit_model();
    let rows = vec![
        raw("oil", "2024-01", 600.0),
        raw("gas", "2024-01", 400.0),
        raw("taxes", "2024-01", 150.0),
    ];

    let output = run(&model, &rows);
    let key = period("2024-01");
    assert_eq!(output.computed_value("total_revenue", &key, 0), Some(1000.0));
    assert_eq!(output.computed_value("total_taxes", &key, 0), Some(150.0));
    assert_eq!(output.computed_value("gross_profit", &key, 0), Some(850.0));
    assert!(output.warnings.is_empty());
}

#[test]
fn test_divide_by_zero_is_null_with_warning() {
    let model = HierarchyModel::new(
        "los",
        vec![
            HierarchyNode::new("is", "Income Statement"),
            HierarchyNode::new("rev", "Revenue").with_parent("is"),
            HierarchyNode::new("volume", "Volume").with_parent("is"),
            calc(
                "price",
                10,
                FormulaDefinition::new("Realized_Price", 1, FormulaLogic::Divide, "rev")
                    .with_second("volume"),
            ),
        ],
        vec![],
    );
    let rows = vec![
        raw("rev", "2024-01", 500.0),
        raw("volume", "2024-01", 0.0),
        raw("rev", "2024-02", 500.0),
        raw("volume", "2024-02", 20.0),
    ];

    let output = run(&model, &rows);
    assert_eq!(output.computed_value("price", &period("2024-01"), 0), None);
    assert_eq!(output.computed_value("price", &period("2024-02"), 0), Some(25.0));
    assert_eq!(
        output.warnings,
        vec![DataQualityWarning::DivideByZero {
            group: "Realized_Price".into(),
            level: 1,
            occurrences: 1,
        }]
    );

    let null_row = output
        .rows_for("price")
        .find(|r| r.group_key == period("2024-01"))
        .unwrap();
    assert_eq!(null_row.measures, vec![None]);
}

// ============================================================================
// Data mart rows
// ============================================================================

#[test]
fn test_surrogate_keys_follow_sort_order() {
    let model = gross_profit_model();
    let rows = vec![
        raw("oil", "2024-01", 600.0),
        raw("oil", "2024-02", 650.0),
        raw("gas", "2024-01", 400.0),
        raw("taxes", "2024-01", 150.0),
    ];

    let output = run(&model, &rows);
    let keys: Vec<(&str, u64)> = output
        .rows
        .iter()
        .map(|r| (r.node_id.as_str(), r.surrogate_key))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("oil", 1),
            ("oil", 1),
            ("gas", 2),
            ("taxes", 3),
            ("total_revenue", 4),
            ("total_revenue", 4),
            ("total_taxes", 5),
            ("gross_profit", 6),
            ("gross_profit", 6),
        ]
    );
}

#[test]
fn test_identical_inputs_yield_identical_rows() {
    let model = gross_profit_model();
    let rows = vec![
        raw("taxes", "2024-01", 150.0),
        raw("oil", "2024-01", 600.0),
        raw("gas", "2024-01", 400.0),
    ];
    let mut shuffled = rows.clone();
    shuffled.reverse();

    assert_eq!(run(&model, &rows).rows, run(&model, &shuffled).rows);
}

#[test]
fn test_rows_carry_backfilled_levels() {
    let model = gross_profit_model();
    let output = run(&model, &[raw("oil", "2024-01", 600.0)]);

    let oil = output.rows_for("oil").next().unwrap();
    assert_eq!(oil.levels[0], "Income Statement");
    assert_eq!(oil.levels[1], "Revenue");
    assert_eq!(oil.levels[2], "Oil Sales");
    assert_eq!(oil.levels[8], "Oil Sales");
    assert!(!oil.is_calculated);

    let gp = output.rows_for("gross_profit").next().unwrap();
    assert!(gp.is_calculated);
    assert_eq!(gp.formula_group.as_deref(), Some("Gross_Profit"));
    assert_eq!(gp.precedence, Some(3));
}
