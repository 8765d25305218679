//! Tests for branch validation, routing, and fact aggregation.

use strata::aggregate::{route, validate_branches, Aggregation, JoinPlanExecutor};
use strata::config::{JoinPattern, PipelineConfig};
use strata::connector::{
    ConnectorError, ConnectorResult, FactRequest, FactRow, FactSource, FactValue,
    InMemoryFactSource, RetryPolicy,
};
use strata::diagnostics::{CompileError, ConfigValidationError, DataQualityWarning, KeySide};
use strata::expand::{GrainRow, GranularityTable};
use strata::model::FilterValue;
use strata::predicate::Predicate;

fn grain(rows: Vec<GrainRow>) -> GranularityTable {
    let mut schema: Vec<String> = rows.iter().flat_map(|r| r.keys.keys().cloned()).collect();
    schema.sort();
    schema.dedup();
    GranularityTable {
        schema,
        rows,
        filter_groups: vec![],
    }
}

fn ledger() -> InMemoryFactSource {
    InMemoryFactSource::new(["acct", "product", "period", "ledger", "amount"])
        .with_row([
            ("acct", FactValue::from("4100")),
            ("product", FactValue::from("OIL")),
            ("period", FactValue::from("2024-01")),
            ("ledger", FactValue::from("ACTUAL")),
            ("amount", FactValue::from(100.0)),
        ])
        .with_row([
            ("acct", FactValue::from("4100")),
            ("product", FactValue::from("NGL")),
            ("period", FactValue::from("2024-01")),
            ("ledger", FactValue::from("ACTUAL")),
            ("amount", FactValue::from(40.0)),
        ])
        .with_row([
            ("acct", FactValue::from("4100")),
            ("product", FactValue::from("OIL")),
            ("period", FactValue::from("2024-02")),
            ("ledger", FactValue::from("BUDGET")),
            ("amount", FactValue::from(999.0)),
        ])
        .with_row([
            ("acct", FactValue::from("4900")),
            ("product", FactValue::from("OIL")),
            ("period", FactValue::from("2024-01")),
            ("ledger", FactValue::from("ACTUAL")),
            ("amount", FactValue::from(25.0)),
        ])
}

fn account_branch() -> JoinPattern {
    JoinPattern::new("account", ["account_code"], ["acct"])
}

fn executor_config(branches: Vec<JoinPattern>) -> PipelineConfig {
    let mut config = PipelineConfig::default()
        .with_measures(["amount"])
        .with_group_by(["period"]);
    config.join_patterns = branches;
    config
}

fn run(config: &PipelineConfig, grain: &GranularityTable) -> Aggregation {
    JoinPlanExecutor::new(config, grain)
        .with_retry(RetryPolicy::none())
        .execute(&ledger())
        .unwrap()
}

fn value(agg: &Aggregation, node: &str, period: &str) -> Option<f64> {
    agg.rows
        .iter()
        .filter(|r| r.node_id == node && r.group_key == vec![Some(period.to_string())])
        .find_map(|r| r.measures[0])
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_key_arity_mismatch_names_branch() {
    let grain = grain(vec![GrainRow::new("oil")
        .with_key("account_code", FilterValue::parse("4100"))
        .with_key("product_code", FilterValue::parse("OIL"))]);
    let branches = vec![
        account_branch(),
        JoinPattern::new("account_product", ["account_code", "product_code"], ["acct"]),
    ];

    let errors = validate_branches(&branches, &grain, &["acct".to_string()]);
    assert_eq!(
        errors,
        vec![ConfigValidationError::KeyArityMismatch {
            branch: "account_product".into(),
            join_keys: 2,
            fact_keys: 1,
        }]
    );
    assert!(errors[0].to_string().contains("account_product"));
}

#[test]
fn test_unknown_keys_reported_per_side() {
    let grain = grain(vec![GrainRow::new("oil").with_key("account_code", FilterValue::parse("4100"))]);
    let branches = vec![JoinPattern::new("deduct", ["deduct_code"], ["fk_deduct"])];

    let errors = validate_branches(&branches, &grain, &["acct".to_string()]);
    assert_eq!(
        errors,
        vec![
            ConfigValidationError::UnknownBranchKey {
                branch: "deduct".into(),
                side: KeySide::Join,
                key: "deduct_code".into(),
            },
            ConfigValidationError::UnknownBranchKey {
                branch: "deduct".into(),
                side: KeySide::Fact,
                key: "fk_deduct".into(),
            },
        ]
    );
}

#[test]
fn test_execute_fails_on_invalid_branch() {
    let grain = grain(vec![GrainRow::new("oil").with_key("account_code", FilterValue::parse("4100"))]);
    let config = executor_config(vec![JoinPattern::new("broken", ["account_code"], ["acct", "product"])]);

    let errors = JoinPlanExecutor::new(&config, &grain)
        .with_retry(RetryPolicy::none())
        .execute(&ledger())
        .unwrap_err();
    assert!(matches!(
        &errors[0],
        CompileError::Config(ConfigValidationError::KeyArityMismatch { branch, .. }) if branch == "broken"
    ));
}

// ============================================================================
// Routing
// ============================================================================

#[test]
fn test_ambiguous_routing_names_node_and_both_branches() {
    let grain = grain(vec![
        GrainRow::new("oil")
            .with_key("account_code", FilterValue::parse("4100"))
            .with_key("product_code", FilterValue::parse("OIL")),
        GrainRow::new("refunds").with_key("account_code", FilterValue::parse("4900")),
    ]);
    let branches = vec![
        account_branch(),
        JoinPattern::new("account_product", ["account_code", "product_code"], ["acct", "product"]),
    ];

    let routing = route(&branches, &grain);
    assert_eq!(
        routing.warnings,
        vec![DataQualityWarning::AmbiguousRouting {
            node_id: "oil".into(),
            branches: vec!["account".into(), "account_product".into()],
        }]
    );
    assert_eq!(routing.rows_for("account"), &[0, 1]);
    assert_eq!(routing.rows_for("account_product"), &[0]);
}

#[test]
fn test_unrouted_node_warned() {
    let grain = grain(vec![GrainRow::new("misc").with_key("cost_center", FilterValue::parse("CC1"))]);
    let routing = route(&[account_branch()], &grain);
    assert_eq!(
        routing.warnings,
        vec![DataQualityWarning::UnroutedNode { node_id: "misc".into() }]
    );
}

// ============================================================================
// Aggregation
// ============================================================================

#[test]
fn test_aggregates_per_node_and_period() {
    let grain = grain(vec![GrainRow::new("sales").with_key("account_code", FilterValue::parse("41%"))]);
    let config = executor_config(vec![account_branch()]);

    let agg = run(&config, &grain);
    assert_eq!(value(&agg, "sales", "2024-01"), Some(140.0));
    assert_eq!(value(&agg, "sales", "2024-02"), Some(999.0));
    assert_eq!(agg.measures, vec!["amount".to_string()]);
    assert_eq!(agg.plans[0].node_ids, vec!["sales".to_string()]);
}

#[test]
fn test_branch_predicate_filters_facts() {
    let grain = grain(vec![GrainRow::new("sales").with_key("account_code", FilterValue::parse("41%"))]);
    let config = executor_config(vec![
        account_branch().with_predicate(Predicate::eq("ledger", "ACTUAL")),
    ]);

    let agg = run(&config, &grain);
    assert_eq!(value(&agg, "sales", "2024-01"), Some(140.0));
    assert_eq!(value(&agg, "sales", "2024-02"), None);
}

#[test]
fn test_sign_change_negates_node_total() {
    let mut flipped = GrainRow::new("refunds").with_key("account_code", FilterValue::parse("4900"));
    flipped.sign_change = true;
    let plain = GrainRow::new("refunds_raw").with_key("account_code", FilterValue::parse("4900"));
    let grain = grain(vec![flipped, plain]);

    let mut config = executor_config(vec![account_branch()]);
    config.has_sign_change = true;
    let agg = run(&config, &grain);

    let raw = value(&agg, "refunds_raw", "2024-01").unwrap();
    assert_eq!(value(&agg, "refunds", "2024-01"), Some(-raw));

    config.has_sign_change = false;
    let agg = run(&config, &grain);
    assert_eq!(value(&agg, "refunds", "2024-01"), Some(raw));
}

#[test]
fn test_empty_branch_result_warned() {
    let grain = grain(vec![GrainRow::new("royalty").with_key("account_code", FilterValue::parse("7000"))]);
    let config = executor_config(vec![account_branch()]);

    let agg = run(&config, &grain);
    assert!(agg.rows.is_empty());
    assert_eq!(
        agg.warnings,
        vec![DataQualityWarning::EmptyBranchResult {
            node_id: "royalty".into(),
            branch: "account".into(),
        }]
    );
}

// ============================================================================
// Connector failures
// ============================================================================

struct Unreachable;

impl FactSource for Unreachable {
    fn schema(&self) -> ConnectorResult<Vec<String>> {
        Err(ConnectorError::authentication("bad credentials"))
    }

    fn aggregate(&self, _request: &FactRequest) -> ConnectorResult<Vec<FactRow>> {
        Ok(vec![])
    }
}

#[test]
fn test_connector_error_surfaces() {
    let grain = grain(vec![GrainRow::new("sales").with_key("account_code", FilterValue::parse("41%"))]);
    let config = executor_config(vec![account_branch()]);

    let errors = JoinPlanExecutor::new(&config, &grain)
        .with_retry(RetryPolicy::none())
        .execute(&Unreachable)
        .unwrap_err();
    assert!(matches!(&errors[0], CompileError::Connector(e) if !e.is_retryable()));
}
