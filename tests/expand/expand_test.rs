//! Tests for granularity expansion: precedence rounds, exclusions, warnings.

use strata::config::PipelineConfig;
use strata::diagnostics::{ConfigValidationError, DataQualityWarning};
use strata::expand::{apply_exclusions, Expansion, ExclusionSpec, GrainRow, GranularityExpander};
use strata::model::{FilterValue, HierarchyModel, HierarchyNode, SourceMapping};
use strata::resolve::{ColumnResolver, ResolvedMapping};

fn config() -> PipelineConfig {
    PipelineConfig::default()
        .with_column("ACCOUNT_CODE", "account_code")
        .with_column("PRODUCT_CODE", "product_code")
}

fn resolved(model: &HierarchyModel, config: &PipelineConfig) -> Vec<ResolvedMapping> {
    let resolution = ColumnResolver::new(&config.dynamic_column_map).resolve_all(model);
    assert!(resolution.errors.is_empty(), "{:?}", resolution.errors);
    resolution.resolved
}

fn expand(model: &HierarchyModel, config: &PipelineConfig) -> Expansion {
    let resolved = resolved(model, config);
    GranularityExpander::new(model, config).expand(&resolved)
}

fn tree(nodes: Vec<HierarchyNode>, mappings: Vec<SourceMapping>) -> HierarchyModel {
    let mut all = vec![HierarchyNode::new("is", "Income Statement")];
    all.extend(nodes.into_iter().map(|n| n.with_parent("is")));
    HierarchyModel::new("los", all, mappings)
}

// ============================================================================
// Exclusions
// ============================================================================

#[test]
fn test_exclusions_disabled_is_strict_noop() {
    let rows = vec![
        GrainRow::new("oil").with_key("account_code", FilterValue::parse("41%")),
        GrainRow::new("oil").with_key("account_code", FilterValue::parse("4150")),
    ];
    let specs = vec![ExclusionSpec::new("oil", "account_code", FilterValue::parse("41%"))];
    assert_eq!(apply_exclusions(rows.clone(), &specs, false), rows);
}

#[test]
fn test_exclusion_mappings_ignored_when_disabled() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil")],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "4100"),
            SourceMapping::new("oil", "ACCOUNT_CODE", "4100").with_index(1).excluded(),
        ],
    );
    let expansion = expand(&model, &config());
    assert_eq!(expansion.table.rows.len(), 1);
    assert!(expansion.table.rows[0].exclusions.is_empty());
}

#[test]
fn test_exclusion_removes_covered_value() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil")],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "4100"),
            SourceMapping::new("oil", "ACCOUNT_CODE", "4200").with_index(1),
            SourceMapping::new("oil", "ACCOUNT_CODE", "42%").with_index(2).excluded(),
        ],
    );
    let mut config = config();
    config.has_exclusions = true;

    let expansion = expand(&model, &config);
    let values: Vec<String> = expansion
        .table
        .rows_for("oil")
        .map(|r| r.keys["account_code"].to_string())
        .collect();
    assert_eq!(values, vec!["4100".to_string()]);
}

// ============================================================================
// Overlapping mappings
// ============================================================================

#[test]
fn test_pattern_and_exact_mapping_collapse_to_one_row() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil")],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "41%"),
            SourceMapping::new("oil", "ACCOUNT_CODE", "4100").with_index(1),
        ],
    );
    let expansion = expand(&model, &config());
    let rows: Vec<&GrainRow> = expansion.table.rows_for("oil").collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].keys["account_code"], FilterValue::parse("41%"));
    assert_eq!(rows[0].mapping_indices, vec![0, 1]);
}

#[test]
fn test_pattern_with_exclusion_absorbs_disjoint_exact_row() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil")],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "41%"),
            SourceMapping::new("oil", "ACCOUNT_CODE", "4150").with_index(1),
            SourceMapping::new("oil", "ACCOUNT_CODE", "415%").with_index(2).excluded(),
            SourceMapping::new("oil", "ACCOUNT_CODE", "4100").with_index(3),
        ],
    );
    let mut config = config();
    config.has_exclusions = true;

    let expansion = expand(&model, &config);
    let values: Vec<String> = expansion
        .table
        .rows_for("oil")
        .map(|r| r.keys["account_code"].to_string())
        .collect();
    assert_eq!(values, vec!["41%".to_string()]);
    let row = expansion.table.rows_for("oil").next().unwrap();
    assert_eq!(row.mapping_indices, vec![0, 3]);
    assert!(!row.admits(&[("account_code", Some("4150"))]));
}

// ============================================================================
// Group filter precedence
// ============================================================================

#[test]
fn test_precedence_rounds_narrow_with_and() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil")],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "41%").with_precedence(1),
            SourceMapping::new("oil", "PRODUCT_CODE", "OIL").with_index(1).with_precedence(2),
            SourceMapping::new("oil", "PRODUCT_CODE", "NGL").with_index(2).with_precedence(2),
        ],
    );
    let mut config = config();
    config.has_group_filter_precedence = true;

    let expansion = expand(&model, &config);
    assert!(expansion.errors.is_empty());
    let rows: Vec<&GrainRow> = expansion.table.rows_for("oil").collect();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.keys["account_code"], FilterValue::parse("41%"));
    }
    let products: Vec<String> = rows.iter().map(|r| r.keys["product_code"].to_string()).collect();
    assert_eq!(products, vec!["OIL".to_string(), "NGL".to_string()]);
    assert_eq!(
        expansion.table.schema,
        vec!["account_code".to_string(), "product_code".to_string()]
    );
}

#[test]
fn test_precedence_disjoint_round_drops_row() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil"), HierarchyNode::new("gas", "Gas")],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "41%").with_precedence(1),
            SourceMapping::new("oil", "ACCOUNT_CODE", "4150").with_index(1).with_precedence(2),
            SourceMapping::new("oil", "ACCOUNT_CODE", "4200").with_index(2).with_precedence(2),
            SourceMapping::new("gas", "ACCOUNT_CODE", "42%").with_index(3).with_precedence(1),
            SourceMapping::new("gas", "ACCOUNT_CODE", "4100").with_index(4).with_precedence(2),
        ],
    );
    let mut config = config();
    config.has_group_filter_precedence = true;

    let expansion = expand(&model, &config);
    let rows: Vec<&GrainRow> = expansion.table.rows_for("oil").collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].keys["account_code"], FilterValue::parse("4150"));
    assert_eq!(rows[0].mapping_indices, vec![0, 1]);

    assert_eq!(expansion.table.rows_for("gas").count(), 0);
    assert_eq!(
        expansion.warnings,
        vec![DataQualityWarning::EmptyGrain { node_id: "gas".into() }]
    );
}

#[test]
fn test_fully_excluded_node_is_warned() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil")],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "4100"),
            SourceMapping::new("oil", "ACCOUNT_CODE", "41%").with_index(1).excluded(),
        ],
    );
    let mut config = config();
    config.has_exclusions = true;

    let expansion = expand(&model, &config);
    assert!(expansion.table.is_empty());
    assert_eq!(
        expansion.warnings,
        vec![DataQualityWarning::EmptyGrain { node_id: "oil".into() }]
    );
}

#[test]
fn test_precedence_disabled_keeps_mappings_separate() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil")],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "41%").with_precedence(1),
            SourceMapping::new("oil", "PRODUCT_CODE", "OIL").with_index(1).with_precedence(2),
        ],
    );
    let expansion = expand(&model, &config());
    assert_eq!(expansion.table.rows_for("oil").count(), 2);
}

#[test]
fn test_skipped_precedence_round_is_fatal() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil")],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "41%").with_precedence(1),
            SourceMapping::new("oil", "PRODUCT_CODE", "OIL").with_index(1).with_precedence(3),
        ],
    );
    let mut config = config();
    config.has_group_filter_precedence = true;

    let expansion = expand(&model, &config);
    assert_eq!(
        expansion.errors,
        vec![ConfigValidationError::SkippedPrecedenceRound {
            node_id: "oil".into(),
            declared: vec![1, 3],
            missing: 2,
        }]
    );
}

#[test]
fn test_node_precedence_is_default_round() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil").with_group_filter_precedence(2)],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "41%").with_precedence(1),
            SourceMapping::new("oil", "PRODUCT_CODE", "OIL").with_index(1),
        ],
    );
    let mut config = config();
    config.has_group_filter_precedence = true;

    let expansion = expand(&model, &config);
    let rows: Vec<&GrainRow> = expansion.table.rows_for("oil").collect();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].populates(&["account_code", "product_code"]));
}

// ============================================================================
// Warnings
// ============================================================================

#[test]
fn test_orphan_leaf_is_warned_and_skipped() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil"), HierarchyNode::new("gas", "Gas")],
        vec![SourceMapping::new("oil", "ACCOUNT_CODE", "4100")],
    );
    let expansion = expand(&model, &config());
    assert!(expansion
        .warnings
        .contains(&DataQualityWarning::OrphanNode { node_id: "gas".into() }));
    assert_eq!(expansion.table.rows_for("gas").count(), 0);
    assert!(!expansion
        .warnings
        .iter()
        .any(|w| w.node_id() == Some("is")));
}

#[test]
fn test_undeclared_filter_group_is_drift() {
    let model = tree(
        vec![HierarchyNode::new("oil", "Oil").with_filter_group(0, "Oil")],
        vec![
            SourceMapping::new("oil", "ACCOUNT_CODE", "4100").with_filter_group("oil"),
            SourceMapping::new("oil", "ACCOUNT_CODE", "4150")
                .with_index(1)
                .with_filter_group("Condensate"),
        ],
    );
    let expansion = expand(&model, &config());
    assert_eq!(
        expansion.warnings,
        vec![DataQualityWarning::SchemaDrift {
            node_id: "oil".into(),
            filter_group: "Condensate".into(),
            declared: vec!["Oil".into()],
        }]
    );
    assert_eq!(expansion.table.filter_groups.len(), 1);
}

#[test]
fn test_sign_change_carried_to_grain() {
    let model = tree(
        vec![HierarchyNode::new("refunds", "Refunds").with_sign_change()],
        vec![SourceMapping::new("refunds", "ACCOUNT_CODE", "4900")],
    );
    let expansion = expand(&model, &config());
    assert!(expansion.table.rows_for("refunds").all(|r| r.sign_change));
}
