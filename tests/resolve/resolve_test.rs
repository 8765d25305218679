//! Tests for symbolic column resolution.

use std::collections::BTreeMap;

use strata::diagnostics::ConfigValidationError;
use strata::model::{FilterValue, HierarchyModel, HierarchyNode, SourceMapping};
use strata::resolve::{resolve, ColumnResolver, PhysicalColumn};

fn column_map() -> BTreeMap<String, String> {
    [
        ("ACCOUNT_CODE", "gl.account_code"),
        ("DEDUCT_CODE", "deduct_code"),
        ("PRODUCT_CODE", "product_code"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[test]
fn test_resolved_mapping_keeps_authored_fields() {
    let mapping = SourceMapping::new("oil", "account_code", "41%")
        .with_index(3)
        .with_precedence(2)
        .with_filter_group("Oil");

    let resolved = resolve(&mapping, &column_map()).unwrap();
    assert_eq!(resolved.node_id, "oil");
    assert_eq!(resolved.mapping_index, 3);
    assert_eq!(resolved.id_source, "account_code");
    assert_eq!(
        resolved.column,
        PhysicalColumn {
            table: Some("gl".into()),
            column: "account_code".into(),
        }
    );
    assert_eq!(resolved.value, FilterValue::Prefix("41".into()));
    assert_eq!(resolved.value.to_string(), mapping.id);
    assert_eq!(resolved.precedence, Some(2));
    assert_eq!(resolved.filter_group.as_deref(), Some("Oil"));
}

#[test]
fn test_every_mapped_symbol_resolves() {
    let map = column_map();
    for (symbol, physical) in &map {
        let resolved = resolve(&SourceMapping::new("n", symbol.as_str(), "X"), &map).unwrap();
        assert_eq!(resolved.column, PhysicalColumn::parse(physical));
    }
}

#[test]
fn test_lookup_ignores_case_and_whitespace() {
    let resolver = ColumnResolver::new(&column_map());
    let mapping = SourceMapping::new("n", "  Deduct_Code ", "D1");
    let resolved = resolver.resolve(&mapping).unwrap();
    assert_eq!(resolved.column.to_string(), "deduct_code");
}

#[test]
fn test_miss_carries_exact_token_and_suggestion() {
    let mapping = SourceMapping::new("n", "ACCT_CODE", "4100");
    let miss = resolve(&mapping, &column_map()).unwrap_err();
    assert_eq!(miss.token, "ACCT_CODE");
    assert_eq!(miss.nearest.as_deref(), Some("ACCOUNT_CODE"));
}

#[test]
fn test_no_suggestion_for_distant_token() {
    let resolver = ColumnResolver::new(&column_map());
    assert_eq!(resolver.nearest("VOLUME"), None);
}

#[test]
fn test_resolve_all_collects_every_miss() {
    let model = HierarchyModel::new(
        "los",
        vec![
            HierarchyNode::new("is", "Income Statement"),
            HierarchyNode::new("a", "A").with_parent("is"),
            HierarchyNode::new("b", "B").with_parent("is"),
            HierarchyNode::new("c", "C").with_parent("is"),
            HierarchyNode::new("old", "Old").with_parent("is").inactive(),
        ],
        vec![
            SourceMapping::new("a", "ACCOUNT_CODE", "4100"),
            SourceMapping::new("b", "PRODCT_CODE", "P1"),
            SourceMapping::new("c", "BOGUS_ATTR", "X"),
            SourceMapping::new("old", "ALSO_BOGUS", "Y"),
        ],
    );

    let resolution = ColumnResolver::new(&column_map()).resolve_all(&model);
    assert_eq!(resolution.resolved.len(), 1);
    assert_eq!(resolution.discovered, vec!["ACCOUNT_CODE".to_string()]);

    let tokens: Vec<&str> = resolution
        .errors
        .iter()
        .filter_map(|e| match e {
            ConfigValidationError::UnknownIdSource { token, .. } => Some(token.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, vec!["PRODCT_CODE", "BOGUS_ATTR"]);
}

#[test]
fn test_keys_differing_only_in_case_are_duplicates() {
    let mut map = column_map();
    map.insert("Product_Code".into(), "prod_alt".into());
    let model = HierarchyModel::new(
        "los",
        vec![
            HierarchyNode::new("is", "Income Statement"),
            HierarchyNode::new("a", "A").with_parent("is"),
        ],
        vec![SourceMapping::new("a", "PRODUCT_CODE", "P1")],
    );

    let resolution = ColumnResolver::new(&map).resolve_all(&model);
    assert_eq!(
        resolution.errors,
        vec![ConfigValidationError::DuplicateColumnSymbol {
            first: "PRODUCT_CODE".into(),
            second: "Product_Code".into(),
        }]
    );
    assert_eq!(resolution.resolved[0].column.column, "product_code");
}

#[test]
fn test_unknown_id_source_message_names_suggestion() {
    let error = ConfigValidationError::UnknownIdSource {
        node_id: "b".into(),
        mapping_index: 0,
        token: "PRODCT_CODE".into(),
        nearest: Some("PRODUCT_CODE".into()),
    };
    insta::assert_snapshot!(
        error.to_string(),
        @"node 'b' mapping 0: unknown id_source 'PRODCT_CODE' (did you mean 'PRODUCT_CODE'?)"
    );
}
