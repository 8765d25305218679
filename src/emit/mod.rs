//! Generated objects for each compile stage.
//!
//! Each stage's artifacts become one [`GeneratedObject`]:
//!
//! | Stage     | Object               | Statement     | Reads                    |
//! |-----------|----------------------|---------------|--------------------------|
//! | RESOLVE   | translation mapping  | CREATE TABLE  | -                        |
//! | EXPAND    | granularity          | CREATE TABLE  | translation mapping      |
//! | AGGREGATE | pre-aggregation fact | CREATE VIEW   | fact table, granularity  |
//! | CASCADE   | data mart            | CREATE VIEW   | pre-aggregation fact     |

use std::collections::BTreeSet;

use crate::aggregate::Aggregation;
use crate::cascade::{node_extension_levels, node_levels, FormulaPlan, Operand, PlannedFormula};
use crate::config::{JoinPattern, PipelineConfig};
use crate::expand::{GrainRow, GranularityTable};
use crate::ir::expr::{
    case_when, col, count, dense_rank_over, exists, func, lit_bool, lit_float, lit_int, lit_str,
    nullif, sum, table_col, Expr, ExprExt, Literal,
};
use crate::ir::statement::{FromItem, Query, Relation, SelectExpr, Statement, TableRef};
use crate::ir::{GeneratedObject, ObjectKind};
use crate::model::{FormulaLogic, HierarchyModel, MAX_LEVELS};
use crate::resolve::ResolvedMapping;

const FACT_ALIAS: &str = "f";
const GRAIN_ALIAS: &str = "g";
const NODE_ALIAS: &str = "n";

fn text(value: Option<&str>) -> Literal {
    match value {
        Some(v) => Literal::String(v.to_string()),
        None => Literal::Null,
    }
}

fn level_columns(prefix: &str) -> impl Iterator<Item = String> + '_ {
    (1..=MAX_LEVELS).map(move |i| format!("{}_{}", prefix, i))
}

// ============================================================================
// RESOLVE: translation mapping
// ============================================================================

/// Every resolved mapping with its physical column.
pub fn translation_mapping(project_id: &str, resolved: &[ResolvedMapping]) -> GeneratedObject {
    let name = ObjectKind::TranslationMapping.object_name(project_id);
    let columns = [
        "node_id",
        "mapping_index",
        "id_source",
        "source_database",
        "source_schema",
        "source_table",
        "physical_table",
        "physical_column",
        "filter_value",
        "is_pattern",
        "exclusion",
        "precedence",
        "filter_group",
    ];
    let rows = resolved
        .iter()
        .map(|m| {
            vec![
                Literal::String(m.node_id.clone()),
                Literal::Int(i64::from(m.mapping_index)),
                Literal::String(m.id_source.trim().to_string()),
                text(m.source.database.as_deref()),
                text(m.source.schema.as_deref()),
                text(m.source.table.as_deref()),
                text(m.column.table.as_deref()),
                Literal::String(m.column.column.clone()),
                Literal::String(m.value.to_string()),
                Literal::Bool(m.value.is_pattern()),
                Literal::Bool(m.exclusion),
                m.precedence.map_or(Literal::Null, |p| Literal::Int(i64::from(p))),
                text(m.filter_group.as_deref()),
            ]
        })
        .collect();

    GeneratedObject::new(
        ObjectKind::TranslationMapping,
        vec![],
        Statement::CreateTable {
            name,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        },
    )
}

// ============================================================================
// EXPAND: granularity
// ============================================================================

/// One row per grain row; absent keys are NULL, patterns keep their `%`.
pub fn granularity_table(project_id: &str, table: &GranularityTable) -> GeneratedObject {
    let name = ObjectKind::GranularityTable.object_name(project_id);
    let mut columns = vec!["node_id".to_string()];
    columns.extend(table.schema.iter().cloned());
    columns.push("sign_change".to_string());

    let rows = table
        .rows
        .iter()
        .map(|row| {
            let mut values = vec![Literal::String(row.node_id.clone())];
            values.extend(
                table
                    .schema
                    .iter()
                    .map(|c| text(row.keys.get(c).map(|v| v.to_string()).as_deref())),
            );
            values.push(Literal::Bool(row.sign_change));
            values
        })
        .collect();

    GeneratedObject::new(
        ObjectKind::GranularityTable,
        vec![ObjectKind::TranslationMapping.object_name(project_id)],
        Statement::CreateTable {
            name,
            columns,
            rows,
        },
    )
}

// ============================================================================
// AGGREGATE: pre-aggregation fact
// ============================================================================

/// `f.key = g.key`, or for a column holding patterns, a match that uses
/// `LIKE` only on the rows whose value ends in `%`.
fn key_match(fact_key: &str, join_key: &str, patterned: bool) -> Expr {
    let fact = table_col(FACT_ALIAS, fact_key);
    let grain = table_col(GRAIN_ALIAS, join_key);
    if !patterned {
        return fact.eq(grain);
    }
    let is_pattern = func("RIGHT", vec![grain.clone(), lit_int(1)]).eq(lit_str("%"));
    fact.clone()
        .eq(grain.clone())
        .or(is_pattern.and(fact.like(grain)).paren())
        .paren()
}

/// Union of one grouped join per branch.
///
/// Each branch joins fact rows to the distinct nodes of the granularity
/// table through an `EXISTS` over that node's grain rows, so a fact row
/// counts once per node however many of its grain rows admit it.
pub fn pre_aggregation_fact(
    project_id: &str,
    config: &PipelineConfig,
    fact_table: &TableRef,
    grain: &GranularityTable,
    aggregation: &Aggregation,
) -> GeneratedObject {
    let grain_name = ObjectKind::GranularityTable.object_name(project_id);

    let branch_queries: Vec<Query> = config
        .join_patterns
        .iter()
        .zip(&aggregation.plans)
        .map(|(branch, plan)| {
            let routed: Vec<_> = grain
                .rows
                .iter()
                .filter(|r| r.populates(&branch.join_keys))
                .collect();

            let matches = branch
                .key_pairs()
                .map(|(join_key, fact_key)| {
                    let patterned = routed.iter().any(|r| r.has_pattern(join_key));
                    key_match(fact_key, join_key, patterned)
                })
                .reduce(|acc, e| acc.and(e))
                .unwrap_or_else(|| lit_bool(false));
            let admitted = Query::new()
                .select(vec![lit_int(1)])
                .from(FromItem::named(&grain_name).with_alias(GRAIN_ALIAS))
                .filter(
                    table_col(GRAIN_ALIAS, "node_id")
                        .eq(table_col(NODE_ALIAS, "node_id"))
                        .and(matches),
                );
            let nodes = Query::new()
                .distinct()
                .select(vec![col("node_id"), col("sign_change")])
                .from(FromItem::named(&grain_name));

            let mut select = vec![
                SelectExpr::new(table_col(NODE_ALIAS, "node_id")).with_alias("node_id"),
                SelectExpr::new(lit_str(&branch.name)).with_alias("branch"),
            ];
            select.extend(
                config
                    .group_by
                    .iter()
                    .map(|c| SelectExpr::new(table_col(FACT_ALIAS, c)).with_alias(c)),
            );
            select.extend(aggregation.measures.iter().map(|m| {
                let value = table_col(FACT_ALIAS, m);
                let signed = if config.has_sign_change {
                    case_when(
                        table_col(NODE_ALIAS, "sign_change"),
                        value.clone().neg(),
                        Some(value),
                    )
                } else {
                    value
                };
                SelectExpr::new(sum(signed)).with_alias(m)
            }));

            let mut group_by = vec![table_col(NODE_ALIAS, "node_id")];
            group_by.extend(config.group_by.iter().map(|c| table_col(FACT_ALIAS, c)));

            let mut query = Query::new()
                .select(select)
                .from(FromItem::table(fact_table.clone()).with_alias(FACT_ALIAS))
                .inner_join(
                    FromItem::new(Relation::Subquery(Box::new(nodes))).with_alias(NODE_ALIAS),
                    exists(admitted),
                )
                .group_by(group_by);
            if let Some(predicate) = &plan.request.predicate {
                query = query.filter(predicate.to_expr(Some(FACT_ALIAS)));
            }
            for exclusion in exclusion_filters(branch, &routed) {
                query = query.filter(exclusion);
            }
            query
        })
        .collect();

    GeneratedObject::new(
        ObjectKind::PreAggregationFact,
        vec![grain_name],
        Statement::CreateView {
            name: ObjectKind::PreAggregationFact.object_name(project_id),
            query: Query::union_all_of(branch_queries).unwrap_or_default(),
        },
    )
}

/// `NOT (n.node_id = '..' AND f.col LIKE '..')` for each attached exclusion
/// on a join-key column.
fn exclusion_filters(branch: &JoinPattern, routed: &[&GrainRow]) -> Vec<Expr> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for row in routed {
        for exclusion in &row.exclusions {
            let Some((_, fact_key)) = branch.key_pairs().find(|(jk, _)| *jk == exclusion.column) else {
                continue;
            };
            if !seen.insert((exclusion.node_id.clone(), fact_key, exclusion.value.clone())) {
                continue;
            }
            let fact = table_col(FACT_ALIAS, fact_key);
            let matches = if exclusion.value.is_pattern() {
                fact.like(lit_str(&exclusion.value.to_string()))
            } else {
                fact.eq(lit_str(&exclusion.value.to_string()))
            };
            out.push(
                table_col(NODE_ALIAS, "node_id")
                    .eq(lit_str(&exclusion.node_id))
                    .and(matches)
                    .paren()
                    .not(),
            );
        }
    }
    out
}

// ============================================================================
// CASCADE: data mart
// ============================================================================

const RAW_CTE: &str = "raw_rollup";
const HIERARCHY_CTE: &str = "hierarchy";
const MART_CTE: &str = "mart_rows";

fn level_cte(level: u8) -> String {
    format!("level_{}", level)
}

fn inputs_cte(level: u8) -> String {
    format!("inputs_{}", level)
}

fn select_all(from: &str) -> Query {
    Query::new().select(vec![col("*")]).from(FromItem::named(from))
}

fn operand_ids(operand: &Operand) -> Vec<Expr> {
    match operand {
        Operand::Rollup { node_ids, .. } => node_ids.iter().map(|id| lit_str(id)).collect(),
        Operand::Formula { node_id, .. } => vec![lit_str(node_id)],
    }
}

/// How many input rows of the grouping key belong to the given nodes.
fn rows_present(ids: Vec<Expr>) -> Expr {
    count(case_when(col("node_id").in_list(ids), lit_int(1), None))
}

/// Conditional sum of one measure over the rows an operand reads.
///
/// A key the operand has no rows for reads 0; a key whose rows are all NULL
/// stays NULL.
fn operand_expr(operand: &Operand, measure: &str) -> Expr {
    let ids = operand_ids(operand);
    case_when(
        rows_present(ids.clone()).eq(lit_int(0)),
        lit_float(0.0),
        Some(sum(case_when(col("node_id").in_list(ids), col(measure), None))),
    )
}

/// One formula over its level's inputs, emitting only the grouping keys at
/// least one operand has rows for.
fn formula_query(formula: &PlannedFormula, input: &str, measures: &[String], group_by: &[String]) -> Query {
    let mut select = vec![SelectExpr::new(lit_str(&formula.node_id)).with_alias("node_id")];
    select.extend(group_by.iter().map(|c| SelectExpr::new(col(c)).with_alias(c)));
    select.extend(measures.iter().map(|m| {
        let first = operand_expr(&formula.first, m);
        let second = formula.second.as_ref().map(|o| operand_expr(o, m));
        let expr = match (formula.logic, second) {
            (_, None) => first,
            (FormulaLogic::Add, Some(second)) => first.add(second),
            (FormulaLogic::Subtract, Some(second)) => first.sub(second),
            (FormulaLogic::Multiply, Some(second)) => first.mul(second),
            (FormulaLogic::Divide, Some(second)) => first.div(nullif(second, lit_float(0.0))),
        };
        SelectExpr::new(expr).with_alias(m)
    }));

    let mut read = operand_ids(&formula.first);
    if let Some(second) = &formula.second {
        read.extend(operand_ids(second));
    }

    Query::new()
        .select(select)
        .from(FromItem::named(input))
        .group_by(group_by.iter().map(|c| col(c)).collect())
        .having(rows_present(read).ne(lit_int(0)))
}

/// Hierarchy labels computed at compile time, one row per participating node.
fn hierarchy_values(model: &HierarchyModel, with_extensions: bool) -> Query {
    let mut columns = vec!["node_id".to_string(), "node_name".to_string(), "sort_order".to_string()];
    columns.extend(level_columns("level"));
    if with_extensions {
        columns.extend(level_columns("ext_level"));
    }
    columns.push("is_calculated".to_string());

    let rows = model
        .nodes()
        .iter()
        .filter(|n| n.participates())
        .map(|node| {
            let mut row = vec![
                Literal::String(node.id.clone()),
                Literal::String(node.name.clone()),
                Literal::Int(node.sort_order),
            ];
            row.extend(node_levels(model, node).into_iter().map(Literal::String));
            if with_extensions {
                let ext = node_extension_levels(node);
                row.extend((0..MAX_LEVELS).map(|i| text(ext.get(i).map(String::as_str))));
            }
            row.push(Literal::Bool(node.is_calculation()));
            row
        })
        .collect();

    Query::new()
        .select(vec![col("*")])
        .from(FromItem::new(Relation::Values { columns, rows }).with_alias("v"))
}

/// Raw rollup, one CTE per precedence level, and the keyed, labelled output.
pub fn data_mart(
    project_id: &str,
    model: &HierarchyModel,
    aggregation: &Aggregation,
    plan: &FormulaPlan,
) -> GeneratedObject {
    let pre_agg = ObjectKind::PreAggregationFact.object_name(project_id);
    let measures = &aggregation.measures;
    let group_by = &aggregation.group_by;
    let with_extensions = model
        .nodes()
        .iter()
        .any(|n| !node_extension_levels(n).is_empty());

    let mut raw_select = vec![SelectExpr::new(col("node_id")).with_alias("node_id")];
    raw_select.extend(group_by.iter().map(|c| SelectExpr::new(col(c)).with_alias(c)));
    raw_select.extend(measures.iter().map(|m| SelectExpr::new(sum(col(m))).with_alias(m)));
    let mut raw_group = vec![col("node_id")];
    raw_group.extend(group_by.iter().map(|c| col(c)));

    let mut query = Query::new().with_cte(
        RAW_CTE,
        Query::new()
            .select(raw_select)
            .from(FromItem::named(&pre_agg))
            .group_by(raw_group),
    );

    let mut produced = vec![RAW_CTE.to_string()];
    for (&level, formulas) in &plan.levels {
        let input = inputs_cte(level);
        let union = Query::union_all_of(produced.iter().map(|p| select_all(p)).collect())
            .unwrap_or_default();
        query = query.with_cte(&input, union);

        let level_query = Query::union_all_of(
            formulas
                .iter()
                .map(|f| formula_query(f, &input, measures, group_by))
                .collect(),
        )
        .unwrap_or_default();
        query = query.with_cte(&level_cte(level), level_query);
        produced.push(level_cte(level));
    }

    let mart_union =
        Query::union_all_of(produced.iter().map(|p| select_all(p)).collect()).unwrap_or_default();
    query = query
        .with_cte(MART_CTE, mart_union)
        .with_cte(HIERARCHY_CTE, hierarchy_values(model, with_extensions));

    let mut select = vec![
        SelectExpr::new(dense_rank_over(vec![
            table_col("h", "sort_order"),
            table_col("h", "node_id"),
        ]))
        .with_alias("surrogate_key"),
        SelectExpr::new(table_col("h", "node_id")).with_alias("node_id"),
        SelectExpr::new(table_col("h", "node_name")).with_alias("node_name"),
    ];
    select.extend(level_columns("level").map(|c| SelectExpr::new(table_col("h", &c)).with_alias(&c)));
    if with_extensions {
        select.extend(
            level_columns("ext_level").map(|c| SelectExpr::new(table_col("h", &c)).with_alias(&c)),
        );
    }
    select.push(SelectExpr::new(table_col("h", "is_calculated")).with_alias("is_calculated"));
    select.extend(group_by.iter().map(|c| SelectExpr::new(table_col("d", c)).with_alias(c)));
    select.extend(measures.iter().map(|m| SelectExpr::new(table_col("d", m)).with_alias(m)));

    let query = query
        .select(select)
        .from(FromItem::named(MART_CTE).with_alias("d"))
        .inner_join(
            FromItem::named(HIERARCHY_CTE).with_alias("h"),
            table_col("h", "node_id").eq(table_col("d", "node_id")),
        )
        .order_by(vec![
            col("surrogate_key"),
            table_col("h", "node_id"),
        ]);

    GeneratedObject::new(
        ObjectKind::DataMart,
        vec![pre_agg],
        Statement::CreateView {
            name: ObjectKind::DataMart.object_name(project_id),
            query,
        },
    )
}
