//! The SQL-join builder: given annotated datasets — a plan node,
//! the alias it will be selected under, and (where relevant) which column
//! holds its time value — produces the `JoinDescription` a SELECT attaches
//! to its `joins` list. A set of free functions rather than a stateful
//! builder, since every join description is pure given its inputs.

use crate::sql_expr::SqlExpr;
use crate::sql_plan::{JoinDescription, SqlJoinType, SqlPlanNode};

/// An annotated dataset: a plan node ready to sit on one side of a join,
/// along with the alias its columns will be addressed under.
pub struct AnnotatedDataset {
    pub node: SqlPlanNode,
    pub alias: String,
}

impl AnnotatedDataset {
    pub fn new(node: SqlPlanNode, alias: impl Into<String>) -> Self {
        Self {
            node,
            alias: alias.into(),
        }
    }
}

/// Entity-equality join between a base output and a joined-on-entities
/// right-hand side: `left.entity_col = right.entity_col`.
pub fn make_base_output_join(
    right: AnnotatedDataset,
    left_alias: &str,
    right_entity_column: &str,
    left_entity_column: &str,
    join_type: SqlJoinType,
) -> JoinDescription {
    let on = SqlExpr::eq(
        SqlExpr::column(left_alias, left_entity_column),
        SqlExpr::column(&right.alias, right_entity_column),
    );
    JoinDescription {
        right: Box::new(right.node),
        right_alias: right.alias,
        join_type,
        on: Some(on),
        description: Some("entity equality".to_string()),
    }
}

/// Window bound for a cumulative-time-range join: either a fixed lookback
/// (`BETWEEN base_time AND base_time + window`) or grain-to-date
/// (`spine_time >= base_time`, truncated to the date part's own period start).
pub enum CumulativeWindow {
    /// Window length expressed as a SQL interval literal, e.g. `"7 day"`.
    FixedWindow { interval_sql: String },
    GrainToDate,
}

/// Join a time spine (left) against a measure dataset (right) for a
/// cumulative metric: the spine provides every reporting day, the right side
/// contributes rows whose base time falls inside the window ending on that
/// spine day.
pub fn make_cumulative_time_range_join(
    right: AnnotatedDataset,
    spine_alias: &str,
    spine_time_column: &str,
    base_time_column: &str,
    window: CumulativeWindow,
) -> JoinDescription {
    let spine_time = SqlExpr::column(spine_alias, spine_time_column);
    let base_time = SqlExpr::column(&right.alias, base_time_column);
    let on = match window {
        CumulativeWindow::GrainToDate => SqlExpr::Comparison {
            left: Box::new(spine_time),
            comparison: crate::sql_expr::SqlComparison::GreaterThanOrEqual,
            right: Box::new(base_time),
        },
        CumulativeWindow::FixedWindow { interval_sql } => {
            let window_end = SqlExpr::Function {
                name: "date_add".to_string(),
                args: vec![base_time.clone(), SqlExpr::string_literal(interval_sql)],
            };
            SqlExpr::Between {
                expr: Box::new(spine_time),
                start: Box::new(base_time),
                end: Box::new(window_end),
            }
        }
    };
    JoinDescription {
        right: Box::new(right.node),
        right_alias: right.alias,
        join_type: SqlJoinType::Inner,
        on: Some(on),
        description: Some("cumulative time range".to_string()),
    }
}

/// Time-spine alignment mode for join-to-time-spine: exact match, or a
/// bounded offset (finer spine granularity truncated before comparison).
pub enum TimeSpineAlignment {
    Equal,
    WithinGranularity,
}

pub fn make_join_to_time_spine_join(
    right: AnnotatedDataset,
    spine_alias: &str,
    spine_time_column: &str,
    parent_time_column: &str,
    alignment: TimeSpineAlignment,
    join_type: SqlJoinType,
) -> JoinDescription {
    let spine_time = SqlExpr::column(spine_alias, spine_time_column);
    let parent_time = SqlExpr::column(&right.alias, parent_time_column);
    let on = match alignment {
        TimeSpineAlignment::Equal => SqlExpr::eq(spine_time, parent_time),
        TimeSpineAlignment::WithinGranularity => SqlExpr::Comparison {
            left: Box::new(spine_time),
            comparison: crate::sql_expr::SqlComparison::GreaterThanOrEqual,
            right: Box::new(parent_time),
        },
    };
    JoinDescription {
        right: Box::new(right.node),
        right_alias: right.alias,
        join_type,
        on: Some(on),
        description: Some("join to time spine".to_string()),
    }
}

/// Arbitrary AND-ed column-equality join, used by semi-additive-join.
pub fn make_column_equality_join(
    right: AnnotatedDataset,
    left_alias: &str,
    column_pairs: &[(String, String)],
    join_type: SqlJoinType,
) -> JoinDescription {
    let conditions: Vec<SqlExpr> = column_pairs
        .iter()
        .map(|(left_col, right_col)| {
            SqlExpr::eq(
                SqlExpr::column(left_alias, left_col.as_str()),
                SqlExpr::column(&right.alias, right_col.as_str()),
            )
        })
        .collect();
    let on = if conditions.len() == 1 {
        conditions.into_iter().next()
    } else {
        Some(SqlExpr::and(conditions))
    };
    JoinDescription {
        right: Box::new(right.node),
        right_alias: right.alias,
        join_type,
        on,
        description: Some("column equality".to_string()),
    }
}

/// Combine-aggregated-outputs' join: `COALESCE(a1.c, a2.c, ...) = aN.c` for
/// every linkable column shared across all prior datasets and the one being
/// joined in. `FULL OUTER` by construction, since any parent may be missing a
/// given group-by combination that another parent has.
pub fn make_combine_datasets_join(
    right: AnnotatedDataset,
    prior_aliases: &[String],
    shared_columns: &[String],
) -> JoinDescription {
    let conditions: Vec<SqlExpr> = shared_columns
        .iter()
        .map(|column| {
            let coalesce_args = prior_aliases
                .iter()
                .map(|alias| SqlExpr::column(alias.as_str(), column.as_str()))
                .collect();
            let coalesced = SqlExpr::Function {
                name: "coalesce".to_string(),
                args: coalesce_args,
            };
            SqlExpr::eq(coalesced, SqlExpr::column(&right.alias, column.as_str()))
        })
        .collect();
    let on = if conditions.is_empty() {
        None
    } else if conditions.len() == 1 {
        conditions.into_iter().next()
    } else {
        Some(SqlExpr::and(conditions))
    };
    JoinDescription {
        right: Box::new(right.node),
        right_alias: right.alias,
        join_type: SqlJoinType::Full,
        on,
        description: Some("combine datasets on coalesced linkables".to_string()),
    }
}

/// Join-conversion-events' join: entity equality, a time-window inequality
/// (conversion time within `window` after the base event), and optional
/// constant-property equalities carried alongside the entity.
pub fn make_join_conversion_join(
    right: AnnotatedDataset,
    base_alias: &str,
    base_entity_column: &str,
    base_time_column: &str,
    conversion_entity_column: &str,
    conversion_time_column: &str,
    window_interval_sql: Option<String>,
    constant_property_pairs: &[(String, String)],
) -> JoinDescription {
    let mut conditions = vec![SqlExpr::eq(
        SqlExpr::column(base_alias, base_entity_column),
        SqlExpr::column(&right.alias, conversion_entity_column),
    )];

    let base_time = SqlExpr::column(base_alias, base_time_column);
    let conversion_time = SqlExpr::column(&right.alias, conversion_time_column);
    conditions.push(SqlExpr::Comparison {
        left: Box::new(conversion_time.clone()),
        comparison: crate::sql_expr::SqlComparison::GreaterThanOrEqual,
        right: Box::new(base_time.clone()),
    });
    if let Some(interval) = window_interval_sql {
        let window_end = SqlExpr::Function {
            name: "date_add".to_string(),
            args: vec![base_time, SqlExpr::string_literal(interval)],
        };
        conditions.push(SqlExpr::Comparison {
            left: Box::new(conversion_time),
            comparison: crate::sql_expr::SqlComparison::LessThanOrEqual,
            right: Box::new(window_end),
        });
    }

    for (base_col, conversion_col) in constant_property_pairs {
        conditions.push(SqlExpr::eq(
            SqlExpr::column(base_alias, base_col.as_str()),
            SqlExpr::column(&right.alias, conversion_col.as_str()),
        ));
    }

    JoinDescription {
        right: Box::new(right.node),
        right_alias: right.alias,
        join_type: SqlJoinType::Inner,
        on: Some(SqlExpr::and(conditions)),
        description: Some("conversion entity + window".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_output_join_compares_entity_columns_across_aliases() {
        let right = AnnotatedDataset::new(SqlPlanNode::table("listings"), "listings_src");
        let join = make_base_output_join(right, "orders_src", "listing_id", "listing_id", SqlJoinType::Left);
        assert_eq!(join.join_type, SqlJoinType::Left);
        assert!(join.on.is_some());
    }

    #[test]
    fn combine_datasets_join_has_no_condition_with_no_shared_columns() {
        let right = AnnotatedDataset::new(SqlPlanNode::table("metric_b"), "a2");
        let join = make_combine_datasets_join(right, &["a1".to_string()], &[]);
        assert!(join.on.is_none());
        assert_eq!(join.join_type, SqlJoinType::Full);
    }

    #[test]
    fn combine_datasets_join_coalesces_across_all_prior_aliases() {
        let right = AnnotatedDataset::new(SqlPlanNode::table("metric_b"), "a3");
        let join = make_combine_datasets_join(
            right,
            &["a1".to_string(), "a2".to_string()],
            &["metric_time__day".to_string()],
        );
        match join.on {
            Some(SqlExpr::Comparison { left, .. }) => match *left {
                SqlExpr::Function { name, args } => {
                    assert_eq!(name, "coalesce");
                    assert_eq!(args.len(), 2);
                }
                other => panic!("expected coalesce function, got {other:?}"),
            },
            other => panic!("expected a comparison, got {other:?}"),
        }
    }

    #[test]
    fn join_conversion_adds_window_upper_bound_only_when_requested() {
        let right = AnnotatedDataset::new(SqlPlanNode::table("conversions"), "conv_src");
        let join = make_join_conversion_join(
            right,
            "visits_src",
            "user_id",
            "visit_time",
            "user_id",
            "conversion_time",
            None,
            &[],
        );
        match join.on {
            Some(SqlExpr::Logical { args, .. }) => assert_eq!(args.len(), 2),
            other => panic!("expected an AND of two conditions, got {other:?}"),
        }
    }
}
