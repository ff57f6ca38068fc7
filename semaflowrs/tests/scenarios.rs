//! Literal plan -> expected SQL-tree-shape scenarios, mirroring the
//! compiler's worked examples: cumulative metrics, entity joins, combined
//! aggregated outputs, and the malformed/unsupported-input error paths.

use dataflow_sql::dataflow_plan::{
    ConstantProperty, DataflowPlanNode, JoinOnEntitiesTarget, MeasureAggregation, TimeRangeConstraint,
};
use dataflow_sql::instance::{DefinedFrom, DimensionInstance, EntityInstance, MeasureInstance, TimeDimensionInstance};
use dataflow_sql::instance_set::InstanceSet;
use dataflow_sql::manifest::StaticManifest;
use dataflow_sql::specs::{
    AggregationState, DimensionSpec, EntitySpec, MeasureSpec, Spec, TimeDimensionSpec, TimeGranularity,
};
use dataflow_sql::sql_expr::{AggregationType, SqlExpr};
use dataflow_sql::sql_plan::{SqlJoinType, SqlPlanNode};
use dataflow_sql::time_spine::{SingleTableTimeSpineSource, TimeSpineDescription};
use dataflow_sql::{
    compile, CompileError, ColumnAssociationResolver, DefaultColumnAssociationResolver, EngineKind,
    OptimizationLevel, OptimizerPipeline,
};

fn resolver() -> DefaultColumnAssociationResolver {
    DefaultColumnAssociationResolver
}

fn day_spine() -> SingleTableTimeSpineSource {
    SingleTableTimeSpineSource::new(TimeSpineDescription::new("time_spine_day", "ds", TimeGranularity::Day))
}

fn revenue_source(resolver: &dyn ColumnAssociationResolver, state: AggregationState) -> DataflowPlanNode {
    let revenue = MeasureSpec::new("revenue");
    let ds = TimeDimensionSpec::new("ds", TimeGranularity::Day);
    let instance_set = InstanceSet {
        measure_instances: vec![MeasureInstance {
            associated_columns: vec![resolver.resolve_measure(&revenue)],
            spec: revenue,
            defined_from: DefinedFrom::default(),
            aggregation_state: state,
            fill_nulls_with: None,
        }],
        time_dimension_instances: vec![TimeDimensionInstance {
            associated_columns: vec![resolver.resolve_time_dimension(&ds)],
            spec: ds,
            defined_from: DefinedFrom::default(),
        }],
        ..InstanceSet::default()
    };
    DataflowPlanNode::ReadSource {
        description: "read revenue_source".to_string(),
        instance_set,
        sql_table: "fct_revenue".to_string(),
    }
}

fn select_of(node: &SqlPlanNode) -> &dataflow_sql::sql_plan::SqlSelectStatementNode {
    match node {
        SqlPlanNode::Select(select) => select,
        other => panic!("expected a SELECT node, got {other:?}"),
    }
}

// Scenario 1: trailing_2_months_revenue by ds at DAY. FROM is the time
// spine, joined to the source by `spine.ds BETWEEN src.ds AND src.ds +
// interval '2 month'`, GROUP BY spine.ds, SUM of revenue.
#[test]
fn trailing_window_cumulative_metric_joins_spine_to_source() {
    let resolver = resolver();
    let manifest = StaticManifest::default();
    let spine = day_spine();
    let optimizer = OptimizerPipeline::new();

    let source = revenue_source(&resolver, AggregationState::NonAggregated);
    let windowed = DataflowPlanNode::JoinOverTimeRange {
        description: "join over time range".to_string(),
        parent: Box::new(source),
        time_dimension_spec_for_join: TimeDimensionSpec::new("ds", TimeGranularity::Day),
        window_interval_sql: Some("2 month".to_string()),
        time_range_constraint: None,
    };
    let plan = DataflowPlanNode::AggregateMeasures {
        description: "aggregate".to_string(),
        parent: Box::new(windowed),
        measure_aggregations: vec![MeasureAggregation {
            measure_spec: MeasureSpec::new("revenue"),
            agg: AggregationType::Sum,
            fill_nulls_with: None,
        }],
    };

    let (instance_set, sql_plan) =
        compile(&resolver, &manifest, &spine, &optimizer, EngineKind::DuckDb, &plan, OptimizationLevel::Standard)
            .expect("plan compiles");

    let top = select_of(&sql_plan);
    assert!(!top.group_by.is_empty(), "aggregate-measures must group by every non-measure column");
    assert_eq!(top.select_columns.len(), 2, "spine time column + summed revenue");

    let windowed_select = select_of(&top.from_source);
    assert_eq!(windowed_select.joins.len(), 1);
    assert_eq!(windowed_select.joins[0].join_type, SqlJoinType::Inner);
    match &windowed_select.joins[0].on {
        Some(SqlExpr::Between { .. }) => {}
        other => panic!("expected a BETWEEN join predicate for a fixed window, got {other:?}"),
    }

    assert_eq!(instance_set.measure_instances.len(), 1);
    assert_eq!(instance_set.measure_instances[0].aggregation_state, AggregationState::Complete);
}

// Scenario 4: windowless cumulative metric (revenue_all_time) degenerates
// the join predicate to `spine.ds >= src.ds`.
#[test]
fn windowless_cumulative_metric_uses_grain_to_date_predicate() {
    let resolver = resolver();
    let manifest = StaticManifest::default();
    let spine = day_spine();
    let optimizer = OptimizerPipeline::new();

    let source = revenue_source(&resolver, AggregationState::NonAggregated);
    let windowed = DataflowPlanNode::JoinOverTimeRange {
        description: "join over time range, no window".to_string(),
        parent: Box::new(source),
        time_dimension_spec_for_join: TimeDimensionSpec::new("ds", TimeGranularity::Day),
        window_interval_sql: None,
        time_range_constraint: None,
    };

    let (_, sql_plan) = compile(
        &resolver,
        &manifest,
        &spine,
        &optimizer,
        EngineKind::DuckDb,
        &windowed,
        OptimizationLevel::Standard,
    )
    .expect("plan compiles");

    let select = select_of(&sql_plan);
    match &select.joins[0].on {
        Some(SqlExpr::Comparison { comparison, .. }) => {
            assert_eq!(*comparison, dataflow_sql::sql_expr::SqlComparison::GreaterThanOrEqual);
        }
        other => panic!("expected a >= comparison for grain-to-date, got {other:?}"),
    }
}

// Scenario 2: an adjustable time filter restricts the spine sub-select's
// own WHERE clause to the requested range.
#[test]
fn adjustable_time_filter_restricts_spine_sub_select() {
    let resolver = resolver();
    let manifest = StaticManifest::default();
    let spine = day_spine();
    let optimizer = OptimizerPipeline::new();

    let source = revenue_source(&resolver, AggregationState::NonAggregated);
    let windowed = DataflowPlanNode::JoinOverTimeRange {
        description: "join over time range with adjustable filter".to_string(),
        parent: Box::new(source),
        time_dimension_spec_for_join: TimeDimensionSpec::new("ds", TimeGranularity::Day),
        window_interval_sql: Some("2 month".to_string()),
        time_range_constraint: Some(TimeRangeConstraint::new("2020-01-01", "2020-01-01")),
    };

    let (_, sql_plan) = compile(
        &resolver,
        &manifest,
        &spine,
        &optimizer,
        EngineKind::DuckDb,
        &windowed,
        OptimizationLevel::Standard,
    )
    .expect("plan compiles");

    let select = select_of(&sql_plan);
    let spine_select = select_of(&select.from_source);
    assert!(spine_select.where_clause.is_some(), "spine sub-select must restrict to the requested range");
}

// Join-on-entities: right-side linkable instances gain the join entity as
// their new leading link, and left-side COMPLETE measures demote to
// PARTIAL since a join can re-split already-aggregated values.
#[test]
fn join_on_entities_rewrites_links_and_demotes_left_measures() {
    let resolver = resolver();

    let order_total = MeasureSpec::new("order_total");
    let listing_entity = EntitySpec::new("listing");
    let left_set = InstanceSet {
        measure_instances: vec![MeasureInstance {
            associated_columns: vec![resolver.resolve_measure(&order_total)],
            spec: order_total,
            defined_from: DefinedFrom::default(),
            aggregation_state: AggregationState::Complete,
            fill_nulls_with: None,
        }],
        entity_instances: vec![EntityInstance {
            associated_columns: vec![resolver.resolve_entity(&listing_entity)],
            spec: listing_entity,
            defined_from: DefinedFrom::default(),
        }],
        ..InstanceSet::default()
    };
    let left = DataflowPlanNode::ReadSource {
        description: "read orders".to_string(),
        instance_set: left_set,
        sql_table: "fct_orders".to_string(),
    };

    let listing_entity_right = EntitySpec::new("listing");
    let country = DimensionSpec::new("country");
    let right_set = InstanceSet {
        dimension_instances: vec![DimensionInstance {
            associated_columns: vec![resolver.resolve_dimension(&country)],
            spec: country,
            defined_from: DefinedFrom::default(),
        }],
        entity_instances: vec![EntityInstance {
            associated_columns: vec![resolver.resolve_entity(&listing_entity_right)],
            spec: listing_entity_right,
            defined_from: DefinedFrom::default(),
        }],
        ..InstanceSet::default()
    };
    let right = DataflowPlanNode::ReadSource {
        description: "read listings".to_string(),
        instance_set: right_set,
        sql_table: "dim_listings".to_string(),
    };

    let plan = DataflowPlanNode::JoinOnEntities {
        description: "join orders to listings".to_string(),
        left: Box::new(left),
        join_targets: vec![JoinOnEntitiesTarget {
            join_node: Box::new(right),
            join_on_entity: Some("listing".to_string()),
            join_type: SqlJoinType::Left,
        }],
    };

    let manifest = StaticManifest::default();
    let spine = day_spine();
    let optimizer = OptimizerPipeline::new();
    let (instance_set, sql_plan) = compile(
        &resolver,
        &manifest,
        &spine,
        &optimizer,
        EngineKind::DuckDb,
        &plan,
        OptimizationLevel::Standard,
    )
    .expect("plan compiles");

    assert_eq!(instance_set.measure_instances[0].aggregation_state, AggregationState::Partial);
    assert_eq!(instance_set.dimension_instances.len(), 1);
    assert!(instance_set.dimension_instances[0].spec.entity_links.starts_with("listing"));

    let select = select_of(&sql_plan);
    assert_eq!(select.joins.len(), 1);
    assert_eq!(select.joins[0].join_type, SqlJoinType::Left);
}

// Combine-aggregated-outputs: two already-aggregated parents sharing a
// dimension are FULL OUTER joined and re-grouped on the coalesced column.
#[test]
fn combine_aggregated_outputs_full_outer_joins_on_coalesced_dimension() {
    let resolver = resolver();

    fn parent_with_measure(resolver: &dyn ColumnAssociationResolver, measure_name: &str, table: &str) -> DataflowPlanNode {
        let measure = MeasureSpec::new(measure_name);
        let country = DimensionSpec::new("country");
        let instance_set = InstanceSet {
            measure_instances: vec![MeasureInstance {
                associated_columns: vec![resolver.resolve_measure(&measure)],
                spec: measure,
                defined_from: DefinedFrom::default(),
                aggregation_state: AggregationState::Complete,
                fill_nulls_with: None,
            }],
            dimension_instances: vec![DimensionInstance {
                associated_columns: vec![resolver.resolve_dimension(&country)],
                spec: country,
                defined_from: DefinedFrom::default(),
            }],
            ..InstanceSet::default()
        };
        DataflowPlanNode::ReadSource {
            description: format!("read {table}"),
            instance_set,
            sql_table: table.to_string(),
        }
    }

    let plan = DataflowPlanNode::CombineAggregatedOutputs {
        description: "combine revenue and cost".to_string(),
        parents: vec![
            parent_with_measure(&resolver, "revenue", "agg_revenue_by_country"),
            parent_with_measure(&resolver, "cost", "agg_cost_by_country"),
        ],
    };

    let manifest = StaticManifest::default();
    let spine = day_spine();
    let optimizer = OptimizerPipeline::new();
    let (instance_set, sql_plan) = compile(
        &resolver,
        &manifest,
        &spine,
        &optimizer,
        EngineKind::DuckDb,
        &plan,
        OptimizationLevel::Standard,
    )
    .expect("plan compiles");

    assert_eq!(instance_set.measure_instances.len(), 2);
    let select = select_of(&sql_plan);
    assert_eq!(select.joins.len(), 1);
    assert_eq!(select.joins[0].join_type, SqlJoinType::Full);
    assert!(!select.group_by.is_empty(), "combine must re-dedupe on the coalesced linkable columns");
}

#[test]
fn combine_aggregated_outputs_rejects_fewer_than_two_parents() {
    let resolver = resolver();
    let single = revenue_source(&resolver, AggregationState::Complete);
    let plan = DataflowPlanNode::CombineAggregatedOutputs {
        description: "combine with one parent".to_string(),
        parents: vec![single],
    };
    let manifest = StaticManifest::default();
    let spine = day_spine();
    let optimizer = OptimizerPipeline::new();
    let err = compile(&resolver, &manifest, &spine, &optimizer, EngineKind::DuckDb, &plan, OptimizationLevel::Standard)
        .unwrap_err();
    assert!(matches!(err, CompileError::MalformedPlan(_)));
}

#[test]
fn min_max_requires_exactly_one_parent_column() {
    let resolver = resolver();
    let country = DimensionSpec::new("country");
    let region = DimensionSpec::new("region");
    let instance_set = InstanceSet {
        dimension_instances: vec![
            DimensionInstance {
                associated_columns: vec![resolver.resolve_dimension(&country)],
                spec: country,
                defined_from: DefinedFrom::default(),
            },
            DimensionInstance {
                associated_columns: vec![resolver.resolve_dimension(&region)],
                spec: region,
                defined_from: DefinedFrom::default(),
            },
        ],
        ..InstanceSet::default()
    };
    let source = DataflowPlanNode::ReadSource {
        description: "read dims".to_string(),
        instance_set: instance_set.clone(),
        sql_table: "dim_geo".to_string(),
    };
    let filtered = DataflowPlanNode::FilterElements {
        description: "project both dims".to_string(),
        parent: Box::new(source),
        include_specs: instance_set.spec_set(),
        distinct: false,
    };
    let plan = DataflowPlanNode::MinMax {
        description: "min/max over two columns".to_string(),
        parent: Box::new(filtered),
    };

    let manifest = StaticManifest::default();
    let spine = day_spine();
    let optimizer = OptimizerPipeline::new();
    let err = compile(&resolver, &manifest, &spine, &optimizer, EngineKind::DuckDb, &plan, OptimizationLevel::Standard)
        .unwrap_err();
    assert!(matches!(err, CompileError::InvariantViolation(_)));
}

#[test]
fn time_spine_rejects_a_granularity_finer_than_its_base() {
    let resolver = resolver();
    let month_spine = SingleTableTimeSpineSource::new(TimeSpineDescription::new(
        "time_spine_month",
        "ds",
        TimeGranularity::Month,
    ));

    let source = revenue_source(&resolver, AggregationState::NonAggregated);
    let plan = DataflowPlanNode::JoinToTimeSpine {
        description: "join to time spine at day grain".to_string(),
        parent: Box::new(source),
        requested_agg_time_dimension_specs: vec![TimeDimensionSpec::new("ds", TimeGranularity::Day)],
        join_type: SqlJoinType::Left,
        time_range_constraint: None,
        offset_to_grain: false,
    };

    let manifest = StaticManifest::default();
    let optimizer = OptimizerPipeline::new();
    let err = compile(
        &resolver,
        &manifest,
        &month_spine,
        &optimizer,
        EngineKind::DuckDb,
        &plan,
        OptimizationLevel::Standard,
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedInput(_)));
}

#[test]
fn conversion_events_merge_base_linkables_with_conversion_measure() {
    let resolver = resolver();

    let visit_time = TimeDimensionSpec::new("visit_time", TimeGranularity::Day);
    let user_entity = EntitySpec::new("user");
    let base_set = InstanceSet {
        time_dimension_instances: vec![TimeDimensionInstance {
            associated_columns: vec![resolver.resolve_time_dimension(&visit_time)],
            spec: visit_time.clone(),
            defined_from: DefinedFrom::default(),
        }],
        entity_instances: vec![EntityInstance {
            associated_columns: vec![resolver.resolve_entity(&user_entity)],
            spec: user_entity.clone(),
            defined_from: DefinedFrom::default(),
        }],
        ..InstanceSet::default()
    };
    let base = DataflowPlanNode::ReadSource {
        description: "read visits".to_string(),
        instance_set: base_set,
        sql_table: "fct_visits".to_string(),
    };

    let conversion_time = TimeDimensionSpec::new("conversion_time", TimeGranularity::Day);
    let conversions = MeasureSpec::new("conversions");
    let signup_id = DimensionSpec::new("signup_id");
    let conversion_set = InstanceSet {
        measure_instances: vec![MeasureInstance {
            associated_columns: vec![resolver.resolve_measure(&conversions)],
            spec: conversions.clone(),
            defined_from: DefinedFrom::default(),
            aggregation_state: AggregationState::NonAggregated,
            fill_nulls_with: None,
        }],
        dimension_instances: vec![DimensionInstance {
            associated_columns: vec![resolver.resolve_dimension(&signup_id)],
            spec: signup_id.clone(),
            defined_from: DefinedFrom::default(),
        }],
        time_dimension_instances: vec![TimeDimensionInstance {
            associated_columns: vec![resolver.resolve_time_dimension(&conversion_time)],
            spec: conversion_time.clone(),
            defined_from: DefinedFrom::default(),
        }],
        entity_instances: vec![EntityInstance {
            associated_columns: vec![resolver.resolve_entity(&user_entity)],
            spec: user_entity.clone(),
            defined_from: DefinedFrom::default(),
        }],
        ..InstanceSet::default()
    };
    let conversion = DataflowPlanNode::ReadSource {
        description: "read signups".to_string(),
        instance_set: conversion_set,
        sql_table: "fct_signups".to_string(),
    };

    let plan = DataflowPlanNode::JoinConversionEvents {
        description: "join conversion events".to_string(),
        base: Box::new(base),
        conversion: Box::new(conversion),
        entity_spec: user_entity,
        base_time_dimension_spec: visit_time,
        conversion_time_dimension_spec: conversion_time,
        window_interval_sql: Some("7 day".to_string()),
        constant_properties: Vec::<ConstantProperty>::new(),
        unique_identifier_keys: vec![Spec::Dimension(signup_id)],
        conversion_measure_spec: conversions,
    };

    let manifest = StaticManifest::default();
    let spine = day_spine();
    let optimizer = OptimizerPipeline::new();
    let (instance_set, sql_plan) = compile(
        &resolver,
        &manifest,
        &spine,
        &optimizer,
        EngineKind::DuckDb,
        &plan,
        OptimizationLevel::Standard,
    )
    .expect("plan compiles");

    assert_eq!(instance_set.measure_instances.len(), 1);
    assert_eq!(instance_set.time_dimension_instances.len(), 1, "base's time dimension carries through");
    let select = select_of(&sql_plan);
    let dedup_select = select_of(&select.from_source);
    assert!(dedup_select.distinct, "dedup sub-select collapses conversion fanout");
}

// Two instances of the same measure (e.g. one constrained elsewhere in the
// plan, one not) must get independently matched aggregations/aliases from
// `measure_aggregations`, paired by position rather than collapsed onto the
// first `measure_aggregations` entry with a matching element name.
#[test]
fn aggregate_measures_pairs_same_named_measures_by_position() {
    let resolver = resolver();
    let manifest = StaticManifest::default();
    let spine = day_spine();
    let optimizer = OptimizerPipeline::new();

    let revenue = MeasureSpec::new("revenue");
    let instance_set = InstanceSet {
        measure_instances: vec![
            MeasureInstance {
                associated_columns: vec![resolver.resolve_measure(&revenue)],
                spec: revenue.clone(),
                defined_from: DefinedFrom {
                    semantic_model: Some("unconstrained".to_string()),
                    metric: None,
                },
                aggregation_state: AggregationState::NonAggregated,
                fill_nulls_with: None,
            },
            MeasureInstance {
                associated_columns: vec![resolver.resolve_measure(&revenue)],
                spec: revenue.clone(),
                defined_from: DefinedFrom {
                    semantic_model: Some("constrained".to_string()),
                    metric: None,
                },
                aggregation_state: AggregationState::NonAggregated,
                fill_nulls_with: None,
            },
        ],
        ..InstanceSet::default()
    };
    let source = DataflowPlanNode::ReadSource {
        description: "read revenue twice".to_string(),
        instance_set,
        sql_table: "fct_revenue".to_string(),
    };

    let plan = DataflowPlanNode::AggregateMeasures {
        description: "aggregate".to_string(),
        parent: Box::new(source),
        measure_aggregations: vec![
            MeasureAggregation {
                measure_spec: MeasureSpec {
                    alias: Some("total_revenue".to_string()),
                    ..MeasureSpec::new("revenue")
                },
                agg: AggregationType::Sum,
                fill_nulls_with: None,
            },
            MeasureAggregation {
                measure_spec: MeasureSpec {
                    alias: Some("max_constrained_revenue".to_string()),
                    ..MeasureSpec::new("revenue")
                },
                agg: AggregationType::Max,
                fill_nulls_with: Some(0),
            },
        ],
    };

    let (instance_set, sql_plan) =
        compile(&resolver, &manifest, &spine, &optimizer, EngineKind::DuckDb, &plan, OptimizationLevel::Standard)
            .expect("plan compiles");

    assert_eq!(instance_set.measure_instances.len(), 2);
    assert_eq!(instance_set.measure_instances[0].spec.alias.as_deref(), Some("total_revenue"));
    assert_eq!(instance_set.measure_instances[1].spec.alias.as_deref(), Some("max_constrained_revenue"));
    assert_eq!(instance_set.measure_instances[1].fill_nulls_with, Some(0));

    let select = select_of(&sql_plan);
    assert_eq!(select.select_columns.len(), 2);
    match &select.select_columns[0].expr {
        SqlExpr::Aggregate { function, .. } => assert_eq!(function, &AggregationType::Sum),
        other => panic!("expected an aggregate expression, got {other:?}"),
    }
    match &select.select_columns[1].expr {
        SqlExpr::Aggregate { function, .. } => assert_eq!(function, &AggregationType::Max),
        other => panic!("expected an aggregate expression, got {other:?}"),
    }
    assert_eq!(select.select_columns[0].column_alias, "total_revenue");
    assert_eq!(select.select_columns[1].column_alias, "max_constrained_revenue");
}
