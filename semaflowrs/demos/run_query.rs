//! Builds the cumulative-metric plan from the spec's worked scenario
//! (`trailing_2_months_revenue` by `ds` at DAY) and prints the resulting
//! SQL tree: a time spine joined to the revenue source on a trailing
//! window, then summed and grouped by spine day.
//!
//! Run with: `cargo run --example run_query`

use dataflow_sql::dataflow_plan::{DataflowPlanNode, MeasureAggregation};
use dataflow_sql::instance::{DefinedFrom, MeasureInstance, TimeDimensionInstance};
use dataflow_sql::instance_set::InstanceSet;
use dataflow_sql::manifest::StaticManifest;
use dataflow_sql::render::DuckDbDialect;
use dataflow_sql::specs::{AggregationState, MeasureSpec, TimeDimensionSpec, TimeGranularity};
use dataflow_sql::sql_expr::AggregationType;
use dataflow_sql::time_spine::{SingleTableTimeSpineSource, TimeSpineDescription};
use dataflow_sql::{
    compile, ColumnAssociationResolver, DefaultColumnAssociationResolver, EngineKind, OptimizationLevel,
    OptimizerPipeline, SqlRenderer,
};

fn revenue_source_plan(resolver: &dyn ColumnAssociationResolver) -> DataflowPlanNode {
    let revenue = MeasureSpec::new("revenue");
    let ds = TimeDimensionSpec::new("ds", TimeGranularity::Day);

    let instance_set = InstanceSet {
        measure_instances: vec![MeasureInstance {
            associated_columns: vec![resolver.resolve_measure(&revenue)],
            spec: revenue,
            defined_from: DefinedFrom {
                semantic_model: Some("revenue_source".to_string()),
                metric: None,
            },
            aggregation_state: AggregationState::NonAggregated,
            fill_nulls_with: None,
        }],
        time_dimension_instances: vec![TimeDimensionInstance {
            associated_columns: vec![resolver.resolve_time_dimension(&ds)],
            spec: ds,
            defined_from: DefinedFrom {
                semantic_model: Some("revenue_source".to_string()),
                metric: None,
            },
        }],
        ..InstanceSet::default()
    };

    DataflowPlanNode::ReadSource {
        description: "read revenue_source".to_string(),
        instance_set,
        sql_table: "fct_revenue".to_string(),
    }
}

fn main() {
    let resolver = DefaultColumnAssociationResolver;
    let manifest = StaticManifest::default();
    let time_spine = SingleTableTimeSpineSource::new(TimeSpineDescription::new(
        "time_spine_day",
        "ds",
        TimeGranularity::Day,
    ));
    let optimizer = OptimizerPipeline::new();

    let source = revenue_source_plan(&resolver);
    let windowed = DataflowPlanNode::JoinOverTimeRange {
        description: "join over time range for trailing_2_months_revenue".to_string(),
        parent: Box::new(source),
        time_dimension_spec_for_join: TimeDimensionSpec::new("ds", TimeGranularity::Day),
        window_interval_sql: Some("2 month".to_string()),
        time_range_constraint: None,
    };
    let aggregated = DataflowPlanNode::AggregateMeasures {
        description: "aggregate trailing revenue".to_string(),
        parent: Box::new(windowed),
        measure_aggregations: vec![MeasureAggregation {
            measure_spec: MeasureSpec::new("revenue"),
            agg: AggregationType::Sum,
            fill_nulls_with: None,
        }],
    };

    let (instance_set, sql_plan) = compile(
        &resolver,
        &manifest,
        &time_spine,
        &optimizer,
        EngineKind::DuckDb,
        &aggregated,
        OptimizationLevel::Standard,
    )
    .expect("plan compiles");

    let dialect = DuckDbDialect;
    let sql = SqlRenderer::new(&dialect).render(&sql_plan);
    println!("{sql}");
    println!();
    for instance in &instance_set.measure_instances {
        println!(
            "-- measure {} -> column {} (state {:?})",
            instance.spec.element_name,
            instance.associated_column().column_name,
            instance.aggregation_state,
        );
    }
}
