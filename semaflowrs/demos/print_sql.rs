//! Builds a small dataflow plan by hand and prints the SQL this crate
//! compiles it into. Construction here stands in for the upstream logical
//! planner, which is out of scope for this crate.
//!
//! Run with: `cargo run --example print_sql`

use dataflow_sql::dataflow_plan::{DataflowPlanNode, MeasureAggregation};
use dataflow_sql::instance::{DefinedFrom, MeasureInstance, TimeDimensionInstance};
use dataflow_sql::instance_set::InstanceSet;
use dataflow_sql::manifest::StaticManifest;
use dataflow_sql::specs::{AggregationState, MeasureSpec, TimeDimensionSpec, TimeGranularity};
use dataflow_sql::sql_expr::AggregationType;
use dataflow_sql::time_spine::{SingleTableTimeSpineSource, TimeSpineDescription};
use dataflow_sql::render::DuckDbDialect;
use dataflow_sql::{
    compile, ColumnAssociationResolver, DefaultColumnAssociationResolver, EngineKind, OptimizationLevel,
    OptimizerPipeline, SqlRenderer,
};

fn bookings_source_plan(resolver: &dyn ColumnAssociationResolver) -> DataflowPlanNode {
    let bookings = MeasureSpec::new("bookings");
    let ds = TimeDimensionSpec::new("ds", TimeGranularity::Day);

    let instance_set = InstanceSet {
        measure_instances: vec![MeasureInstance {
            associated_columns: vec![resolver.resolve_measure(&bookings)],
            spec: bookings,
            defined_from: DefinedFrom {
                semantic_model: Some("bookings_source".to_string()),
                metric: None,
            },
            aggregation_state: AggregationState::NonAggregated,
            fill_nulls_with: None,
        }],
        time_dimension_instances: vec![TimeDimensionInstance {
            associated_columns: vec![resolver.resolve_time_dimension(&ds)],
            spec: ds,
            defined_from: DefinedFrom {
                semantic_model: Some("bookings_source".to_string()),
                metric: None,
            },
        }],
        ..InstanceSet::default()
    };

    DataflowPlanNode::ReadSource {
        description: "read bookings_source".to_string(),
        instance_set,
        sql_table: "fct_bookings".to_string(),
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

    let source = bookings_source_plan(&resolver);
    let plan = DataflowPlanNode::AggregateMeasures {
        description: "aggregate bookings".to_string(),
        parent: Box::new(source),
        measure_aggregations: vec![MeasureAggregation {
            measure_spec: MeasureSpec::new("bookings"),
            agg: AggregationType::Sum,
            fill_nulls_with: None,
        }],
    };

    let (instance_set, sql_plan) =
        compile(&resolver, &manifest, &time_spine, &optimizer, EngineKind::DuckDb, &plan, OptimizationLevel::Standard)
            .expect("plan compiles");

    let dialect = DuckDbDialect;
    let sql = SqlRenderer::new(&dialect).render(&sql_plan);
    println!("{sql}");
    println!();
    println!(
        "-- {} measure instance(s), {} time dimension instance(s)",
        instance_set.measure_instances.len(),
        instance_set.time_dimension_instances.len(),
    );
}
